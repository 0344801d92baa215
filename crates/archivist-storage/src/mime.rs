//! Mime type ⇄ file extension table used to name stored files.

/// Extension used when the mime type is unknown.
pub const WILDCARD_EXTENSION: &str = "*";

/// Mime type reported for files with an unknown extension.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

// First entry for a mime type wins when resolving an extension, and the
// first entry for an extension wins when resolving a mime type.
const TABLE: &[(&str, &str)] = &[
    ("text/html", "html"),
    ("application/xhtml+xml", "html"),
    ("text/markdown", "md"),
    ("text/x-markdown", "md"),
    ("application/pdf", "pdf"),
    ("text/plain", "txt"),
    ("application/json", "json"),
    ("application/xml", "xml"),
    ("text/xml", "xml"),
    ("application/rtf", "rtf"),
    ("application/msword", "doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    ("application/vnd.oasis.opendocument.text", "odt"),
];

/// Resolve the file extension for a mime type, ignoring parameters such as
/// `; charset=utf-8`. Unknown mime types yield [`WILDCARD_EXTENSION`].
pub fn extension_for(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    TABLE
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, ext)| *ext)
        .unwrap_or(WILDCARD_EXTENSION)
}

/// Resolve the mime type for a file extension.
pub fn mime_type_for(extension: &str) -> &'static str {
    let extension = extension.to_ascii_lowercase();
    TABLE
        .iter()
        .find(|(_, ext)| *ext == extension)
        .map(|(mime, _)| *mime)
        .unwrap_or(DEFAULT_MIME_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_always_resolves_to_md() {
        assert_eq!(extension_for("text/markdown"), "md");
        assert_eq!(extension_for("text/markdown; charset=utf-8"), "md");
        assert_eq!(extension_for("TEXT/MARKDOWN"), "md");
        assert_eq!(mime_type_for("md"), "text/markdown");
    }

    #[test]
    fn unknown_mime_type_is_wildcard() {
        assert_eq!(extension_for("application/x-unheard-of"), WILDCARD_EXTENSION);
        assert_eq!(extension_for(""), WILDCARD_EXTENSION);
    }

    #[test]
    fn html_and_pdf_resolve_both_ways() {
        assert_eq!(extension_for("text/html; charset=UTF-8"), "html");
        assert_eq!(mime_type_for("html"), "text/html");
        assert_eq!(extension_for("application/pdf"), "pdf");
        assert_eq!(mime_type_for("PDF"), "application/pdf");
        assert_eq!(mime_type_for("bin"), DEFAULT_MIME_TYPE);
    }
}
