//! Record Codec: Record ⇄ change-unit (commit message + one file)
//!
//! Stored layout:
//!
//! ```text
//! path:     <service id>/<terms type>[ #<document id>].<ext>
//! message:  <tag> <service id> <terms type>
//!
//!           [Document ID <document id>
//!
//!           ]
//!
//!           [<provenance block>]
//! ```
//!
//! The subject tag encodes the record kind. Tags evolved over time, so
//! decoding accepts every tag ever written while encoding only emits the
//! current ones. Provenance (the snapshot ids a version was extracted from)
//! is recovered by scanning the body for hexadecimal tokens, which keeps it
//! readable after free-text history rewrites.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{StorageError, StorageResult};
use crate::mime;
use crate::record::{Record, RecordId};
use crate::repository::ChangeUnit;
use crate::SNAPSHOT_ID_MARKER;

/// Separator between terms type and document id in a file name.
pub const DOCUMENT_ID_SEPARATOR: &str = " #";

const DOCUMENT_ID_LINE_PREFIX: &str = "Document ID ";

const SINGLE_SOURCE_PROVENANCE: &str =
    "This version was recorded after an extraction from the snapshot";

// ============================================================================
// Message Tags
// ============================================================================

/// What a change-unit records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// First record ever for its `(service, terms type, document)`
    First,
    /// Version re-derived from existing snapshots, without a fetch
    ExtractOnly,
    /// Any other new content
    Update,
}

/// Subject line tags, current and legacy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    InitialRecord,
    TechnicalUpgrade,
    RecordChanges,
    /// Legacy spelling of [`MessageTag::InitialRecord`]
    StartTracking,
    /// Legacy spelling of [`MessageTag::TechnicalUpgrade`]
    Refilter,
    /// Legacy spelling of [`MessageTag::RecordChanges`]
    Update,
}

impl MessageTag {
    /// Tags emitted when encoding
    pub const CURRENT: [MessageTag; 3] = [
        MessageTag::InitialRecord,
        MessageTag::TechnicalUpgrade,
        MessageTag::RecordChanges,
    ];

    /// Tags recognized when decoding
    pub const ALL: [MessageTag; 6] = [
        MessageTag::InitialRecord,
        MessageTag::TechnicalUpgrade,
        MessageTag::RecordChanges,
        MessageTag::StartTracking,
        MessageTag::Refilter,
        MessageTag::Update,
    ];

    pub fn text(self) -> &'static str {
        match self {
            MessageTag::InitialRecord => "Initial record of",
            MessageTag::TechnicalUpgrade => "Apply technical or declaration upgrade on",
            MessageTag::RecordChanges => "Record new changes of",
            MessageTag::StartTracking => "Start tracking",
            MessageTag::Refilter => "Refilter",
            MessageTag::Update => "Update",
        }
    }

    pub fn kind(self) -> ChangeKind {
        match self {
            MessageTag::InitialRecord | MessageTag::StartTracking => ChangeKind::First,
            MessageTag::TechnicalUpgrade | MessageTag::Refilter => ChangeKind::ExtractOnly,
            MessageTag::RecordChanges | MessageTag::Update => ChangeKind::Update,
        }
    }

    pub fn is_legacy(self) -> bool {
        !Self::CURRENT.contains(&self)
    }

    /// The current tag for a kind of change
    pub fn for_kind(kind: ChangeKind) -> MessageTag {
        match kind {
            ChangeKind::First => MessageTag::InitialRecord,
            ChangeKind::ExtractOnly => MessageTag::TechnicalUpgrade,
            ChangeKind::Update => MessageTag::RecordChanges,
        }
    }

    /// Match a commit subject against every known tag.
    pub fn parse(subject: &str) -> Option<MessageTag> {
        Self::ALL.into_iter().find(|tag| {
            subject
                .strip_prefix(tag.text())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
        })
    }
}

impl ChangeKind {
    /// First-record wins over extract-only, which wins over update.
    pub fn of(record: &Record) -> ChangeKind {
        if record.is_first_record {
            ChangeKind::First
        } else if record.is_extract_only {
            ChangeKind::ExtractOnly
        } else {
            ChangeKind::Update
        }
    }
}

// ============================================================================
// Paths
// ============================================================================

/// `<terms type>[ #<document id>]`
pub fn file_stem(terms_type: &str, document_id: Option<&str>) -> String {
    match document_id {
        Some(id) => format!("{terms_type}{DOCUMENT_ID_SEPARATOR}{id}"),
        None => terms_type.to_string(),
    }
}

/// Logical store path of a record. Always `/`-separated.
pub fn generate_file_path(
    service_id: &str,
    terms_type: &str,
    document_id: Option<&str>,
    mime_type: Option<&str>,
) -> String {
    let extension = mime_type
        .map(mime::extension_for)
        .unwrap_or(mime::WILDCARD_EXTENSION);
    format!(
        "{service_id}/{}.{extension}",
        file_stem(terms_type, document_id)
    )
}

/// Location components parsed back from a store path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLocation {
    pub service_id: String,
    pub terms_type: String,
    pub document_id: Option<String>,
    pub extension: String,
}

pub fn parse_file_path(path: &str) -> StorageResult<RecordLocation> {
    let invalid = || StorageError::InvalidPath(path.to_string());

    let (service_id, file_name) = path.rsplit_once('/').ok_or_else(invalid)?;
    let (stem, extension) = file_name.rsplit_once('.').ok_or_else(invalid)?;
    if service_id.is_empty() || stem.is_empty() {
        return Err(invalid());
    }

    let (terms_type, document_id) = match stem.split_once(DOCUMENT_ID_SEPARATOR) {
        Some((terms_type, document_id)) => (terms_type, Some(document_id.to_string())),
        None => (stem, None),
    };

    Ok(RecordLocation {
        service_id: service_id.to_string(),
        terms_type: terms_type.to_string(),
        document_id,
        extension: extension.to_string(),
    })
}

/// Whether `path` stores records of `(service, terms type, document)`,
/// whatever its extension.
pub fn path_matches(
    path: &str,
    service_id: &str,
    terms_type: &str,
    document_id: Option<&str>,
) -> bool {
    parse_file_path(path).is_ok_and(|location| {
        !location.extension.is_empty()
            && location.service_id == service_id
            && location.terms_type == terms_type
            && location.document_id.as_deref() == document_id
    })
}

/// Whether two paths store the same `(service, terms type, document)`.
pub fn same_record_path(path: &str, other: &str) -> bool {
    parse_file_path(path).is_ok_and(|location| {
        path_matches(
            other,
            &location.service_id,
            &location.terms_type,
            location.document_id.as_deref(),
        )
    })
}

// ============================================================================
// Encode
// ============================================================================

/// A record ready to be written as one change-unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    pub message: String,
    pub file_path: String,
    pub content: Vec<u8>,
}

pub fn to_persistence(record: &Record, snapshot_identifier_template: &str) -> EncodedRecord {
    let tag = MessageTag::for_kind(ChangeKind::of(record));
    let subject = format!(
        "{} {} {}",
        tag.text(),
        record.service_id,
        record.terms_type
    );

    let document_id_section = record
        .document_id
        .as_deref()
        .map(|id| format!("{DOCUMENT_ID_LINE_PREFIX}{id}\n\n"))
        .unwrap_or_default();

    let provenance = provenance_block(&record.snapshot_ids, snapshot_identifier_template);

    EncodedRecord {
        message: format!("{subject}\n\n{document_id_section}\n\n{provenance}"),
        file_path: generate_file_path(
            &record.service_id,
            &record.terms_type,
            record.document_id.as_deref(),
            Some(&record.mime_type),
        ),
        content: record.content.clone(),
    }
}

fn provenance_block(snapshot_ids: &[RecordId], template: &str) -> String {
    let render = |id: &str| template.replace(SNAPSHOT_ID_MARKER, id);

    match snapshot_ids {
        [] => String::new(),
        [id] => format!("{SINGLE_SOURCE_PROVENANCE} {}", render(id)),
        ids => {
            let mut block = format!(
                "This version was recorded after an extraction and an assembling from the following snapshots from {} source documents:",
                ids.len()
            );
            for id in ids {
                block.push_str("\n- ");
                block.push_str(&render(id));
            }
            block
        }
    }
}

// ============================================================================
// Decode
// ============================================================================

pub fn to_domain(change: &ChangeUnit) -> StorageResult<Record> {
    let [file] = change.files.as_slice() else {
        return Err(StorageError::StoreIntegrity {
            commit: change.id.clone(),
            files: change.files.iter().map(|f| f.path.clone()).collect(),
        });
    };

    let location = parse_file_path(&file.path)?;
    let (subject, body) = change
        .message
        .split_once('\n')
        .unwrap_or((change.message.as_str(), ""));
    let kind = MessageTag::parse(subject.trim_end()).map(MessageTag::kind);

    Ok(Record {
        id: Some(change.id.clone()),
        service_id: location.service_id,
        terms_type: location.terms_type,
        document_id: location.document_id,
        mime_type: mime::mime_type_for(&location.extension).to_string(),
        fetch_date: change.date,
        content: file.content.clone(),
        is_first_record: kind == Some(ChangeKind::First),
        is_extract_only: kind == Some(ChangeKind::ExtractOnly),
        snapshot_ids: scan_snapshot_ids(body),
    })
}

fn snapshot_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[0-9a-f]{5,40}\b").expect("valid regex"))
}

/// Hexadecimal tokens of 5 to 40 characters found in a commit body, in order
/// of first appearance. The `Document ID` line is not provenance and is
/// skipped.
pub fn scan_snapshot_ids(body: &str) -> Vec<RecordId> {
    let mut ids: Vec<RecordId> = Vec::new();
    for line in body
        .lines()
        .filter(|line| !line.starts_with(DOCUMENT_ID_LINE_PREFIX))
    {
        for token in snapshot_id_re().find_iter(line) {
            if !ids.iter().any(|id| id == token.as_str()) {
                ids.push(token.as_str().to_string());
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::ChangedFile;
    use chrono::{TimeZone, Utc};

    fn fetch_date() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn change(message: &str, paths: &[&str]) -> ChangeUnit {
        ChangeUnit {
            id: "0123456789abcdef0123456789abcdef01234567".to_string(),
            message: message.to_string(),
            date: fetch_date(),
            files: paths
                .iter()
                .map(|p| ChangedFile {
                    path: p.to_string(),
                    content: b"content".to_vec(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_prefix_priority() {
        let mut record = Record::new("ServiceA", "Terms of Service", "text/html", fetch_date(), "x");
        record.is_first_record = true;
        record.is_extract_only = true;
        assert!(to_persistence(&record, SNAPSHOT_ID_MARKER)
            .message
            .starts_with("Initial record of ServiceA Terms of Service"));

        record.is_first_record = false;
        assert!(to_persistence(&record, SNAPSHOT_ID_MARKER)
            .message
            .starts_with("Apply technical or declaration upgrade on ServiceA Terms of Service"));

        record.is_extract_only = false;
        assert!(to_persistence(&record, SNAPSHOT_ID_MARKER)
            .message
            .starts_with("Record new changes of ServiceA Terms of Service"));
    }

    #[test]
    fn test_message_layout_is_exact() {
        let record = Record::new("ServiceA", "Privacy Policy", "text/markdown", fetch_date(), "x")
            .with_document_id(Some("cookies".to_string()))
            .with_snapshot_ids(vec!["abc12".to_string()]);

        let encoded = to_persistence(&record, "https://example.org/snapshots/%SNAPSHOT_ID");
        assert_eq!(
            encoded.message,
            "Record new changes of ServiceA Privacy Policy\n\nDocument ID cookies\n\n\n\nThis version was recorded after an extraction from the snapshot https://example.org/snapshots/abc12"
        );
        assert_eq!(encoded.file_path, "ServiceA/Privacy Policy #cookies.md");
    }

    #[test]
    fn test_multi_source_provenance_block() {
        let record = Record::new("S", "T", "text/markdown", fetch_date(), "x")
            .with_snapshot_ids(vec!["abc12".to_string(), "de34f".to_string()]);

        let encoded = to_persistence(&record, SNAPSHOT_ID_MARKER);
        assert!(encoded.message.ends_with(
            "This version was recorded after an extraction and an assembling from the following snapshots from 2 source documents:\n- abc12\n- de34f"
        ));
    }

    #[test]
    fn test_generate_file_path() {
        assert_eq!(
            generate_file_path("S", "Terms of Service", None, Some("application/x-unknown")),
            "S/Terms of Service.*"
        );
        assert_eq!(
            generate_file_path("S", "Terms of Service", None, Some("text/markdown")),
            "S/Terms of Service.md"
        );
        assert_eq!(
            generate_file_path("S", "Terms of Service", Some("annex"), None),
            "S/Terms of Service #annex.*"
        );
    }

    #[test]
    fn test_parse_file_path() {
        let location = parse_file_path("Service B/Terms of Service #annex.v2.pdf").unwrap();
        assert_eq!(location.service_id, "Service B");
        assert_eq!(location.terms_type, "Terms of Service");
        assert_eq!(location.document_id.as_deref(), Some("annex.v2"));
        assert_eq!(location.extension, "pdf");

        assert!(parse_file_path("no-directory.html").is_err());
        assert!(parse_file_path("S/no-extension").is_err());
    }

    #[test]
    fn test_path_matches_any_extension() {
        assert!(path_matches("S/Terms.html", "S", "Terms", None));
        assert!(path_matches("S/Terms.pdf", "S", "Terms", None));
        assert!(!path_matches("S/Terms #a.pdf", "S", "Terms", None));
        assert!(path_matches("S/Terms #a.pdf", "S", "Terms", Some("a")));
        assert!(!path_matches("S/Terms and Conditions.md", "S", "Terms", None));
        assert!(!path_matches("Other/Terms.md", "S", "Terms", None));
    }

    #[test]
    fn test_same_record_path_ignores_extension() {
        assert!(same_record_path("S/Terms #a.html", "S/Terms #a.pdf"));
        assert!(!same_record_path("S/Terms #a.html", "S/Terms #b.html"));
        assert!(!same_record_path("S/Terms.html", "S/Terms.v2.html"));
    }

    #[test]
    fn test_path_matches_dotted_names_exactly() {
        assert!(!path_matches("S/Terms.v2.html", "S", "Terms", None));
        assert!(path_matches("S/Terms.v2.html", "S", "Terms.v2", None));
        assert!(!path_matches("S/Terms #a.v2.pdf", "S", "Terms", Some("a")));
        assert!(path_matches("S/Terms #a.v2.pdf", "S", "Terms", Some("a.v2")));
    }

    #[test]
    fn test_decode_rejects_multi_file_change() {
        let err = to_domain(&change(
            "Record new changes of S T",
            &["S/T.html", "S/U.html"],
        ))
        .unwrap_err();
        assert!(matches!(err, StorageError::StoreIntegrity { ref files, .. } if files.len() == 2));
    }

    #[test]
    fn test_decode_legacy_tags() {
        let first = to_domain(&change("Start tracking S T", &["S/T.html"])).unwrap();
        assert!(first.is_first_record);
        assert!(!first.is_extract_only);

        let refilter = to_domain(&change("Refilter S T", &["S/T.md"])).unwrap();
        assert!(refilter.is_extract_only);
        assert!(refilter.is_refilter());

        let update = to_domain(&change("Update S T", &["S/T.md"])).unwrap();
        assert!(!update.is_first_record);
        assert!(!update.is_extract_only);
        assert_eq!(update.mime_type, "text/markdown");
    }

    #[test]
    fn test_tag_parsing_requires_word_boundary() {
        assert_eq!(MessageTag::parse("Updated S T"), None);
        assert_eq!(MessageTag::parse("Update S T"), Some(MessageTag::Update));
        assert!(MessageTag::Update.is_legacy());
        assert!(!MessageTag::RecordChanges.is_legacy());
    }

    #[test]
    fn test_scan_snapshot_ids() {
        let body = "\nDocument ID deadbeef\n\n\n\nThis version was recorded after an extraction and an assembling from the following snapshots from 2 source documents:\n- https://example.org/abc12\n- de34f";
        assert_eq!(scan_snapshot_ids(body), vec!["abc12", "de34f"]);
        assert!(scan_snapshot_ids("\n\n\n\n").is_empty());
        assert!(scan_snapshot_ids("abcd 0123456789abcdef0123456789abcdef012345678").is_empty());
    }

    #[test]
    fn test_round_trip_provenance() {
        let record = Record::new("S", "T", "text/markdown", fetch_date(), "x")
            .with_snapshot_ids(vec!["abc12".to_string(), "de34f".to_string()]);
        let encoded = to_persistence(&record, SNAPSHOT_ID_MARKER);

        let decoded = to_domain(&ChangeUnit {
            id: "fedcba9".to_string(),
            message: encoded.message,
            date: record.fetch_date,
            files: vec![ChangedFile {
                path: encoded.file_path,
                content: encoded.content,
            }],
        })
        .unwrap();

        assert_eq!(decoded.snapshot_ids, vec!["abc12", "de34f"]);
        assert_eq!(decoded.id.as_deref(), Some("fedcba9"));
    }
}
