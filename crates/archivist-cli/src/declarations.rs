//! Loads service declarations from a directory of `<serviceId>.json` files.

use std::path::Path;

use anyhow::{bail, Context, Result};
use archivist_core::{Declarations, Service};

const DECLARATION_EXTENSION: &str = "json";

pub fn load_declarations(dir: &Path) -> Result<Declarations> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read declarations directory {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", dir.display()))?
            .path();
        if path.is_file()
            && path.extension().and_then(|ext| ext.to_str()) == Some(DECLARATION_EXTENSION)
        {
            paths.push(path);
        }
    }
    paths.sort();

    let mut declarations = Declarations::new();
    for path in paths {
        let Some(service_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
            bail!("declaration file name is not valid UTF-8: {}", path.display());
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let service = Service::from_json(service_id, &raw)
            .with_context(|| format!("invalid declaration {}", path.display()))?;
        tracing::debug!(service_id, terms = service.terms.len(), "loaded declaration");
        declarations.insert(service);
    }

    tracing::info!(
        services = declarations.len(),
        path = %dir.display(),
        "declarations loaded"
    );
    Ok(declarations)
}
