//! Service and terms declarations
//!
//! A service declares one or more terms types; each terms is made of one or
//! more source documents. Declarations are read-only to the pipeline, which
//! only iterates them through [`for_each_terms`].
//!
//! Serialized form of one service (`<service id>.json`):
//!
//! ```json
//! {
//!   "name": "Example",
//!   "terms": {
//!     "Terms of Service": { "fetch": "https://example.org/tos", "select": ["main"] },
//!     "Privacy Policy": {
//!       "combine": [
//!         { "id": "main", "fetch": "https://example.org/privacy" },
//!         { "id": "cookies", "fetch": "https://example.org/cookies", "executeClientScripts": true }
//!       ]
//!     }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::DeclarationError;

/// One physical document of a terms, with its extraction configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    /// Required when the terms combine several documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "fetch", alias = "location")]
    pub location: String,
    /// Render the page in a browser before reading it
    #[serde(default)]
    pub execute_client_scripts: bool,
    /// CSS selectors of the content to keep
    #[serde(default)]
    pub select: Vec<String>,
    /// CSS selectors of the content to drop
    #[serde(default)]
    pub remove: Vec<String>,
    /// Named content filters applied after selection
    #[serde(default)]
    pub filters: Vec<String>,
}

impl SourceDocument {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            id: None,
            location: location.into(),
            execute_client_scripts: false,
            select: Vec::new(),
            remove: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A service + terms type, spanning one or more documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Terms {
    pub service_id: String,
    pub terms_type: String,
    /// Declaration order; versions concatenate extracted content in this order
    pub documents: Vec<SourceDocument>,
}

impl Terms {
    pub fn new(
        service_id: impl Into<String>,
        terms_type: impl Into<String>,
        documents: Vec<SourceDocument>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            terms_type: terms_type.into(),
            documents,
        }
    }

    pub fn is_multi_document(&self) -> bool {
        self.documents.len() > 1
    }

    /// Document id used to store snapshots of `document`. Only documents of
    /// multi-document terms have one.
    pub fn document_id<'a>(&self, document: &'a SourceDocument) -> Option<&'a str> {
        if self.is_multi_document() {
            document.id.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub terms: BTreeMap<String, Terms>,
}

// ============================================================================
// Declaration format
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum TermsDeclaration {
    Combined { combine: Vec<SourceDocument> },
    Single(SourceDocument),
}

#[derive(Deserialize)]
struct ServiceDeclaration {
    #[serde(default)]
    name: Option<String>,
    terms: BTreeMap<String, TermsDeclaration>,
}

impl Service {
    /// Parse the JSON declaration of service `service_id`.
    pub fn from_json(service_id: &str, json: &str) -> Result<Service, DeclarationError> {
        let declaration: ServiceDeclaration =
            serde_json::from_str(json).map_err(|source| DeclarationError::Parse {
                service_id: service_id.to_string(),
                source,
            })?;

        let mut terms = BTreeMap::new();
        for (terms_type, declared) in declaration.terms {
            let documents = match declared {
                TermsDeclaration::Combined { combine } => combine,
                TermsDeclaration::Single(document) => vec![document],
            };
            let item = Terms::new(service_id, terms_type.clone(), documents);
            validate(&item)?;
            terms.insert(terms_type, item);
        }

        Ok(Service {
            id: service_id.to_string(),
            name: declaration.name.unwrap_or_else(|| service_id.to_string()),
            terms,
        })
    }
}

fn validate(terms: &Terms) -> Result<(), DeclarationError> {
    if terms.documents.is_empty() {
        return Err(DeclarationError::NoDocuments {
            service_id: terms.service_id.clone(),
            terms_type: terms.terms_type.clone(),
        });
    }
    if !terms.is_multi_document() {
        return Ok(());
    }

    let mut seen = HashSet::new();
    for document in &terms.documents {
        let Some(id) = document.id.as_deref() else {
            return Err(DeclarationError::MissingDocumentId {
                service_id: terms.service_id.clone(),
                terms_type: terms.terms_type.clone(),
            });
        };
        if !seen.insert(id) {
            return Err(DeclarationError::DuplicateDocumentId {
                service_id: terms.service_id.clone(),
                terms_type: terms.terms_type.clone(),
                document_id: id.to_string(),
            });
        }
    }
    Ok(())
}

// ============================================================================
// Declarations
// ============================================================================

/// Every declared service, by id
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    services: BTreeMap<String, Service>,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, service: Service) {
        self.services.insert(service.id.clone(), service);
    }

    pub fn get(&self, service_id: &str) -> Option<&Service> {
        self.services.get(service_id)
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl FromIterator<Service> for Declarations {
    fn from_iter<I: IntoIterator<Item = Service>>(iter: I) -> Self {
        let mut declarations = Declarations::new();
        for service in iter {
            declarations.insert(service);
        }
        declarations
    }
}

/// Terms of `service_ids` in run order: services sorted case-insensitively,
/// then terms types in declaration-map order, optionally restricted to
/// `terms_types`. Unknown service ids are skipped.
pub fn for_each_terms(
    declarations: &Declarations,
    service_ids: &[String],
    terms_types: Option<&[String]>,
) -> Vec<Terms> {
    let mut ids: Vec<&String> = service_ids.iter().collect();
    ids.sort_by(|a, b| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    });
    ids.dedup();

    ids.into_iter()
        .filter_map(|id| {
            let service = declarations.get(id);
            if service.is_none() {
                tracing::warn!(service_id = %id, "no declaration for service, skipping");
            }
            service
        })
        .flat_map(|service| service.terms.values())
        .filter(|terms| terms_types.map_or(true, |types| types.contains(&terms.terms_type)))
        .cloned()
        .collect()
}
