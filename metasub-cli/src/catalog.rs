//! Category schema catalog
//!
//! Fetches the field schema and relationship document of every known
//! category once per run and serves them to the validator, the identity
//! resolver and the submission coordinator. The store's schema documents
//! do not describe the system-accession column, so a synthetic `accession`
//! field is prepended to every schema after fetch.

use std::collections::HashMap;

use crate::api::{ConnectionDef, FieldDef, FieldType, MetaStore, RemoteRequestError};

/// Digits at the end of an accession placeholder (e.g., "USRBSM000")
pub const ACCESSION_PLACEHOLDER_DIGITS: usize = 3;

/// Every category the store recognizes, by singular name
pub const CATEGORIES: [&str; 13] = [
    "assay",
    "bioproject",
    "biosample",
    "diet",
    "experiment",
    "file",
    "lab",
    "library",
    "litter",
    "mouse",
    "reagent",
    "treatment",
    "mergedFile",
];

/// Dependency order for submission: link targets come before the records
/// that point at them.
pub const SUBMISSION_ORDER: [&str; 13] = [
    "Lab",
    "Bioproject",
    "Diet",
    "Treatment",
    "Reagent",
    "Litter",
    "Mouse",
    "Biosample",
    "Library",
    "Assay",
    "File",
    "Mergedfile",
    "Experiment",
];

/// Worksheet name of a singular category name (e.g., "mergedFile" -> "Mergedfile")
pub fn sheet_name(category: &str) -> String {
    let lower = category.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => lower,
    }
}

/// Which half of an accession pair a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessionKind {
    User,
    System,
}

/// Failure to assemble the catalog; fatal, nothing can be validated without it
#[derive(Debug)]
pub enum SchemaFetchError {
    Remote {
        category: String,
        source: RemoteRequestError,
    },
    MissingPrefix {
        category: String,
    },
    UnknownCategory {
        name: String,
    },
}

impl std::fmt::Display for SchemaFetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaFetchError::Remote { category, source } => {
                write!(f, "failed to fetch schema for {}: {}", category, source)
            }
            SchemaFetchError::MissingPrefix { category } => {
                write!(f, "relationship document for {} carries no usable accession prefix", category)
            }
            SchemaFetchError::UnknownCategory { name } => {
                write!(f, "unknown category: {}", name)
            }
        }
    }
}

impl std::error::Error for SchemaFetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchemaFetchError::Remote { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Everything known about one category
#[derive(Debug, Clone)]
pub struct CategorySchema {
    /// Worksheet name, the key used throughout the engine (e.g., "Biosample")
    pub sheet_name: String,
    /// Singular name used in schema URLs and record details (e.g., "biosample")
    pub category: String,
    /// Collection name used in record URLs (e.g., "biosamples")
    pub collection: String,
    /// Ordered field definitions, synthetic system-accession field first
    pub fields: Vec<FieldDef>,
    pub connections: Vec<ConnectionDef>,
    /// System accession prefix (e.g., "SYSBSM")
    pub system_prefix: String,
    /// User accession prefix (e.g., "USRBSM")
    pub user_prefix: String,
}

impl CategorySchema {
    pub fn field_by_label(&self, label: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.display_label == label)
    }

    pub fn connection_by_label(&self, label: &str) -> Option<&ConnectionDef> {
        self.connections.iter().find(|c| c.display_label == label)
    }

    /// Every column header a complete worksheet would carry
    pub fn all_column_labels(&self) -> Vec<&str> {
        self.fields
            .iter()
            .map(|f| f.display_label.as_str())
            .chain(self.connections.iter().map(|c| c.display_label.as_str()))
            .collect()
    }

    pub fn accession_prefix(&self, kind: AccessionKind) -> &str {
        match kind {
            AccessionKind::User => &self.user_prefix,
            AccessionKind::System => &self.system_prefix,
        }
    }

    /// Whether a value looks like an accession this category has issued
    pub fn is_system_shaped(&self, value: &str) -> bool {
        value.len() > self.system_prefix.len() && value.starts_with(&self.system_prefix)
    }
}

/// All category schemas for one run, immutable once fetched
pub struct SchemaCatalog {
    schemas: HashMap<String, CategorySchema>,
    order: Vec<String>,
    version: String,
}

impl SchemaCatalog {
    /// Fetch schema and relationship documents for every known category.
    ///
    /// One GET per document, sequentially; any failure is fatal.
    pub async fn fetch(store: &dyn MetaStore) -> Result<Self, SchemaFetchError> {
        let version = store
            .fetch_version()
            .await
            .map_err(|source| SchemaFetchError::Remote {
                category: "version".to_string(),
                source,
            })?;

        let mut schemas = HashMap::new();
        for category in CATEGORIES {
            let mut fields =
                store
                    .fetch_schema(category)
                    .await
                    .map_err(|source| SchemaFetchError::Remote {
                        category: category.to_string(),
                        source,
                    })?;
            let doc = store.fetch_relationships(category).await.map_err(|source| {
                SchemaFetchError::Remote {
                    category: category.to_string(),
                    source,
                }
            })?;

            fields.insert(0, system_accession_field());

            let system_prefix = trim_placeholder(&doc.prefix).ok_or_else(|| {
                SchemaFetchError::MissingPrefix {
                    category: category.to_string(),
                }
            })?;
            let user_prefix = trim_placeholder(&doc.usr_prefix).ok_or_else(|| {
                SchemaFetchError::MissingPrefix {
                    category: category.to_string(),
                }
            })?;

            let name = sheet_name(category);
            schemas.insert(
                name.clone(),
                CategorySchema {
                    sheet_name: name,
                    category: doc.one,
                    collection: doc.all,
                    fields,
                    connections: doc.connections,
                    system_prefix: system_prefix.to_string(),
                    user_prefix: user_prefix.to_string(),
                },
            );
        }

        let order = SUBMISSION_ORDER
            .iter()
            .filter(|name| schemas.contains_key(**name))
            .map(|name| name.to_string())
            .collect();

        Ok(Self {
            schemas,
            order,
            version,
        })
    }

    pub fn schema_for(&self, sheet: &str) -> Result<&CategorySchema, SchemaFetchError> {
        self.schemas
            .get(sheet)
            .ok_or_else(|| SchemaFetchError::UnknownCategory {
                name: sheet.to_string(),
            })
    }

    pub fn relationships_for(&self, sheet: &str) -> Result<&[ConnectionDef], SchemaFetchError> {
        Ok(&self.schema_for(sheet)?.connections)
    }

    pub fn accession_rule(&self, sheet: &str, kind: AccessionKind) -> Result<&str, SchemaFetchError> {
        Ok(self.schema_for(sheet)?.accession_prefix(kind))
    }

    pub fn contains(&self, sheet: &str) -> bool {
        self.schemas.contains_key(sheet)
    }

    /// Category sheet names in submission order
    pub fn submission_order(&self) -> &[String] {
        &self.order
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

/// The schema documents never mention the system-accession column
fn system_accession_field() -> FieldDef {
    FieldDef {
        name: "accession".to_string(),
        display_label: "System Accession".to_string(),
        data_type: FieldType::Text,
        required: false,
        placeholder: String::new(),
        values: Vec::new(),
        values_restricted: false,
    }
}

/// "USRBSM000" -> "USRBSM"; None when nothing useful remains
fn trim_placeholder(prefix: &str) -> Option<&str> {
    if prefix.len() <= ACCESSION_PLACEHOLDER_DIGITS {
        return None;
    }
    Some(&prefix[..prefix.len() - ACCESSION_PLACEHOLDER_DIGITS])
}
