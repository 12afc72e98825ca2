//! Wire models for the metadata store REST API

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field data types recognized by the metadata store schema documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Date,
    Number,
    Float,
    Textnumber,
    Boolean,
}

/// One field definition from `GET /schema/{category}.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name in the store (e.g., "tissue_classification")
    pub name: String,
    /// Column header shown in the workbook (e.g., "Tissue Classification")
    #[serde(rename = "text")]
    pub display_label: String,
    #[serde(rename = "type")]
    pub data_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub placeholder: String,
    /// Drop-down values, when the store defines any
    #[serde(default)]
    pub values: Vec<String>,
    /// Whether `values` is a closed list or only a suggestion
    #[serde(default)]
    pub values_restricted: bool,
}

/// One connection definition from `GET /schema/relationships/{category}.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDef {
    /// Connection name used in link calls (e.g., "performed_under")
    pub name: String,
    /// Column header shown in the workbook (e.g., "Bioproject")
    #[serde(rename = "display_name")]
    pub display_label: String,
    /// Singular category name the connection points to (e.g., "bioproject")
    #[serde(rename = "to")]
    pub target_category: String,
    /// Collection name of the target category (e.g., "bioprojects")
    #[serde(rename = "all", default)]
    pub target_collection: String,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub allow_multiple: bool,
    #[serde(default)]
    pub required: bool,
}

/// Relationship document for one category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipDoc {
    /// Singular category name (e.g., "biosample")
    pub one: String,
    /// Collection name used in API paths (e.g., "biosamples")
    pub all: String,
    /// System accession placeholder (e.g., "SYSBSM000")
    #[serde(default)]
    pub prefix: String,
    /// User accession placeholder (e.g., "USRBSM000")
    #[serde(default)]
    pub usr_prefix: String,
    #[serde(default)]
    pub connections: Vec<ConnectionDef>,
}

/// Envelope around a schema document
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaEnvelope {
    pub data: Vec<FieldDef>,
}

/// Envelope around a relationship document
#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipEnvelope {
    pub data: RelationshipDoc,
}

/// Response of `GET /api/version`
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    pub current: String,
}

/// Response of `GET /api/usertoken/{token}`
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub username: String,
}

/// One record summary from `GET /api/{categories}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingRecord {
    /// Authoritative accession assigned by the store
    pub accession: String,
    #[serde(default)]
    pub user_accession: String,
    /// Username of the record owner
    #[serde(default)]
    pub user: String,
}

/// Relationship state of a record: connection name -> target category -> accessions
pub type RelationshipState = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Full record detail from `GET /api/{categories}/{accession}`
#[derive(Debug, Clone, Default)]
pub struct RecordDetail {
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub relationships: RelationshipState,
}

/// Status envelope of create/update/link POSTs
#[derive(Debug, Clone, Deserialize)]
pub struct PostResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default)]
    pub accession: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `POST /api/submission`
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default)]
    pub submission_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Direction of a link call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Add,
    Remove,
}

impl LinkDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkDirection::Add => "add",
            LinkDirection::Remove => "remove",
        }
    }
}

impl std::fmt::Display for LinkDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /api/{categories}/{accession}/{target_category}/{add|remove}`
#[derive(Debug, Clone, Serialize)]
pub struct LinkBody {
    #[serde(rename = "connectionAcsn")]
    pub connection_accession: String,
    #[serde(rename = "connectionName")]
    pub connection_name: String,
}
