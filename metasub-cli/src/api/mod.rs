//! Remote metadata store API
//!
//! Wire models for the schema, record and relationship documents, plus the
//! `MetaStore` trait that the rest of the engine talks through and its
//! reqwest-backed implementation.

pub mod models;
pub mod store;

pub use models::{
    ConnectionDef, ExistingRecord, FieldDef, FieldType, LinkBody, LinkDirection, RecordDetail,
    RelationshipDoc, RelationshipState,
};
pub use store::{HttpMetaStore, MetaStore, RemoteRequestError};
