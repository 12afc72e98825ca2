//! The metadata store collaborator
//!
//! `MetaStore` is the seam between the submission engine and the remote
//! store; `HttpMetaStore` is the reqwest-backed implementation used by the
//! CLI. All calls are sequential, one request at a time.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::models::{
    ExistingRecord, FieldDef, LinkBody, LinkDirection, PostResponse, RecordDetail,
    RelationshipDoc, RelationshipEnvelope, RelationshipState, SchemaEnvelope,
    SubmissionResponse, UserInfo, VersionInfo,
};
use crate::config::Config;

/// Error talking to the remote store
#[derive(Debug)]
pub enum RemoteRequestError {
    /// The request never produced a response
    Transport {
        url: String,
        source: reqwest::Error,
    },
    /// The HTTP layer answered with a non-success status and no readable body
    Status { url: String, status: u16 },
    /// The response body could not be decoded into the expected document
    Malformed { url: String, detail: String },
    /// The store answered but refused the operation
    Rejected { status_code: u16, message: String },
}

impl std::fmt::Display for RemoteRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteRequestError::Transport { url, source } => {
                write!(f, "request to {} failed: {}", url, source)
            }
            RemoteRequestError::Status { url, status } => {
                write!(f, "request to {} returned HTTP {}", url, status)
            }
            RemoteRequestError::Malformed { url, detail } => {
                write!(f, "unexpected response from {}: {}", url, detail)
            }
            RemoteRequestError::Rejected {
                status_code,
                message,
            } => {
                write!(f, "store rejected the request ({}): {}", status_code, message)
            }
        }
    }
}

impl std::error::Error for RemoteRequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RemoteRequestError::Transport { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Everything the submission engine needs from the remote store
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// `GET /schema/{category}.json`
    async fn fetch_schema(&self, category: &str) -> Result<Vec<FieldDef>, RemoteRequestError>;

    /// `GET /schema/relationships/{category}.json`
    async fn fetch_relationships(
        &self,
        category: &str,
    ) -> Result<RelationshipDoc, RemoteRequestError>;

    /// `GET /api/version`
    async fn fetch_version(&self) -> Result<String, RemoteRequestError>;

    /// `GET /api/usertoken/{token}` on the submission service
    async fn fetch_username(&self) -> Result<String, RemoteRequestError>;

    /// `GET /api/{categories}` - every existing record summary in a collection
    async fn list_records(
        &self,
        collection: &str,
    ) -> Result<Vec<ExistingRecord>, RemoteRequestError>;

    /// `GET /api/{categories}/{accession}` - one record with its relationship state
    async fn fetch_record(
        &self,
        collection: &str,
        category: &str,
        accession: &str,
    ) -> Result<RecordDetail, RemoteRequestError>;

    /// `POST /api/{categories}` - create a record, returning the minted accession
    async fn create_record(
        &self,
        collection: &str,
        body: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, RemoteRequestError>;

    /// `POST /api/{categories}/{accession}` - update an existing record
    async fn update_record(
        &self,
        collection: &str,
        accession: &str,
        body: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), RemoteRequestError>;

    /// `POST /api/{categories}/{accession}/{target_category}/{add|remove}`
    async fn change_link(
        &self,
        collection: &str,
        accession: &str,
        target_category: &str,
        direction: LinkDirection,
        body: &LinkBody,
    ) -> Result<(), RemoteRequestError>;

    /// `POST /api/submission` on the submission service - the audit trail
    async fn save_submission(
        &self,
        details: &BTreeMap<String, Vec<String>>,
        update: bool,
    ) -> Result<String, RemoteRequestError>;
}

/// Default transport timeout, the only timeout this client applies
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed `MetaStore`
pub struct HttpMetaStore {
    client: reqwest::Client,
    meta_url: String,
    submit_url: String,
    token: String,
}

impl HttpMetaStore {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            meta_url: config.meta_url.trim_end_matches('/').to_string(),
            submit_url: config.submit_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn bearer(&self) -> String {
        format!("bearer {}", self.token)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, RemoteRequestError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .send()
            .await
            .map_err(|source| RemoteRequestError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteRequestError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteRequestError::Malformed {
                url: url.to_string(),
                detail: e.to_string(),
            })
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, RemoteRequestError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .json(body)
            .send()
            .await
            .map_err(|source| RemoteRequestError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| RemoteRequestError::Transport {
                url: url.to_string(),
                source,
            })?;

        // The store reports its own statusCode inside the body, even on
        // HTTP-level errors, so the body is decoded first.
        match serde_json::from_str::<T>(&text) {
            Ok(decoded) => Ok(decoded),
            Err(_) if !status.is_success() => Err(RemoteRequestError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }),
            Err(e) => Err(RemoteRequestError::Malformed {
                url: url.to_string(),
                detail: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl MetaStore for HttpMetaStore {
    async fn fetch_schema(&self, category: &str) -> Result<Vec<FieldDef>, RemoteRequestError> {
        let url = format!("{}/schema/{}.json", self.meta_url, category);
        let envelope: SchemaEnvelope = self.get_json(&url).await?;
        Ok(envelope.data)
    }

    async fn fetch_relationships(
        &self,
        category: &str,
    ) -> Result<RelationshipDoc, RemoteRequestError> {
        let url = format!("{}/schema/relationships/{}.json", self.meta_url, category);
        let envelope: RelationshipEnvelope = self.get_json(&url).await?;
        Ok(envelope.data)
    }

    async fn fetch_version(&self) -> Result<String, RemoteRequestError> {
        let url = format!("{}/api/version", self.meta_url);
        let info: VersionInfo = self.get_json(&url).await?;
        Ok(info.current)
    }

    async fn fetch_username(&self) -> Result<String, RemoteRequestError> {
        let url = format!("{}/api/usertoken/{}", self.submit_url, self.token);
        let info: UserInfo = self.get_json(&url).await?;
        Ok(info.username)
    }

    async fn list_records(
        &self,
        collection: &str,
    ) -> Result<Vec<ExistingRecord>, RemoteRequestError> {
        let url = format!("{}/api/{}", self.meta_url, collection);
        let body: serde_json::Value = self.get_json(&url).await?;
        let records = body
            .get(collection)
            .cloned()
            .ok_or_else(|| RemoteRequestError::Malformed {
                url: url.clone(),
                detail: format!("missing \"{}\" key in listing", collection),
            })?;
        serde_json::from_value(records).map_err(|e| RemoteRequestError::Malformed {
            url,
            detail: e.to_string(),
        })
    }

    async fn fetch_record(
        &self,
        collection: &str,
        category: &str,
        accession: &str,
    ) -> Result<RecordDetail, RemoteRequestError> {
        let url = format!("{}/api/{}/{}", self.meta_url, collection, accession);
        let body: serde_json::Value = self.get_json(&url).await?;
        let main_obj = body
            .get("mainObj")
            .ok_or_else(|| RemoteRequestError::Malformed {
                url: url.clone(),
                detail: "missing \"mainObj\" key".to_string(),
            })?;

        let fields = main_obj
            .get(category)
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        let relationships: RelationshipState = main_obj
            .get("added")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| RemoteRequestError::Malformed {
                url,
                detail: e.to_string(),
            })?
            .unwrap_or_default();

        Ok(RecordDetail {
            fields,
            relationships,
        })
    }

    async fn create_record(
        &self,
        collection: &str,
        body: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, RemoteRequestError> {
        let url = format!("{}/api/{}", self.meta_url, collection);
        let response: PostResponse = self.post_json(&url, body).await?;
        if response.status_code != 200 {
            return Err(RemoteRequestError::Rejected {
                status_code: response.status_code,
                message: response.message.unwrap_or_default(),
            });
        }
        response
            .accession
            .filter(|a| !a.is_empty())
            .ok_or(RemoteRequestError::Malformed {
                url,
                detail: "create response carried no accession".to_string(),
            })
    }

    async fn update_record(
        &self,
        collection: &str,
        accession: &str,
        body: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), RemoteRequestError> {
        let url = format!("{}/api/{}/{}", self.meta_url, collection, accession);
        let response: PostResponse = self.post_json(&url, body).await?;
        if response.status_code != 200 {
            return Err(RemoteRequestError::Rejected {
                status_code: response.status_code,
                message: response.message.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn change_link(
        &self,
        collection: &str,
        accession: &str,
        target_category: &str,
        direction: LinkDirection,
        body: &LinkBody,
    ) -> Result<(), RemoteRequestError> {
        let url = format!(
            "{}/api/{}/{}/{}/{}",
            self.meta_url,
            collection,
            accession,
            target_category,
            direction.as_str()
        );
        let response: PostResponse = self.post_json(&url, body).await?;
        if response.status_code != 200 {
            return Err(RemoteRequestError::Rejected {
                status_code: response.status_code,
                message: response.message.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn save_submission(
        &self,
        details: &BTreeMap<String, Vec<String>>,
        update: bool,
    ) -> Result<String, RemoteRequestError> {
        let url = format!("{}/api/submission", self.submit_url);
        let details_json =
            serde_json::to_string(details).map_err(|e| RemoteRequestError::Malformed {
                url: url.clone(),
                detail: e.to_string(),
            })?;
        let body = serde_json::json!({
            "details": details_json,
            "update": update,
        });
        let response: SubmissionResponse = self.post_json(&url, &body).await?;
        if response.status_code != 201 {
            return Err(RemoteRequestError::Rejected {
                status_code: response.status_code,
                message: response.message.unwrap_or_default(),
            });
        }
        Ok(response.submission_id.unwrap_or_default())
    }
}
