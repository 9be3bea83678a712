//! Remote query adapter for the Gerrit REST API.
//!
//! One request per tracked change: `GET {endpoint}/changes/{id}/detail`.
//! Every failure mode (transport, non-2xx, bad body, malformed labels) is
//! logged with its cause and reported to the cycle as a single
//! [`QueryResult::Failure`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use reviewwatch_core::labels::{self, LabelVotes};
use reviewwatch_core::{ChangeId, ChangeStatus, ConnectionOptions, Credentials, TrackedChange};

use crate::error::RemoteError;

/// Upper bound on any single remote request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Anti-XSSI guard prepended to every JSON body.
const XSSI_PREFIX: &str = ")]}'";

pub const VERIFIED_LABEL: &str = "Verified";
pub const CODE_REVIEW_LABEL: &str = "Code-Review";

/// Fields of a successfully fetched change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub subject: String,
    pub status: ChangeStatus,
    pub code_review: i8,
    pub verified: i8,
}

impl RemoteChange {
    /// The tracked entry this fetch describes. The tracked id is kept as-is.
    pub fn into_tracked(self, id: ChangeId) -> TrackedChange {
        TrackedChange {
            subject: Some(self.subject),
            status: Some(self.status),
            code_review: self.code_review,
            verified: self.verified,
            ..TrackedChange::placeholder(id)
        }
    }
}

/// Outcome of one change query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Success(RemoteChange),
    Failure(ChangeId),
}

/// The remote review service as seen by the sync cycle.
#[async_trait]
pub trait ReviewApi: Send + Sync {
    /// Fetch the current state of one change.
    async fn query(&self, options: &ConnectionOptions, change_id: &ChangeId) -> QueryResult;

    /// Ask the server version endpoint; true iff it answered 2xx.
    async fn test(&self, endpoint: &str, credentials: &Credentials) -> bool;
}

#[derive(Debug, Deserialize)]
struct ChangeDetail {
    subject: String,
    status: String,
    #[serde(default)]
    labels: HashMap<String, LabelVotes>,
}

/// Strip the XSSI guard and decode a change detail body.
pub fn parse_detail(body: &str) -> Result<RemoteChange, RemoteError> {
    let json = body.trim_start();
    let json = json.strip_prefix(XSSI_PREFIX).unwrap_or(json);
    let detail: ChangeDetail = serde_json::from_str(json)?;

    Ok(RemoteChange {
        subject: detail.subject,
        status: ChangeStatus::from(detail.status),
        code_review: labels::resolve(detail.labels.get(CODE_REVIEW_LABEL))?,
        verified: labels::resolve(detail.labels.get(VERIFIED_LABEL))?,
    })
}

/// [`ReviewApi`] over HTTP with basic authentication.
#[derive(Debug, Clone)]
pub struct GerritClient {
    client: reqwest::Client,
}

impl GerritClient {
    pub fn new() -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    async fn fetch_detail(
        &self,
        options: &ConnectionOptions,
        change_id: &ChangeId,
    ) -> Result<RemoteChange, RemoteError> {
        let url = endpoint_url(&options.endpoint, &["changes", change_id.as_str(), "detail"])?;
        let body = self.get(url, &options.credentials).await?;
        parse_detail(&body)
    }

    async fn get(&self, url: Url, credentials: &Credentials) -> Result<String, RemoteError> {
        let response = self
            .client
            .get(url.clone())
            .basic_auth(&credentials.identity, Some(&credentials.secret))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl ReviewApi for GerritClient {
    async fn query(&self, options: &ConnectionOptions, change_id: &ChangeId) -> QueryResult {
        match self.fetch_detail(options, change_id).await {
            Ok(change) => QueryResult::Success(change),
            Err(err) => {
                tracing::warn!(change_id = %change_id, error = %err, "change query failed");
                QueryResult::Failure(change_id.clone())
            }
        }
    }

    async fn test(&self, endpoint: &str, credentials: &Credentials) -> bool {
        let answer = match endpoint_url(endpoint, &["config", "server", "version"]) {
            Ok(url) => self.get(url, credentials).await,
            Err(err) => Err(err),
        };
        match answer {
            Ok(_) => true,
            Err(err) => {
                tracing::info!(endpoint, error = %err, "connection test failed");
                false
            }
        }
    }
}

/// Append path segments to the endpoint. Each segment is percent-encoded, so
/// a `project~branch~Change-Id` id with `/` in the project stays one segment.
fn endpoint_url(endpoint: &str, segments: &[&str]) -> Result<Url, RemoteError> {
    let invalid = |reason: String| RemoteError::Endpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let mut url = Url::parse(endpoint).map_err(|err| invalid(err.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("cannot be a base URL".to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
