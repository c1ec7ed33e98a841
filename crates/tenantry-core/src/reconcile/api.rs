//! Index admin API seam.
//!
//! [`IndexAdminApi`] is the narrow surface reconciliation needs: one listing
//! page, one creation, one deletion. Implementations return the raw status and
//! body; deciding which statuses are fatal, benign or successful is the
//! reconciler's job.

use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use super::error::ReconcileError;

/// Header naming the project billed for quota.
const QUOTA_PROJECT_HEADER: &str = "x-goog-user-project";

/// Query parameter carrying the listing cursor.
const PAGE_TOKEN_PARAM: &str = "pageToken";

/// Status and decoded body of one API call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body, `None` when the body was empty. Non-JSON bodies are wrapped
    /// as `{"raw": "<text>"}`.
    pub body: Option<Value>,
}

impl ApiResponse {
    /// Creates a response.
    #[must_use]
    pub const fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Human-readable detail for error reports: the API's `error.message`
    /// when present, otherwise the compact body.
    #[must_use]
    pub fn detail(&self) -> String {
        match &self.body {
            None => "empty response body".to_string(),
            Some(body) => body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map_or_else(|| body.to_string(), ToString::to_string),
        }
    }
}

/// Remote index administration.
pub trait IndexAdminApi: Send + Sync {
    /// Fetches one page of the index listing across all collection groups.
    ///
    /// # Errors
    ///
    /// Returns an error only when no response was obtained.
    fn list_indexes(&self, page_token: Option<&str>) -> Result<ApiResponse, ReconcileError>;

    /// Requests creation of an index under `collection_group`.
    ///
    /// # Errors
    ///
    /// Returns an error only when no response was obtained.
    fn create_index(
        &self,
        collection_group: &str,
        body: &Value,
    ) -> Result<ApiResponse, ReconcileError>;

    /// Requests deletion of the index with the fully-qualified `name`.
    ///
    /// # Errors
    ///
    /// Returns an error only when no response was obtained.
    fn delete_index(&self, name: &str) -> Result<ApiResponse, ReconcileError>;
}

/// Project and database whose indexes are reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTarget {
    /// API base URL, e.g. `https://firestore.googleapis.com/v1`.
    pub api_base_url: String,
    /// Project identifier; also sent as the quota project.
    pub project_id: String,
    /// Database identifier, usually `(default)`.
    pub database: String,
}

impl IndexTarget {
    fn base(&self) -> Result<Url, ReconcileError> {
        let url = Url::parse(&self.api_base_url).map_err(|e| ReconcileError::Endpoint {
            url: self.api_base_url.clone(),
            message: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(ReconcileError::Endpoint {
                url: self.api_base_url.clone(),
                message: "URL cannot carry a path".to_string(),
            });
        }
        Ok(url)
    }

    fn url_with<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, ReconcileError> {
        let mut url = self.base()?;
        url.path_segments_mut()
            .map_err(|()| ReconcileError::Endpoint {
                url: self.api_base_url.clone(),
                message: "URL cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Listing endpoint spanning every collection group.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Endpoint`] when the base URL is unusable.
    pub fn list_url(&self, page_token: Option<&str>) -> Result<Url, ReconcileError> {
        let mut url = self.collection_group_url("-")?;
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair(PAGE_TOKEN_PARAM, token);
        }
        Ok(url)
    }

    /// Creation endpoint of one collection group.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Endpoint`] when the base URL is unusable.
    pub fn collection_group_url(&self, collection_group: &str) -> Result<Url, ReconcileError> {
        self.url_with([
            "projects",
            self.project_id.as_str(),
            "databases",
            self.database.as_str(),
            "collectionGroups",
            collection_group,
            "indexes",
        ])
    }

    /// Endpoint of an index resource name.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Endpoint`] when the base URL is unusable.
    pub fn resource_url(&self, name: &str) -> Result<Url, ReconcileError> {
        self.url_with(name.split('/').filter(|segment| !segment.is_empty()))
    }
}

/// [`IndexAdminApi`] over HTTPS.
#[derive(Debug)]
pub struct HttpIndexAdminApi {
    client: Client,
    target: IndexTarget,
    token: SecretString,
}

impl HttpIndexAdminApi {
    /// Creates a client for `target` authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is unusable or the HTTP client cannot
    /// be built.
    pub fn new(
        target: IndexTarget,
        token: SecretString,
        timeout: Duration,
    ) -> Result<Self, ReconcileError> {
        target.base()?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(timeout)
            .user_agent(concat!("tenantry/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            target,
            token,
        })
    }

    /// The reconciled project and database.
    #[must_use]
    pub const fn target(&self) -> &IndexTarget {
        &self.target
    }

    fn send(&self, request: RequestBuilder) -> Result<ApiResponse, ReconcileError> {
        let response = request
            .bearer_auth(self.token.expose_secret())
            .header(QUOTA_PROJECT_HEADER, &self.target.project_id)
            .send()?;
        let status = response.status().as_u16();
        let text = response.text()?;

        let body = if text.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw": text })))
        };
        tracing::debug!(status, "index admin response");
        Ok(ApiResponse { status, body })
    }
}

impl IndexAdminApi for HttpIndexAdminApi {
    fn list_indexes(&self, page_token: Option<&str>) -> Result<ApiResponse, ReconcileError> {
        let url = self.target.list_url(page_token)?;
        self.send(self.client.get(url))
    }

    fn create_index(
        &self,
        collection_group: &str,
        body: &Value,
    ) -> Result<ApiResponse, ReconcileError> {
        let url = self.target.collection_group_url(collection_group)?;
        self.send(self.client.post(url).json(body))
    }

    fn delete_index(&self, name: &str) -> Result<ApiResponse, ReconcileError> {
        let url = self.target.resource_url(name)?;
        self.send(self.client.delete(url))
    }
}
