//! HTTP gateway to the LifeLog service.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    multipart::{Form, Part},
    Client, Method, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{EntryId, EntryType},
    error::ApiError,
    protocol::{
        DeleteEntryResponse, DemoLoginRequest, HealthStatus, SearchRequest, SearchSuggestions,
        TimelineEntry, TimelineStats, TokenResponse, UploadResponse, WeeklySummary,
    },
};
use tracing::{debug, warn};

use crate::{
    error::{GatewayError, GatewayResult},
    session::{AuthOutcome, Session},
    upload::UploadFile,
    LifelogApi,
};

pub const DEFAULT_TIMELINE_LIMIT: u32 = 20;
pub const DEFAULT_SUMMARY_LIMIT: u32 = 5;

/// Optional timeline filters. Absent filters are left out of the query string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineFilters {
    pub entry_type: Option<EntryType>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineQuery {
    pub skip: u32,
    pub limit: u32,
    pub filters: TimelineFilters,
}

impl Default for TimelineQuery {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: DEFAULT_TIMELINE_LIMIT,
            filters: TimelineFilters::default(),
        }
    }
}

impl TimelineQuery {
    pub fn with_filters(filters: TimelineFilters) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("skip", self.skip.to_string()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(entry_type) = self.filters.entry_type {
            pairs.push(("entry_type", entry_type.as_str().to_string()));
        }
        if let Some(start) = self.filters.start_date {
            pairs.push(("start_date", start.to_rfc3339()));
        }
        if let Some(end) = self.filters.end_date {
            pairs.push(("end_date", end.to_rfc3339()));
        }
        pairs
    }
}

/// Per-call options for [`GatewayClient::request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post() -> Self {
        Self {
            method: Method::POST,
            ..Self::default()
        }
    }

    pub fn delete() -> Self {
        Self {
            method: Method::DELETE,
            ..Self::default()
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query<K: Into<String>, V: Into<String>>(
        mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> GatewayResult<Self> {
        let value = serde_json::to_value(body).map_err(|err| GatewayError::Decode {
            endpoint: "<request body>".into(),
            message: err.to_string(),
        })?;
        self.body = Some(value);
        Ok(self)
    }
}

pub struct GatewayClient {
    http: Client,
    base_url: String,
    session: Arc<Session>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, session: Arc<Session>) -> Self {
        Self::with_http_client(Client::new(), base_url, session)
    }

    pub fn with_http_client(http: Client, base_url: impl Into<String>, session: Arc<Session>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            session,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn endpoint_url(&self, endpoint: &str) -> GatewayResult<String> {
        if !endpoint.starts_with('/') {
            return Err(GatewayError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(format!("{}{endpoint}", self.base_url))
    }

    async fn bearer_header(&self, endpoint: &str) -> GatewayResult<Option<HeaderValue>> {
        let Some(token) = self.session.bearer_token().await else {
            return Ok(None);
        };
        HeaderValue::from_str(&format!("Bearer {token}"))
            .map(Some)
            .map_err(|_| GatewayError::Transport {
                endpoint: endpoint.to_string(),
                message: "bearer token is not a valid header value".into(),
            })
    }

    /// Issues a JSON request and decodes the JSON response body.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> GatewayResult<T> {
        let url = self.endpoint_url(endpoint)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in options.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(bearer) = self.bearer_header(endpoint).await? {
            headers.insert(AUTHORIZATION, bearer);
        }

        debug!(method = %options.method, endpoint, "gateway: sending request");
        let mut builder = self.http.request(options.method, url).headers(headers);
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(body) = options.body {
            let bytes = serde_json::to_vec(&body).map_err(|err| GatewayError::Decode {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            })?;
            builder = builder.body(bytes);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| transport_error(endpoint, err))?;
        let response = ensure_success(endpoint, response, false).await?;
        decode_json(endpoint, response).await
    }

    /// Sends one file as the multipart `file` field. Only the bearer header
    /// is attached; reqwest sets the multipart content type.
    pub async fn upload_file(&self, file: &UploadFile) -> GatewayResult<UploadResponse> {
        const ENDPOINT: &str = "/uploads/file";
        let url = self.endpoint_url(ENDPOINT)?;

        let part = Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)
            .map_err(|err| GatewayError::Transport {
                endpoint: ENDPOINT.to_string(),
                message: format!("invalid mime type '{}': {err}", file.mime_type),
            })?;
        let form = Form::new().part("file", part);

        let mut builder = self.http.post(url).multipart(form);
        if let Some(token) = self.session.bearer_token().await {
            builder = builder.bearer_auth(token);
        }

        debug!(file = %file.name, size = file.size(), "gateway: uploading file");
        let response = builder
            .send()
            .await
            .map_err(|err| transport_error(ENDPOINT, err))?;
        let response = ensure_success(ENDPOINT, response, true).await?;
        decode_json(ENDPOINT, response).await
    }

    pub async fn authenticate_demo(&self, email: &str, password: &str) -> AuthOutcome {
        let options = match RequestOptions::post().json(&DemoLoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }) {
            Ok(options) => options,
            Err(err) => {
                return AuthOutcome::Unreachable {
                    reason: err.to_string(),
                }
            }
        };

        match self.request::<TokenResponse>("/auth/demo", options).await {
            Ok(body) => {
                if let Err(err) = self.session.store_token(body.access_token).await {
                    warn!("auth: token kept in memory but could not be persisted: {err:#}");
                }
                AuthOutcome::Authenticated
            }
            Err(GatewayError::Status {
                status,
                status_text,
                detail,
            }) => AuthOutcome::Rejected {
                status,
                reason: detail.unwrap_or(status_text),
            },
            Err(err) => AuthOutcome::Unreachable {
                reason: err.to_string(),
            },
        }
    }

    pub async fn get_timeline_entries(
        &self,
        query: &TimelineQuery,
    ) -> GatewayResult<Vec<TimelineEntry>> {
        self.request(
            "/timeline/entries",
            RequestOptions::get().query(query.query_pairs()),
        )
        .await
    }

    pub async fn search_entries(&self, query: &str) -> GatewayResult<Vec<TimelineEntry>> {
        let options = RequestOptions::post().json(&SearchRequest {
            query: query.to_string(),
        })?;
        self.request("/search/entries", options).await
    }

    pub async fn get_search_suggestions(&self) -> GatewayResult<SearchSuggestions> {
        self.request("/search/suggestions", RequestOptions::get())
            .await
    }

    pub async fn get_weekly_summaries(&self, limit: u32) -> GatewayResult<Vec<WeeklySummary>> {
        self.request(
            "/timeline/weekly-summaries",
            RequestOptions::get().query([("limit", limit.to_string())]),
        )
        .await
    }

    pub async fn generate_weekly_summary(&self) -> GatewayResult<WeeklySummary> {
        self.request("/timeline/generate-summary", RequestOptions::post())
            .await
    }

    pub async fn get_timeline_stats(&self) -> GatewayResult<TimelineStats> {
        self.request("/timeline/stats", RequestOptions::get()).await
    }

    pub async fn get_upload_entry(&self, id: &EntryId) -> GatewayResult<TimelineEntry> {
        self.request(&format!("/uploads/{id}"), RequestOptions::get())
            .await
    }

    pub async fn delete_entry(&self, id: &EntryId) -> GatewayResult<DeleteEntryResponse> {
        self.request(&format!("/uploads/{id}"), RequestOptions::delete())
            .await
    }

    pub async fn health_check(&self) -> GatewayResult<HealthStatus> {
        self.request("/health", RequestOptions::get()).await
    }
}

fn transport_error(endpoint: &str, err: reqwest::Error) -> GatewayError {
    GatewayError::Transport {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    }
}

async fn ensure_success(endpoint: &str, response: Response, upload: bool) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let detail = response
        .text()
        .await
        .ok()
        .and_then(|body| serde_json::from_str::<ApiError>(&body).ok())
        .and_then(|body| body.detail);
    let status_text = status_text(status);
    debug!(endpoint, status = status.as_u16(), "gateway: non-success response");

    if upload {
        Err(GatewayError::UploadRejected {
            status: status.as_u16(),
            status_text,
            detail,
        })
    } else {
        Err(GatewayError::Status {
            status: status.as_u16(),
            status_text,
            detail,
        })
    }
}

fn status_text(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or_default().to_string()
}

async fn decode_json<T: DeserializeOwned>(endpoint: &str, response: Response) -> GatewayResult<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|err| transport_error(endpoint, err))?;
    serde_json::from_slice(&bytes).map_err(|err| GatewayError::Decode {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    })
}

#[async_trait]
impl LifelogApi for GatewayClient {
    async fn authenticate_demo(&self, email: &str, password: &str) -> AuthOutcome {
        GatewayClient::authenticate_demo(self, email, password).await
    }

    async fn get_timeline_entries(
        &self,
        query: &TimelineQuery,
    ) -> GatewayResult<Vec<TimelineEntry>> {
        GatewayClient::get_timeline_entries(self, query).await
    }

    async fn upload_file(&self, file: &UploadFile) -> GatewayResult<UploadResponse> {
        GatewayClient::upload_file(self, file).await
    }

    async fn get_upload_entry(&self, id: &EntryId) -> GatewayResult<TimelineEntry> {
        GatewayClient::get_upload_entry(self, id).await
    }

    async fn delete_entry(&self, id: &EntryId) -> GatewayResult<DeleteEntryResponse> {
        GatewayClient::delete_entry(self, id).await
    }

    async fn search_entries(&self, query: &str) -> GatewayResult<Vec<TimelineEntry>> {
        GatewayClient::search_entries(self, query).await
    }

    async fn get_search_suggestions(&self) -> GatewayResult<SearchSuggestions> {
        GatewayClient::get_search_suggestions(self).await
    }

    async fn get_weekly_summaries(&self, limit: u32) -> GatewayResult<Vec<WeeklySummary>> {
        GatewayClient::get_weekly_summaries(self, limit).await
    }

    async fn generate_weekly_summary(&self) -> GatewayResult<WeeklySummary> {
        GatewayClient::generate_weekly_summary(self).await
    }

    async fn get_timeline_stats(&self) -> GatewayResult<TimelineStats> {
        GatewayClient::get_timeline_stats(self).await
    }

    async fn health_check(&self) -> GatewayResult<HealthStatus> {
        GatewayClient::health_check(self).await
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
