use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::EntryId,
    protocol::{
        DeleteEntryResponse, HealthStatus, SearchSuggestions, TimelineEntry, TimelineStats,
        UploadResponse, WeeklySummary,
    },
};
use storage::Storage;
use tracing::{debug, info, warn};

pub mod config;
pub mod error;
pub mod gateway;
pub mod resources;
pub mod session;
pub mod upload;

pub use config::{load_settings, ClientSettings, SettingsError};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{GatewayClient, RequestOptions, TimelineFilters, TimelineQuery};
pub use resources::{
    DataSource, FetchOutcome, ResourceState, SearchResource, TimelineResource,
    WeeklySummaryResource,
};
pub use session::{bootstrap_demo_auth, AuthOutcome, DemoCredentials, Session};
pub use upload::{
    BatchAcceptance, CompletionPolicy, RejectReason, RejectedFile, UploadEvent, UploadFile,
    UploadOrchestrator, UploadSettings, UploadStatus, UploadTask,
};

/// Typed operations of the LifeLog service. Containers and the upload
/// orchestrator only see this trait.
#[async_trait]
pub trait LifelogApi: Send + Sync {
    async fn authenticate_demo(&self, email: &str, password: &str) -> AuthOutcome;
    async fn get_timeline_entries(&self, query: &TimelineQuery)
        -> GatewayResult<Vec<TimelineEntry>>;
    async fn upload_file(&self, file: &UploadFile) -> GatewayResult<UploadResponse>;
    async fn get_upload_entry(&self, id: &EntryId) -> GatewayResult<TimelineEntry>;
    async fn delete_entry(&self, id: &EntryId) -> GatewayResult<DeleteEntryResponse>;
    async fn search_entries(&self, query: &str) -> GatewayResult<Vec<TimelineEntry>>;
    async fn get_search_suggestions(&self) -> GatewayResult<SearchSuggestions>;
    async fn get_weekly_summaries(&self, limit: u32) -> GatewayResult<Vec<WeeklySummary>>;
    async fn generate_weekly_summary(&self) -> GatewayResult<WeeklySummary>;
    async fn get_timeline_stats(&self) -> GatewayResult<TimelineStats>;
    async fn health_check(&self) -> GatewayResult<HealthStatus>;
}

/// Gateway that fails every call, behind [`LifelogClient::offline`].
/// Containers fall back to their sample data on top of it.
#[derive(Debug, Clone)]
pub struct UnavailableGateway {
    reason: String,
}

impl UnavailableGateway {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> GatewayResult<T> {
        Err(GatewayError::Unavailable(self.reason.clone()))
    }
}

#[async_trait]
impl LifelogApi for UnavailableGateway {
    async fn authenticate_demo(&self, _email: &str, _password: &str) -> AuthOutcome {
        AuthOutcome::Unreachable {
            reason: self.reason.clone(),
        }
    }

    async fn get_timeline_entries(
        &self,
        _query: &TimelineQuery,
    ) -> GatewayResult<Vec<TimelineEntry>> {
        self.fail()
    }

    async fn upload_file(&self, _file: &UploadFile) -> GatewayResult<UploadResponse> {
        self.fail()
    }

    async fn get_upload_entry(&self, _id: &EntryId) -> GatewayResult<TimelineEntry> {
        self.fail()
    }

    async fn delete_entry(&self, _id: &EntryId) -> GatewayResult<DeleteEntryResponse> {
        self.fail()
    }

    async fn search_entries(&self, _query: &str) -> GatewayResult<Vec<TimelineEntry>> {
        self.fail()
    }

    async fn get_search_suggestions(&self) -> GatewayResult<SearchSuggestions> {
        self.fail()
    }

    async fn get_weekly_summaries(&self, _limit: u32) -> GatewayResult<Vec<WeeklySummary>> {
        self.fail()
    }

    async fn generate_weekly_summary(&self) -> GatewayResult<WeeklySummary> {
        self.fail()
    }

    async fn get_timeline_stats(&self) -> GatewayResult<TimelineStats> {
        self.fail()
    }

    async fn health_check(&self) -> GatewayResult<HealthStatus> {
        self.fail()
    }
}

/// Everything a LifeLog front end needs, wired from one [`ClientSettings`].
pub struct LifelogClient {
    settings: ClientSettings,
    session: Arc<Session>,
    api: Arc<dyn LifelogApi>,
    pub timeline: Arc<TimelineResource>,
    pub search: SearchResource,
    pub summaries: Arc<WeeklySummaryResource>,
    pub uploads: Arc<UploadOrchestrator>,
}

impl LifelogClient {
    /// Opens the token database and builds an HTTP gateway. If the database
    /// cannot be opened the session lives in memory only.
    pub async fn connect(settings: ClientSettings) -> Result<Self> {
        let session = match Storage::new(&settings.token_database_url).await {
            Ok(storage) => Session::load(Arc::new(storage)).await,
            Err(err) => {
                warn!(
                    database_url = %settings.token_database_url,
                    "client: token database unavailable, session will not persist: {err:#}"
                );
                Session::ephemeral()
            }
        };
        let gateway = GatewayClient::new(settings.backend_url.clone(), Arc::clone(&session));
        info!(backend_url = %gateway.base_url(), "client: gateway configured");
        Ok(Self::with_api(settings, session, Arc::new(gateway)))
    }

    /// Client that never touches the network or the token database.
    pub fn offline(settings: ClientSettings) -> Self {
        info!("client: offline mode, serving sample data");
        Self::with_api(
            settings,
            Session::ephemeral(),
            Arc::new(UnavailableGateway::new("offline mode")),
        )
    }

    /// Wires the containers over `api`. When called inside a Tokio runtime
    /// the timeline and weekly summaries start their initial fetch at once;
    /// search waits for a query.
    pub fn with_api(
        settings: ClientSettings,
        session: Arc<Session>,
        api: Arc<dyn LifelogApi>,
    ) -> Self {
        let client = Self {
            timeline: Arc::new(TimelineResource::with_page_size(
                Arc::clone(&api),
                settings.timeline_page_size,
            )),
            search: SearchResource::new(Arc::clone(&api)),
            summaries: Arc::new(WeeklySummaryResource::with_limit(
                Arc::clone(&api),
                settings.summary_limit,
            )),
            uploads: UploadOrchestrator::new(Arc::clone(&api), settings.upload.clone()),
            settings,
            session,
            api,
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            client.timeline.spawn_load();
            client.summaries.spawn_fetch();
        } else {
            debug!("client: no runtime, initial fetches left to the caller");
        }
        client
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn api(&self) -> &Arc<dyn LifelogApi> {
        &self.api
    }

    /// Best-effort demo login using the configured identity. Skipped when
    /// no demo email is set.
    pub async fn bootstrap_auth(&self) -> AuthOutcome {
        let credentials = self
            .settings
            .demo_email
            .as_ref()
            .map(|email| DemoCredentials::new(email.clone(), self.settings.demo_password.clone()));
        bootstrap_demo_auth(self.api.as_ref(), credentials.as_ref()).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.session.clear_token().await
    }
}

#[cfg(test)]
#[path = "tests/test_support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
