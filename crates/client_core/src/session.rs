//! Bearer-token session shared by every gateway call.
//!
//! The token is loaded once from a [`TokenStore`] when the session is built
//! and read again on every request, so a token issued by demo authentication
//! is visible to the very next call.

use std::sync::Arc;

use anyhow::Result;
use storage::{MemoryTokenStore, TokenStore};
use tokio::sync::RwLock;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::LifelogApi;

pub struct Session {
    store: Arc<dyn TokenStore>,
    token: RwLock<Option<Zeroizing<String>>>,
}

impl Session {
    /// Builds a session, reading any persisted token. A failing store yields
    /// a session without a token.
    pub async fn load(store: Arc<dyn TokenStore>) -> Arc<Self> {
        let token = match store.load_token().await {
            Ok(token) => token.filter(|t| !t.is_empty()).map(Zeroizing::new),
            Err(err) => {
                warn!("session: failed to load persisted token: {err:#}");
                None
            }
        };
        if token.is_some() {
            info!("session: restored persisted backend token");
        }
        Arc::new(Self {
            store,
            token: RwLock::new(token),
        })
    }

    /// Session backed by process memory only.
    pub fn ephemeral() -> Arc<Self> {
        Arc::new(Self {
            store: Arc::new(MemoryTokenStore::new()),
            token: RwLock::new(None),
        })
    }

    pub async fn bearer_token(&self) -> Option<String> {
        self.token
            .read()
            .await
            .as_ref()
            .map(|token| token.as_str().to_string())
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Replaces the in-memory token without persisting it.
    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = Some(Zeroizing::new(token.into()));
    }

    /// Replaces the in-memory token and writes it to the durable store.
    /// The in-memory value is kept even if persisting fails.
    pub async fn store_token(&self, token: impl Into<String>) -> Result<()> {
        let token = token.into();
        self.set_token(token.clone()).await;
        let token = Zeroizing::new(token);
        self.store.save_token(&token).await
    }

    pub async fn clear_token(&self) -> Result<()> {
        self.token.write().await.take();
        self.store.clear_token().await
    }
}

#[derive(Debug, Clone)]
pub struct DemoCredentials {
    pub email: String,
    pub password: String,
}

impl DemoCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Result of the best-effort demo authentication bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    /// No credential was available, so nothing was attempted.
    Skipped,
    /// The service answered with a non-2xx status.
    Rejected { status: u16, reason: String },
    /// The service could not be reached or returned an unreadable body.
    Unreachable { reason: String },
}

impl AuthOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

/// Authenticates once a user identity exists. Never fails: the UI keeps
/// working without a backend token.
pub async fn bootstrap_demo_auth(
    api: &dyn LifelogApi,
    credentials: Option<&DemoCredentials>,
) -> AuthOutcome {
    let Some(credentials) = credentials else {
        info!("auth: no demo credentials available, continuing without backend token");
        return AuthOutcome::Skipped;
    };

    let outcome = api
        .authenticate_demo(&credentials.email, &credentials.password)
        .await;
    match &outcome {
        AuthOutcome::Authenticated => info!(email = %credentials.email, "auth: demo login succeeded"),
        AuthOutcome::Rejected { status, reason } => warn!(
            status,
            "auth: demo login rejected ({reason}), continuing without backend token"
        ),
        AuthOutcome::Unreachable { reason } => warn!(
            "auth: demo login failed ({reason}), continuing without backend token"
        ),
        AuthOutcome::Skipped => {}
    }
    outcome
}
