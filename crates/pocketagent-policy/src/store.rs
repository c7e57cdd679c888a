//! Policy store surface: `GET /permissions`, `PUT /permissions`.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::{PermissionConfig, PermissionUpdate};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("policy_request_failed:{message}")]
    Request { message: String },
    #[error("policy_http_{status}:{body}")]
    Http { status: u16, body: String },
    #[error("policy_decode_failed:{message}")]
    Decode { message: String },
    #[error("policy_store_failed:{message}")]
    Store { message: String },
}

/// Where the policy document lives. `fetch` returns `None` for "no policy
/// yet" (the engine resolves that to an empty default config).
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn fetch(&self) -> Result<Option<PermissionConfig>, PolicyError>;
    async fn update(&self, update: &PermissionUpdate) -> Result<(), PolicyError>;
}

/// HTTP-backed policy store.
pub struct HttpPolicyStore {
    base_url: String,
    http: reqwest::Client,
}

impl HttpPolicyStore {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    #[must_use]
    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, http }
    }

    fn permissions_url(&self) -> String {
        format!("{}/permissions", self.base_url)
    }
}

#[async_trait]
impl PolicyStore for HttpPolicyStore {
    async fn fetch(&self) -> Result<Option<PermissionConfig>, PolicyError> {
        let response = self
            .http
            .get(self.permissions_url())
            .send()
            .await
            .map_err(|err| PolicyError::Request {
                message: err.to_string(),
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PolicyError::Http { status, body });
        }
        response
            .json::<PermissionConfig>()
            .await
            .map(Some)
            .map_err(|err| PolicyError::Decode {
                message: err.to_string(),
            })
    }

    async fn update(&self, update: &PermissionUpdate) -> Result<(), PolicyError> {
        let response = self
            .http
            .put(self.permissions_url())
            .json(update)
            .send()
            .await
            .map_err(|err| PolicyError::Request {
                message: err.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PolicyError::Http { status, body });
        }
        Ok(())
    }
}

/// In-memory policy store for tests and local-only setups.
#[derive(Default)]
pub struct MemoryPolicyStore {
    config: Mutex<Option<PermissionConfig>>,
    fail_updates: Mutex<bool>,
}

impl MemoryPolicyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: PermissionConfig) -> Self {
        Self {
            config: Mutex::new(Some(config)),
            fail_updates: Mutex::new(false),
        }
    }

    /// Make subsequent `update` calls fail, for write-error tests.
    pub async fn fail_updates(&self, fail: bool) {
        *self.fail_updates.lock().await = fail;
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn fetch(&self) -> Result<Option<PermissionConfig>, PolicyError> {
        Ok(self.config.lock().await.clone())
    }

    async fn update(&self, update: &PermissionUpdate) -> Result<(), PolicyError> {
        if *self.fail_updates.lock().await {
            return Err(PolicyError::Store {
                message: "update rejected".to_string(),
            });
        }
        let mut config = self.config.lock().await;
        let mut current = config.clone().unwrap_or_default();
        update.apply_to(&mut current);
        *config = Some(current);
        Ok(())
    }
}
