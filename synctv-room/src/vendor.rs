//! Third-party file vendor boundary
//!
//! A vendor is an external file server (Alist-compatible) that movies can
//! reference by path instead of by URL. Each backend name maps to one client.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Vendor provider that only serves playable links through an alternate method
pub const TRANSCODING_PROVIDER: &str = "AliyundriveOpen";

/// Alternate access method returning transcoded preview streams
pub const VIDEO_PREVIEW_METHOD: &str = "video_preview";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorProfile {
    pub username: String,
}

/// Addresses one file on a vendor host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRequest {
    pub host: String,
    pub token: String,
    pub path: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStat {
    pub is_dir: bool,
    pub raw_url: String,
    /// Storage provider behind the vendor path
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayUrl {
    pub url: String,
    /// Quality/template label, empty for the raw file
    #[serde(default)]
    pub label: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VendorClient: Send + Sync {
    /// Anonymous identification against a vendor host
    async fn identify(&self, host: &str) -> Result<VendorProfile>;

    /// Log in and return an access token
    async fn authenticate(&self, host: &str, username: &str, hashed_password: &str)
        -> Result<String>;

    async fn stat_path(&self, request: &PathRequest) -> Result<PathStat>;

    async fn alternate_access(&self, request: &PathRequest, method: &str) -> Result<Vec<PlayUrl>>;
}

/// Backend name -> vendor client
#[derive(Default)]
pub struct VendorRegistry {
    clients: DashMap<String, Arc<dyn VendorClient>>,
}

impl VendorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, backend: impl Into<String>, client: Arc<dyn VendorClient>) {
        self.clients.insert(backend.into(), client);
    }

    /// Look up a backend; the empty name selects the default backend
    pub fn client(&self, backend: &str) -> Result<Arc<dyn VendorClient>> {
        self.clients
            .get(backend)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| Error::NotFound(format!("Vendor backend '{backend}' not registered")))
    }
}
