//! Vendor lookups behind [`RefreshCache`]
//!
//! Two layers: a per-user cache holding the vendor host and access token, and
//! a per-movie cache that uses the user cache as its dependency to resolve
//! playable URLs. The user cache defaults to TTL 0; it is dropped through
//! [`VendorUserCaches::invalidate`] when credentials change or a login fails.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use super::RefreshCache;
use crate::{
    models::{UserId, VendorInfo},
    storage::{RoomStorage, VendorCredentials},
    vendor::{PathRequest, PlayUrl, VendorRegistry, TRANSCODING_PROVIDER, VIDEO_PREVIEW_METHOD},
    Error, Result,
};

/// Resolved vendor login state of one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorUserData {
    pub backend: String,
    pub host: String,
    /// Empty for anonymous access
    pub token: String,
}

/// Playable URLs of one vendor movie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorMovieData {
    pub urls: Vec<PlayUrl>,
}

pub type VendorUserCache = RefreshCache<VendorUserData>;

/// Movie URL cache; the refresh needs the creator's [`VendorUserCache`]
pub type VendorMovieCache = RefreshCache<VendorMovieData, VendorUserCache>;

/// Log in (or identify anonymously) with stored credentials
pub async fn authorize(
    vendors: &VendorRegistry,
    credentials: &VendorCredentials,
) -> Result<VendorUserData> {
    let client = vendors.client(&credentials.backend)?;

    let token = if credentials.username.is_empty() {
        client
            .identify(&credentials.host)
            .await
            .map_err(|e| e.context(format!("identify vendor host {}", credentials.host)))?;
        String::new()
    } else {
        client
            .authenticate(
                &credentials.host,
                &credentials.username,
                &credentials.hashed_password,
            )
            .await
            .map_err(|e| e.context(format!("log in to vendor host {}", credentials.host)))?
    };

    Ok(VendorUserData {
        backend: credentials.backend.clone(),
        host: credentials.host.clone(),
        token,
    })
}

#[must_use]
pub fn new_vendor_user_cache(
    user_id: UserId,
    storage: Arc<dyn RoomStorage>,
    vendors: Arc<VendorRegistry>,
    ttl: Duration,
) -> VendorUserCache {
    RefreshCache::new(ttl, move |_ctx, ()| {
        let user_id = user_id.clone();
        let storage = Arc::clone(&storage);
        let vendors = Arc::clone(&vendors);
        async move {
            let credentials = match storage.get_vendor_credentials(&user_id).await {
                Ok(credentials) => credentials,
                Err(e) if e.is_not_found() => {
                    return Err(Error::VendorNotBound(format!(
                        "User {user_id} has no vendor bound"
                    )))
                }
                Err(e) => return Err(e.context(format!("load vendor credentials of {user_id}"))),
            };
            debug!(user_id = %user_id, backend = %credentials.backend, "Authorizing vendor user");
            authorize(&vendors, &credentials).await
        }
    })
}

#[must_use]
pub fn new_vendor_movie_cache(
    info: VendorInfo,
    vendors: Arc<VendorRegistry>,
    ttl: Duration,
) -> VendorMovieCache {
    RefreshCache::new(ttl, move |ctx, user_cache: VendorUserCache| {
        let info = info.clone();
        let vendors = Arc::clone(&vendors);
        async move {
            let user = user_cache.get(&ctx, ()).await?;
            if user.host.is_empty() {
                return Err(Error::VendorNotBound(format!(
                    "No host bound for vendor backend '{}'",
                    info.backend
                )));
            }

            let client = vendors.client(&info.backend)?;
            let request = PathRequest {
                host: user.host.clone(),
                token: user.token.clone(),
                path: info.path.clone(),
                password: info.password.clone(),
            };

            let stat = client
                .stat_path(&request)
                .await
                .map_err(|e| e.context(format!("stat vendor path '{}'", info.path)))?;
            if stat.is_dir {
                return Err(Error::NotPlayable(format!("'{}' is a directory", info.path)));
            }

            let urls = if stat.provider == TRANSCODING_PROVIDER {
                client
                    .alternate_access(&request, VIDEO_PREVIEW_METHOD)
                    .await
                    .map_err(|e| e.context(format!("preview vendor path '{}'", info.path)))?
            } else {
                vec![PlayUrl {
                    url: stat.raw_url,
                    label: String::new(),
                }]
            };

            Ok(VendorMovieData { urls })
        }
    })
}

/// Per-user vendor caches shared by every room
pub struct VendorUserCaches {
    caches: DashMap<UserId, VendorUserCache>,
    storage: Arc<dyn RoomStorage>,
    vendors: Arc<VendorRegistry>,
    ttl: Duration,
}

impl VendorUserCaches {
    #[must_use]
    pub fn new(storage: Arc<dyn RoomStorage>, vendors: Arc<VendorRegistry>, ttl: Duration) -> Self {
        Self {
            caches: DashMap::new(),
            storage,
            vendors,
            ttl,
        }
    }

    /// Cache for `user_id`, created on first use
    #[must_use]
    pub fn get(&self, user_id: &UserId) -> VendorUserCache {
        self.caches
            .entry(user_id.clone())
            .or_insert_with(|| {
                new_vendor_user_cache(
                    user_id.clone(),
                    Arc::clone(&self.storage),
                    Arc::clone(&self.vendors),
                    self.ttl,
                )
            })
            .clone()
    }

    /// Drop the user's cache; the next `get` logs in again
    pub fn invalidate(&self, user_id: &UserId) -> bool {
        self.caches.remove(user_id).is_some()
    }

    #[must_use]
    pub fn vendors(&self) -> &Arc<VendorRegistry> {
        &self.vendors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}
