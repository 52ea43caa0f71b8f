//! Test helpers and fixtures for synctv-room tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Notify;

use crate::{
    cache::VendorUserCaches,
    config::{GlobalSettings, HubConfig},
    models::{
        AdminPermissions, BaseMovie, CreateMemberOptions, Movie, MovieId, Permissions, Role,
        RoomId, RoomMember, RoomSettings, UserId, VendorInfo,
    },
    room::{Room, RoomDeps, RoomInfo},
    storage::{MemoryStorage, RoomStorage, VendorCredentials},
    vendor::VendorRegistry,
    Result,
};

/// Switchable stand-in for site-wide settings
#[derive(Debug)]
pub struct FakeGlobalSettings {
    enable_guest: AtomicBool,
}

impl FakeGlobalSettings {
    pub fn new(enable_guest: bool) -> Self {
        Self {
            enable_guest: AtomicBool::new(enable_guest),
        }
    }

    pub fn set_enable_guest(&self, enabled: bool) {
        self.enable_guest.store(enabled, Ordering::SeqCst);
    }
}

impl GlobalSettings for FakeGlobalSettings {
    fn enable_guest(&self) -> bool {
        self.enable_guest.load(Ordering::SeqCst)
    }
}

pub fn test_user_id(id: &str) -> UserId {
    UserId::from_string(id.to_string())
}

pub fn test_room_id(id: &str) -> RoomId {
    RoomId::from_string(id.to_string())
}

pub fn direct_movie(creator: &UserId, name: &str) -> Movie {
    Movie::new(
        creator.clone(),
        BaseMovie {
            name: name.to_string(),
            url: format!("https://cdn.example.com/{name}.mp4"),
            ..BaseMovie::default()
        },
    )
}

pub fn live_movie(creator: &UserId, name: &str) -> Movie {
    Movie::new(
        creator.clone(),
        BaseMovie {
            name: name.to_string(),
            url: format!("rtmp://live.example.com/{name}"),
            live: true,
            vendor: None,
        },
    )
}

pub fn vendor_movie(creator: &UserId, path: &str) -> Movie {
    Movie::new(
        creator.clone(),
        BaseMovie {
            name: path.to_string(),
            vendor: Some(VendorInfo {
                backend: String::new(),
                path: path.to_string(),
                password: String::new(),
            }),
            ..BaseMovie::default()
        },
    )
}

/// Room collaborators over `storage` with guests enabled and no vendors
pub fn test_deps(storage: Arc<dyn RoomStorage>) -> RoomDeps {
    test_deps_with(storage, Arc::new(VendorRegistry::new()), Arc::new(FakeGlobalSettings::new(true)))
}

pub fn test_deps_with(
    storage: Arc<dyn RoomStorage>,
    vendors: Arc<VendorRegistry>,
    settings: Arc<dyn GlobalSettings>,
) -> RoomDeps {
    RoomDeps {
        vendor_users: Arc::new(VendorUserCaches::new(
            Arc::clone(&storage),
            vendors,
            Duration::ZERO,
        )),
        storage,
        live: None,
        settings,
        hub: HubConfig::default(),
        movie_ttl: Duration::from_secs(3600),
    }
}

/// Fixture builder for [`Room`]
pub struct RoomFixture {
    id: RoomId,
    creator_id: UserId,
    settings: RoomSettings,
    hashed_password: String,
}

impl RoomFixture {
    pub fn new() -> Self {
        Self {
            id: test_room_id("room"),
            creator_id: test_user_id("owner"),
            settings: RoomSettings::default(),
            hashed_password: String::new(),
        }
    }

    pub fn with_settings(mut self, settings: RoomSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_hashed_password(mut self, hashed_password: &str) -> Self {
        self.hashed_password = hashed_password.to_string();
        self
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id.clone(),
            creator_id: self.creator_id.clone(),
            settings: self.settings.clone(),
            hashed_password: self.hashed_password.clone(),
        }
    }

    pub fn build(self, deps: RoomDeps) -> Room {
        Room::new(self.info(), deps)
    }
}

impl Default for RoomFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// [`MemoryStorage`] that can park movie deletions and member creation
///
/// A parked call has already done its work against the inner storage and
/// waits for [`GatedStorage::release`] before returning.
#[derive(Default)]
pub struct GatedStorage {
    pub inner: MemoryStorage,
    gate_deletes: AtomicBool,
    gate_member_creation: AtomicBool,
    entered: Notify,
    released: Notify,
}

impl GatedStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate_deletes(&self) {
        self.gate_deletes.store(true, Ordering::SeqCst);
    }

    pub fn gate_member_creation(&self) {
        self.gate_member_creation.store(true, Ordering::SeqCst);
    }

    /// Wait until a gated call is parked
    pub async fn parked(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }

    async fn pass(&self, gate: &AtomicBool) {
        if gate.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.released.notified().await;
        }
    }
}

#[async_trait]
impl RoomStorage for GatedStorage {
    async fn get_vendor_credentials(&self, user_id: &UserId) -> Result<VendorCredentials> {
        self.inner.get_vendor_credentials(user_id).await
    }

    async fn get_room_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<RoomMember> {
        self.inner.get_room_member(room_id, user_id).await
    }

    async fn first_or_create_room_member(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        options: CreateMemberOptions,
    ) -> Result<RoomMember> {
        let member = self
            .inner
            .first_or_create_room_member(room_id, user_id, options)
            .await;
        self.pass(&self.gate_member_creation).await;
        member
    }

    async fn set_member_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: Permissions,
    ) -> Result<()> {
        self.inner
            .set_member_permissions(room_id, user_id, permissions)
            .await
    }

    async fn add_member_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: Permissions,
    ) -> Result<()> {
        self.inner
            .add_member_permissions(room_id, user_id, permissions)
            .await
    }

    async fn remove_member_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: Permissions,
    ) -> Result<()> {
        self.inner
            .remove_member_permissions(room_id, user_id, permissions)
            .await
    }

    async fn set_admin_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: AdminPermissions,
    ) -> Result<()> {
        self.inner
            .set_admin_permissions(room_id, user_id, permissions)
            .await
    }

    async fn add_admin_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: AdminPermissions,
    ) -> Result<()> {
        self.inner
            .add_admin_permissions(room_id, user_id, permissions)
            .await
    }

    async fn remove_admin_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: AdminPermissions,
    ) -> Result<()> {
        self.inner
            .remove_admin_permissions(room_id, user_id, permissions)
            .await
    }

    async fn set_member_role(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        role: Role,
        permissions: Permissions,
        admin_permissions: AdminPermissions,
    ) -> Result<()> {
        self.inner
            .set_member_role(room_id, user_id, role, permissions, admin_permissions)
            .await
    }

    async fn ban_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        self.inner.ban_member(room_id, user_id).await
    }

    async fn unban_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        self.inner.unban_member(room_id, user_id).await
    }

    async fn approve_pending_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        self.inner.approve_pending_member(room_id, user_id).await
    }

    async fn set_room_hashed_password(
        &self,
        room_id: &RoomId,
        hashed_password: &str,
    ) -> Result<()> {
        self.inner
            .set_room_hashed_password(room_id, hashed_password)
            .await
    }

    async fn save_room_settings(&self, room_id: &RoomId, settings: &RoomSettings) -> Result<()> {
        self.inner.save_room_settings(room_id, settings).await
    }

    async fn update_room_settings(
        &self,
        room_id: &RoomId,
        fields: &Map<String, Value>,
    ) -> Result<RoomSettings> {
        self.inner.update_room_settings(room_id, fields).await
    }

    async fn load_movies(&self, room_id: &RoomId) -> Result<Vec<Movie>> {
        self.inner.load_movies(room_id).await
    }

    async fn create_movies(&self, movies: &[Movie]) -> Result<()> {
        self.inner.create_movies(movies).await
    }

    async fn update_movie(
        &self,
        room_id: &RoomId,
        movie_id: &MovieId,
        base: &BaseMovie,
    ) -> Result<()> {
        self.inner.update_movie(room_id, movie_id, base).await
    }

    async fn delete_movies(&self, room_id: &RoomId, movie_ids: &[MovieId]) -> Result<()> {
        let deleted = self.inner.delete_movies(room_id, movie_ids).await;
        self.pass(&self.gate_deletes).await;
        deleted
    }

    async fn delete_room_movies(&self, room_id: &RoomId) -> Result<()> {
        self.inner.delete_room_movies(room_id).await
    }

    async fn swap_movie_positions(
        &self,
        room_id: &RoomId,
        a: &MovieId,
        b: &MovieId,
    ) -> Result<()> {
        self.inner.swap_movie_positions(room_id, a, b).await
    }
}
