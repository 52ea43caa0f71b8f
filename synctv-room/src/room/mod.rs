//! Per-room synchronization engine
//!
//! A [`Room`] owns the movie list, the current playback state, a lazily
//! created connection [`Hub`] and a cache of resolved members. Permission and
//! invariant checks run before anything is persisted; storage is always
//! written before in-memory state changes.

pub mod current;
pub mod hub;
pub mod manager;
pub mod movies;


use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use current::{Current, CurrentState, Status};
pub use hub::{BroadcastOptions, Client, ClientReceiver, Hub, Message};
pub use manager::RoomManager;
pub use movies::{MovieList, RoomMovie};

use crate::{
    cache::VendorUserCaches,
    config::{GlobalSettings, HubConfig},
    live::{Channel, LiveChannelProvider},
    models::{
        AdminPermissions, BaseMovie, CreateMemberOptions, MemberStatus, Movie, MovieId, Page,
        PageParams, Permissions, Role, RoomId, RoomMember, RoomSettings, UserId,
    },
    password::{hash_password, password_version, verify_password},
    storage::RoomStorage,
    vendor::PlayUrl,
    Error, Result,
};

/// Collaborators shared by every room of a process
#[derive(Clone)]
pub struct RoomDeps {
    pub storage: Arc<dyn RoomStorage>,
    pub vendor_users: Arc<VendorUserCaches>,
    pub live: Option<Arc<dyn LiveChannelProvider>>,
    pub settings: Arc<dyn GlobalSettings>,
    pub hub: HubConfig,
    /// TTL of resolved vendor movie URLs
    pub movie_ttl: Duration,
}

/// Persisted room attributes needed to open a room
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub id: RoomId,
    pub creator_id: UserId,
    pub settings: RoomSettings,
    /// Empty when the room has no password
    pub hashed_password: String,
}

pub struct Room {
    id: RoomId,
    creator_id: UserId,
    settings: RwLock<Arc<RoomSettings>>,
    hashed_password: RwLock<String>,
    version: AtomicU32,
    members: DashMap<UserId, RoomMember>,
    /// Bumped on every invalidation so in-flight loads do not re-cache stale rows
    member_epoch: AtomicU64,
    hub: OnceCell<Hub>,
    movies: MovieList,
    current: CurrentState,
    /// Held across the current-movie check and the playlist change it guards
    current_lock: Mutex<()>,
    deps: RoomDeps,
}

/// Drops a member's cache entry when the enclosing operation ends, however it ends
struct MemberInvalidation<'a> {
    room: &'a Room,
    user_id: &'a UserId,
}

impl Drop for MemberInvalidation<'_> {
    fn drop(&mut self) {
        self.room.invalidate_member(self.user_id);
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("creator_id", &self.creator_id)
            .field("version", &self.version())
            .field("hub_initialized", &self.hub.get().is_some())
            .finish_non_exhaustive()
    }
}

impl Room {
    #[must_use]
    pub fn new(info: RoomInfo, deps: RoomDeps) -> Self {
        let version = password_version(&info.hashed_password);
        Self {
            movies: MovieList::new(info.id.clone(), Arc::clone(&deps.storage)),
            id: info.id,
            creator_id: info.creator_id,
            settings: RwLock::new(Arc::new(info.settings)),
            hashed_password: RwLock::new(info.hashed_password),
            version: AtomicU32::new(version),
            members: DashMap::new(),
            member_epoch: AtomicU64::new(0),
            hub: OnceCell::new(),
            current: CurrentState::new(),
            current_lock: Mutex::new(()),
            deps,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &RoomId {
        &self.id
    }

    #[must_use]
    pub const fn creator_id(&self) -> &UserId {
        &self.creator_id
    }

    #[must_use]
    pub fn is_creator(&self, user_id: &UserId) -> bool {
        &self.creator_id == user_id
    }

    #[must_use]
    pub fn is_guest(&self, user_id: &UserId) -> bool {
        user_id.is_guest()
    }

    #[must_use]
    pub fn settings(&self) -> Arc<RoomSettings> {
        Arc::clone(&self.settings.read())
    }

    // Members

    fn guest_allowed(&self) -> bool {
        self.deps.settings.enable_guest() && !self.settings.read().disable_guest
    }

    /// Creator and guest resolve to fixed shapes without touching storage
    fn fixed_member(&self, user_id: &UserId) -> Result<Option<RoomMember>> {
        if self.is_creator(user_id) {
            let mut member = RoomMember::new(self.id.clone(), user_id.clone());
            member.force_creator();
            return Ok(Some(member));
        }
        if user_id.is_guest() {
            if !self.guest_allowed() {
                return Err(Error::PermissionDenied("Guest access is disabled".to_string()));
            }
            let mut member = RoomMember::new(self.id.clone(), user_id.clone());
            member.force_guest();
            return Ok(Some(member));
        }
        Ok(None)
    }

    fn cache_member(&self, mut member: RoomMember, epoch: u64) -> RoomMember {
        if member.role.is_admin() {
            member.permissions = Permissions::ALL;
        }
        if self.member_epoch.load(Ordering::Acquire) != epoch {
            return member;
        }
        self.members
            .entry(member.user_id.clone())
            .or_insert(member)
            .clone()
    }

    fn invalidate_member(&self, user_id: &UserId) {
        self.member_epoch.fetch_add(1, Ordering::AcqRel);
        self.members.remove(user_id);
    }

    fn invalidate_all_members(&self) {
        self.member_epoch.fetch_add(1, Ordering::AcqRel);
        self.members.clear();
    }

    const fn invalidate_on_exit<'a>(&'a self, user_id: &'a UserId) -> MemberInvalidation<'a> {
        MemberInvalidation {
            room: self,
            user_id,
        }
    }

    /// Effective member without creating one; `NotFound` for unknown users
    pub async fn load_member(&self, user_id: &UserId) -> Result<RoomMember> {
        if let Some(member) = self.fixed_member(user_id)? {
            return Ok(member);
        }
        if let Some(member) = self.members.get(user_id) {
            return Ok(member.clone());
        }

        let epoch = self.member_epoch.load(Ordering::Acquire);
        let member = self.deps.storage.get_room_member(&self.id, user_id).await?;
        Ok(self.cache_member(member, epoch))
    }

    /// Effective member, creating the membership on first contact
    ///
    /// Rooms that refuse new users only load. New members get the room's
    /// default permissions and start pending when joins need review.
    pub async fn resolve_member(&self, user_id: &UserId) -> Result<RoomMember> {
        let settings = self.settings();
        if settings.disable_join_new_user {
            return self.load_member(user_id).await;
        }
        if let Some(member) = self.fixed_member(user_id)? {
            return Ok(member);
        }
        if let Some(member) = self.members.get(user_id) {
            return Ok(member.clone());
        }

        let options = CreateMemberOptions {
            role: Role::Member,
            status: if settings.join_need_review {
                MemberStatus::Pending
            } else {
                MemberStatus::Active
            },
            permissions: settings.user_default_permissions,
            admin_permissions: AdminPermissions::NONE,
        };
        let epoch = self.member_epoch.load(Ordering::Acquire);
        let member = self
            .deps
            .storage
            .first_or_create_room_member(&self.id, user_id, options)
            .await?;
        debug!(room_id = %self.id, user_id = %user_id, status = %member.status, "Resolved room member");
        Ok(self.cache_member(member, epoch))
    }

    pub async fn load_member_status(&self, user_id: &UserId) -> Result<MemberStatus> {
        Ok(self.load_member(user_id).await?.status)
    }

    pub async fn resolve_member_status(&self, user_id: &UserId) -> Result<MemberStatus> {
        Ok(self.resolve_member(user_id).await?.status)
    }

    pub async fn member_permissions(&self, user_id: &UserId) -> Result<Permissions> {
        Ok(self.load_member(user_id).await?.permissions)
    }

    pub async fn member_admin_permissions(&self, user_id: &UserId) -> Result<AdminPermissions> {
        Ok(self.load_member(user_id).await?.admin_permissions)
    }

    /// Informational role; unresolvable users are `Unknown`
    pub async fn user_role(&self, user_id: &UserId) -> Role {
        self.resolve_member(user_id)
            .await
            .map_or(Role::Unknown, |m| m.role)
    }

    pub async fn is_admin(&self, user_id: &UserId) -> bool {
        self.user_role(user_id).await.is_admin()
    }

    /// Whether the user may exercise every capability in `permission`
    ///
    /// A room toggle that is off denies everyone but the creator. Past the
    /// toggles, admins are allowed and members need the bits themselves.
    pub async fn has_permission(&self, user_id: &UserId, permission: Permissions) -> bool {
        if self.is_creator(user_id) {
            return true;
        }
        let Ok(member) = self.resolve_member(user_id).await else {
            return false;
        };
        if self.settings.read().disables(permission) {
            return false;
        }
        member.role.is_admin() || member.has_permission(permission)
    }

    pub async fn has_admin_permission(&self, user_id: &UserId, permission: AdminPermissions) -> bool {
        if self.is_creator(user_id) {
            return true;
        }
        self.resolve_member(user_id)
            .await
            .is_ok_and(|m| m.has_admin_permission(permission))
    }

    pub async fn check_permission(&self, user_id: &UserId, permission: Permissions) -> Result<()> {
        if self.has_permission(user_id, permission).await {
            Ok(())
        } else {
            Err(Error::PermissionDenied(format!(
                "User {user_id} lacks permission {:#x} in room {}",
                permission.bits(),
                self.id
            )))
        }
    }

    pub async fn check_admin_permission(
        &self,
        user_id: &UserId,
        permission: AdminPermissions,
    ) -> Result<()> {
        if self.has_admin_permission(user_id, permission).await {
            Ok(())
        } else {
            Err(Error::PermissionDenied(format!(
                "User {user_id} lacks admin permission {:#x} in room {}",
                permission.bits(),
                self.id
            )))
        }
    }

    fn reject_creator(&self, user_id: &UserId, action: &str) -> Result<()> {
        if self.is_creator(user_id) {
            return Err(Error::InvalidOperation(format!(
                "Cannot {action} the room creator"
            )));
        }
        Ok(())
    }

    // Member administration

    pub async fn set_member_permissions(&self, user_id: &UserId, permissions: Permissions) -> Result<()> {
        let _invalidate = self.invalidate_on_exit(user_id);
        self.deps
            .storage
            .set_member_permissions(&self.id, user_id, permissions)
            .await
    }

    pub async fn add_member_permissions(&self, user_id: &UserId, permissions: Permissions) -> Result<()> {
        let _invalidate = self.invalidate_on_exit(user_id);
        self.deps
            .storage
            .add_member_permissions(&self.id, user_id, permissions)
            .await
    }

    pub async fn remove_member_permissions(
        &self,
        user_id: &UserId,
        permissions: Permissions,
    ) -> Result<()> {
        let _invalidate = self.invalidate_on_exit(user_id);
        self.deps
            .storage
            .remove_member_permissions(&self.id, user_id, permissions)
            .await
    }

    /// Back to the room's default member permissions
    pub async fn reset_member_permissions(&self, user_id: &UserId) -> Result<()> {
        let defaults = self.settings.read().user_default_permissions;
        self.set_member_permissions(user_id, defaults).await
    }

    pub async fn set_admin_permissions(
        &self,
        user_id: &UserId,
        permissions: AdminPermissions,
    ) -> Result<()> {
        let _invalidate = self.invalidate_on_exit(user_id);
        self.deps
            .storage
            .set_admin_permissions(&self.id, user_id, permissions)
            .await
    }

    pub async fn add_admin_permissions(
        &self,
        user_id: &UserId,
        permissions: AdminPermissions,
    ) -> Result<()> {
        let _invalidate = self.invalidate_on_exit(user_id);
        self.deps
            .storage
            .add_admin_permissions(&self.id, user_id, permissions)
            .await
    }

    pub async fn remove_admin_permissions(
        &self,
        user_id: &UserId,
        permissions: AdminPermissions,
    ) -> Result<()> {
        let _invalidate = self.invalidate_on_exit(user_id);
        self.deps
            .storage
            .remove_admin_permissions(&self.id, user_id, permissions)
            .await
    }

    pub async fn reset_admin_permissions(&self, user_id: &UserId) -> Result<()> {
        self.set_admin_permissions(user_id, AdminPermissions::DEFAULT)
            .await
    }

    /// Promote to admin with the given admin permissions
    pub async fn set_admin(&self, user_id: &UserId, permissions: AdminPermissions) -> Result<()> {
        self.reject_creator(user_id, "change the role of")?;
        let _invalidate = self.invalidate_on_exit(user_id);
        self.deps
            .storage
            .set_member_role(&self.id, user_id, Role::Admin, Permissions::ALL, permissions)
            .await
    }

    /// Demote to a plain member with the given permissions
    pub async fn set_member(&self, user_id: &UserId, permissions: Permissions) -> Result<()> {
        self.reject_creator(user_id, "change the role of")?;
        let _invalidate = self.invalidate_on_exit(user_id);
        self.deps
            .storage
            .set_member_role(
                &self.id,
                user_id,
                Role::Member,
                permissions,
                AdminPermissions::NONE,
            )
            .await
    }

    pub async fn approve_pending_member(&self, user_id: &UserId) -> Result<()> {
        let _invalidate = self.invalidate_on_exit(user_id);
        self.deps
            .storage
            .approve_pending_member(&self.id, user_id)
            .await
    }

    /// Ban a member and disconnect all of their live connections
    pub async fn ban_member(&self, user_id: &UserId) -> Result<()> {
        self.reject_creator(user_id, "ban")?;
        let _invalidate = self.invalidate_on_exit(user_id);
        self.deps.storage.ban_member(&self.id, user_id).await?;

        // registrations still in flight must see the ban too
        let kicked = self.hub().ban_user(user_id);
        info!(room_id = %self.id, user_id = %user_id, kicked, "Member banned");
        Ok(())
    }

    pub async fn unban_member(&self, user_id: &UserId) -> Result<()> {
        self.reject_creator(user_id, "unban")?;
        let _invalidate = self.invalidate_on_exit(user_id);
        self.deps.storage.unban_member(&self.id, user_id).await?;
        if let Some(hub) = self.hub.get() {
            hub.unban_user(user_id);
        }
        Ok(())
    }

    // Password

    #[must_use]
    pub fn need_password(&self) -> bool {
        !self.hashed_password.read().is_empty()
    }

    /// Rooms without a password accept anything
    pub async fn check_password(&self, password: &str) -> Result<bool> {
        let hashed = self.hashed_password.read().clone();
        if hashed.is_empty() {
            return Ok(true);
        }
        verify_password(password, &hashed).await
    }

    /// Change the room password; an empty password removes it
    pub async fn set_password(&self, password: &str) -> Result<()> {
        let identical = if self.need_password() {
            !password.is_empty() && self.check_password(password).await?
        } else {
            password.is_empty()
        };
        if identical {
            return Err(Error::InvalidOperation(
                "New password is the same as the current one".to_string(),
            ));
        }

        let hashed = if password.is_empty() {
            String::new()
        } else {
            hash_password(password).await?
        };
        self.deps
            .storage
            .set_room_hashed_password(&self.id, &hashed)
            .await?;

        let version = password_version(&hashed);
        let mut current = self.hashed_password.write();
        *current = hashed;
        self.version.store(version, Ordering::Release);
        info!(room_id = %self.id, protected = !current.is_empty(), "Room password changed");
        Ok(())
    }

    /// Checksum of the current password hash, 0 without a password
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn check_version(&self, version: u32) -> bool {
        self.version() == version
    }

    // Settings

    pub async fn set_settings(&self, settings: RoomSettings) -> Result<()> {
        self.deps
            .storage
            .save_room_settings(&self.id, &settings)
            .await?;
        self.replace_settings(settings).await;
        Ok(())
    }

    /// Apply a partial update keyed by setting name
    pub async fn update_settings(&self, fields: &Map<String, Value>) -> Result<Arc<RoomSettings>> {
        let updated = self
            .deps
            .storage
            .update_room_settings(&self.id, fields)
            .await?;
        Ok(self.replace_settings(updated).await)
    }

    async fn replace_settings(&self, settings: RoomSettings) -> Arc<RoomSettings> {
        let settings = Arc::new(settings);
        *self.settings.write() = Arc::clone(&settings);
        // default permissions and guest policy feed into resolved members
        self.invalidate_all_members();
        self.notify(Message::SettingsChanged(settings.as_ref().clone()))
            .await;
        settings
    }

    // Movies

    pub async fn add_movie(&self, movie: Movie) -> Result<Arc<RoomMovie>> {
        let added = self.movies.add(movie).await?;
        self.notify(Message::MoviesChanged).await;
        Ok(added)
    }

    pub async fn add_movies(&self, movies: Vec<Movie>) -> Result<Vec<Arc<RoomMovie>>> {
        let added = self.movies.add_many(movies).await?;
        self.notify(Message::MoviesChanged).await;
        Ok(added)
    }

    pub async fn update_movie(&self, movie_id: &MovieId, base: BaseMovie) -> Result<Arc<RoomMovie>> {
        let updated = {
            let _current = self.current_lock.lock().await;
            if self.current.is_current(movie_id) {
                return Err(Error::InvalidOperation(
                    "Cannot update the current movie".to_string(),
                ));
            }
            self.movies.update(movie_id, base).await?
        };
        self.notify(Message::MoviesChanged).await;
        Ok(updated)
    }

    pub async fn delete_movie(&self, movie_id: &MovieId) -> Result<()> {
        self.delete_movies(std::slice::from_ref(movie_id)).await
    }

    pub async fn delete_movies(&self, movie_ids: &[MovieId]) -> Result<()> {
        {
            let _current = self.current_lock.lock().await;
            if self.current.contains_any(movie_ids) {
                return Err(Error::InvalidOperation(
                    "Cannot delete the current movie".to_string(),
                ));
            }
            self.movies.delete_many(movie_ids).await?;
        }
        self.notify(Message::MoviesChanged).await;
        Ok(())
    }

    /// Drop every movie; the current pointer is cleared first
    pub async fn clear_movies(&self) -> Result<()> {
        let guard = self.current_lock.lock().await;
        let current = self.current.set_movie(None, false, false);
        self.notify(Message::Current(current)).await;
        self.movies.clear().await?;
        drop(guard);
        self.notify(Message::MoviesChanged).await;
        Ok(())
    }

    pub async fn swap_movie_positions(&self, a: &MovieId, b: &MovieId) -> Result<()> {
        self.movies.swap(a, b).await?;
        self.notify(Message::MoviesChanged).await;
        Ok(())
    }

    pub async fn movies_page(
        &self,
        params: PageParams,
        creator: Option<&UserId>,
    ) -> Result<Page<Movie>> {
        self.movies.list(params, creator).await
    }

    pub async fn get_movie(&self, movie_id: &MovieId) -> Result<Arc<RoomMovie>> {
        self.movies.get(movie_id).await
    }

    pub async fn movies_count(&self) -> Result<usize> {
        self.movies.len().await
    }

    /// Playable URLs of a movie, resolved through the vendor caches when needed
    pub async fn movie_play_urls(
        &self,
        ctx: &CancellationToken,
        movie_id: &MovieId,
    ) -> Result<Vec<PlayUrl>> {
        let movie = self.movies.get(movie_id).await?;
        let Some(cache) =
            movie.vendor_cache(self.deps.vendor_users.vendors(), self.deps.movie_ttl)
        else {
            return Ok(vec![PlayUrl {
                url: movie.base().url.clone(),
                label: String::new(),
            }]);
        };

        let user_cache = self.deps.vendor_users.get(movie.creator_id());
        let data = cache.get(ctx, user_cache).await?;
        Ok(data.urls.clone())
    }

    // Current

    #[must_use]
    pub fn current(&self) -> Current {
        self.current.snapshot()
    }

    #[must_use]
    pub fn current_movie_id(&self) -> Option<MovieId> {
        self.current.movie_id()
    }

    pub async fn current_movie(&self) -> Result<Arc<RoomMovie>> {
        let movie_id = self
            .current
            .movie_id()
            .ok_or_else(|| Error::NotFound("No current movie".to_string()))?;
        self.movies.get(&movie_id).await
    }

    /// Whether an expiry token handed out for the current movie is stale
    pub async fn check_current_expired(&self, token: u64) -> Result<bool> {
        let movie = self.current_movie().await?;
        Ok(CurrentState::check_expired(token, movie.expire_id()))
    }

    /// Point the room at a movie, or at nothing with `None`
    pub async fn set_current_movie(&self, movie_id: Option<&MovieId>, play: bool) -> Result<Current> {
        let current = {
            let _current = self.current_lock.lock().await;
            match movie_id {
                None => self.current.set_movie(None, false, play),
                Some(movie_id) => {
                    let movie = self.movies.get(movie_id).await?;
                    self.current
                        .set_movie(Some(movie.id().clone()), movie.base().live, play)
                }
            }
        };
        self.notify(Message::Current(current.clone())).await;
        Ok(current)
    }

    /// Overwrite playback status; the caller broadcasts the result
    pub fn set_current_status(
        &self,
        playing: bool,
        seek: f64,
        rate: f64,
        time_diff: f64,
    ) -> Result<Status> {
        self.current.set_status(playing, seek, rate, time_diff)
    }

    pub fn set_current_seek_rate(&self, seek: f64, rate: f64, time_diff: f64) -> Result<Status> {
        self.current.set_seek_rate(seek, rate, time_diff)
    }

    // Live

    pub fn get_channel(&self, channel_name: &str) -> Result<Arc<Channel>> {
        let provider = self
            .deps
            .live
            .as_ref()
            .ok_or_else(|| Error::NotFound("Live streaming is not available".to_string()))?;
        provider.get_channel(&self.id, channel_name)
    }

    // Connections

    /// The room's hub, created on first use
    pub fn hub(&self) -> &Hub {
        self.hub
            .get_or_init(|| Hub::new(self.id.clone(), self.deps.hub.clone()))
    }

    /// Open and register a connection for `user_id`
    pub async fn new_client(&self, user_id: UserId) -> Result<(Arc<Client>, ClientReceiver)> {
        let (client, receiver) = self.hub().new_client(user_id);
        self.register_client(Arc::clone(&client)).await?;
        Ok((client, receiver))
    }

    /// Register a connection; banned members are refused
    pub async fn register_client(&self, client: Arc<Client>) -> Result<()> {
        let status = self.resolve_member_status(client.user_id()).await?;
        if status.is_banned() {
            return Err(Error::PermissionDenied(format!(
                "User {} is banned from room {}",
                client.user_id(),
                self.id
            )));
        }
        self.hub().register_client(client)
    }

    pub fn unregister_client(&self, client: &Client) -> bool {
        self.hub().unregister_client(client)
    }

    #[must_use]
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.hub().is_online(user_id)
    }

    pub async fn broadcast(&self, message: Message, options: &BroadcastOptions) -> usize {
        self.hub().broadcast(message, options).await
    }

    pub async fn send_to_user(&self, user_id: &UserId, message: Message) -> usize {
        self.hub().send_to_user(user_id, message).await
    }

    pub fn kick_user(&self, user_id: &UserId) -> usize {
        self.hub.get().map_or(0, |hub| hub.kick_user(user_id))
    }

    /// Distinct connected users; 0 while nobody ever connected
    #[must_use]
    pub fn people_num(&self) -> usize {
        self.hub.get().map_or(0, Hub::people_num)
    }

    /// Broadcast a state change, skipping rooms nobody has connected to
    async fn notify(&self, message: Message) {
        if let Some(hub) = self.hub.get() {
            hub.broadcast(message, &BroadcastOptions::default()).await;
        }
    }

    /// Release the hub and movie list, if they were ever used
    pub fn close(&self) {
        if let Some(hub) = self.hub.get() {
            hub.close();
        }
        self.movies.close();
        self.invalidate_all_members();
        info!(room_id = %self.id, "Room closed");
    }
}
