//! Persistence boundary of the room engine
//!
//! The engine never talks to a database directly; everything it persists or
//! loads goes through [`RoomStorage`]. Member mutations must be safe to repeat,
//! since the engine only invalidates its local cache and relies on the next
//! load to observe the authoritative row.

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use memory::MemoryStorage;

use crate::{
    models::{
        AdminPermissions, BaseMovie, CreateMemberOptions, Movie, MovieId, Permissions, Role,
        RoomId, RoomMember, RoomSettings, UserId,
    },
    Result,
};

/// Vendor login material bound to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorCredentials {
    pub backend: String,
    pub host: String,
    /// Empty for anonymous (guest) access to the vendor
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub hashed_password: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomStorage: Send + Sync {
    // Vendor credentials

    async fn get_vendor_credentials(&self, user_id: &UserId) -> Result<VendorCredentials>;

    // Members

    async fn get_room_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<RoomMember>;

    async fn first_or_create_room_member(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        options: CreateMemberOptions,
    ) -> Result<RoomMember>;

    async fn set_member_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: Permissions,
    ) -> Result<()>;

    async fn add_member_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: Permissions,
    ) -> Result<()>;

    async fn remove_member_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: Permissions,
    ) -> Result<()>;

    async fn set_admin_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: AdminPermissions,
    ) -> Result<()>;

    async fn add_admin_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: AdminPermissions,
    ) -> Result<()>;

    async fn remove_admin_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: AdminPermissions,
    ) -> Result<()>;

    /// Change role, replacing both permission sets
    async fn set_member_role(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        role: Role,
        permissions: Permissions,
        admin_permissions: AdminPermissions,
    ) -> Result<()>;

    async fn ban_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()>;

    async fn unban_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()>;

    async fn approve_pending_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()>;

    // Room

    async fn set_room_hashed_password(&self, room_id: &RoomId, hashed_password: &str)
        -> Result<()>;

    async fn save_room_settings(&self, room_id: &RoomId, settings: &RoomSettings) -> Result<()>;

    async fn update_room_settings(
        &self,
        room_id: &RoomId,
        fields: &Map<String, Value>,
    ) -> Result<RoomSettings>;

    // Movies

    /// All movies of a room, in position order
    async fn load_movies(&self, room_id: &RoomId) -> Result<Vec<Movie>>;

    async fn create_movies(&self, movies: &[Movie]) -> Result<()>;

    async fn update_movie(&self, room_id: &RoomId, movie_id: &MovieId, base: &BaseMovie)
        -> Result<()>;

    async fn delete_movies(&self, room_id: &RoomId, movie_ids: &[MovieId]) -> Result<()>;

    async fn delete_room_movies(&self, room_id: &RoomId) -> Result<()>;

    async fn swap_movie_positions(&self, room_id: &RoomId, a: &MovieId, b: &MovieId)
        -> Result<()>;
}
