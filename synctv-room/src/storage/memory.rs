use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::{RoomStorage, VendorCredentials};
use crate::{
    models::{
        AdminPermissions, BaseMovie, CreateMemberOptions, MemberStatus, Movie, MovieId,
        Permissions, Role, RoomId, RoomMember, RoomSettings, UserId,
    },
    Error, Result,
};

/// Process-local [`RoomStorage`]
///
/// Used by tests and single-node setups without a database.
#[derive(Default)]
pub struct MemoryStorage {
    credentials: DashMap<UserId, VendorCredentials>,
    members: DashMap<(RoomId, UserId), RoomMember>,
    passwords: DashMap<RoomId, String>,
    settings: DashMap<RoomId, RoomSettings>,
    movies: DashMap<RoomId, RwLock<Vec<Movie>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_vendor_credentials(&self, user_id: UserId, credentials: VendorCredentials) {
        self.credentials.insert(user_id, credentials);
    }

    pub fn put_member(&self, member: RoomMember) {
        self.members
            .insert((member.room_id.clone(), member.user_id.clone()), member);
    }

    #[must_use]
    pub fn member(&self, room_id: &RoomId, user_id: &UserId) -> Option<RoomMember> {
        self.members
            .get(&(room_id.clone(), user_id.clone()))
            .map(|m| m.clone())
    }

    #[must_use]
    pub fn hashed_password(&self, room_id: &RoomId) -> Option<String> {
        self.passwords.get(room_id).map(|p| p.clone())
    }

    #[must_use]
    pub fn stored_movies(&self, room_id: &RoomId) -> Vec<Movie> {
        self.movies
            .get(room_id)
            .map(|m| m.read().clone())
            .unwrap_or_default()
    }

    fn with_member<F>(&self, room_id: &RoomId, user_id: &UserId, f: F) -> Result<()>
    where
        F: FnOnce(&mut RoomMember),
    {
        let mut member = self
            .members
            .get_mut(&(room_id.clone(), user_id.clone()))
            .ok_or_else(|| Error::NotFound(format!("Room member {user_id} not found")))?;
        f(&mut member);
        Ok(())
    }
}

#[async_trait]
impl RoomStorage for MemoryStorage {
    async fn get_vendor_credentials(&self, user_id: &UserId) -> Result<VendorCredentials> {
        self.credentials
            .get(user_id)
            .map(|c| c.clone())
            .ok_or_else(|| Error::NotFound(format!("Vendor credentials of {user_id} not found")))
    }

    async fn get_room_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<RoomMember> {
        self.member(room_id, user_id)
            .ok_or_else(|| Error::NotFound(format!("Room member {user_id} not found")))
    }

    async fn first_or_create_room_member(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        options: CreateMemberOptions,
    ) -> Result<RoomMember> {
        let member = self
            .members
            .entry((room_id.clone(), user_id.clone()))
            .or_insert_with(|| options.into_member(room_id.clone(), user_id.clone()));
        Ok(member.clone())
    }

    async fn set_member_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: Permissions,
    ) -> Result<()> {
        self.with_member(room_id, user_id, |m| m.permissions = permissions)
    }

    async fn add_member_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: Permissions,
    ) -> Result<()> {
        self.with_member(room_id, user_id, |m| {
            m.permissions = m.permissions.union(permissions);
        })
    }

    async fn remove_member_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: Permissions,
    ) -> Result<()> {
        self.with_member(room_id, user_id, |m| {
            m.permissions = m.permissions.clear(permissions);
        })
    }

    async fn set_admin_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: AdminPermissions,
    ) -> Result<()> {
        self.with_member(room_id, user_id, |m| m.admin_permissions = permissions)
    }

    async fn add_admin_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: AdminPermissions,
    ) -> Result<()> {
        self.with_member(room_id, user_id, |m| {
            m.admin_permissions = m.admin_permissions.union(permissions);
        })
    }

    async fn remove_admin_permissions(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        permissions: AdminPermissions,
    ) -> Result<()> {
        self.with_member(room_id, user_id, |m| {
            m.admin_permissions = m.admin_permissions.clear(permissions);
        })
    }

    async fn set_member_role(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        role: Role,
        permissions: Permissions,
        admin_permissions: AdminPermissions,
    ) -> Result<()> {
        self.with_member(room_id, user_id, |m| {
            m.role = role;
            m.permissions = permissions;
            m.admin_permissions = admin_permissions;
        })
    }

    async fn ban_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        self.with_member(room_id, user_id, |m| m.status = MemberStatus::Banned)
    }

    async fn unban_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        self.with_member(room_id, user_id, |m| m.status = MemberStatus::Active)
    }

    async fn approve_pending_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        let mut member = self
            .members
            .get_mut(&(room_id.clone(), user_id.clone()))
            .ok_or_else(|| Error::NotFound(format!("Room member {user_id} not found")))?;
        if !member.status.is_pending() {
            return Err(Error::InvalidOperation(format!(
                "Room member {user_id} is not pending"
            )));
        }
        member.status = MemberStatus::Active;
        Ok(())
    }

    async fn set_room_hashed_password(
        &self,
        room_id: &RoomId,
        hashed_password: &str,
    ) -> Result<()> {
        self.passwords
            .insert(room_id.clone(), hashed_password.to_string());
        Ok(())
    }

    async fn save_room_settings(&self, room_id: &RoomId, settings: &RoomSettings) -> Result<()> {
        self.settings.insert(room_id.clone(), settings.clone());
        Ok(())
    }

    async fn update_room_settings(
        &self,
        room_id: &RoomId,
        fields: &Map<String, Value>,
    ) -> Result<RoomSettings> {
        let mut entry = self.settings.entry(room_id.clone()).or_default();
        let updated = entry.apply_partial(fields)?;
        *entry = updated.clone();
        Ok(updated)
    }

    async fn load_movies(&self, room_id: &RoomId) -> Result<Vec<Movie>> {
        let mut movies = self.stored_movies(room_id);
        movies.sort_by_key(|m| m.position);
        Ok(movies)
    }

    async fn create_movies(&self, movies: &[Movie]) -> Result<()> {
        for movie in movies {
            self.movies
                .entry(movie.room_id.clone())
                .or_default()
                .write()
                .push(movie.clone());
        }
        Ok(())
    }

    async fn update_movie(
        &self,
        room_id: &RoomId,
        movie_id: &MovieId,
        base: &BaseMovie,
    ) -> Result<()> {
        let movies = self
            .movies
            .get(room_id)
            .ok_or_else(|| Error::NotFound(format!("Movie {movie_id} not found")))?;
        let mut movies = movies.write();
        let movie = movies
            .iter_mut()
            .find(|m| &m.id == movie_id)
            .ok_or_else(|| Error::NotFound(format!("Movie {movie_id} not found")))?;
        movie.base = base.clone();
        Ok(())
    }

    async fn delete_movies(&self, room_id: &RoomId, movie_ids: &[MovieId]) -> Result<()> {
        if let Some(movies) = self.movies.get(room_id) {
            movies.write().retain(|m| !movie_ids.contains(&m.id));
        }
        Ok(())
    }

    async fn delete_room_movies(&self, room_id: &RoomId) -> Result<()> {
        self.movies.remove(room_id);
        Ok(())
    }

    async fn swap_movie_positions(
        &self,
        room_id: &RoomId,
        a: &MovieId,
        b: &MovieId,
    ) -> Result<()> {
        let movies = self
            .movies
            .get(room_id)
            .ok_or_else(|| Error::NotFound(format!("Movie {a} not found")))?;
        let mut movies = movies.write();
        let ia = movies
            .iter()
            .position(|m| &m.id == a)
            .ok_or_else(|| Error::NotFound(format!("Movie {a} not found")))?;
        let ib = movies
            .iter()
            .position(|m| &m.id == b)
            .ok_or_else(|| Error::NotFound(format!("Movie {b} not found")))?;
        let pa = movies[ia].position;
        movies[ia].position = movies[ib].position;
        movies[ib].position = pa;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_or_create_keeps_existing_row() {
        let storage = MemoryStorage::new();
        let room = RoomId::from("room");
        let user = UserId::from("user");

        let created = storage
            .first_or_create_room_member(
                &room,
                &user,
                CreateMemberOptions {
                    status: MemberStatus::Pending,
                    ..CreateMemberOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(created.status.is_pending());

        let again = storage
            .first_or_create_room_member(&room, &user, CreateMemberOptions::default())
            .await
            .unwrap();
        assert!(again.status.is_pending());
    }

    #[tokio::test]
    async fn test_member_mutations_require_row() {
        let storage = MemoryStorage::new();
        let err = storage
            .ban_member(&RoomId::from("room"), &UserId::from("ghost"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_approve_only_pending() {
        let storage = MemoryStorage::new();
        let room = RoomId::from("room");
        let user = UserId::from("user");
        storage.put_member(RoomMember::new(room.clone(), user.clone()));

        let err = storage.approve_pending_member(&room, &user).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }
}
