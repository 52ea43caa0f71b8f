use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{RoomId, UserId};
use super::permission::{AdminPermissions, MemberStatus, Permissions, Role};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMember {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: Role,
    pub status: MemberStatus,
    pub permissions: Permissions,
    pub admin_permissions: AdminPermissions,
    pub joined_at: DateTime<Utc>,
}

impl RoomMember {
    #[must_use]
    pub fn new(room_id: RoomId, user_id: UserId) -> Self {
        Self {
            room_id,
            user_id,
            role: Role::Member,
            status: MemberStatus::Active,
            permissions: Permissions::DEFAULT,
            admin_permissions: AdminPermissions::NONE,
            joined_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn has_permission(&self, permission: Permissions) -> bool {
        self.permissions.has(permission)
    }

    /// Admin capabilities only count for admins and the creator
    #[must_use]
    pub fn has_admin_permission(&self, permission: AdminPermissions) -> bool {
        self.role.is_admin() && self.admin_permissions.has(permission)
    }

    /// Overwrite with the fixed shape every room creator resolves to
    pub fn force_creator(&mut self) {
        self.role = Role::Creator;
        self.status = MemberStatus::Active;
        self.permissions = Permissions::ALL;
        self.admin_permissions = AdminPermissions::ALL;
    }

    /// Overwrite with the fixed shape of the shared guest user
    pub fn force_guest(&mut self) {
        self.role = Role::Member;
        self.status = MemberStatus::Active;
        self.permissions = Permissions::NONE;
        self.admin_permissions = AdminPermissions::NONE;
    }
}

/// Initial values used when storage has to create a member row
#[derive(Debug, Clone, PartialEq)]
pub struct CreateMemberOptions {
    pub role: Role,
    pub status: MemberStatus,
    pub permissions: Permissions,
    pub admin_permissions: AdminPermissions,
}

impl Default for CreateMemberOptions {
    fn default() -> Self {
        Self {
            role: Role::Member,
            status: MemberStatus::Active,
            permissions: Permissions::DEFAULT,
            admin_permissions: AdminPermissions::NONE,
        }
    }
}

impl CreateMemberOptions {
    #[must_use]
    pub fn into_member(self, room_id: RoomId, user_id: UserId) -> RoomMember {
        RoomMember {
            room_id,
            user_id,
            role: self.role,
            status: self.status,
            permissions: self.permissions,
            admin_permissions: self.admin_permissions,
            joined_at: Utc::now(),
        }
    }
}
