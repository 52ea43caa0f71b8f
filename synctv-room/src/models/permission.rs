//! Room permission model
//!
//! Two independent capability sets live on every member:
//! - [`Permissions`] covers what a member may do with room content
//!   (movies, playback, chat).
//! - [`AdminPermissions`] covers room administration and only means something
//!   for members with the [`Role::Admin`] role (the creator implicitly has all).
//!
//! Both are bitmasks with named flags; only `has`/`union`/`clear` semantics are
//! relied on, never a specific integer width.

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

macro_rules! capability_set {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const NONE: Self = Self(0);
            pub const ALL: Self = Self(u64::MAX);

            #[must_use]
            pub const fn bits(&self) -> u64 {
                self.0
            }

            #[must_use]
            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }

            /// True when any capability in `other` is present
            #[must_use]
            pub const fn has(&self, other: Self) -> bool {
                (self.0 & other.0) != 0
            }

            #[must_use]
            pub const fn has_all(&self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            #[must_use]
            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            /// Remove every capability in `other`
            #[must_use]
            pub const fn clear(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::NONE
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                *self = self.union(rhs);
            }
        }
    };
}

capability_set!(
    /// Content capabilities of a room member
    Permissions
);

impl Permissions {
    pub const GET_MOVIE_LIST: Self = Self(1 << 0);
    pub const ADD_MOVIE: Self = Self(1 << 1);
    pub const DELETE_MOVIE: Self = Self(1 << 2);
    pub const EDIT_MOVIE: Self = Self(1 << 3);
    pub const SET_CURRENT_MOVIE: Self = Self(1 << 4);
    pub const SET_CURRENT_STATUS: Self = Self(1 << 5);
    pub const SEND_CHAT_MESSAGE: Self = Self(1 << 6);

    /// Permissions given to newly joined members unless the room overrides them
    pub const DEFAULT: Self = Self(
        Self::GET_MOVIE_LIST.0 | Self::ADD_MOVIE.0 | Self::SEND_CHAT_MESSAGE.0,
    );
}

capability_set!(
    /// Administration capabilities of a room admin
    AdminPermissions
);

impl AdminPermissions {
    pub const APPROVE_PENDING_MEMBER: Self = Self(1 << 0);
    pub const BAN_ROOM_MEMBER: Self = Self(1 << 1);
    pub const SET_USER_PERMISSION: Self = Self(1 << 2);
    pub const SET_ROOM_SETTINGS: Self = Self(1 << 3);
    pub const SET_ROOM_PASSWORD: Self = Self(1 << 4);
    pub const DELETE_ROOM: Self = Self(1 << 5);

    /// Granted on promotion to admin; deleting the room stays with the creator
    pub const DEFAULT: Self = Self(
        Self::APPROVE_PENDING_MEMBER.0
            | Self::BAN_ROOM_MEMBER.0
            | Self::SET_USER_PERMISSION.0
            | Self::SET_ROOM_SETTINGS.0
            | Self::SET_ROOM_PASSWORD.0,
    );
}

/// Room role, ordered by privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unknown,
    Member,
    Admin,
    Creator,
}

impl Role {
    /// Admin or above
    #[must_use]
    pub fn is_admin(&self) -> bool {
        *self >= Self::Admin
    }

    #[must_use]
    pub const fn is_creator(&self) -> bool {
        matches!(self, Self::Creator)
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::Member
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "creator" => Ok(Self::Creator),
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Unknown role: {s}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creator => write!(f, "creator"),
            Self::Admin => write!(f, "admin"),
            Self::Member => write!(f, "member"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Member status in room (independent of role)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Unknown,
    Pending,
    Active,
    Banned,
}

impl MemberStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Banned => "banned",
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[must_use]
    pub const fn is_banned(&self) -> bool {
        matches!(self, Self::Banned)
    }
}

impl Default for MemberStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
