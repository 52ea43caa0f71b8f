use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{MovieId, RoomId, UserId};

/// Reference to a file held by a third-party vendor (e.g. an Alist server)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorInfo {
    /// Name of the vendor backend the file lives on
    pub backend: String,
    pub path: String,
    #[serde(default)]
    pub password: String,
}

/// User-editable part of a movie
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BaseMovie {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub live: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<VendorInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: MovieId,
    pub room_id: RoomId,
    pub creator_id: UserId,
    /// Ordering key; lower positions are listed first
    pub position: i64,
    pub base: BaseMovie,
    pub created_at: DateTime<Utc>,
}

impl Movie {
    /// New movie with a fresh ID; room and position are assigned on insertion
    #[must_use]
    pub fn new(creator_id: UserId, base: BaseMovie) -> Self {
        Self {
            id: MovieId::new(),
            room_id: RoomId::from_string(String::new()),
            creator_id,
            position: 0,
            base,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn is_vendor(&self) -> bool {
        self.base.vendor.is_some()
    }
}
