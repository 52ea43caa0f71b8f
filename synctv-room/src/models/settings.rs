use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::permission::Permissions;
use crate::{Error, Result};

/// Per-room feature toggles and membership policy
///
/// The `can_*` toggles are room-wide kill switches: when one is off, members
/// are denied that capability regardless of their own permission bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomSettings {
    pub hidden: bool,
    pub disable_join_new_user: bool,
    pub join_need_review: bool,
    pub disable_guest: bool,
    pub user_default_permissions: Permissions,

    pub can_get_movie_list: bool,
    pub can_add_movie: bool,
    pub can_delete_movie: bool,
    pub can_edit_movie: bool,
    pub can_set_current_movie: bool,
    pub can_set_current_status: bool,
    pub can_send_chat_message: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            hidden: false,
            disable_join_new_user: false,
            join_need_review: false,
            disable_guest: false,
            user_default_permissions: Permissions::DEFAULT,
            can_get_movie_list: true,
            can_add_movie: true,
            can_delete_movie: true,
            can_edit_movie: true,
            can_set_current_movie: true,
            can_set_current_status: true,
            can_send_chat_message: true,
        }
    }
}

impl RoomSettings {
    /// Whether the room-level toggle for any class in `permission` is off
    #[must_use]
    pub const fn disables(&self, permission: Permissions) -> bool {
        (permission.has(Permissions::GET_MOVIE_LIST) && !self.can_get_movie_list)
            || (permission.has(Permissions::ADD_MOVIE) && !self.can_add_movie)
            || (permission.has(Permissions::DELETE_MOVIE) && !self.can_delete_movie)
            || (permission.has(Permissions::EDIT_MOVIE) && !self.can_edit_movie)
            || (permission.has(Permissions::SET_CURRENT_MOVIE) && !self.can_set_current_movie)
            || (permission.has(Permissions::SET_CURRENT_STATUS) && !self.can_set_current_status)
            || (permission.has(Permissions::SEND_CHAT_MESSAGE) && !self.can_send_chat_message)
    }

    /// Apply a partial update keyed by field name
    ///
    /// Unknown keys and mistyped values are rejected without touching `self`.
    pub fn apply_partial(&self, fields: &Map<String, Value>) -> Result<Self> {
        let mut merged = serde_json::to_value(self)
            .map_err(|e| Error::Internal(format!("Failed to encode room settings: {e}")))?;

        let Value::Object(target) = &mut merged else {
            return Err(Error::Internal("Room settings must encode as an object".to_string()));
        };
        for (key, value) in fields {
            if !target.contains_key(key) {
                return Err(Error::InvalidOperation(format!("Unknown room setting '{key}'")));
            }
            target.insert(key.clone(), value.clone());
        }

        serde_json::from_value(merged)
            .map_err(|e| Error::InvalidOperation(format!("Invalid room settings: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_enable_everything() {
        let settings = RoomSettings::default();
        assert!(!settings.disables(Permissions::ALL));
    }

    #[test]
    fn test_disables_by_class() {
        let settings = RoomSettings {
            can_add_movie: false,
            ..RoomSettings::default()
        };
        assert!(settings.disables(Permissions::ADD_MOVIE));
        assert!(settings.disables(Permissions::ADD_MOVIE | Permissions::EDIT_MOVIE));
        assert!(!settings.disables(Permissions::EDIT_MOVIE));
    }

    #[test]
    fn test_apply_partial() {
        let settings = RoomSettings::default();
        let patch = json!({ "join_need_review": true, "can_send_chat_message": false });

        let updated = settings.apply_partial(patch.as_object().unwrap()).unwrap();

        assert!(updated.join_need_review);
        assert!(!updated.can_send_chat_message);
        assert!(updated.can_add_movie);
    }

    #[test]
    fn test_apply_partial_rejects_unknown_and_mistyped() {
        let settings = RoomSettings::default();

        let unknown = json!({ "max_members": 3 });
        let err = settings.apply_partial(unknown.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));

        let mistyped = json!({ "hidden": "yes" });
        assert!(settings.apply_partial(mistyped.as_object().unwrap()).is_err());
    }
}
