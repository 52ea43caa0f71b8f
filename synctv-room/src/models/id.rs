use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 12-character nanoid for entity IDs
#[must_use]
pub fn generate_id() -> String {
    nanoid!(12)
}

/// Reserved ID of the shared guest pseudo-user
pub const GUEST_USER_ID: &str = "00000000guest";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(generate_id())
            }

            #[must_use]
            pub const fn from_string(id: String) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// User ID type (nanoid)
    UserId
);
string_id!(
    /// Room ID type (nanoid)
    RoomId
);
string_id!(
    /// Movie ID type, unique within a room
    MovieId
);
string_id!(
    /// One live client connection
    ConnectionId
);

impl UserId {
    #[must_use]
    pub fn guest() -> Self {
        Self(GUEST_USER_ID.to_string())
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.0 == GUEST_USER_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = RoomId::new();
        let b = RoomId::new();
        assert_eq!(a.as_str().len(), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_guest_id() {
        assert!(UserId::guest().is_guest());
        assert!(!UserId::new().is_guest());
        assert_eq!(UserId::from("alice").to_string(), "alice");
    }
}
