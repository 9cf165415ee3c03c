//! Strongly typed identifiers.
//!
//! Ids are opaque strings on the wire and in the database; nothing here
//! assumes a format. Ids minted by this crate happen to be UUIDs, ids minted
//! elsewhere (24-hex document ids, say) pass through untouched. Separate types
//! keep a media id from being passed where a post id is expected.

use std::borrow::Borrow;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// A fresh, random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a post record.
    PostId
);
string_id!(
    /// Identifier of a user, as supplied by the authentication layer.
    UserId
);
string_id!(
    /// Identifier of a media record owned by the media service.
    MediaId
);

/// The authenticated caller, as established by the HTTP layer in front of
/// both services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: UserId,
}

impl CallerIdentity {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_bare_string() {
        let id = PostId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        assert_eq!(serde_json::from_str::<PostId>(&json).unwrap(), id);
    }

    #[test]
    fn foreign_formats_pass_through_unchanged() {
        for raw in ["P", "m1", "65f1c0ffee0123456789abcd"] {
            let id: MediaId = serde_json::from_str(&format!("\"{raw}\"")).unwrap();
            assert_eq!(id.as_str(), raw);
            assert_eq!(id.to_string(), raw);
            assert_eq!(raw.parse::<MediaId>().unwrap(), id);
        }
    }

    #[test]
    fn minted_ids_are_distinct() {
        assert_ne!(UserId::new(), UserId::new());
        assert_eq!(CallerIdentity::new("u1").user_id, UserId::from("u1"));
    }
}
