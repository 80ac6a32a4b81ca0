//! Core identifier types used throughout the crate
//!
//! All identifiers are opaque strings issued by the server or the host UI.
//! Wrapping them in newtypes keeps a product reference from ever being
//! passed where an intent token is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Server-issued payment intent token.
    ///
    /// Opaque and unique. It doubles as the memo attached to on-chain
    /// transfers and exchange deposits so the server can match funds.
    IntentToken
);

string_id!(
    /// Reference to a purchasable item (course id, membership plan, ...).
    ///
    /// At most one non-terminal intent may exist per product reference.
    ProductRef
);

string_id!(
    /// Kind of product being purchased (e.g. `course`).
    ProductType
);

string_id!(
    /// Identity of the purchasing user as known to the payment API.
    ActorId
);

string_id!(
    /// Subject the notification socket is scoped to.
    SubjectId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_as_str() {
        let token = IntentToken::new("tok_123");
        assert_eq!(token.to_string(), "tok_123");
        assert_eq!(token.as_str(), "tok_123");
    }

    #[test]
    fn test_serde_is_transparent() {
        let product_ref = ProductRef::from("c1");
        let json = serde_json::to_string(&product_ref).unwrap();
        assert_eq!(json, "\"c1\"");

        let back: ProductRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, product_ref);
    }
}
