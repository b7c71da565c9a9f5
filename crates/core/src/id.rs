//! Strongly-typed identifiers used across the domain.
//!
//! Bill and line item ids are opaque strings: callers may supply their own
//! (e.g. `"B1"`), otherwise the runtime generates a UUIDv7 string through its
//! recorded-effect primitive.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a bill (one actor per bill id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillId(String);

/// Identifier of a line item, unique within its bill.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineItemId(String);

macro_rules! impl_string_id {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap an existing identifier without validation.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Fresh time-ordered identifier.
            ///
            /// Not replay-safe on its own: inside an actor, call this only
            /// through the recorded-effect primitive.
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: empty", $name)));
                }
                Ok(Self(trimmed.to_string()))
            }
        }
    };
}

impl_string_id!(BillId, "BillId");
impl_string_id!(LineItemId, "LineItemId");
