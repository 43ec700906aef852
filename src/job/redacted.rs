//! Secret handling for repository and transport credentials.
//!
//! Credentials read from the config file must never reach logs, debug
//! output, or re-serialized config. `Redacted` keeps the value private,
//! prints a placeholder everywhere, and zeroes its memory on drop.

use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::result;
use zeroize::Zeroize;

/// Placeholder emitted wherever a secret would otherwise appear.
pub static REDACTED_PLACEHOLDER: &str = "<redacted>";

/// A credential string that never leaves the process in readable form.
///
/// `Debug` and `Serialize` both emit [`REDACTED_PLACEHOLDER`]; the real
/// value is only reachable through [`Redacted::reveal`], which the store
/// client uses when assembling a per-invocation environment overlay.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted {
    value: String,
}

impl Redacted {
    /// The underlying secret, for building an environment overlay.
    pub fn reveal(&self) -> &str {
        &self.value
    }
}

impl From<String> for Redacted {
    fn from(value: String) -> Self {
        Self { value }
    }
}

impl From<&str> for Redacted {
    fn from(value: &str) -> Self {
        Self {
            value: value.to_owned(),
        }
    }
}

impl Debug for Redacted {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{REDACTED_PLACEHOLDER}")
    }
}

impl Serialize for Redacted {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED_PLACEHOLDER)
    }
}

impl<'de> Deserialize<'de> for Redacted {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        struct RedactedVisitor;

        impl Visitor<'_> for RedactedVisitor {
            type Value = Redacted;

            fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
                formatter.write_str("a secret string")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> result::Result<Redacted, E> {
                Ok(Redacted::from(v))
            }

            fn visit_string<E: serde::de::Error>(
                self,
                v: String,
            ) -> result::Result<Redacted, E> {
                Ok(Redacted::from(v))
            }
        }

        deserializer.deserialize_str(RedactedVisitor)
    }
}

impl Drop for Redacted {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}
