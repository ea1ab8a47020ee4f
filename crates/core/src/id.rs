// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes for the runtime's durable entities.
//!
//! All ids are plain strings on the wire and in SQL; the newtypes exist so a
//! fiber id can never be handed to `cancel_schedule` by accident. Generated
//! ids are nanoids, caller-supplied ids pass through untouched.

/// Generate a string-backed id newtype.
///
/// Each type gets `new`, `generate` (nanoid), `as_str`, `Display`,
/// `Borrow<str>`, and string conversions, so it works directly as a
/// `HashMap<_, V>` key queried by `&str`.
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* pub struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing id string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random id.
            pub fn generate() -> Self {
                Self(nanoid::nanoid!())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
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

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == **other
            }
        }
    };
}

define_id! {
    /// Identifier for a persisted schedule row.
    pub struct ScheduleId;
}

define_id! {
    /// Identifier for a durable fiber.
    pub struct FiberId;
}

define_id! {
    /// Local identifier for a tracked workflow row (distinct from the
    /// external `workflow_id` the runtime assigns).
    pub struct WorkflowId;
}

define_id! {
    /// Identifier for an attached connection.
    pub struct ConnectionId;
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
