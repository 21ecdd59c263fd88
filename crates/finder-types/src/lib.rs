//! # finder-types
//!
//! Shared value types for the contact exchange workspace: identifiers,
//! contact payloads, key and audit records, and event envelopes.
//!
//! All timestamps are Unix seconds.

/// Seconds per hour.
pub const HOUR_SECS: u64 = 3600;

/// Request lifetime when the caller does not ask for one (3 days).
pub const DEFAULT_EXPIRATION_HOURS: u64 = 72;

/// Longest lifetime a request may ask for (one year).
pub const MAX_EXPIRATION_HOURS: u64 = 24 * 365;

/// Audit query page size when the caller does not ask for one.
pub const DEFAULT_AUDIT_LIMIT: u32 = 100;

/// Errors parsing stored or transmitted values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

/// Declare a fieldless enum with a fixed snake_case wire name per variant.
///
/// The same string is used by serde, `Display`, `FromStr` and the database
/// columns, so a value never has two spellings.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident as $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $wire)] $variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err($crate::TypeError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// Declared after the macro so it is in scope for every module.
pub mod audit;
pub mod contact;
pub mod directory;
pub mod events;
pub mod exchange;
pub mod ids;
pub mod keys;
