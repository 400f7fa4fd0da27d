//! Request families and their type enums.
//!
//! A *family* is a group of request types that share one routing table and
//! one set of processor streams. The gateway serves two families, events and
//! actions, through the same generic multiplexer and router; the
//! [`RequestKind`] trait is the seam that makes that possible.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Family
// ---------------------------------------------------------------------------

/// The request family a type enum belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Event,
    Action,
}

impl Family {
    /// Returns the lowercase wire name of this family.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Action => "action",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RequestKind
// ---------------------------------------------------------------------------

/// Error returned when a wire name does not match any type of a family.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {family} type: {name}")]
pub struct UnknownKind {
    pub family: Family,
    pub name: String,
}

/// A request type enum that drives routing for one family.
///
/// Implementors are small `Copy` enums whose serde representation is the
/// `SCREAMING_CASE` wire name. Every family has an `UNKNOWN` value, which is
/// what unrecognised names and codes coerce to; it is never registered in a
/// route table, so such requests fail routing as an unknown type.
pub trait RequestKind:
    Copy
    + Eq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr<Err = UnknownKind>
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The family this kind belongs to.
    const FAMILY: Family;

    /// The fallback value for unrecognised names and codes.
    const UNKNOWN: Self;

    /// Time-to-live applied to a pending request whose caller set no deadline.
    const DEFAULT_TTL: Duration;

    /// Interval between expiry sweeps of the pending-request cache.
    const SWEEP_INTERVAL: Duration;

    /// Looks up a kind by its numeric code.
    fn from_code(code: i64) -> Option<Self>;

    /// Returns the numeric code of this kind.
    fn code(self) -> i32;

    /// Returns the wire name of this kind.
    fn as_str(self) -> &'static str;

    /// Coerces the `type` field of a JSON request body into a kind.
    ///
    /// Strings are matched against wire names, integers against codes.
    /// Anything else, including unmatched names and codes, yields `UNKNOWN`.
    fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(name) => name.parse().unwrap_or(Self::UNKNOWN),
            serde_json::Value::Number(n) => n
                .as_i64()
                .and_then(Self::from_code)
                .unwrap_or(Self::UNKNOWN),
            _ => Self::UNKNOWN,
        }
    }
}

/// Declares a family type enum and its `RequestKind`, `Display` and `FromStr` impls.
///
/// `UNKNOWN = 0` is always emitted as the first variant.
macro_rules! request_kind {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $family:expr, ttl = $ttl:expr, sweep = $sweep:expr, {
            $($variant:ident = $code:literal => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(i32)]
        pub enum $name {
            #[default]
            #[serde(rename = "UNKNOWN")]
            Unknown = 0,
            $(
                #[serde(rename = $wire)]
                $variant = $code,
            )+
        }

        impl RequestKind for $name {
            const FAMILY: Family = $family;
            const UNKNOWN: Self = Self::Unknown;
            const DEFAULT_TTL: Duration = $ttl;
            const SWEEP_INTERVAL: Duration = $sweep;

            fn from_code(code: i64) -> Option<Self> {
                match code {
                    0 => Some(Self::Unknown),
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }

            fn code(self) -> i32 {
                self as i32
            }

            fn as_str(self) -> &'static str {
                match self {
                    Self::Unknown => "UNKNOWN",
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownKind;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    "UNKNOWN" => Ok(Self::Unknown),
                    $($wire => Ok(Self::$variant),)+
                    _ => Err(UnknownKind {
                        family: $family,
                        name: s.to_string(),
                    }),
                }
            }
        }
    };
}

request_kind! {
    /// Type of an event submitted to the gateway.
    pub enum EventType: Family::Event,
        ttl = Duration::from_secs(5),
        sweep = Duration::from_secs(10),
    {
        Hello = 1 => "HELLO",
    }
}

request_kind! {
    /// Type of an action submitted to the gateway.
    pub enum ActionType: Family::Action,
        ttl = Duration::from_secs(1),
        sweep = Duration::from_secs(2),
    {
        Hello = 1 => "HELLO",
    }
}
