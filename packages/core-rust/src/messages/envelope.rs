//! Request, response, and the correlation envelopes exchanged with processors.
//!
//! A processor stream carries [`CorrelationEnvelope`]s outbound and
//! [`ResponseEnvelope`]s inbound. The `id` field is the only link between the
//! two; processors may answer in any order or not at all.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// A client-submitted request. Only `kind` is inspected by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request<K> {
    #[serde(rename = "type")]
    pub kind: K,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl<K> Request<K> {
    /// Creates a request of the given kind carrying `payload`.
    pub fn new(kind: K, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// Outcome of a processed request.
///
/// Used both as the outcome field of a [`ResponseEnvelope`] and as the
/// caller-facing response returned by the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// The processor produced content for the caller.
    Content(#[serde(with = "serde_bytes")] Vec<u8>),
    /// The processor consumed the request without producing content.
    Consumed,
}

impl Response {
    /// Returns the content bytes, or `None` for `Consumed`.
    #[must_use]
    pub fn content(&self) -> Option<&[u8]> {
        match self {
            Self::Content(bytes) => Some(bytes),
            Self::Consumed => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Outbound frame: a request tagged with a correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationEnvelope<K> {
    pub id: String,
    pub request: Request<K>,
}

/// Inbound frame: the outcome for a previously sent correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub outcome: Response,
}

impl ResponseEnvelope {
    /// Builds a `Content` response for `id`.
    pub fn content(id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            outcome: Response::Content(bytes.into()),
        }
    }

    /// Builds a `Consumed` response for `id`.
    pub fn consumed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: Response::Consumed,
        }
    }
}
