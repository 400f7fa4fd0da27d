//! Frames of the binary RPC front end.
//!
//! A client connection carries [`RpcRequest`] frames inbound and
//! [`RpcResponse`] frames outbound. Calls are matched by `call_id`, which is
//! chosen by the client; replies on one connection may arrive in any order.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::envelope::{Request, Response};
use crate::kind::{ActionType, EventType, Family};

/// A single call submitted over the RPC front end.
///
/// The `family` tag selects the router. `request` is optional on the wire so
/// that an absent request can be rejected with `InvalidArgument`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum RpcRequest {
    Event {
        call_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<Request<EventType>>,
    },
    Action {
        call_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<Request<ActionType>>,
    },
}

impl RpcRequest {
    /// Returns the client-chosen call id.
    #[must_use]
    pub fn call_id(&self) -> u64 {
        match self {
            Self::Event { call_id, .. } | Self::Action { call_id, .. } => *call_id,
        }
    }

    /// Returns the family this call is addressed to.
    #[must_use]
    pub fn family(&self) -> Family {
        match self {
            Self::Event { .. } => Family::Event,
            Self::Action { .. } => Family::Action,
        }
    }
}

/// Reply to an [`RpcRequest`] with the same `call_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub call_id: u64,
    pub result: RpcResult,
}

/// Result carried by an [`RpcResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcResult {
    Content(#[serde(with = "serde_bytes")] Vec<u8>),
    Consumed,
    Error { code: StatusCode, message: String },
}

impl From<Response> for RpcResult {
    fn from(resp: Response) -> Self {
        match resp {
            Response::Content(bytes) => Self::Content(bytes),
            Response::Consumed => Self::Consumed,
        }
    }
}

/// Status codes reported by the RPC front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    InvalidArgument,
    NotFound,
    Unimplemented,
    Unavailable,
    ResourceExhausted,
    Internal,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidArgument => "invalid argument",
            Self::NotFound => "not found",
            Self::Unimplemented => "unimplemented",
            Self::Unavailable => "unavailable",
            Self::ResourceExhausted => "resource exhausted",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_tagged_by_family() {
        let call = RpcRequest::Action {
            call_id: 7,
            request: Some(Request::new(ActionType::Hello, b"x".to_vec())),
        };
        let bytes = rmp_serde::to_vec_named(&call).unwrap();
        let decoded: RpcRequest = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, call);
        assert_eq!(decoded.call_id(), 7);
        assert_eq!(decoded.family(), Family::Action);
    }

    #[test]
    fn missing_request_decodes_as_none() {
        let call = RpcRequest::Event {
            call_id: 3,
            request: None,
        };
        let bytes = rmp_serde::to_vec_named(&call).unwrap();
        let decoded: RpcRequest = rmp_serde::from_slice(&bytes).unwrap();
        assert!(matches!(
            decoded,
            RpcRequest::Event {
                call_id: 3,
                request: None
            }
        ));
    }

    #[test]
    fn response_to_rpc_result() {
        assert_eq!(
            RpcResult::from(Response::Content(b"ok".to_vec())),
            RpcResult::Content(b"ok".to_vec())
        );
        assert_eq!(RpcResult::from(Response::Consumed), RpcResult::Consumed);
    }

    #[test]
    fn error_result_survives_encoding() {
        let resp = RpcResponse {
            call_id: 11,
            result: RpcResult::Error {
                code: StatusCode::NotFound,
                message: "unknown event type: UNKNOWN".to_string(),
            },
        };
        let bytes = rmp_serde::to_vec_named(&resp).unwrap();
        let decoded: RpcResponse = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, resp);
    }
}
