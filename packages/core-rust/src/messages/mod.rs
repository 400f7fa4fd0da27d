//! Wire schemas for the processor stream and the binary RPC front end.
//!
//! All types serialize as named `MsgPack` maps (`rmp_serde::to_vec_named()`).
//! Payload bytes are carried as `MsgPack` `bin` via `serde_bytes`.

pub mod envelope;
pub mod rpc;

pub use envelope::{CorrelationEnvelope, Request, Response, ResponseEnvelope};
pub use rpc::{RpcRequest, RpcResponse, RpcResult, StatusCode};
