//! `eventmux` core: request families, correlation envelopes, and RPC frame schemas.
//!
//! Everything in this crate is plain data. The multiplexing machinery that
//! moves these values over a processor stream lives in `eventmux-server`.

pub mod kind;
pub mod messages;

pub use kind::{ActionType, EventType, Family, RequestKind, UnknownKind};
pub use messages::{
    CorrelationEnvelope, Request, Response, ResponseEnvelope, RpcRequest, RpcResponse, RpcResult,
    StatusCode,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
