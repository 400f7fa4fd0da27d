//! Front ends, processor connections, framing, and shutdown control.

pub mod codec;
pub mod config;
pub mod connection;
pub mod echo;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod processor;
pub mod rpc;
pub mod shutdown;

pub use codec::{CodecError, FrameCodec};
pub use config::*;
pub use connection::*;
pub use echo::{EchoMode, EchoProcessor};
pub use handlers::AppState;
pub use module::{BoundPorts, NetworkModule};
pub use processor::{attach_processor, build_router, connect_processor};
pub use shutdown::*;
