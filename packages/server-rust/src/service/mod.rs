//! Request multiplexing core.
//!
//! 1. **Pending cache** (`cache`): correlation id -> delivery handle, with expiry
//! 2. **Multiplexer** (`multiplexer`): many callers over one processor stream
//! 3. **Routing** (`router`): request type -> processor multiplexer
//! 4. **Background workers** (`worker`): periodic cache sweeps

pub mod cache;
pub mod call;
pub mod config;
pub mod multiplexer;
pub mod router;
pub mod worker;

pub use cache::{CacheError, PendingCache};
pub use call::{CallContext, MuxError, Outcome};
pub use config::{FamilyConfig, GatewayConfig, MultiplexerConfig};
pub use multiplexer::{MuxState, Multiplexer};
pub use router::{Gateway, ProcessorId, ProcessorState, RouteError, RouteTable, Router};
pub use worker::{BackgroundRunnable, BackgroundWorker, CacheSweeper};
