//! Network configuration for the gateway's listeners.

use std::time::Duration;

/// Listener configuration for the HTTP and RPC front ends.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for both listeners.
    pub host: String,
    /// HTTP port. 0 means OS-assigned.
    pub http_port: u16,
    /// Binary RPC port. 0 means OS-assigned.
    pub rpc_port: u16,
    /// Per-connection settings for the RPC front end.
    pub connection: ConnectionConfig,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time a front-end request waits for its processor.
    pub request_timeout: Duration,
    /// Maximum accepted HTTP body size in bytes.
    pub max_body_bytes: usize,
    /// How long shutdown waits for in-flight calls before closing processors.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            rpc_port: 9090,
            connection: ConnectionConfig::default(),
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(5),
            max_body_bytes: 1024 * 1024,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-connection configuration controlling backpressure.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bounded mpsc channel capacity for outbound replies per connection.
    pub outbound_channel_capacity: usize,
    /// Maximum time to wait when queueing a reply to a connection.
    pub send_timeout: Duration,
    /// Maximum concurrently executing calls per connection.
    pub max_concurrent_calls: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            send_timeout: Duration::from_secs(5),
            max_concurrent_calls: 1024,
        }
    }
}
