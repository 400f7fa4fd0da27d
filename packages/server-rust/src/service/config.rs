use std::collections::HashMap;
use std::time::Duration;

use eventmux_core::{ActionType, EventType, RequestKind};

use crate::network::NetworkConfig;
use crate::service::router::ProcessorId;

/// Per-processor multiplexer configuration.
///
/// Controls pending-request expiry, the outbound queue bound, and the
/// optional admission limit.
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Time-to-live of a pending request whose caller set no deadline.
    pub default_ttl: Duration,
    /// Interval between expiry sweeps of the pending-request cache.
    pub sweep_interval: Duration,
    /// Capacity of the bounded queue feeding the stream writer task.
    /// A full queue applies backpressure to submitting callers.
    pub send_queue_capacity: usize,
    /// Maximum number of callers waiting in `submit` at once. `None` means
    /// unbounded.
    ///
    /// A caller that cancels or times out releases its slot right away,
    /// while its pending entry stays in the cache until answered or expired.
    /// The limit therefore bounds waiting callers, not pending entries.
    pub max_in_flight: Option<usize>,
}

impl MultiplexerConfig {
    /// Returns the defaults for the family of `K`.
    #[must_use]
    pub fn for_kind<K: RequestKind>() -> Self {
        Self {
            default_ttl: K::DEFAULT_TTL,
            sweep_interval: K::SWEEP_INTERVAL,
            ..Self::default()
        }
    }
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(10),
            send_queue_capacity: 64,
            max_in_flight: None,
        }
    }
}

/// Static routes for one family: request type to processor id.
///
/// The processor id doubles as the processor's dial address.
#[derive(Debug, Clone)]
pub struct FamilyConfig<K> {
    pub routes: HashMap<K, ProcessorId>,
    pub multiplexer: MultiplexerConfig,
}

impl<K: RequestKind> Default for FamilyConfig<K> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            multiplexer: MultiplexerConfig::for_kind::<K>(),
        }
    }
}

impl<K: RequestKind> FamilyConfig<K> {
    /// Routes `kind` to `processor`.
    #[must_use]
    pub fn route(mut self, kind: K, processor: impl Into<ProcessorId>) -> Self {
        self.routes.insert(kind, processor.into());
        self
    }

    /// Returns the distinct processor ids referenced by the routes.
    #[must_use]
    pub fn processor_ids(&self) -> Vec<ProcessorId> {
        let mut ids: Vec<ProcessorId> = self.routes.values().cloned().collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Gateway configuration, constructed once at startup and passed by
/// reference to whatever needs it.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub network: NetworkConfig,
    pub events: FamilyConfig<EventType>,
    pub actions: FamilyConfig<ActionType>,
}
