//! Engine configuration.

use std::time::Duration;

use dosr_types::PeerAddr;

/// Default silence window before a peer is probed (and again before it is
/// declared dead).
pub const DEFAULT_FAILOVER_TIMEOUT: Duration = Duration::from_secs(5);

/// Default period between forced backup pushes to fail-to targets.
pub const DEFAULT_FORCE_BACKUP_INTERVAL: Duration = Duration::from_secs(10);

/// Tunables for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// This node's listening address. Resolves to `PeerId::SELF`.
    pub local: PeerAddr,

    /// Silence window used both for probing and for probe expiry.
    pub failover_timeout: Duration,

    /// Minimum time between backups pushed to the same fail-to target.
    pub force_backup_interval: Duration,

    /// Whether global inbound silence makes this node fail itself over.
    pub detect_self_failure: bool,
}

impl EngineConfig {
    pub fn new(local: PeerAddr) -> Self {
        Self {
            local,
            failover_timeout: DEFAULT_FAILOVER_TIMEOUT,
            force_backup_interval: DEFAULT_FORCE_BACKUP_INTERVAL,
            detect_self_failure: true,
        }
    }

    pub fn with_failover_timeout(mut self, timeout: Duration) -> Self {
        self.failover_timeout = timeout;
        self
    }

    pub fn with_force_backup_interval(mut self, interval: Duration) -> Self {
        self.force_backup_interval = interval;
        self
    }

    pub fn with_self_failure_detection(mut self, enabled: bool) -> Self {
        self.detect_self_failure = enabled;
        self
    }
}
