//! Client configuration.

use nvmf_protocol::NVME_TCP_PORT;
use std::time::Duration;

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default admin/IO queue size in entries.
pub const DEFAULT_QUEUE_SIZE: u16 = 32;

/// What submission does when the queue is at its depth limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueFullPolicy {
    /// Wait for a slot, up to the command timeout.
    #[default]
    Block,
    /// Fail immediately with a timeout error.
    Fail,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Target hostname or IP address.
    pub host: String,
    /// Target TCP port.
    pub port: u16,
    /// Subsystem to connect to; `None` selects the discovery subsystem.
    pub subsystem_nqn: Option<String>,
    /// Host NQN identity; generated when absent.
    pub host_nqn: Option<String>,
    /// 128-bit host identifier; derived from the host NQN when absent.
    pub host_id: Option<[u8; 16]>,
    /// Per-command timeout.
    pub timeout: Duration,
    /// Keep Alive Timeout in milliseconds; 0 disables keep-alive.
    pub kato_ms: u32,
    /// Offer the header digest during ICReq/ICResp.
    pub header_digest: bool,
    /// Offer the data digest during ICReq/ICResp.
    pub data_digest: bool,
    /// Admin/IO queue size in entries.
    pub queue_size: u16,
    /// Behaviour when the in-flight count reaches the queue depth.
    pub queue_full: QueueFullPolicy,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: NVME_TCP_PORT,
            subsystem_nqn: None,
            host_nqn: None,
            host_id: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            kato_ms: 0,
            header_digest: true,
            data_digest: true,
            queue_size: DEFAULT_QUEUE_SIZE,
            queue_full: QueueFullPolicy::Block,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_subsystem_nqn(mut self, nqn: impl Into<String>) -> Self {
        self.subsystem_nqn = Some(nqn.into());
        self
    }

    pub fn with_host_nqn(mut self, nqn: impl Into<String>) -> Self {
        self.host_nqn = Some(nqn.into());
        self
    }

    pub fn with_host_id(mut self, host_id: [u8; 16]) -> Self {
        self.host_id = Some(host_id);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_kato_ms(mut self, kato_ms: u32) -> Self {
        self.kato_ms = kato_ms;
        self
    }

    pub fn with_header_digest(mut self, enabled: bool) -> Self {
        self.header_digest = enabled;
        self
    }

    pub fn with_data_digest(mut self, enabled: bool) -> Self {
        self.data_digest = enabled;
        self
    }

    pub fn with_queue_size(mut self, entries: u16) -> Self {
        self.queue_size = entries.max(2);
        self
    }

    pub fn with_queue_full(mut self, policy: QueueFullPolicy) -> Self {
        self.queue_full = policy;
        self
    }
}
