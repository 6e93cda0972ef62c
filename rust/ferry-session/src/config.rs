use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Tunables for one session.
///
/// Both peers advertise `max_payload_size` and `channel_buffer` during the
/// handshake and the smaller value wins. The rest is local.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest encoded payload we accept or send in one `Data` frame.
    pub max_payload_size: u32,
    /// Messages buffered per stream. Also the credit window: how many
    /// messages a peer may send on one stream before we grant more.
    pub channel_buffer: usize,
    /// Outbound frames buffered per session before `send` suspends.
    pub outgoing_buffer: usize,
    /// How long to wait for the peer's `Hello`.
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1024 * 1024, // 1 MiB
            channel_buffer: 64,
            outgoing_buffer: 256,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    /// Defaults, overridden by `FERRY_MAX_PAYLOAD_SIZE`, `FERRY_CHANNEL_BUFFER`,
    /// `FERRY_OUTGOING_BUFFER` and `FERRY_HANDSHAKE_TIMEOUT_MS` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("FERRY_MAX_PAYLOAD_SIZE") {
            config.max_payload_size = v;
        }
        if let Some(v) = env_parse("FERRY_CHANNEL_BUFFER") {
            config = config.with_channel_buffer(v);
        }
        if let Some(v) = env_parse("FERRY_OUTGOING_BUFFER") {
            config = config.with_outgoing_buffer(v);
        }
        if let Some(ms) = env_parse("FERRY_HANDSHAKE_TIMEOUT_MS") {
            config.handshake_timeout = Duration::from_millis(ms);
        }
        config
    }

    pub fn with_max_payload_size(mut self, max_payload_size: u32) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    pub fn with_channel_buffer(mut self, channel_buffer: usize) -> Self {
        self.channel_buffer = channel_buffer.max(1);
        self
    }

    pub fn with_outgoing_buffer(mut self, outgoing_buffer: usize) -> Self {
        self.outgoing_buffer = outgoing_buffer.max(1);
        self
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }
}

/// Read and parse an environment variable, warning (and ignoring it) when
/// the value does not parse.
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparseable environment variable");
            None
        }
    }
}
