use std::time::Duration;

/// Default bound on blocking link operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Formatting a flash filesystem takes far longer than any other request.
pub const DEFAULT_MKFS_TIMEOUT: Duration = Duration::from_secs(120);

/// Default bound on establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of status rounds before a transfer is reported incomplete.
pub const DEFAULT_MAX_STATUS_ROUNDS: u32 = 32;

/// Timeouts and limits of the transfer engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bound on every send and receive.
    pub timeout: Duration,
    pub mkfs_timeout: Duration,
    pub connect_timeout: Duration,
    /// Data rounds a session may run before giving up with
    /// [`TransferError::Incomplete`](crate::TransferError::Incomplete).
    pub max_status_rounds: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            mkfs_timeout: DEFAULT_MKFS_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_status_rounds: DEFAULT_MAX_STATUS_ROUNDS,
        }
    }
}

impl ClientConfig {
    /// Uses `timeout` for every ordinary request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_status_rounds(mut self, rounds: u32) -> Self {
        self.max_status_rounds = rounds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.mkfs_timeout, Duration::from_secs(120));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.max_status_rounds, 32);
    }

    #[test]
    fn builder_overrides() {
        let config = ClientConfig::default()
            .with_timeout(Duration::from_millis(500))
            .with_max_status_rounds(2);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.max_status_rounds, 2);
        assert_eq!(config.mkfs_timeout, DEFAULT_MKFS_TIMEOUT);
    }
}
