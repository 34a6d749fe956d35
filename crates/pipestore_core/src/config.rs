//! Engine configuration.

/// Configuration shared by engine adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of concurrently open transactions (0 = unlimited).
    pub max_open_transactions: usize,

    /// Number of rows processed between two context checks during scans
    /// and stream ingestion.
    pub cancellation_check_interval: usize,

    /// Read buffer size for `copy_from` streams, in bytes.
    pub copy_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_open_transactions: 64,
            cancellation_check_interval: 256,
            copy_buffer_size: 64 * 1024, // 64 KB
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the open transaction limit.
    #[must_use]
    pub const fn max_open_transactions(mut self, value: usize) -> Self {
        self.max_open_transactions = value;
        self
    }

    /// Sets how many rows are processed between context checks.
    ///
    /// Values below 1 are treated as 1.
    #[must_use]
    pub const fn cancellation_check_interval(mut self, rows: usize) -> Self {
        self.cancellation_check_interval = if rows == 0 { 1 } else { rows };
        self
    }

    /// Sets the `copy_from` read buffer size.
    #[must_use]
    pub const fn copy_buffer_size(mut self, bytes: usize) -> Self {
        self.copy_buffer_size = bytes;
        self
    }

    /// Returns `true` if opening one more transaction stays within the
    /// limit when `open` are already open.
    #[must_use]
    pub const fn allows_transaction(&self, open: usize) -> bool {
        self.max_open_transactions == 0 || open < self.max_open_transactions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.max_open_transactions, 64);
        assert_eq!(config.cancellation_check_interval, 256);
        assert!(config.allows_transaction(63));
        assert!(!config.allows_transaction(64));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .max_open_transactions(0)
            .cancellation_check_interval(0)
            .copy_buffer_size(1024);

        assert!(config.allows_transaction(usize::MAX - 1));
        assert_eq!(config.cancellation_check_interval, 1);
        assert_eq!(config.copy_buffer_size, 1024);
    }
}
