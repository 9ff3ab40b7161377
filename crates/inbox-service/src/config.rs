//! Tunables for the inbox service.

#[derive(Debug, Clone)]
pub struct InboxConfig {
    pub max_retries: i32,
    pub backoff_base_seconds: u64,
    pub max_backoff_seconds: u64,
    pub retention_days: i64,
    pub cleanup_interval_ms: u64,
    pub enable_retry: bool,
    pub retry_polling_interval_ms: u64,
    pub retry_batch_size: i64,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_seconds: 2,
            max_backoff_seconds: 3_600,
            retention_days: 7,
            cleanup_interval_ms: 86_400_000,
            enable_retry: false,
            retry_polling_interval_ms: 5_000,
            retry_batch_size: 10,
        }
    }
}

impl InboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, value: i32) -> Self {
        self.max_retries = value;
        self
    }

    pub fn with_enable_retry(mut self, value: bool) -> Self {
        self.enable_retry = value;
        self
    }

    pub fn with_retry_polling_interval_ms(mut self, value: u64) -> Self {
        self.retry_polling_interval_ms = value;
        self
    }

    pub fn with_cleanup_interval_ms(mut self, value: u64) -> Self {
        self.cleanup_interval_ms = value;
        self
    }

    pub fn backoff_config(&self) -> messaging_backoff::BackoffConfig {
        messaging_backoff::BackoffConfig {
            base_seconds: self.backoff_base_seconds,
            max_seconds: self.max_backoff_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_table() {
        let config = InboxConfig::default();
        assert_eq!(config.max_retries, 3);
        assert!(!config.enable_retry);
        assert_eq!(config.retry_polling_interval_ms, 5_000);
        assert_eq!(config.retry_batch_size, 10);
        assert_eq!(config.cleanup_interval_ms, 86_400_000);
    }
}
