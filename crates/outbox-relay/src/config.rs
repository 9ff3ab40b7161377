//! Tunables for the relay. Plain data, `Default`-able; no env/file loading
//! lives here — callers build one and pass it in.

/// Configuration for [`crate::relay::OutboxRelay`].
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub polling_interval_ms: u64,
    pub batch_size: i64,
    pub max_retries: i32,
    pub lock_timeout_seconds: i64,
    pub backoff_base_seconds: u64,
    pub max_backoff_seconds: u64,
    pub cleanup_interval_ms: u64,
    pub retention_days: i64,
    pub immediate_processing: bool,
    pub worker_id: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: 1_000,
            batch_size: 10,
            max_retries: 3,
            lock_timeout_seconds: 300,
            backoff_base_seconds: 2,
            max_backoff_seconds: 3_600,
            cleanup_interval_ms: 86_400_000,
            retention_days: 7,
            immediate_processing: true,
            worker_id: default_worker_id(),
        }
    }
}

impl OutboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_polling_interval_ms(mut self, value: u64) -> Self {
        self.polling_interval_ms = value;
        self
    }

    pub fn with_batch_size(mut self, value: i64) -> Self {
        self.batch_size = value;
        self
    }

    pub fn with_max_retries(mut self, value: i32) -> Self {
        self.max_retries = value;
        self
    }

    pub fn with_worker_id(mut self, value: impl Into<String>) -> Self {
        self.worker_id = value.into();
        self
    }

    pub fn backoff_config(&self) -> messaging_backoff::BackoffConfig {
        messaging_backoff::BackoffConfig {
            base_seconds: self.backoff_base_seconds,
            max_seconds: self.max_backoff_seconds,
        }
    }
}

fn default_worker_id() -> String {
    let host = hostname_or_fallback();
    format!("{host}-{}", std::process::id())
}

fn hostname_or_fallback() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "worker".to_string())
}
