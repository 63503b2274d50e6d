use std::path::PathBuf;
use std::time::Duration;

use strand_core::envelope::WireFormat;

/// Runtime configuration for the thread server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    /// Silence after which the guardian injects a `keepalive` event.
    pub keepalive_interval: Duration,
    /// Capacity of each thread's live delivery queue.
    pub queue_capacity: usize,
    pub preview_chars: usize,
    /// Maximum node transitions per thread.
    pub recursion_limit: usize,
    /// Delay floor between starts of calls to a rate-limited model. Zero disables gating.
    pub min_call_interval: Duration,
    pub rate_limited_models: Vec<String>,
    /// Longest a caller will wait on a rate gate before failing with `rate_limit`.
    pub max_rate_wait: Duration,
    pub wire_format: WireFormat,
    /// SQLite file for checkpoints; `None` keeps them in memory.
    pub checkpoint_db: Option<PathBuf>,
    pub recent_log_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:3001".into(),
            keepalive_interval: Duration::from_secs(20),
            queue_capacity: 256,
            preview_chars: 200,
            recursion_limit: 25,
            min_call_interval: Duration::ZERO,
            rate_limited_models: Vec::new(),
            max_rate_wait: Duration::from_secs(60),
            wire_format: WireFormat::Envelope,
            checkpoint_db: None,
            recent_log_limit: 50,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `STRAND_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("STRAND_ADDR") {
            config.addr = addr;
        }
        if let Some(secs) = env_parse::<u64>("STRAND_KEEPALIVE_SECS") {
            config.keepalive_interval = Duration::from_secs(secs);
        }
        if let Some(cap) = env_parse::<usize>("STRAND_QUEUE_CAPACITY") {
            config.queue_capacity = cap;
        }
        if let Some(chars) = env_parse::<usize>("STRAND_PREVIEW_CHARS") {
            config.preview_chars = chars;
        }
        if let Some(limit) = env_parse::<usize>("STRAND_RECURSION_LIMIT") {
            config.recursion_limit = limit;
        }
        if let Some(ms) = env_parse::<u64>("STRAND_MIN_CALL_INTERVAL_MS") {
            config.min_call_interval = Duration::from_millis(ms);
        }
        if let Ok(models) = std::env::var("STRAND_RATE_LIMITED_MODELS") {
            config.rate_limited_models = parse_model_list(&models);
        }
        if let Some(secs) = env_parse::<u64>("STRAND_MAX_RATE_WAIT_SECS") {
            config.max_rate_wait = Duration::from_secs(secs);
        }
        if let Some(format) = env_parse::<WireFormat>("STRAND_WIRE_FORMAT") {
            config.wire_format = format;
        }
        if let Ok(path) = std::env::var("STRAND_CHECKPOINT_DB") {
            config.checkpoint_db = Some(PathBuf::from(path));
        }
        config
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_rate_limit(
        mut self,
        models: impl IntoIterator<Item = impl Into<String>>,
        min_interval: Duration,
    ) -> Self {
        self.rate_limited_models = models.into_iter().map(Into::into).collect();
        self.min_call_interval = min_interval;
        self
    }

    pub fn with_max_rate_wait(mut self, wait: Duration) -> Self {
        self.max_rate_wait = wait;
        self
    }

    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }
}

/// Parse a comma-separated model list, dropping blanks.
pub fn parse_model_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
}
