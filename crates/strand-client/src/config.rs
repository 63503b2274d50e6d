use std::time::Duration;

/// Client-side timing and retention settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `http://localhost:3001`. Routes are resolved under `/api`.
    pub base_url: String,
    /// Abort a stream when no bytes of any kind arrive for this long.
    pub inactivity_timeout: Duration,
    /// Abort a stream that has been open this long, regardless of traffic.
    pub absolute_timeout: Duration,
    pub poll_interval: Duration,
    /// How long a finished live state stays visible before it is cleared.
    pub completion_grace: Duration,
    /// Rolling cap on the reconciled event log.
    pub max_stream_events: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".into(),
            inactivity_timeout: Duration::from_secs(30 * 60),
            absolute_timeout: Duration::from_secs(2 * 60 * 60),
            poll_interval: Duration::from_secs(3),
            completion_grace: Duration::from_secs(5),
            max_stream_events: 2000,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Build from `STRAND_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("STRAND_BASE_URL") {
            config.base_url = url;
        }
        if let Some(secs) = env_secs("STRAND_INACTIVITY_TIMEOUT_SECS") {
            config.inactivity_timeout = secs;
        }
        if let Some(secs) = env_secs("STRAND_ABSOLUTE_TIMEOUT_SECS") {
            config.absolute_timeout = secs;
        }
        if let Some(ms) = std::env::var("STRAND_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.poll_interval = Duration::from_millis(ms);
        }
        config
    }

    pub fn with_timeouts(mut self, inactivity: Duration, absolute: Duration) -> Self {
        self.inactivity_timeout = inactivity;
        self.absolute_timeout = absolute;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_completion_grace(mut self, grace: Duration) -> Self {
        self.completion_grace = grace;
        self
    }

    pub fn with_max_stream_events(mut self, max: usize) -> Self {
        self.max_stream_events = max;
        self
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.inactivity_timeout, Duration::from_secs(1800));
        assert_eq!(config.absolute_timeout, Duration::from_secs(7200));
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.max_stream_events, 2000);
    }

    #[test]
    fn builders() {
        let config = ClientConfig::new("http://127.0.0.1:9000")
            .with_timeouts(Duration::from_secs(1), Duration::from_secs(10))
            .with_poll_interval(Duration::from_millis(50))
            .with_max_stream_events(5);
        assert_eq!(config.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.inactivity_timeout, Duration::from_secs(1));
        assert_eq!(config.absolute_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.max_stream_events, 5);
    }
}
