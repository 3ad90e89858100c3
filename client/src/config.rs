use std::time::Duration;

/// Connection tuning, loaded the way `config-loader` loads capsule configs —
/// sane defaults, overridable by the embedding application.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub reply_timeout: Duration,
    pub reconnect_backoff: Duration,
    pub max_reconnect_attempts: u32,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reply_timeout: Duration::from_secs(5),
            reconnect_backoff: Duration::from_millis(500),
            max_reconnect_attempts: 5,
        }
    }
}
