use std::time::Duration;

pub const ENV_API_URL: &str = "KINKEEP_API_URL";
pub const DEFAULT_API_URL: &str = "http://localhost:5001";

const DEFAULT_TIMEOUT_SECONDS: u64 = 40;
const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECONDS),
            user_agent: format!("kinkeep-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn normalize_base_url(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_end_matches('/');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl ClientConfig {
    /// Reads `KINKEEP_API_URL`, falling back to the local development backend.
    pub fn from_env() -> Self {
        let base_url = std::env::var(ENV_API_URL).ok();
        Self::default().with_base_url_opt(base_url.as_deref())
    }

    pub fn with_base_url(self, base_url: &str) -> Self {
        self.with_base_url_opt(Some(base_url))
    }

    fn with_base_url_opt(mut self, base_url: Option<&str>) -> Self {
        if let Some(url) = base_url.and_then(normalize_base_url) {
            self.base_url = url;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
