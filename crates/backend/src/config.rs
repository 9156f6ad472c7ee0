use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// Backend connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Root of the REST API, without trailing slash
    pub base_url: String,

    /// Request timeout in seconds. Generation calls can be slow.
    pub timeout_secs: Option<u64>,

    pub user_agent: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: Some(600),
            user_agent: None,
        }
    }
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// With API endpoint
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// With timeout
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Join a path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_double_slashes() {
        let cfg = BackendConfig::new("http://host:8000/api/");
        assert_eq!(cfg.url("/episodes"), "http://host:8000/api/episodes");
        assert_eq!(
            BackendConfig::default().url("stages"),
            "http://localhost:8000/api/stages"
        );
    }

    #[test]
    fn builder_overrides() {
        let cfg = BackendConfig::default()
            .with_base_url("http://x")
            .with_timeout(5)
            .with_user_agent("studio");
        assert_eq!(cfg.base_url, "http://x");
        assert_eq!(cfg.timeout_secs, Some(5));
        assert_eq!(cfg.user_agent.as_deref(), Some("studio"));
    }
}
