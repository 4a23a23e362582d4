//! Engine configuration resolved once at process startup.
//!
//! Configuration is read from the environment by the binary and passed into
//! the engine as a value; core services never read environment variables
//! themselves, which keeps behaviour consistent across multi-threaded
//! runtimes and test harnesses.

use std::time::Duration;

use crate::error::{EvalError, EvalResult};

/// Resolved engine configuration.
#[derive(Clone, Debug)]
pub struct EvaluatorConfig {
    /// Base URL of the FHIR server the records are drawn from.
    pub server_base_url: String,
    /// Page size requested from the server (`_count`).
    pub page_count: u32,
    /// Upper bound on concurrently evaluated groups.
    pub max_concurrency: usize,
    /// Optional bearer token sent with every request.
    pub bearer_token: Option<String>,
    /// Optional basic-auth credentials sent with every request.
    pub basic_auth: Option<(String, String)>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl EvaluatorConfig {
    pub const DEFAULT_PAGE_COUNT: u32 = 1000;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    /// Create a configuration for `server_base_url` with defaults for
    /// everything else.
    pub fn new(server_base_url: impl Into<String>) -> EvalResult<EvaluatorConfig> {
        let server_base_url = server_base_url.into();
        if server_base_url.trim().is_empty() {
            return Err(EvalError::Config("server base URL cannot be empty".into()));
        }

        Ok(EvaluatorConfig {
            server_base_url,
            page_count: Self::DEFAULT_PAGE_COUNT,
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            bearer_token: None,
            basic_auth: None,
            request_timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    pub fn with_page_count(mut self, page_count: u32) -> EvalResult<EvaluatorConfig> {
        if page_count == 0 {
            return Err(EvalError::Config("page count must be positive".into()));
        }
        self.page_count = page_count;
        Ok(self)
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> EvalResult<EvaluatorConfig> {
        if max_concurrency == 0 {
            return Err(EvalError::Config("max concurrency must be positive".into()));
        }
        self.max_concurrency = max_concurrency;
        Ok(self)
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> EvaluatorConfig {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_basic_auth(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> EvaluatorConfig {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> EvaluatorConfig {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_base_url_rejected() {
        assert!(EvaluatorConfig::new("  ").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = EvaluatorConfig::new("http://server/fhir").unwrap();
        assert_eq!(config.page_count, EvaluatorConfig::DEFAULT_PAGE_COUNT);
        assert!(config.max_concurrency >= 1);
        assert!(config.bearer_token.is_none());
    }

    #[test]
    fn test_zero_page_count_rejected() {
        let config = EvaluatorConfig::new("http://server/fhir").unwrap();
        assert!(config.with_page_count(0).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = EvaluatorConfig::new("http://server/fhir").unwrap();
        assert!(config.with_max_concurrency(0).is_err());
    }
}
