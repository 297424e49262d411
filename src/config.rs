//! Scopus client configuration.

use crate::error::{Result, ScopusError};
use std::time::Duration;
use url::Url;

/// Scopus Search API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.elsevier.com/content/search/scopus";

/// Page size accepted by the Search API for the STANDARD view
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Records fetched when the caller gives no count
pub const DEFAULT_SEARCH_LIMIT: usize = 25;

/// Hard ceiling on `count` per request
pub const MAX_PAGE_SIZE: usize = 200;

/// Settings for [`crate::scopus::ScopusClient`].
#[derive(Debug, Clone)]
pub struct ScopusConfig {
    /// Elsevier API key, sent as `X-ELS-APIKey`
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub page_size: usize,
    /// `STANDARD` or `COMPLETE`. Abstracts and full author lists need `COMPLETE`.
    pub view: String,
}

impl ScopusConfig {
    /// Configuration with defaults for everything except the key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            page_size: DEFAULT_PAGE_SIZE,
            view: "STANDARD".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = view.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check the settings before any request is made.
    ///
    /// A missing key is reported as [`ScopusError::Auth`] so callers can prompt
    /// for credentials the same way as for a rejected key.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(ScopusError::Auth("API key is missing".to_string()));
        }
        Url::parse(&self.base_url)
            .map_err(|e| ScopusError::Config(format!("Invalid base URL '{}': {}", self.base_url, e)))?;
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ScopusError::Config(format!(
                "Page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.view.trim().is_empty() {
            return Err(ScopusError::Config("View cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScopusConfig::new("key");
        assert_eq!(config.page_size, 25);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_key_is_auth_error() {
        let config = ScopusConfig::new("  ");
        assert!(matches!(config.validate(), Err(ScopusError::Auth(_))));
    }

    #[test]
    fn test_rejects_bad_url_and_page_size() {
        let bad_url = ScopusConfig::new("key").with_base_url("not a url");
        assert!(matches!(bad_url.validate(), Err(ScopusError::Config(_))));

        let zero = ScopusConfig::new("key").with_page_size(0);
        assert!(matches!(zero.validate(), Err(ScopusError::Config(_))));

        let huge = ScopusConfig::new("key").with_page_size(MAX_PAGE_SIZE + 1);
        assert!(huge.validate().is_err());
    }
}
