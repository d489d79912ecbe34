use std::time::Duration;

use crate::error::{IngestError, Result};

pub const DEFAULT_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct LmsConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub timeout: Duration,
    pub concurrency: usize,
}

impl Default for LmsConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Endpoint and token after validation; both are guaranteed non-blank.
#[derive(Debug, Clone)]
pub struct LmsEndpoint {
    pub base_url: String,
    pub token: String,
}

impl LmsConfig {
    pub fn validate(&self) -> Result<LmsEndpoint> {
        let base_url = required(self.base_url.as_deref(), "LMS_URL")?;
        let token = required(self.token.as_deref(), "LMS_TOKEN")?;
        Ok(LmsEndpoint {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

fn required<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(IngestError::Configuration(format!("{key} is not set"))),
    }
}
