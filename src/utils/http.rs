// src/utils/http.rs

//! HTTP client construction.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};

use crate::error::Result;
use crate::models::HttpConfig;

/// Create the shared asynchronous HTTP client.
///
/// Default headers mimic a common desktop browser; several legal databases
/// serve degraded or empty pages to anything that looks like a bot.
pub fn create_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-AU,en;q=0.9"));

    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_client_from_default_config() {
        assert!(create_client(&HttpConfig::default()).is_ok());
    }
}
