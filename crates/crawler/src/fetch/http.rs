//! Polite HTTP plumbing shared by the transports
//!
//! A `User-Agent` naming a contact, a request timeout, a client-side request
//! budget, and the status codes every bibliographic API answers alike.

use super::AttemptResult;
use crate::errors::{CrawlError, Result};
use citecrawl_common::config::FetchConfig;
use citecrawl_common::VERSION;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use std::num::NonZeroU32;
use std::time::Duration;

pub(crate) fn polite_client(config: &FetchConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(user_agent(&config.mailto))
        .build()
        .map_err(|e| CrawlError::HttpClient(format!("Failed to create HTTP client: {}", e)))
}

pub(crate) fn request_budget(config: &FetchConfig) -> DefaultDirectRateLimiter {
    let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(per_second))
}

fn user_agent(mailto: &str) -> String {
    format!("citecrawl/{} (mailto:{})", VERSION, mailto)
}

/// Delay-seconds form of `Retry-After`; the HTTP-date form is ignored
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Attempt result for any status other than success
pub(crate) fn unsuccessful(response: &Response) -> Option<AttemptResult> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(AttemptResult::TooManyRequests {
            retry_after: parse_retry_after(response.headers()),
        });
    }
    if status == StatusCode::NOT_FOUND {
        return Some(AttemptResult::NotFound);
    }
    if !status.is_success() {
        return Some(AttemptResult::Failed(format!("API error {}", status)));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_user_agent_names_contact() {
        let ua = user_agent("ops@example.org");
        assert!(ua.starts_with("citecrawl/"));
        assert!(ua.ends_with("(mailto:ops@example.org)"));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 120 "));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(120)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_zero_budget_falls_back_to_one_per_second() {
        let config = FetchConfig {
            requests_per_second: 0,
            ..Default::default()
        };
        assert!(request_budget(&config).check().is_ok());
        assert!(polite_client(&config).is_ok());
    }
}
