//! Crossref `/works` transport
//!
//! Polite pool etiquette: a `User-Agent` naming a contact, `mailto` on every
//! request, and a client-side request budget.

use super::http::{polite_client, request_budget, unsuccessful};
use super::record::WorksResponse;
use super::{AttemptResult, Transport};
use crate::errors::Result;
use async_trait::async_trait;
use citecrawl_common::config::FetchConfig;
use governor::DefaultDirectRateLimiter;
use tracing::debug;

/// Crossref works client
pub struct CrossrefTransport {
    client: reqwest::Client,
    api_base: String,
    mailto: String,
    limiter: DefaultDirectRateLimiter,
}

impl CrossrefTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            client: polite_client(config)?,
            api_base: config.api_base.clone(),
            mailto: config.mailto.clone(),
            limiter: request_budget(config),
        })
    }
}

#[async_trait]
impl Transport for CrossrefTransport {
    async fn attempt(&self, title: &str) -> AttemptResult {
        self.limiter.until_ready().await;

        let response = match self
            .client
            .get(&self.api_base)
            .query(&[("query", title), ("rows", "1"), ("mailto", self.mailto.as_str())])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return AttemptResult::Failed(format!("Request failed: {}", e)),
        };

        if let Some(result) = unsuccessful(&response) {
            return result;
        }

        let body: WorksResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => return AttemptResult::Failed(format!("Failed to parse response: {}", e)),
        };

        let Some(work) = body.message.items.into_iter().next() else {
            debug!("No items for query");
            return AttemptResult::NotFound;
        };

        match work.into_record() {
            Ok(record) => AttemptResult::Found(record),
            Err(field) => AttemptResult::Incomplete(field),
        }
    }
}
