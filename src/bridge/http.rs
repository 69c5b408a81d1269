use anyhow::{Context as _, Result};
use async_trait::async_trait;

use super::{SwapBridge, SwapQuote, SwapQuoteRequest, SwapStatusSnapshot};

#[derive(Clone)]
pub struct HttpSwapBridge {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSwapBridge {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SwapBridge for HttpSwapBridge {
    async fn create_swap_quote(&self, request: &SwapQuoteRequest) -> Result<SwapQuote> {
        let url = format!("{}/v0/quote", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("send quote request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("quote request failed: status={status} body={body}");
        }

        resp.json::<SwapQuote>().await.context("decode quote response")
    }

    async fn check_swap_status(&self, deposit_address: &str) -> Result<SwapStatusSnapshot> {
        let url = format!("{}/v0/status", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("depositAddress", deposit_address)])
            .send()
            .await
            .context("send status request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("status request failed: status={status} body={body}");
        }

        resp.json::<SwapStatusSnapshot>()
            .await
            .context("decode status response")
    }
}
