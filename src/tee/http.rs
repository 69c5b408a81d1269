use anyhow::{Context as _, Result};
use async_trait::async_trait;

use super::{ProofRequest, ProofResponse, ProofService};

#[derive(Clone)]
pub struct HttpProofService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProofService {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ProofService for HttpProofService {
    async fn generate_proof(&self, request: &ProofRequest) -> Result<ProofResponse> {
        let url = format!("{}/api/proofs", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("send proof request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("proof request failed: status={status} body={body}");
        }

        resp.json::<ProofResponse>().await.context("decode proof response")
    }
}
