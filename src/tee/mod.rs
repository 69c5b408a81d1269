pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpProofService;

/// Deterministic, ticket-scoped proof payload. `tokens_per_proof` is the fixed
/// allocation one proof redeems, never a proportional split, so a replayed
/// request yields the same entitlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequest {
    pub deposit_address: String,
    pub creator_address: String,
    pub launch_id: String,
    pub token_mint: String,
    pub token_symbol: String,
    pub price_per_token: String,
    pub amount_to_sell: u64,
    pub decimals: u8,
    pub tokens_per_proof: u64,
    pub user_pubkey: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofVerification {
    pub verified: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofMetadata {
    pub proof_reference: String,
    pub claim_amount: u64,
    pub claim_amount_formatted: String,
    pub deposit_address: String,
    pub swap_amount_in: String,
    pub swap_amount_usd: String,
    pub created_at: String,
    pub launch_id: String,
    pub launch_pda: String,
    pub token_mint: String,
    pub token_symbol: String,
    pub price_per_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResponse {
    pub verification: ProofVerification,
    pub metadata: ProofMetadata,
    #[serde(with = "hex::serde")]
    pub compact_proof: Vec<u8>,
}

/// Accepted proof as held by a completed ticket: the full result, including
/// the downloadable compact proof bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedProof {
    pub metadata: ProofMetadata,
    #[serde(with = "hex::serde")]
    pub compact_proof: Vec<u8>,
}

#[async_trait]
pub trait ProofService: Send + Sync {
    async fn generate_proof(&self, request: &ProofRequest) -> Result<ProofResponse>;
}
