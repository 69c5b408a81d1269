pub mod store;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tee::ProofMetadata;

pub use store::SqliteProofStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofRefStatus {
    Unclaimed,
    Claimed,
}

/// Durable, non-sensitive pointer to an issued proof. Identifying metadata
/// only; the raw proof bytes live in the downloadable artifact, never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofReference {
    pub proof_reference: String,
    pub launch_id: String,
    pub deposit_address: String,
    pub claim_amount: u64,
    pub claim_amount_formatted: String,
    pub token_symbol: String,
    pub created_at: String,
    pub status: ProofRefStatus,
}

impl ProofReference {
    pub fn unclaimed(metadata: &ProofMetadata) -> Self {
        Self {
            proof_reference: metadata.proof_reference.clone(),
            launch_id: metadata.launch_id.clone(),
            deposit_address: metadata.deposit_address.clone(),
            claim_amount: metadata.claim_amount,
            claim_amount_formatted: metadata.claim_amount_formatted.clone(),
            token_symbol: metadata.token_symbol.clone(),
            created_at: metadata.created_at.clone(),
            status: ProofRefStatus::Unclaimed,
        }
    }
}

#[async_trait]
pub trait ProofRefStore: Send + Sync {
    async fn save(&self, proof_ref: &ProofReference) -> Result<()>;

    async fn list_by_launch(&self, launch_id: &str) -> Result<Vec<ProofReference>>;

    async fn update_status(&self, proof_reference: &str, status: ProofRefStatus) -> Result<()>;
}
