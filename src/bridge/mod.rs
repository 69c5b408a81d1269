pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpSwapBridge;

/// Parameters for one deposit channel. Every channel in a batch carries the
/// same parameters; the bridge issues fresh address material per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuoteRequest {
    pub origin_asset: String,
    pub destination_asset: String,
    pub amount: String,
    pub recipient: String,
    pub refund_to: String,
    pub app_fees: Vec<AppFee>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppFee {
    pub recipient: String,
    pub fee_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
    pub deposit_address: String,
    pub deposit_memo: Option<String>,
    pub amount_out_formatted: String,
    pub min_amount_out: String,
    pub time_estimate_secs: u64,
    pub amount_in_usd: String,
    pub amount_out_usd: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatusKind {
    PendingDeposit,
    KnownDepositTx,
    Processing,
    Success,
    Refunded,
    Failed,
    IncompleteDeposit,
}

impl SwapStatusKind {
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            SwapStatusKind::Success
                | SwapStatusKind::Refunded
                | SwapStatusKind::Failed
                | SwapStatusKind::IncompleteDeposit
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, SwapStatusKind::Success)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, SwapStatusKind::Failed | SwapStatusKind::IncompleteDeposit)
    }
}

/// Latest bridge-side view of one deposit channel. Overwritten on every poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapStatusSnapshot {
    pub status: SwapStatusKind,
    pub received_amount_formatted: Option<String>,
}

#[async_trait]
pub trait SwapBridge: Send + Sync {
    async fn create_swap_quote(&self, request: &SwapQuoteRequest) -> Result<SwapQuote>;

    async fn check_swap_status(&self, deposit_address: &str) -> Result<SwapStatusSnapshot>;
}
