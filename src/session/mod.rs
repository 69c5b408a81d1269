pub mod orchestrator;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::AppFee;
use crate::ticket::TicketState;

pub use orchestrator::{PurchaseOrchestrator, SessionHandle};

/// Live supply as seen by the caller immediately before authorizing. This is
/// a best-effort guard: there is no global lock over supply, so another buyer
/// may still win the race after authorization.
#[derive(Debug, Clone, Copy)]
pub struct SupplySnapshot {
    pub remaining: u32,
    pub sold_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AvailabilityError {
    #[error("requested ticket quantity must be at least 1")]
    NonPositiveQuantity,
    #[error("requested {requested} tickets but only {remaining} remain")]
    ExceedsRemainingSupply { requested: u32, remaining: u32 },
    #[error("sale is sold out")]
    SoldOut,
}

/// Pure check, no side effects: nothing external happens on rejection.
pub fn authorize_purchase(
    requested: u32,
    supply: SupplySnapshot,
) -> Result<(), AvailabilityError> {
    if requested == 0 {
        return Err(AvailabilityError::NonPositiveQuantity);
    }
    if supply.sold_out {
        return Err(AvailabilityError::SoldOut);
    }
    if requested > supply.remaining {
        return Err(AvailabilityError::ExceedsRemainingSupply {
            requested,
            remaining: supply.remaining,
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PurchaseConfig {
    pub launch_id: String,
    pub token_mint: String,
    pub token_symbol: String,
    pub price_per_token: String,
    pub amount_to_sell: u64,
    pub decimals: u8,
    pub tokens_per_proof: u64,

    pub creator_address: String,
    pub refund_address: String,
    pub user_pubkey: String,

    pub origin_asset: String,
    pub destination_asset: String,
    pub app_fees: Vec<AppFee>,

    /// Ticket price and origin-asset price, both in micro-USD.
    pub ticket_price_usd_micros: u64,
    pub origin_price_usd_micros: u64,

    pub poll_interval: Duration,
    pub max_poll_errors: u32,
}

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_POLL_ERRORS: u32 = 30;

/// Ticket price converted into origin-asset units, fixed once per session,
/// formatted with 8 fractional digits: $5 at $2.50/unit is "2.00000000".
pub fn deposit_amount(
    ticket_price_usd_micros: u64,
    origin_price_usd_micros: u64,
) -> Result<String, PurchaseError> {
    if ticket_price_usd_micros == 0 || origin_price_usd_micros == 0 {
        return Err(PurchaseError::InvalidPricing);
    }
    let scaled = u128::from(ticket_price_usd_micros)
        .checked_mul(100_000_000)
        .ok_or(PurchaseError::InvalidPricing)?
        / u128::from(origin_price_usd_micros);
    Ok(format!("{}.{:08}", scaled / 100_000_000, scaled % 100_000_000))
}

#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    #[error(transparent)]
    Availability(#[from] AvailabilityError),
    #[error("ticket pricing is invalid")]
    InvalidPricing,
    #[error("quote request for ticket {index} failed")]
    QuoteBatch {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("bridge issued a duplicate deposit address: {address}")]
    DuplicateDepositAddress { address: String },
    #[error("ticket {index} does not exist")]
    UnknownTicket { index: usize },
    #[error("status check for ticket {index} failed")]
    StatusCheck {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("ticket {index} has no downloadable proof")]
    ProofNotReady { index: usize },
    #[error("proof artifact for ticket {index} could not be encoded")]
    ProofArtifact {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("ticket {index} is in state {state:?} and cannot be retried")]
    NotRetryable { index: usize, state: TicketState },
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    TicketChanged { index: usize, state: TicketState },
    Refunded { index: usize },
    ProofRejected { index: usize, reason: String },
    SessionCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Active,
    Success,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionStatus {
    pub completed: usize,
    pub total: usize,
}
