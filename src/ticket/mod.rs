use serde::{Deserialize, Serialize};

use crate::bridge::{SwapQuote, SwapStatusSnapshot};
use crate::tee::VerifiedProof;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    Pending,
    WaitingPayment,
    Confirming,
    GeneratingProof,
    Completed,
    Failed,
}

impl TicketState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TicketState::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketEvent {
    ChannelOpened,
    CheckStarted,
    SwapSucceeded,
    SwapFailed,
    SwapRefunded,
    DepositIncomplete,
    ProofVerified,
    ProofRejected,
    Abandoned,
    RetryRequested,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("no transition from {from:?} on {event:?}")]
pub struct TransitionError {
    pub from: TicketState,
    pub event: TicketEvent,
}

/// Transition rules for a single ticket. Everything not listed is rejected;
/// `Completed` never transitions again.
pub fn transition(from: TicketState, event: TicketEvent) -> Option<TicketState> {
    use TicketEvent::*;
    use TicketState::*;

    match (from, event) {
        (Pending, ChannelOpened) => Some(WaitingPayment),
        (WaitingPayment, CheckStarted) => Some(Confirming),
        (Confirming, SwapSucceeded) => Some(GeneratingProof),
        (Confirming, SwapFailed | SwapRefunded | DepositIncomplete) => Some(WaitingPayment),
        (GeneratingProof, ProofVerified) => Some(Completed),
        (GeneratingProof, ProofRejected) => Some(Confirming),
        (Pending | WaitingPayment | Confirming | GeneratingProof, Abandoned) => Some(Failed),
        (Failed, RetryRequested) => Some(WaitingPayment),
        _ => None,
    }
}

/// Immutable quoted terms for one deposit channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketQuote {
    pub expected_out: String,
    pub min_amount_out: String,
    pub time_estimate_secs: u64,
    pub amount_in_usd: String,
    pub estimated_value_usd: String,
}

impl TicketQuote {
    pub fn from_swap_quote(quote: &SwapQuote) -> Self {
        Self {
            expected_out: quote.amount_out_formatted.clone(),
            min_amount_out: quote.min_amount_out.clone(),
            time_estimate_secs: quote.time_estimate_secs,
            amount_in_usd: quote.amount_in_usd.clone(),
            estimated_value_usd: quote.amount_out_usd.clone(),
        }
    }
}

/// One independently-lifecycled purchase unit. Owned exclusively by the
/// session; `index` keys the watcher that tracks it.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub index: usize,
    pub deposit_address: String,
    pub deposit_memo: Option<String>,
    pub deposit_amount: String,
    pub quote: TicketQuote,
    pub swap_status: Option<SwapStatusSnapshot>,
    pub proof: Option<VerifiedProof>,
    state: TicketState,
    history: Vec<TicketState>,
}

impl Ticket {
    pub fn open(index: usize, deposit_amount: String, quote: &SwapQuote) -> Self {
        let mut ticket = Self {
            index,
            deposit_address: quote.deposit_address.clone(),
            deposit_memo: quote.deposit_memo.clone(),
            deposit_amount,
            quote: TicketQuote::from_swap_quote(quote),
            swap_status: None,
            proof: None,
            state: TicketState::Pending,
            history: vec![TicketState::Pending],
        };
        // Pending is never observable outside construction.
        ticket
            .apply(TicketEvent::ChannelOpened)
            .expect("pending ticket accepts ChannelOpened");
        ticket
    }

    pub fn state(&self) -> TicketState {
        self.state
    }

    /// States visited so far, in order, starting at `Pending`.
    pub fn history(&self) -> &[TicketState] {
        &self.history
    }

    pub fn apply(&mut self, event: TicketEvent) -> Result<TicketState, TransitionError> {
        let next = transition(self.state, event).ok_or(TransitionError {
            from: self.state,
            event,
        })?;
        self.state = next;
        self.history.push(next);
        Ok(next)
    }
}
