use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use launch_ticket_swap::bridge::{
    AppFee, SwapBridge, SwapQuote, SwapQuoteRequest, SwapStatusKind, SwapStatusSnapshot,
};
use launch_ticket_swap::proofs::{ProofRefStatus, ProofRefStore, ProofReference};
use launch_ticket_swap::session::{PurchaseConfig, SessionEvent, SupplySnapshot};
use launch_ticket_swap::tee::{
    ProofMetadata, ProofRequest, ProofResponse, ProofService, ProofVerification,
};

pub fn test_config(poll_interval: Duration, max_poll_errors: u32) -> PurchaseConfig {
    PurchaseConfig {
        launch_id: "launch-apex".to_string(),
        token_mint: "ApexMint1111".to_string(),
        token_symbol: "APEX".to_string(),
        price_per_token: "0.0000125".to_string(),
        amount_to_sell: 800_000_000,
        decimals: 6,
        tokens_per_proof: 400_000,
        creator_address: "creator-wallet".to_string(),
        refund_address: "refund-wallet".to_string(),
        user_pubkey: "buyer-pubkey".to_string(),
        origin_asset: "sol.origin".to_string(),
        destination_asset: "usdc.dest".to_string(),
        app_fees: vec![AppFee {
            recipient: "fee-wallet".to_string(),
            fee_bps: 100,
        }],
        ticket_price_usd_micros: 5_000_000,
        origin_price_usd_micros: 2_500_000,
        poll_interval,
        max_poll_errors,
    }
}

pub fn supply(remaining: u32) -> SupplySnapshot {
    SupplySnapshot {
        remaining,
        sold_out: false,
    }
}

/// Drains every event already delivered to the receiver.
pub fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[derive(Default)]
struct BridgeInner {
    quote_calls: usize,
    status_calls: usize,
    failing_quote_calls: Vec<usize>,
    failing_status_calls: usize,
    scripts: HashMap<String, VecDeque<SwapStatusKind>>,
}

/// Scripted stand-in for the swap bridge. Addresses are minted per quote call
/// (`deposit-0`, `deposit-1`, ...); status sequences are scripted per address
/// and the last entry repeats forever.
#[derive(Default)]
pub struct MockBridge {
    inner: Mutex<BridgeInner>,
}

impl MockBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_status(&self, deposit_address: &str, statuses: &[SwapStatusKind]) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .scripts
            .insert(deposit_address.to_string(), statuses.iter().copied().collect());
    }

    /// Makes the quote call with the given issue order fail.
    pub fn fail_quote_call(&self, call: usize) {
        self.inner.lock().unwrap().failing_quote_calls.push(call);
    }

    /// Makes the next `n` status calls fail with a transport error.
    pub fn fail_next_status_calls(&self, n: usize) {
        self.inner.lock().unwrap().failing_status_calls = n;
    }

    pub fn quote_calls(&self) -> usize {
        self.inner.lock().unwrap().quote_calls
    }

    pub fn status_calls(&self) -> usize {
        self.inner.lock().unwrap().status_calls
    }
}

#[async_trait]
impl SwapBridge for MockBridge {
    async fn create_swap_quote(&self, _request: &SwapQuoteRequest) -> Result<SwapQuote> {
        let mut inner = self.inner.lock().unwrap();
        let call = inner.quote_calls;
        inner.quote_calls += 1;
        if inner.failing_quote_calls.contains(&call) {
            anyhow::bail!("bridge rejected quote call {call}");
        }
        Ok(SwapQuote {
            deposit_address: format!("deposit-{call}"),
            deposit_memo: None,
            amount_out_formatted: "4.98".to_string(),
            min_amount_out: "4.95".to_string(),
            time_estimate_secs: 60,
            amount_in_usd: "5.00".to_string(),
            amount_out_usd: "4.98".to_string(),
        })
    }

    async fn check_swap_status(&self, deposit_address: &str) -> Result<SwapStatusSnapshot> {
        let mut inner = self.inner.lock().unwrap();
        inner.status_calls += 1;
        if inner.failing_status_calls > 0 {
            inner.failing_status_calls -= 1;
            anyhow::bail!("bridge unreachable");
        }
        let status = match inner.scripts.get_mut(deposit_address) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => *queue.front().unwrap_or(&SwapStatusKind::PendingDeposit),
            None => SwapStatusKind::PendingDeposit,
        };
        Ok(SwapStatusSnapshot {
            status,
            received_amount_formatted: status
                .is_success()
                .then(|| "2.00000000".to_string()),
        })
    }
}

#[derive(Clone)]
pub enum TeeVerdict {
    Verified,
    Rejected(String),
    Transport(String),
}

#[derive(Default)]
struct TeeInner {
    proof_calls: usize,
    verdicts: HashMap<String, VecDeque<TeeVerdict>>,
}

/// Scripted stand-in for the TEE. Verdicts are scripted per deposit address
/// (the last entry repeats forever); the default is a verified proof.
#[derive(Default)]
pub struct MockTee {
    inner: Mutex<TeeInner>,
}

impl MockTee {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_verdicts(&self, deposit_address: &str, verdicts: &[TeeVerdict]) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .verdicts
            .insert(deposit_address.to_string(), verdicts.iter().cloned().collect());
    }

    pub fn proof_calls(&self) -> usize {
        self.inner.lock().unwrap().proof_calls
    }
}

#[async_trait]
impl ProofService for MockTee {
    async fn generate_proof(&self, request: &ProofRequest) -> Result<ProofResponse> {
        let mut inner = self.inner.lock().unwrap();
        inner.proof_calls += 1;
        let verdict = match inner.verdicts.get_mut(&request.deposit_address) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(TeeVerdict::Verified),
            None => TeeVerdict::Verified,
        };

        let verification = match verdict {
            TeeVerdict::Verified => ProofVerification {
                verified: true,
                error: None,
            },
            TeeVerdict::Rejected(reason) => ProofVerification {
                verified: false,
                error: Some(reason),
            },
            TeeVerdict::Transport(reason) => anyhow::bail!("tee unreachable: {reason}"),
        };

        Ok(ProofResponse {
            verification,
            metadata: ProofMetadata {
                proof_reference: format!("proof-{}", request.deposit_address),
                claim_amount: request.tokens_per_proof,
                claim_amount_formatted: request.tokens_per_proof.to_string(),
                deposit_address: request.deposit_address.clone(),
                swap_amount_in: "2.00000000".to_string(),
                swap_amount_usd: "5.00".to_string(),
                created_at: "2026-08-07T12:00:00Z".to_string(),
                launch_id: request.launch_id.clone(),
                launch_pda: format!("pda-{}", request.launch_id),
                token_mint: request.token_mint.clone(),
                token_symbol: request.token_symbol.clone(),
                price_per_token: request.price_per_token.clone(),
            },
            compact_proof: vec![0xAB, 0xCD, 0xEF],
        })
    }
}

/// In-memory reference store.
#[derive(Default)]
pub struct MemoryRefStore {
    refs: Mutex<Vec<ProofReference>>,
}

impl MemoryRefStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<ProofReference> {
        self.refs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProofRefStore for MemoryRefStore {
    async fn save(&self, proof_ref: &ProofReference) -> Result<()> {
        let mut refs = self.refs.lock().unwrap();
        refs.retain(|r| r.proof_reference != proof_ref.proof_reference);
        refs.push(proof_ref.clone());
        Ok(())
    }

    async fn list_by_launch(&self, launch_id: &str) -> Result<Vec<ProofReference>> {
        Ok(self
            .refs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.launch_id == launch_id)
            .cloned()
            .collect())
    }

    async fn update_status(&self, proof_reference: &str, status: ProofRefStatus) -> Result<()> {
        let mut refs = self.refs.lock().unwrap();
        let found = refs
            .iter_mut()
            .find(|r| r.proof_reference == proof_reference);
        match found {
            Some(r) => {
                r.status = status;
                Ok(())
            }
            None => anyhow::bail!("proof ref not found: {proof_reference}"),
        }
    }
}

/// Reference store whose writes always fail, for the best-effort policy.
pub struct FailingRefStore;

#[async_trait]
impl ProofRefStore for FailingRefStore {
    async fn save(&self, _proof_ref: &ProofReference) -> Result<()> {
        anyhow::bail!("disk full")
    }

    async fn list_by_launch(&self, _launch_id: &str) -> Result<Vec<ProofReference>> {
        Ok(Vec::new())
    }

    async fn update_status(&self, _proof_reference: &str, _status: ProofRefStatus) -> Result<()> {
        anyhow::bail!("disk full")
    }
}
