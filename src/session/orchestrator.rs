use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bridge::{SwapBridge, SwapQuote, SwapQuoteRequest, SwapStatusKind};
use crate::proofs::{ProofRefStore, ProofReference};
use crate::tee::{ProofRequest, ProofService, VerifiedProof};
use crate::ticket::{Ticket, TicketEvent, TicketState};

use super::{
    PurchaseConfig, PurchaseError, SessionEvent, SessionPhase, SessionStatus, SupplySnapshot,
    authorize_purchase, deposit_amount,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Entry point for purchase sessions: one orchestrator per launch, handing out
/// a [`SessionHandle`] per authorized purchase request.
pub struct PurchaseOrchestrator {
    cfg: PurchaseConfig,
    bridge: Arc<dyn SwapBridge>,
    tee: Arc<dyn ProofService>,
    store: Arc<dyn ProofRefStore>,
}

impl PurchaseOrchestrator {
    pub fn new(
        cfg: PurchaseConfig,
        bridge: Arc<dyn SwapBridge>,
        tee: Arc<dyn ProofService>,
        store: Arc<dyn ProofRefStore>,
    ) -> Self {
        Self {
            cfg,
            bridge,
            tee,
            store,
        }
    }

    /// Authorizes `requested` against the supplied snapshot, opens that many
    /// deposit channels and starts one watcher per ticket. Rejections happen
    /// before any external call; a failed batch creates no session at all.
    pub async fn start_session(
        &self,
        requested: u32,
        supply: SupplySnapshot,
    ) -> Result<SessionHandle, PurchaseError> {
        authorize_purchase(requested, supply)?;

        let amount = deposit_amount(
            self.cfg.ticket_price_usd_micros,
            self.cfg.origin_price_usd_micros,
        )?;
        let tickets = self.create_channels(requested, &amount).await?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(SessionShared {
            session_id: Uuid::new_v4().to_string(),
            cfg: self.cfg.clone(),
            bridge: Arc::clone(&self.bridge),
            tee: Arc::clone(&self.tee),
            store: Arc::clone(&self.store),
            state: Mutex::new(SessionState {
                tickets,
                selected: 0,
                completed: 0,
                phase: SessionPhase::Active,
                watchers: HashMap::new(),
            }),
            events,
        });

        for index in 0..requested as usize {
            shared.spawn_watcher(index);
        }

        tracing::info!(
            session_id = %shared.session_id,
            tickets = requested,
            deposit_amount = %amount,
            "purchase session started"
        );
        Ok(SessionHandle { shared })
    }

    /// Issues `qty` quote requests concurrently, all with identical parameters;
    /// the bridge mints fresh address material per call. All-or-nothing: the
    /// first failure rejects the whole batch, since already-issued addresses
    /// cannot be cancelled and must not be silently dropped.
    async fn create_channels(
        &self,
        qty: u32,
        amount: &str,
    ) -> Result<Vec<Ticket>, PurchaseError> {
        let request = SwapQuoteRequest {
            origin_asset: self.cfg.origin_asset.clone(),
            destination_asset: self.cfg.destination_asset.clone(),
            amount: amount.to_string(),
            recipient: self.cfg.creator_address.clone(),
            refund_to: self.cfg.refund_address.clone(),
            app_fees: self.cfg.app_fees.clone(),
        };

        let mut handles = Vec::with_capacity(qty as usize);
        for _ in 0..qty {
            let bridge = Arc::clone(&self.bridge);
            let request = request.clone();
            handles.push(tokio::spawn(
                async move { bridge.create_swap_quote(&request).await },
            ));
        }

        let mut quotes: Vec<SwapQuote> = Vec::with_capacity(qty as usize);
        let mut failure: Option<(usize, anyhow::Error)> = None;
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(quote)) => quotes.push(quote),
                Ok(Err(source)) => {
                    failure.get_or_insert((index, source));
                }
                Err(join_err) => {
                    failure.get_or_insert((index, anyhow::anyhow!("join quote task: {join_err}")));
                }
            }
        }
        if let Some((index, source)) = failure {
            return Err(PurchaseError::QuoteBatch { index, source });
        }

        let mut seen = HashSet::new();
        let mut tickets = Vec::with_capacity(quotes.len());
        for (index, quote) in quotes.iter().enumerate() {
            if !seen.insert(quote.deposit_address.clone()) {
                return Err(PurchaseError::DuplicateDepositAddress {
                    address: quote.deposit_address.clone(),
                });
            }
            tickets.push(Ticket::open(index, amount.to_string(), quote));
        }
        Ok(tickets)
    }
}

struct SessionState {
    tickets: Vec<Ticket>,
    selected: usize,
    completed: usize,
    phase: SessionPhase,
    watchers: HashMap<usize, JoinHandle<()>>,
}

struct SessionShared {
    session_id: String,
    cfg: PurchaseConfig,
    bridge: Arc<dyn SwapBridge>,
    tee: Arc<dyn ProofService>,
    store: Arc<dyn ProofRefStore>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            for (_, handle) in state.watchers.drain() {
                handle.abort();
            }
        }
    }
}

enum PollOutcome {
    /// No status call was made: ticket terminal, proof in flight, or failed.
    Idle,
    /// Non-terminal bridge status; keep polling.
    Pending,
    /// Reverted to waiting-payment; the watcher for this ticket is gone.
    Reverted,
    /// Proof rejected; ticket back in confirming, watcher keeps running.
    ProofRetry,
    Completed,
}

impl SessionShared {
    /// Registers a watcher for `index` unless one exists. Starting a watch on
    /// a waiting ticket moves it to confirming before the first poll; the
    /// first status call lands one full interval later.
    fn spawn_watcher(self: &Arc<Self>, index: usize) {
        let mut state = self.state.lock().expect("session mutex poisoned");
        if state.phase == SessionPhase::Success || state.watchers.contains_key(&index) {
            return;
        }
        if state.tickets[index].state() == TicketState::WaitingPayment
            && let Err(err) = self.apply_transition(&mut state, index, TicketEvent::CheckStarted)
        {
            tracing::debug!(ticket = index, error = %err, "watcher start skipped");
            return;
        }

        let weak = Arc::downgrade(self);
        let interval = self.cfg.poll_interval;
        let max_errors = self.cfg.max_poll_errors;
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut error_streak = 0u32;
            loop {
                ticker.tick().await;
                let Some(session) = weak.upgrade() else { break };
                match session.poll_ticket(index).await {
                    Ok(PollOutcome::Completed | PollOutcome::Reverted) => {
                        session.remove_watcher(index);
                        break;
                    }
                    Ok(_) => error_streak = 0,
                    Err(err) => {
                        error_streak += 1;
                        tracing::warn!(
                            ticket = index,
                            attempt = error_streak,
                            error = %format!("{err:#}"),
                            "status poll failed"
                        );
                        if error_streak >= max_errors {
                            session.abandon_ticket(index);
                            session.remove_watcher(index);
                            break;
                        }
                    }
                }
            }
        });
        state.watchers.insert(index, handle);
    }

    /// Single-shot status check shared by the timer cadence and `check_now`.
    /// A transport error leaves the ticket untouched. The status transition is
    /// applied only if the ticket is still in the state the check started
    /// from, which makes concurrent timer and manual checks idempotent.
    async fn poll_ticket(&self, index: usize) -> Result<PollOutcome> {
        let deposit_address = {
            let mut state = self.state.lock().expect("session mutex poisoned");
            match state.tickets[index].state() {
                TicketState::Completed
                | TicketState::GeneratingProof
                | TicketState::Failed
                | TicketState::Pending => return Ok(PollOutcome::Idle),
                TicketState::WaitingPayment => {
                    self.apply_transition(&mut state, index, TicketEvent::CheckStarted)?;
                }
                TicketState::Confirming => {}
            }
            state.tickets[index].deposit_address.clone()
        };

        let status = self.bridge.check_swap_status(&deposit_address).await?;

        {
            let mut state = self.state.lock().expect("session mutex poisoned");
            if state.tickets[index].state() != TicketState::Confirming {
                return Ok(PollOutcome::Idle);
            }
            state.tickets[index].swap_status = Some(status.clone());

            match status.status {
                SwapStatusKind::Success => {
                    self.apply_transition(&mut state, index, TicketEvent::SwapSucceeded)?;
                    // Fall through to drop the guard at the end of this block
                    // before awaiting proof issuance below.
                }
                SwapStatusKind::Refunded => {
                    self.apply_transition(&mut state, index, TicketEvent::SwapRefunded)?;
                    self.cancel_watcher(&mut state, index);
                    let _ = self.events.send(SessionEvent::Refunded { index });
                    tracing::info!(ticket = index, "swap refunded, funds returned to sender");
                    return Ok(PollOutcome::Reverted);
                }
                SwapStatusKind::Failed => {
                    self.apply_transition(&mut state, index, TicketEvent::SwapFailed)?;
                    self.cancel_watcher(&mut state, index);
                    tracing::warn!(ticket = index, "swap failed, deposit address remains valid");
                    return Ok(PollOutcome::Reverted);
                }
                SwapStatusKind::IncompleteDeposit => {
                    self.apply_transition(&mut state, index, TicketEvent::DepositIncomplete)?;
                    self.cancel_watcher(&mut state, index);
                    tracing::warn!(ticket = index, "incomplete deposit, awaiting corrected resend");
                    return Ok(PollOutcome::Reverted);
                }
                SwapStatusKind::PendingDeposit
                | SwapStatusKind::KnownDepositTx
                | SwapStatusKind::Processing => return Ok(PollOutcome::Pending),
            }
        }

        self.request_proof(index).await
    }

    /// Proof issuance for a ticket whose swap succeeded. Only an explicit
    /// `verified == true` completes the ticket; everything else reverts it to
    /// confirming so the watcher or a manual check can re-attempt without a
    /// new payment. The durable reference write is best-effort bookkeeping:
    /// the verified proof in the ticket is authoritative.
    async fn request_proof(&self, index: usize) -> Result<PollOutcome> {
        let request = {
            let state = self.state.lock().expect("session mutex poisoned");
            let ticket = &state.tickets[index];
            ProofRequest {
                deposit_address: ticket.deposit_address.clone(),
                creator_address: self.cfg.creator_address.clone(),
                launch_id: self.cfg.launch_id.clone(),
                token_mint: self.cfg.token_mint.clone(),
                token_symbol: self.cfg.token_symbol.clone(),
                price_per_token: self.cfg.price_per_token.clone(),
                amount_to_sell: self.cfg.amount_to_sell,
                decimals: self.cfg.decimals,
                tokens_per_proof: self.cfg.tokens_per_proof,
                user_pubkey: self.cfg.user_pubkey.clone(),
            }
        };

        let outcome = self.tee.generate_proof(&request).await;

        match outcome {
            Ok(resp) if resp.verification.verified => {
                let reference = ProofReference::unclaimed(&resp.metadata);
                if let Err(err) = self.store.save(&reference).await {
                    tracing::warn!(
                        ticket = index,
                        proof_reference = %reference.proof_reference,
                        error = %format!("{err:#}"),
                        "persist proof reference failed"
                    );
                }

                let mut state = self.state.lock().expect("session mutex poisoned");
                if state.tickets[index].state() != TicketState::GeneratingProof {
                    return Ok(PollOutcome::Idle);
                }
                state.tickets[index].proof = Some(VerifiedProof {
                    metadata: resp.metadata,
                    compact_proof: resp.compact_proof,
                });
                self.apply_transition(&mut state, index, TicketEvent::ProofVerified)?;
                self.cancel_watcher(&mut state, index);
                tracing::info!(ticket = index, "proof verified, ticket completed");
                Ok(PollOutcome::Completed)
            }
            Ok(resp) => {
                let reason = resp
                    .verification
                    .error
                    .unwrap_or_else(|| "proof verification failed".to_string());
                self.reject_proof(index, reason)?;
                Ok(PollOutcome::ProofRetry)
            }
            Err(err) => {
                self.reject_proof(index, format!("{err:#}"))?;
                Ok(PollOutcome::ProofRetry)
            }
        }
    }

    fn reject_proof(&self, index: usize, reason: String) -> Result<()> {
        let mut state = self.state.lock().expect("session mutex poisoned");
        if state.tickets[index].state() != TicketState::GeneratingProof {
            return Ok(());
        }
        self.apply_transition(&mut state, index, TicketEvent::ProofRejected)?;
        tracing::warn!(ticket = index, reason = %reason, "proof rejected, will re-attempt");
        let _ = self.events.send(SessionEvent::ProofRejected { index, reason });
        Ok(())
    }

    /// The single mutation path for ticket state. Completion is counted here,
    /// behind the one-way transition into `Completed`, so no ticket can
    /// contribute twice; the session flips to success exactly once, draining
    /// every remaining watcher.
    fn apply_transition(
        &self,
        state: &mut SessionState,
        index: usize,
        event: TicketEvent,
    ) -> Result<TicketState, crate::ticket::TransitionError> {
        let next = state.tickets[index].apply(event)?;
        let _ = self.events.send(SessionEvent::TicketChanged { index, state: next });

        if next == TicketState::Completed {
            state.completed += 1;
            if state.completed == state.tickets.len() && state.phase == SessionPhase::Active {
                state.phase = SessionPhase::Success;
                for (_, handle) in state.watchers.drain() {
                    handle.abort();
                }
                let _ = self.events.send(SessionEvent::SessionCompleted);
                tracing::info!(session_id = %self.session_id, "all tickets completed");
            }
        }
        Ok(next)
    }

    fn cancel_watcher(&self, state: &mut SessionState, index: usize) {
        if let Some(handle) = state.watchers.remove(&index) {
            handle.abort();
        }
    }

    fn remove_watcher(&self, index: usize) {
        let mut state = self.state.lock().expect("session mutex poisoned");
        state.watchers.remove(&index);
    }

    fn abandon_ticket(&self, index: usize) {
        let mut state = self.state.lock().expect("session mutex poisoned");
        match self.apply_transition(&mut state, index, TicketEvent::Abandoned) {
            Ok(_) => {
                tracing::warn!(ticket = index, "ticket abandoned after repeated poll failures");
            }
            Err(err) => tracing::debug!(ticket = index, error = %err, "abandon skipped"),
        }
    }
}

/// Caller-facing view of one purchase session. Cheap to clone; when the last
/// handle is dropped the watcher registry is drained and no task keeps
/// mutating a torn-down session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.shared.session_id)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn tickets(&self) -> Vec<Ticket> {
        let state = self.shared.state.lock().expect("session mutex poisoned");
        state.tickets.clone()
    }

    pub fn ticket(&self, index: usize) -> Result<Ticket, PurchaseError> {
        let state = self.shared.state.lock().expect("session mutex poisoned");
        state
            .tickets
            .get(index)
            .cloned()
            .ok_or(PurchaseError::UnknownTicket { index })
    }

    /// Moves the read cursor so the caller can re-surface a ticket's payment
    /// details. Purely a cursor: watcher progress is unaffected. No-op on
    /// completed tickets (returns `false`).
    pub fn select_ticket(&self, index: usize) -> Result<bool, PurchaseError> {
        let mut state = self.shared.state.lock().expect("session mutex poisoned");
        let ticket = state
            .tickets
            .get(index)
            .ok_or(PurchaseError::UnknownTicket { index })?;
        if ticket.state().is_terminal() {
            return Ok(false);
        }
        state.selected = index;
        Ok(true)
    }

    pub fn selected_ticket(&self) -> Ticket {
        let state = self.shared.state.lock().expect("session mutex poisoned");
        state.tickets[state.selected].clone()
    }

    /// Single-shot status check outside the timer cadence, applying the same
    /// transition rules as the watcher. No-op without an external call on
    /// tickets that are completed, failed, or mid proof generation. A
    /// transport error is surfaced without mutating the ticket. Re-arms the
    /// watcher when the check leaves the ticket confirming with none running.
    pub async fn check_now(&self, index: usize) -> Result<TicketState, PurchaseError> {
        {
            let state = self.shared.state.lock().expect("session mutex poisoned");
            if index >= state.tickets.len() {
                return Err(PurchaseError::UnknownTicket { index });
            }
        }

        self.shared
            .poll_ticket(index)
            .await
            .map_err(|source| PurchaseError::StatusCheck { index, source })?;

        let state_now = {
            let state = self.shared.state.lock().expect("session mutex poisoned");
            state.tickets[index].state()
        };
        if state_now == TicketState::Confirming {
            self.shared.spawn_watcher(index);
        }
        Ok(state_now)
    }

    /// The one non-monotonic edge: a failed ticket back to waiting-payment,
    /// with a fresh watcher. The deposit address is unchanged.
    pub fn retry(&self, index: usize) -> Result<TicketState, PurchaseError> {
        {
            let mut state = self.shared.state.lock().expect("session mutex poisoned");
            let ticket = state
                .tickets
                .get(index)
                .ok_or(PurchaseError::UnknownTicket { index })?;
            let current = ticket.state();
            if current != TicketState::Failed {
                return Err(PurchaseError::NotRetryable {
                    index,
                    state: current,
                });
            }
            self.shared
                .apply_transition(&mut state, index, TicketEvent::RetryRequested)
                .map_err(|_| PurchaseError::NotRetryable {
                    index,
                    state: current,
                })?;
        }
        self.shared.spawn_watcher(index);
        Ok(self.shared.state.lock().expect("session mutex poisoned").tickets[index].state())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn session_status(&self) -> SessionStatus {
        let state = self.shared.state.lock().expect("session mutex poisoned");
        SessionStatus {
            completed: state.completed,
            total: state.tickets.len(),
        }
    }

    pub fn all_completed(&self) -> bool {
        let state = self.shared.state.lock().expect("session mutex poisoned");
        state.phase == SessionPhase::Success
    }

    pub fn completed_proofs(&self) -> Vec<crate::tee::ProofMetadata> {
        let state = self.shared.state.lock().expect("session mutex poisoned");
        state
            .tickets
            .iter()
            .filter_map(|t| t.proof.as_ref().map(|p| p.metadata.clone()))
            .collect()
    }

    /// Serializes the full verified proof (metadata plus compact proof bytes)
    /// as the downloadable artifact for a completed ticket.
    pub fn download_proof(&self, index: usize) -> Result<Vec<u8>, PurchaseError> {
        let state = self.shared.state.lock().expect("session mutex poisoned");
        let ticket = state
            .tickets
            .get(index)
            .ok_or(PurchaseError::UnknownTicket { index })?;
        let proof = ticket
            .proof
            .as_ref()
            .ok_or(PurchaseError::ProofNotReady { index })?;
        serde_json::to_vec_pretty(proof)
            .map_err(|source| PurchaseError::ProofArtifact { index, source })
    }

    pub fn active_watchers(&self) -> usize {
        let state = self.shared.state.lock().expect("session mutex poisoned");
        state.watchers.len()
    }

    /// Tears the session down: every watcher is aborted and the registry
    /// drained. Used when the caller starts over ("buy more tickets") or
    /// navigates away.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock().expect("session mutex poisoned");
        for (_, handle) in state.watchers.drain() {
            handle.abort();
        }
    }
}
