use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use launch_ticket_swap::bridge::{AppFee, HttpSwapBridge};
use launch_ticket_swap::proofs::{ProofRefStatus, ProofRefStore as _, SqliteProofStore};
use launch_ticket_swap::session::{
    DEFAULT_MAX_POLL_ERRORS, DEFAULT_POLL_INTERVAL, PurchaseConfig, PurchaseOrchestrator,
    SessionEvent, SupplySnapshot,
};
use launch_ticket_swap::tee::HttpProofService;

#[derive(Debug, clap::Parser)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Buy tickets: open deposit channels, watch the swaps and collect proofs.
    Buy {
        #[arg(long)]
        bridge_url: String,

        #[arg(long)]
        tee_url: String,

        #[arg(long)]
        store_path: PathBuf,

        #[arg(long)]
        out_dir: PathBuf,

        #[arg(long)]
        qty: u32,

        #[arg(long)]
        remaining_supply: u32,

        #[arg(long)]
        launch_id: String,

        #[arg(long)]
        token_mint: String,

        #[arg(long)]
        token_symbol: String,

        #[arg(long)]
        price_per_token: String,

        #[arg(long)]
        amount_to_sell: u64,

        #[arg(long, default_value_t = 9)]
        decimals: u8,

        #[arg(long)]
        tokens_per_proof: u64,

        #[arg(long)]
        creator_address: String,

        #[arg(long)]
        refund_address: String,

        #[arg(long)]
        user_pubkey: String,

        #[arg(long)]
        origin_asset: String,

        #[arg(long)]
        destination_asset: String,

        #[arg(long)]
        fee_recipient: Option<String>,

        #[arg(long, default_value_t = 0)]
        fee_bps: u32,

        #[arg(long)]
        ticket_price_usd_micros: u64,

        #[arg(long)]
        origin_price_usd_micros: u64,

        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
        poll_interval_secs: u64,
    },
    /// List durable proof references for a launch.
    ListProofs {
        #[arg(long)]
        store_path: PathBuf,

        #[arg(long)]
        launch_id: String,
    },
    /// Mark a stored proof reference as claimed.
    MarkClaimed {
        #[arg(long)]
        store_path: PathBuf,

        #[arg(long)]
        proof_reference: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    launch_ticket_swap::logging::init().ok();
    let args = Args::parse();

    let out = match args.command {
        Command::Buy {
            bridge_url,
            tee_url,
            store_path,
            out_dir,
            qty,
            remaining_supply,
            launch_id,
            token_mint,
            token_symbol,
            price_per_token,
            amount_to_sell,
            decimals,
            tokens_per_proof,
            creator_address,
            refund_address,
            user_pubkey,
            origin_asset,
            destination_asset,
            fee_recipient,
            fee_bps,
            ticket_price_usd_micros,
            origin_price_usd_micros,
            poll_interval_secs,
        } => {
            let app_fees = fee_recipient
                .map(|recipient| vec![AppFee { recipient, fee_bps }])
                .unwrap_or_default();

            let cfg = PurchaseConfig {
                launch_id: launch_id.clone(),
                token_mint,
                token_symbol,
                price_per_token,
                amount_to_sell,
                decimals,
                tokens_per_proof,
                creator_address,
                refund_address,
                user_pubkey,
                origin_asset,
                destination_asset,
                app_fees,
                ticket_price_usd_micros,
                origin_price_usd_micros,
                poll_interval: Duration::from_secs(poll_interval_secs),
                max_poll_errors: DEFAULT_MAX_POLL_ERRORS,
            };

            let bridge = Arc::new(HttpSwapBridge::new(bridge_url));
            let tee = Arc::new(HttpProofService::new(tee_url));
            let store = Arc::new(SqliteProofStore::open(store_path).context("open proof store")?);

            let orchestrator = PurchaseOrchestrator::new(cfg, bridge, tee, store);
            let supply = SupplySnapshot {
                remaining: remaining_supply,
                sold_out: remaining_supply == 0,
            };

            let session = orchestrator
                .start_session(qty, supply)
                .await
                .context("start purchase session")?;
            let mut events = session.subscribe();

            for ticket in session.tickets() {
                tracing::info!(
                    ticket = ticket.index,
                    deposit_address = %ticket.deposit_address,
                    deposit_amount = %ticket.deposit_amount,
                    "send payment to deposit address"
                );
            }

            loop {
                match events.recv().await {
                    Ok(SessionEvent::TicketChanged { index, state }) => {
                        tracing::info!(ticket = index, state = ?state, "ticket state changed");
                    }
                    Ok(SessionEvent::Refunded { index }) => {
                        tracing::warn!(ticket = index, "funds were returned, resend to continue");
                    }
                    Ok(SessionEvent::ProofRejected { index, reason }) => {
                        tracing::warn!(ticket = index, reason = %reason, "proof rejected");
                    }
                    Ok(SessionEvent::SessionCompleted) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            anyhow::ensure!(session.all_completed(), "session ended before completion");

            std::fs::create_dir_all(&out_dir).context("create proof output dir")?;
            let mut artifacts = Vec::new();
            for index in 0..qty as usize {
                let bytes = session
                    .download_proof(index)
                    .with_context(|| format!("download proof for ticket {index}"))?;
                let path = out_dir.join(format!("proof-{index}.json"));
                std::fs::write(&path, bytes)
                    .with_context(|| format!("write {}", path.display()))?;
                artifacts.push(path.display().to_string());
            }

            let status = session.session_status();
            let proofs = session.completed_proofs();
            session.shutdown();

            json!({
              "session_id": session.session_id(),
              "launch_id": launch_id,
              "completed": status.completed,
              "total": status.total,
              "artifacts": artifacts,
              "proofs": proofs.iter().map(|p| json!({
                "proof_reference": p.proof_reference,
                "deposit_address": p.deposit_address,
                "claim_amount": p.claim_amount,
                "claim_amount_formatted": p.claim_amount_formatted,
                "created_at": p.created_at,
              })).collect::<Vec<_>>(),
            })
        }
        Command::ListProofs {
            store_path,
            launch_id,
        } => {
            let store = SqliteProofStore::open(store_path).context("open proof store")?;
            let refs = store
                .list_by_launch(&launch_id)
                .await
                .context("list proof references")?;

            json!(refs)
        }
        Command::MarkClaimed {
            store_path,
            proof_reference,
        } => {
            let store = SqliteProofStore::open(store_path).context("open proof store")?;
            store
                .update_status(&proof_reference, ProofRefStatus::Claimed)
                .await
                .context("mark proof reference claimed")?;

            json!({
              "proof_reference": proof_reference,
              "status": "claimed",
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
