use anyhow::{Context as _, Result};

use launch_ticket_swap::proofs::{
    ProofRefStatus, ProofRefStore as _, ProofReference, SqliteProofStore,
};

fn sample_ref(reference: &str, launch_id: &str, created_at: &str) -> ProofReference {
    ProofReference {
        proof_reference: reference.to_string(),
        launch_id: launch_id.to_string(),
        deposit_address: format!("deposit:{reference}"),
        claim_amount: 400_000,
        claim_amount_formatted: "400000".to_string(),
        token_symbol: "APEX".to_string(),
        created_at: created_at.to_string(),
        status: ProofRefStatus::Unclaimed,
    }
}

#[tokio::test]
async fn sqlite_store_save_list_update() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = dir.path().join("proof_refs.sqlite3");

    let store = SqliteProofStore::open(path).context("open sqlite store")?;

    let a = sample_ref("ref-a", "launch-apex", "2026-08-07T10:00:00Z");
    store.save(&a).await.context("save ref-a")?;

    let got = store
        .get_ref("ref-a")
        .context("get ref-a")?
        .context("ref-a missing")?;
    assert_eq!(got.proof_reference, "ref-a");
    assert_eq!(got.claim_amount, 400_000);
    assert_eq!(got.status, ProofRefStatus::Unclaimed);

    let b = sample_ref("ref-b", "launch-apex", "2026-08-07T11:00:00Z");
    store.save(&b).await.context("save ref-b")?;
    let other = sample_ref("ref-c", "launch-other", "2026-08-07T09:00:00Z");
    store.save(&other).await.context("save ref-c")?;

    let refs = store
        .list_by_launch("launch-apex")
        .await
        .context("list launch-apex")?;
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0].proof_reference, "ref-a");
    assert_eq!(refs[1].proof_reference, "ref-b");

    store
        .update_status("ref-a", ProofRefStatus::Claimed)
        .await
        .context("mark ref-a claimed")?;
    let got = store
        .get_ref("ref-a")
        .context("get ref-a after update")?
        .context("ref-a missing after update")?;
    assert_eq!(got.status, ProofRefStatus::Claimed);

    // Saving the same reference again is an upsert, not a constraint error.
    store.save(&a).await.context("re-save ref-a")?;
    let refs = store
        .list_by_launch("launch-apex")
        .await
        .context("list after re-save")?;
    assert_eq!(refs.len(), 2);

    let err = store
        .update_status("missing", ProofRefStatus::Claimed)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("proof ref not found"));

    Ok(())
}
