use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension as _, params};

use super::{ProofRefStatus, ProofRefStore, ProofReference};

#[derive(Debug)]
pub struct SqliteProofStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteProofStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create proof store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn insert_ref(&self, record: &ProofReference) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            r#"
INSERT OR REPLACE INTO proof_refs (
  proof_reference,
  launch_id,
  deposit_address,
  claim_amount,
  claim_amount_formatted,
  token_symbol,
  created_at,
  status
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
)
"#,
            params![
                &record.proof_reference,
                &record.launch_id,
                &record.deposit_address,
                record.claim_amount,
                &record.claim_amount_formatted,
                &record.token_symbol,
                &record.created_at,
                status_to_str(record.status),
            ],
        )
        .with_context(|| format!("insert proof ref {}", record.proof_reference))?;
        Ok(())
    }

    pub fn get_ref(&self, proof_reference: &str) -> Result<Option<ProofReference>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            r#"
SELECT
  proof_reference,
  launch_id,
  deposit_address,
  claim_amount,
  claim_amount_formatted,
  token_symbol,
  created_at,
  status
FROM proof_refs
WHERE proof_reference = ?1
"#,
            params![proof_reference],
            row_to_ref,
        )
        .optional()
        .with_context(|| format!("get proof ref {proof_reference}"))
    }

    fn list_refs(&self, launch_id: &str) -> Result<Vec<ProofReference>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn
            .prepare(
                r#"
SELECT
  proof_reference,
  launch_id,
  deposit_address,
  claim_amount,
  claim_amount_formatted,
  token_symbol,
  created_at,
  status
FROM proof_refs
WHERE launch_id = ?1
ORDER BY created_at, proof_reference
"#,
            )
            .context("prepare list proof refs")?;

        let mut out = Vec::new();
        let rows = stmt
            .query_map(params![launch_id], row_to_ref)
            .context("query list proof refs")?;
        for row in rows {
            out.push(row.context("read proof ref row")?);
        }
        Ok(out)
    }

    fn set_status(&self, proof_reference: &str, status: ProofRefStatus) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let rows = conn
            .execute(
                "UPDATE proof_refs SET status = ?2 WHERE proof_reference = ?1",
                params![proof_reference, status_to_str(status)],
            )
            .with_context(|| format!("update proof ref status {proof_reference}"))?;
        anyhow::ensure!(rows == 1, "proof ref not found: {proof_reference}");
        Ok(())
    }
}

#[async_trait]
impl ProofRefStore for SqliteProofStore {
    async fn save(&self, proof_ref: &ProofReference) -> Result<()> {
        self.insert_ref(proof_ref)
    }

    async fn list_by_launch(&self, launch_id: &str) -> Result<Vec<ProofReference>> {
        self.list_refs(launch_id)
    }

    async fn update_status(&self, proof_reference: &str, status: ProofRefStatus) -> Result<()> {
        self.set_status(proof_reference, status)
    }
}

fn row_to_ref(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProofReference> {
    let claim_amount: i64 = row.get(3)?;
    let status_str: String = row.get(7)?;
    let status = status_from_str(&status_str, 7)?;
    Ok(ProofReference {
        proof_reference: row.get(0)?,
        launch_id: row.get(1)?,
        deposit_address: row.get(2)?,
        claim_amount: u64::try_from(claim_amount).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Integer,
                format!("invalid claim_amount {claim_amount}").into(),
            )
        })?,
        claim_amount_formatted: row.get(4)?,
        token_symbol: row.get(5)?,
        created_at: row.get(6)?,
        status,
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS proof_refs (
  proof_reference TEXT PRIMARY KEY,
  launch_id TEXT NOT NULL,
  deposit_address TEXT NOT NULL,
  claim_amount INTEGER NOT NULL,
  claim_amount_formatted TEXT NOT NULL,
  token_symbol TEXT NOT NULL,
  created_at TEXT NOT NULL,
  status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS proof_refs_launch_idx ON proof_refs(launch_id);
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn status_to_str(status: ProofRefStatus) -> &'static str {
    match status {
        ProofRefStatus::Unclaimed => "unclaimed",
        ProofRefStatus::Claimed => "claimed",
    }
}

fn status_from_str(s: &str, col: usize) -> rusqlite::Result<ProofRefStatus> {
    match s {
        "unclaimed" => Ok(ProofRefStatus::Unclaimed),
        "claimed" => Ok(ProofRefStatus::Claimed),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unknown proof ref status: {other}").into(),
        )),
    }
}
