/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::{rngs::OsRng, RngCore};
use rusqlite::{params, Connection};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Notify;
use tracing::debug;
use vidfed_protocol::Activity;

use crate::forward::{DeliveryLayer, Recipient};

/// Durable hand-off point between the pipeline and the outbound sender.
///
/// One job per distinct inbox. The sender drains `pending()` and acknowledges with
/// `mark_sent()`; signing and HTTP delivery happen on the other side.
#[derive(Clone)]
pub struct ForwardQueue {
    db_path: PathBuf,
    notify: Arc<Notify>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardJob {
    pub id: String,
    pub created_at_ms: i64,
    pub target_inbox: String,
    pub activity_id: Option<String>,
    pub activity_json: Vec<u8>,
}

impl ForwardQueue {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        init_db(&db_path)?;
        Ok(Self {
            db_path,
            notify: Arc::new(Notify::new()),
        })
    }

    pub async fn enqueue(&self, activity_json: Vec<u8>, inboxes: Vec<String>) -> Result<u64> {
        let created_at = now_ms();
        let activity_id = activity_id_from_bytes(&activity_json);
        let inserted = tokio::task::spawn_blocking({
            let db_path = self.db_path.clone();
            move || -> Result<u64> {
                let mut conn = Connection::open(db_path)?;
                let tx = conn.transaction()?;
                let mut inserted = 0u64;
                for inbox in inboxes {
                    inserted += tx.execute(
                        r#"
                        INSERT INTO forward_jobs(id, created_at_ms, status, target_inbox, activity_id, activity_json)
                        VALUES (?1, ?2, 0, ?3, ?4, ?5)
                        "#,
                        params![new_job_id(), created_at, inbox, activity_id, activity_json],
                    )? as u64;
                }
                tx.commit()?;
                Ok(inserted)
            }
        })
        .await??;

        self.notify.notify_one();
        Ok(inserted)
    }

    /// Resolves once new jobs may be available.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub async fn pending(&self, limit: u32) -> Result<Vec<ForwardJob>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ForwardJob>> {
            let conn = Connection::open(db_path)?;
            let mut stmt = conn.prepare(
                r#"
                SELECT id, created_at_ms, target_inbox, activity_id, activity_json
                FROM forward_jobs
                WHERE status = 0
                ORDER BY created_at_ms ASC
                LIMIT ?1
                "#,
            )?;
            let rows = stmt
                .query_map(params![limit.clamp(1, 1000) as i64], |r| {
                    Ok(ForwardJob {
                        id: r.get(0)?,
                        created_at_ms: r.get(1)?,
                        target_inbox: r.get(2)?,
                        activity_id: r.get(3)?,
                        activity_json: r.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await?
    }

    pub async fn mark_sent(&self, job_id: &str) -> Result<()> {
        let db_path = self.db_path.clone();
        let job_id = job_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Connection::open(db_path)?;
            conn.execute("UPDATE forward_jobs SET status = 1 WHERE id = ?1", params![job_id])?;
            Ok(())
        })
        .await?
    }
}

#[async_trait]
impl DeliveryLayer for ForwardQueue {
    async fn forward(&self, activity: &Activity, recipients: &[Recipient]) -> Result<()> {
        let mut seen = HashSet::new();
        let inboxes: Vec<String> = recipients
            .iter()
            .map(|r| r.inbox_url.clone())
            .filter(|inbox| seen.insert(inbox.clone()))
            .collect();
        let bytes = serde_json::to_vec(activity.received()).context("serialize activity")?;
        let queued = self.enqueue(bytes, inboxes).await?;
        debug!(activity = activity.display_id(), queued, "forward jobs queued");
        Ok(())
    }
}

fn init_db(path: &Path) -> Result<()> {
    let conn = Connection::open(path).with_context(|| format!("open db: {}", path.display()))?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS forward_jobs (
          id TEXT PRIMARY KEY,
          created_at_ms INTEGER NOT NULL,
          status INTEGER NOT NULL,
          target_inbox TEXT NOT NULL,
          activity_id TEXT NULL,
          activity_json BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_forward_pending ON forward_jobs(status, created_at_ms);
        "#,
    )?;
    Ok(())
}

fn new_job_id() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}

fn activity_id_from_bytes(bytes: &[u8]) -> Option<String> {
    if let Ok(v) = serde_json::from_slice::<serde_json::Value>(bytes) {
        if let Some(id) = v.get("id").and_then(|v| v.as_str()) {
            let id = id.trim();
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    if bytes.is_empty() {
        return None;
    }
    use sha2::Digest as _;
    let mut h = sha2::Sha256::new();
    h.update(bytes);
    Some(format!("urn:vidfed:activity:sha256:{}", hex::encode(h.finalize())))
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
