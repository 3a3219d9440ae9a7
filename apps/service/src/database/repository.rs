use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use std::time::Duration;
use uuid::Uuid;

use watchpost::{
    ApprovalStore, CheckInterval, Fingerprint, Site, SiteStatus, SiteStore, ValidationRule,
    Verdict,
};

use crate::pool::LibsqlPool;

/// libsql-backed implementation of the engine's persistence ports.
pub struct SqlRepository {
    pool: LibsqlPool,
}

impl SqlRepository {
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    pub async fn insert_site(&self, site: &Site) -> Result<()> {
        let conn = self.pool.get().await?;
        let (mode, content) = rule_to_columns(&site.rule);
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO sites (id, name, url, interval_seconds, mode, content, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                site.id.to_string(),
                site.name.clone(),
                site.url.clone(),
                site.interval.as_secs() as i64,
                mode,
                content,
                now,
                now
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn delete_site(&self, id: Uuid) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute("DELETE FROM sites WHERE id = ?", params![id.to_string()])
            .await?;
        // A deleted site takes its approval with it.
        conn.execute(
            "DELETE FROM certificate_approvals WHERE site_id = ?",
            params![id.to_string()],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SiteStore for SqlRepository {
    async fn load_site(&self, id: Uuid) -> Result<Option<Site>> {
        let conn = self.pool.get().await?;
        let mut rows = conn
            .query(
                "SELECT id, name, url, interval_seconds, mode, content,
                        last_verdict, last_reason, last_checked_at
                 FROM sites WHERE id = ?",
                params![id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(site_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_status(&self, id: Uuid, status: &SiteStatus) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "UPDATE sites
             SET last_verdict = ?, last_reason = ?, last_checked_at = ?, updated_at = ?
             WHERE id = ?",
            params![
                status.verdict.to_string(),
                status.reason.clone(),
                status.checked_at.timestamp(),
                Utc::now().timestamp(),
                id.to_string()
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_sites(&self) -> Result<Vec<Site>> {
        let conn = self.pool.get().await?;
        let mut rows = conn
            .query(
                "SELECT id, name, url, interval_seconds, mode, content,
                        last_verdict, last_reason, last_checked_at
                 FROM sites ORDER BY created_at",
                (),
            )
            .await?;

        let mut sites = Vec::new();
        while let Some(row) = rows.next().await? {
            sites.push(site_from_row(&row)?);
        }
        Ok(sites)
    }
}

#[async_trait]
impl ApprovalStore for SqlRepository {
    async fn get_approval(&self, site_id: Uuid) -> Result<Option<Fingerprint>> {
        let conn = self.pool.get().await?;
        let mut rows = conn
            .query(
                "SELECT fingerprint FROM certificate_approvals WHERE site_id = ?",
                params![site_id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let hex: String = row.get(0)?;
                Ok(Some(Fingerprint::from_hex(hex)))
            }
            None => Ok(None),
        }
    }

    async fn set_approval(&self, site_id: Uuid, fingerprint: &Fingerprint) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO certificate_approvals (site_id, fingerprint, approved_at)
             VALUES (?, ?, ?)
             ON CONFLICT(site_id) DO UPDATE SET fingerprint = excluded.fingerprint,
                                                approved_at = excluded.approved_at",
            params![
                site_id.to_string(),
                fingerprint.as_hex().to_string(),
                Utc::now().timestamp()
            ],
        )
        .await?;
        Ok(())
    }

    async fn clear_approval(&self, site_id: Uuid) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "DELETE FROM certificate_approvals WHERE site_id = ?",
            params![site_id.to_string()],
        )
        .await?;
        Ok(())
    }
}

fn rule_to_columns(rule: &ValidationRule) -> (&'static str, Option<String>) {
    match rule {
        ValidationRule::StatusCode => (rule.kind(), None),
        ValidationRule::TermSearch { term } => (rule.kind(), Some(term.clone())),
        ValidationRule::Script { source } => (rule.kind(), Some(source.clone())),
    }
}

fn rule_from_columns(mode: &str, content: Option<String>) -> Result<ValidationRule> {
    match mode {
        "status_code" => Ok(ValidationRule::StatusCode),
        "term_search" => {
            let term = content.context("term_search site row has no content")?;
            Ok(ValidationRule::term_search(term)?)
        }
        "script" => {
            let source = content.context("script site row has no content")?;
            Ok(ValidationRule::script(source)?)
        }
        other => bail!("unknown validation mode in database: {other}"),
    }
}

fn verdict_from_text(text: &str) -> Result<Verdict> {
    match text {
        "ok" => Ok(Verdict::Ok),
        "failed" => Ok(Verdict::Failed),
        "errored" => Ok(Verdict::Errored),
        other => bail!("unknown verdict in database: {other}"),
    }
}

fn site_from_row(row: &Row) -> Result<Site> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let url: String = row.get(2)?;
    let interval_seconds: i64 = row.get(3)?;
    let mode: String = row.get(4)?;
    let content: Option<String> = row.get(5)?;
    let last_verdict: Option<String> = row.get(6)?;
    let last_reason: Option<String> = row.get(7)?;
    let last_checked_at: Option<i64> = row.get(8)?;

    let last_status = match (last_verdict, last_checked_at) {
        (Some(verdict), Some(checked_at)) => Some(SiteStatus {
            verdict: verdict_from_text(&verdict)?,
            reason: last_reason.unwrap_or_default(),
            checked_at: DateTime::<Utc>::from_timestamp(checked_at, 0)
                .context("last_checked_at out of range")?,
        }),
        _ => None,
    };

    Ok(Site {
        id: Uuid::parse_str(&id).context("malformed site id")?,
        name,
        url,
        // Clamp instead of reject so a row written under older limits
        // still loads.
        interval: CheckInterval::clamped(Duration::from_secs(interval_seconds.max(0) as u64)),
        rule: rule_from_columns(&mode, content)?,
        last_status,
    })
}
