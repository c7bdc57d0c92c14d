//! Appending to and verifying the audit chains.
use std::{fmt::Debug, sync::Arc};

use chrono::SubsecRound;
use log::*;
use spg_common::Secret;

use super::errors::AuditError;
use crate::{
    audit_chain::{canonical_fields, canonical_json, compute_entry_hash, verify_entries, verify_tail, ChainReport},
    db_types::{AuditChain, AuditEntry, AuditRecord, NewAuditEntry},
    traits::{Clock, PaymentStore, StoreTransaction},
};

/// Whether appends are hash chained, and the key the hashes are computed with.
#[derive(Debug, Clone, Default)]
pub struct AuditSettings {
    pub chain_enabled: bool,
    pub secret: Secret<String>,
}

impl AuditSettings {
    pub fn chained<S: Into<Secret<String>>>(secret: S) -> Self {
        Self { chain_enabled: true, secret: secret.into() }
    }

    /// Entries are still written, but without `prev_hash`/`hash` and without touching the chain state.
    pub fn unchained() -> Self {
        Self { chain_enabled: false, secret: Secret::default() }
    }
}

/// Appends `entry` to `chain` as part of the caller's transaction.
///
/// When chaining is on, the chain state row is locked first, so concurrent appenders queue up behind each other and
/// always hash against the latest tail. The lock is released when the caller commits or rolls back.
pub async fn append_entry<T: StoreTransaction>(
    tx: &mut T,
    settings: &AuditSettings,
    clock: &dyn Clock,
    chain: AuditChain,
    entry: NewAuditEntry,
) -> Result<AuditEntry, AuditError> {
    // The hash covers the timestamp at millisecond precision, so that is what gets stored
    let created_at = clock.now().trunc_subsecs(3);
    let mut record = AuditRecord {
        payload: canonical_json(&entry.payload),
        action: entry.action,
        actor: entry.actor,
        subject: entry.subject,
        created_at,
        prev_hash: None,
        hash: None,
    };
    if !settings.chain_enabled {
        return Ok(tx.insert_audit_entry(chain, &record).await?);
    }
    if settings.secret.is_unset() {
        return Err(AuditError::InvalidSecret("Chaining is enabled but no secret is configured".into()));
    }
    let state = tx.lock_chain_state(chain, created_at).await?;
    let canonical = canonical_fields(&record.action, &record.actor, &record.subject, &entry.payload, &created_at);
    let hash = compute_entry_hash(settings.secret.reveal().as_bytes(), state.tail_hash.as_deref(), &canonical)?;
    record.prev_hash = state.tail_hash;
    record.hash = Some(hash.clone());
    let stored = tx.insert_audit_entry(chain, &record).await?;
    tx.update_chain_tail(chain, &hash, created_at).await?;
    trace!("🧾️ Appended entry #{} to the {chain} chain", stored.id);
    Ok(stored)
}

pub struct AuditApi<B> {
    db: B,
    settings: AuditSettings,
    clock: Arc<dyn Clock>,
}

impl<B> Debug for AuditApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuditApi (chained: {})", self.settings.chain_enabled)
    }
}

impl<B> AuditApi<B>
where B: PaymentStore
{
    pub fn new(db: B, settings: AuditSettings, clock: Arc<dyn Clock>) -> Self {
        Self { db, settings, clock }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    /// Appends a single entry in its own transaction.
    pub async fn append(&self, chain: AuditChain, entry: NewAuditEntry) -> Result<AuditEntry, AuditError> {
        let mut tx = self.db.begin().await?;
        let stored = append_entry(&mut tx, &self.settings, self.clock.as_ref(), chain, entry).await?;
        tx.commit().await?;
        Ok(stored)
    }

    pub async fn fetch_entries(&self, chain: AuditChain) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.db.fetch_audit_entries(chain).await?)
    }

    /// Replays the whole chain from its first entry and recomputes every hash.
    ///
    /// Halts with [`AuditError::ChainMismatch`] at the first entry that does not verify, or at `entries.len()` when the
    /// log stops short of the tail recorded in the chain state. Never modifies anything.
    pub async fn verify_chain(&self, chain: AuditChain) -> Result<ChainReport, AuditError> {
        let state = self.db.fetch_chain_state(chain).await?;
        let entries = self.db.fetch_audit_entries(chain).await?;
        info!("🧾️ Verifying {} entries in the {chain} chain", entries.len());
        let recorded_tail = state.as_ref().and_then(|s| s.tail_hash.as_deref());
        let result = verify_entries(chain, &entries, self.settings.secret.reveal().as_bytes())
            .and_then(|report| verify_tail(chain, &entries, recorded_tail).map(|_| report));
        match result {
            Ok(report) => {
                info!(
                    "🧾️ The {chain} chain is intact. {} entries verified, {} unchained.",
                    report.verified, report.unchained
                );
                Ok(report)
            },
            Err(e) => {
                error!("🧾️ {e}");
                Err(e)
            },
        }
    }
}
