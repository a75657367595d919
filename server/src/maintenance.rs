//! Periodic cache eviction.
//!
//! Every pass runs inside a single database transaction and applies
//! the configured policies in a fixed order: max age, max unused,
//! max per-package size, max total size. Each policy sees the marks
//! of the previous ones. The size policies walk candidates least
//! recently used first and stop once the removed total first exceeds
//! the overflow, so a pass may leave up to one cache of overshoot in
//! place. Archives are unlinked only after the transaction commits;
//! a dry run rolls back and touches nothing.

use std::time::Duration;

use chrono::Utc;
use sea_orm::{DatabaseTransaction, TransactionTrait};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::archive::Sha;
use crate::database;
use crate::database::entity::cache::CacheModel;
use crate::error::{ServerError, ServerResult};
use crate::State;

/// Time between maintenance passes.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Runs maintenance periodically until cancelled.
pub async fn run_maintenance(state: State, shutdown: CancellationToken) {
    let policies = &state.config.maintenance;
    if policies.max_age.is_none()
        && policies.max_unused.is_none()
        && policies.max_package_size.is_none()
        && policies.max_total_size.is_none()
    {
        tracing::debug!("No maintenance policies configured");
        return;
    }

    loop {
        // A failing pass is retried next tick.
        if let Err(e) = run_maintenance_once(&state).await {
            tracing::warn!("Maintenance pass failed: {}", e);
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = time::sleep(MAINTENANCE_INTERVAL) => {}
        }
    }
}

/// Runs one maintenance pass.
#[instrument(skip_all)]
pub async fn run_maintenance_once(state: &State) -> ServerResult<()> {
    let policies = &state.config.maintenance;
    let db = state.database().await?;
    let now = Utc::now();

    let txn = db.begin().await.map_err(ServerError::database_error)?;
    let mut to_delete: Vec<Sha> = Vec::new();

    if let Some(max_age) = policies.max_age {
        let cutoff = now - chrono::Duration::seconds(max_age.as_secs() as i64);
        for cache in database::caches_created_before(&txn, cutoff).await? {
            tracing::debug!("max_age: marking {}", cache.sha);
            mark(&txn, &mut to_delete, &cache).await?;
        }
    }

    if let Some(max_unused) = policies.max_unused {
        let cutoff = now - chrono::Duration::seconds(max_unused.as_secs() as i64);
        for cache in database::caches_unused_since(&txn, cutoff).await? {
            tracing::debug!("max_unused: marking {}", cache.sha);
            mark(&txn, &mut to_delete, &cache).await?;
        }
    }

    if let Some(ceiling) = policies.max_package_size {
        for pkg in database::package_totals(&txn, ceiling).await? {
            let overflow = (pkg.total.max(0) as u64) - ceiling;
            let mut removed = 0u64;
            for cache in database::eviction_candidates(&txn, Some(pkg.package_id)).await? {
                tracing::debug!("max_package_size: marking {} of {}", cache.sha, pkg.name);
                mark(&txn, &mut to_delete, &cache).await?;
                removed += cache.size.max(0) as u64;
                if removed > overflow {
                    break;
                }
            }
        }
    }

    if let Some(ceiling) = policies.max_total_size {
        let total = database::total_size(&txn, None).await?;
        if total > ceiling {
            let overflow = total - ceiling;
            let mut removed = 0u64;
            for cache in database::eviction_candidates(&txn, None).await? {
                tracing::debug!("max_total_size: marking {}", cache.sha);
                mark(&txn, &mut to_delete, &cache).await?;
                removed += cache.size.max(0) as u64;
                if removed > overflow {
                    break;
                }
            }
        }
    }

    if policies.dry_run {
        tracing::info!("Dry run, would evict {} caches", to_delete.len());
        txn.rollback().await.map_err(ServerError::database_error)?;
        return Ok(());
    }

    txn.commit().await.map_err(ServerError::database_error)?;

    for sha in &to_delete {
        state.store.remove(sha).await;
    }
    if !to_delete.is_empty() {
        tracing::info!("Evicted {} caches", to_delete.len());
    }
    Ok(())
}

async fn mark(
    txn: &DatabaseTransaction,
    to_delete: &mut Vec<Sha>,
    cache: &CacheModel,
) -> ServerResult<()> {
    database::mark_deleted(txn, cache.id).await?;
    if let Some(sha) = Sha::new(&cache.sha) {
        to_delete.push(sha);
    }
    Ok(())
}
