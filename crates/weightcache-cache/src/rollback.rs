//! Best-effort compensating deletes for partially written saves
//!
//! Rollback never fails: every delete is attempted independently and
//! failures are logged and reported, so the error that triggered the
//! rollback is the one the caller surfaces.

use futures::future::join_all;
use tracing::{debug, warn};
use weightcache_core::Table;
use weightcache_store::StoreConnection;

/// Outcome of a rollback
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    /// Number of deletes attempted
    pub attempted: usize,
    /// Keys whose delete failed, with the failure message
    pub failed: Vec<(String, String)>,
}

impl RollbackReport {
    /// Whether every delete succeeded
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: RollbackReport) {
        self.attempted += other.attempted;
        self.failed.extend(other.failed);
    }
}

/// Delete every key in `keys` from `table`, concurrently
pub async fn delete_all(
    conn: &dyn StoreConnection,
    table: Table,
    keys: &[String],
) -> RollbackReport {
    let results = join_all(keys.iter().map(|key| conn.delete(table, key))).await;

    let mut report = RollbackReport {
        attempted: keys.len(),
        failed: Vec::new(),
    };
    for (key, result) in keys.iter().zip(results) {
        if let Err(e) = result {
            warn!(%table, key = %key, error = %e, "Rollback delete failed");
            report.failed.push((key.clone(), e.to_string()));
        }
    }

    debug!(
        %table,
        attempted = report.attempted,
        failed = report.failed.len(),
        "Rolled back records"
    );
    report
}

/// Delete a single key from `table`
pub async fn delete_one(conn: &dyn StoreConnection, table: Table, key: &str) -> RollbackReport {
    delete_all(conn, table, &[key.to_string()]).await
}
