//! Best-effort audit writes.
//!
//! A failed append is reported to the log and swallowed. Callers never see it
//! and the primary operation's outcome never depends on it.

use tracing::error;

use panopticon_core::AuditEntry;

use crate::store::AuditStore;

/// Append `entry`, logging instead of returning any failure.
pub fn record<S: AuditStore + ?Sized>(store: &S, entry: AuditEntry) {
    if let Err(e) = store.append(&entry) {
        error!(
            "Audit write failed for {} by {}: {e}",
            entry.action_type, entry.actor_id
        );
    }
}
