//utils for graceful shutdown and lock handling that can be used on
//any module in the project
use std::sync::{Mutex, MutexGuard};

use tokio::signal;
use tokio_util::sync::CancellationToken;

pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let tc = token.clone();
    //spawn once to listen for ctrl-c
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => tc.cancel(),
            Err(err) => tracing::error!(%err, "failed to install ctrl+C handler"),
        }
    });
    token
}

/// Locks `m`, recovering the guard if a previous holder panicked.
///
/// Ledger changes are staged and written back in one step, so a holder that
/// panicked mid-way left the balances as they were before its call.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
