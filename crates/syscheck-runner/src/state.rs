use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Single-instance guard shared by every reconciler run.
///
/// `running` admits at most one pass at a time; `last_run_at` is the
/// watermark that decides which rows count as changed.
#[derive(Debug)]
pub struct ReconcileState {
    running: AtomicBool,
    last_run_at: Mutex<DateTime<Utc>>,
}

impl ReconcileState {
    pub fn new(last_run_at: DateTime<Utc>) -> Self {
        Self {
            running: AtomicBool::new(false),
            last_run_at: Mutex::new(last_run_at),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_run_at(&self) -> DateTime<Utc> {
        *self.last_run_at.lock().expect("reconcile state poisoned")
    }

    pub(crate) fn set_last_run_at(&self, at: DateTime<Utc>) {
        *self.last_run_at.lock().expect("reconcile state poisoned") = at;
    }

    /// Claim the guard. `None` when another pass holds it.
    pub(crate) fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard { state: self })
    }
}

/// Releases the guard on drop, including on early return and unwinding.
pub(crate) struct RunGuard<'a> {
    state: &'a ReconcileState,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
    }
}
