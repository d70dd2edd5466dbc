//! Replaces the "global state" anti-pattern (spec.md 9): one `Session` is
//! built once at CLI entry and threaded by reference through every
//! component instead of a process-wide logger/client/signal-handler trio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shipfile_definitions::resolver::ResolverRegistry;

use crate::cleanup::Registry;

/// Global (but explicit, passed-by-reference) flags that affect command
/// shaping and execution across every release (spec.md 6).
#[derive(Clone, Debug, Default)]
pub struct GlobalFlags {
    pub environment: String,
    pub namespace: Option<String>,
    pub kube_context: Option<String>,
    pub helm_binary: Option<String>,
    pub concurrency: usize,
    pub extra_args: Vec<String>,
    pub extra_values: Vec<String>,
    pub auto_approve: bool,
    pub allow_no_matching_release: bool,
    pub interactive: bool,
}

/// One reconciliation session: shared resolver, shared cleanup registry,
/// and the cancellation flag flipped by the `SIGINT`/`SIGTERM` handler
/// installed once in `main` (spec.md 5, "cancellation and timeouts").
///
/// Cloning a `Session` is cheap and shares state — nested dispatch (spec.md
/// 4.10) clones this into child engines rather than rebuilding it, since
/// children "share the parent's resolver and executor" by reference.
#[derive(Clone)]
pub struct Session {
    pub flags: GlobalFlags,
    pub resolver: Arc<ResolverRegistry>,
    pub cleanup: Arc<Registry>,
    cancelled: Arc<AtomicBool>,
}

impl Session {
    pub fn new(flags: GlobalFlags, resolver: ResolverRegistry) -> Session {
        Session {
            flags,
            resolver: Arc::new(resolver),
            cleanup: Arc::new(Registry::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install the `SIGINT`/`SIGTERM` handler once, at CLI entry. After
    /// this fires, `is_cancelled()` returns true and no new external
    /// commands should start; in-flight ones are allowed to finish.
    pub fn install_signal_handler(&self) -> crate::Result<()> {
        let flag = self.cancelled.clone();
        let cleanup = self.cleanup.clone();
        ctrlc::set_handler(move || {
            warn!("received interrupt, no new releases will start");
            flag.store(true, Ordering::SeqCst);
            cleanup.remove_all();
        }).map_err(|e| format_err!("failed to install signal handler: {}", e))?;
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_not_cancelled() {
        let s = Session::new(GlobalFlags::default(), ResolverRegistry::new());
        assert!(!s.is_cancelled());
    }

    #[test]
    fn cancel_flips_the_flag() {
        let s = Session::new(GlobalFlags::default(), ResolverRegistry::new());
        s.cancel();
        assert!(s.is_cancelled());
    }

    #[test]
    fn clone_shares_cancellation_state() {
        let s = Session::new(GlobalFlags::default(), ResolverRegistry::new());
        let s2 = s.clone();
        s.cancel();
        assert!(s2.is_cancelled());
    }
}
