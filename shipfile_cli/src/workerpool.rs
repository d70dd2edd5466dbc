//! Worker Pool (spec.md 4.5): bounded concurrency within one wave, built on
//! the teacher's declared `threadpool` dependency. Per-release errors are
//! isolated and collected; the wave runs to completion before the
//! aggregate is inspected.

use std::sync::mpsc;

use threadpool::ThreadPool;

use shipfile_definitions::Release;

use crate::Result;

/// One release's outcome from a wave, paired with the release so the
/// caller can report which release failed without re-matching by index.
pub struct ReleaseOutcome<'a> {
    pub release: &'a Release,
    pub result: Result<()>,
}

/// Run `op` for every release in `wave`, bounded by `concurrency`
/// (`0` means unbounded within the wave, per spec.md 4.5). Blocks until
/// every release in the wave has completed, then returns all outcomes —
/// never short-circuits on the first error, so a wave surfaces every
/// release's error before the caller decides whether to abort subsequent
/// waves (spec.md 4.5, 7 "wave-scoped error aborts subsequent waves").
///
/// `threadpool::ThreadPool::execute` requires its jobs to be `'static`, so
/// each release is cloned onto the heap before it is moved into its job —
/// `wave`'s borrows never cross into a worker thread, only owned data does.
pub fn run_wave<'a, F>(wave: &[&'a Release], concurrency: usize, op: F) -> Vec<ReleaseOutcome<'a>>
where
    F: Fn(&Release) -> Result<()> + Send + Sync + 'static,
{
    if wave.is_empty() {
        return Vec::new();
    }

    let workers = if concurrency == 0 { wave.len() } else { concurrency.min(wave.len()) };
    let pool = ThreadPool::new(workers.max(1));
    let op = std::sync::Arc::new(op);
    let (tx, rx) = mpsc::channel();

    for (i, release) in wave.iter().enumerate() {
        let tx = tx.clone();
        let op = op.clone();
        let owned = (*release).clone();
        pool.execute(move || {
            let result = op(&owned);
            // Send back the index so ordering can be restored after the
            // channel reorders completions by wall-clock finish time.
            let _ = tx.send((i, result));
        });
    }
    drop(tx);
    pool.join();

    let mut results: Vec<Option<Result<()>>> = (0..wave.len()).map(|_| None).collect();
    for (i, result) in rx {
        results[i] = Some(result);
    }

    wave.iter().zip(results.into_iter()).map(|(release, result)| {
        ReleaseOutcome { release, result: result.expect("every dispatched release reports exactly once") }
    }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn release(name: &str) -> Release {
        Release { name: name.into(), ..Default::default() }
    }

    #[test]
    fn all_releases_in_a_wave_are_visited() {
        let a = release("a");
        let b = release("b");
        let c = release("c");
        let wave: Vec<&Release> = vec![&a, &b, &c];
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let outcomes = run_wave(&wave, 0, move |_r| {
            seen2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(outcomes.len(), 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn one_release_failing_does_not_stop_siblings() {
        let a = release("a");
        let b = release("fails");
        let c = release("c");
        let wave: Vec<&Release> = vec![&a, &b, &c];
        let outcomes = run_wave(&wave, 0, |r| {
            if r.name == "fails" { bail!("boom") } else { Ok(()) }
        });
        assert_eq!(outcomes.len(), 3);
        let failed: Vec<_> = outcomes.iter().filter(|o| o.result.is_err()).map(|o| o.release.name.as_str()).collect();
        assert_eq!(failed, vec!["fails"]);
    }

    #[test]
    fn concurrency_one_still_completes_every_release() {
        let a = release("a");
        let b = release("b");
        let wave: Vec<&Release> = vec![&a, &b];
        let outcomes = run_wave(&wave, 1, |_r| Ok(()));
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
    }

    #[test]
    fn empty_wave_returns_no_outcomes() {
        let wave: Vec<&Release> = vec![];
        let outcomes = run_wave(&wave, 0, |_r| Ok(()));
        assert!(outcomes.is_empty());
    }
}
