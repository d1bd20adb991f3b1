use crate::model::{ProcessResult, RepositoryDescriptor};
use crate::observer::SyncEvent;
use crate::sync_engine_apply::RepoRunner;
use crate::sync_engine_types::{Interrupted, RepoEvent};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use tracing::error;

/// Processes every repository and returns results in input order.
pub(crate) fn run_work_items(
    runner: &RepoRunner<'_>,
    repos: &[RepositoryDescriptor],
    jobs: usize,
) -> Result<Vec<ProcessResult>, Interrupted> {
    if jobs <= 1 || repos.len() <= 1 {
        return run_work_items_serial(runner, repos);
    }
    run_work_items_parallel(runner, repos, jobs)
}

fn run_work_items_serial(
    runner: &RepoRunner<'_>,
    repos: &[RepositoryDescriptor],
) -> Result<Vec<ProcessResult>, Interrupted> {
    let mut results = Vec::with_capacity(repos.len());
    for (index, repo) in repos.iter().enumerate() {
        if runner.cancel.is_cancelled() {
            return Err(Interrupted);
        }
        let result = process_isolated(runner, index, repo)?;
        runner.observer.on_event(&SyncEvent::RepoFinished {
            index,
            result: &result,
        });
        results.push(result);
    }
    Ok(results)
}

fn run_work_items_parallel(
    runner: &RepoRunner<'_>,
    repos: &[RepositoryDescriptor],
    jobs: usize,
) -> Result<Vec<ProcessResult>, Interrupted> {
    let jobs = jobs.min(repos.len());
    let cursor = AtomicUsize::new(0);
    let mut slots: Vec<Option<ProcessResult>> = (0..repos.len()).map(|_| None).collect();
    let mut interrupted = false;

    std::thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<RepoEvent>();
        for _ in 0..jobs {
            let tx = tx.clone();
            let cursor = &cursor;
            scope.spawn(move || {
                while !runner.cancel.is_cancelled() {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(repo) = repos.get(index) else {
                        break;
                    };
                    let event = match process_isolated(runner, index, repo) {
                        Ok(result) => RepoEvent::Finished { index, result },
                        Err(Interrupted) => {
                            runner.cancel.cancel();
                            RepoEvent::Interrupted
                        }
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        for event in rx {
            match event {
                RepoEvent::Finished { index, result } => {
                    runner.observer.on_event(&SyncEvent::RepoFinished {
                        index,
                        result: &result,
                    });
                    slots[index] = Some(result);
                }
                RepoEvent::Interrupted => interrupted = true,
            }
        }
    });

    if interrupted {
        return Err(Interrupted);
    }
    // Items never picked up because the token fired mid-run.
    slots.into_iter().collect::<Option<Vec<_>>>().ok_or(Interrupted)
}

/// Runs one repository, turning a panic into a failed result for that
/// repository only.
fn process_isolated(
    runner: &RepoRunner<'_>,
    index: usize,
    repo: &RepositoryDescriptor,
) -> Result<ProcessResult, Interrupted> {
    match panic::catch_unwind(AssertUnwindSafe(|| runner.process(index, repo))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!(repo = %repo.name, reason = %reason, "repository processing panicked");
            Ok(ProcessResult::failed(&repo.name, "internal error", reason))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
