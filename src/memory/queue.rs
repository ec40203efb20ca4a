//! Background job runner for post-turn work

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;

/// Where background jobs run
#[derive(Clone, Debug)]
pub enum BackgroundQueue {
    /// Spawned onto the runtime; tracked so shutdown can wait for them
    Detached(Arc<Mutex<JoinSet<()>>>),
    /// Awaited in place by the submitter
    Inline,
}

impl Default for BackgroundQueue {
    fn default() -> Self {
        Self::detached()
    }
}

impl BackgroundQueue {
    #[must_use]
    pub fn detached() -> Self {
        Self::Detached(Arc::new(Mutex::new(JoinSet::new())))
    }

    /// Run `job` according to the queue mode
    pub async fn submit<F>(&self, name: &'static str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self {
            Self::Detached(set) => {
                let mut set = set.lock().unwrap_or_else(PoisonError::into_inner);
                // Reap finished jobs so the set does not grow without bound
                while let Some(result) = set.try_join_next() {
                    log_join(result);
                }
                set.spawn(job);
                tracing::debug!(job = name, pending = set.len(), "queued background job");
            }
            Self::Inline => {
                tracing::debug!(job = name, "running background job inline");
                job.await;
            }
        }
    }

    /// Wait for every queued job to finish
    pub async fn drain(&self) {
        let Self::Detached(set) = self else {
            return;
        };

        let mut pending = std::mem::take(&mut *set.lock().unwrap_or_else(PoisonError::into_inner));
        while let Some(result) = pending.join_next().await {
            log_join(result);
        }
    }
}

fn log_join(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "background job panicked");
    }
}
