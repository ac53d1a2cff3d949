//! Background export jobs addressed by uid.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use uuid::Uuid;

use super::{ExportMode, ExportReport};

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Running,
    Completed(ExportReport),
}

/// Returned by [`JobRegistry::submit`] before the job has done any work.
#[derive(Debug)]
pub struct JobHandle {
    pub uid: Uuid,
    thread: JoinHandle<()>,
}

impl JobHandle {
    /// The worker thread has exited; its report, if any, is stored.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the worker thread has stored its report.
    pub fn wait(self) {
        if self.thread.join().is_err() {
            tracing::error!("Export job {} panicked", self.uid);
        }
    }
}

/// Each uid has a single writer: the worker thread that runs it.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, JobStatus>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<Uuid, JobStatus>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `work` on a background thread and return immediately. A
    /// panicking job completes with a failed report for `mode`.
    pub fn submit<F>(&self, mode: ExportMode, work: F) -> JobHandle
    where
        F: FnOnce(Uuid) -> ExportReport + Send + 'static,
    {
        let uid = Uuid::new_v4();
        self.jobs().insert(uid, JobStatus::Running);
        let registry = self.clone();
        let thread = thread::spawn(move || {
            let report = match panic::catch_unwind(AssertUnwindSafe(|| work(uid))) {
                Ok(report) => report,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!("Export job {} panicked: {}", uid, message);
                    ExportReport::failed(uid, mode, format!("export job panicked: {}", message))
                }
            };
            tracing::debug!("Export job {} finished (success: {})", uid, report.success);
            registry.jobs().insert(uid, JobStatus::Completed(report));
        });
        tracing::info!("Submitted export job {}", uid);
        JobHandle { uid, thread }
    }

    /// `None` for unknown uids.
    pub fn poll(&self, uid: &Uuid) -> Option<JobStatus> {
        self.jobs().get(uid).cloned()
    }

    /// Remove and return the report of a completed job. Running and
    /// unknown jobs give `None` and stay as they are.
    pub fn take(&self, uid: &Uuid) -> Option<ExportReport> {
        let mut jobs = self.jobs();
        match jobs.remove(uid)? {
            JobStatus::Completed(report) => Some(report),
            running => {
                jobs.insert(*uid, running);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
