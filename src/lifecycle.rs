//! Worker lifecycle hosting.
//!
//! A [`ServiceWorker`] only implements the three event handlers. The
//! [`WorkerHost`] owns the lifecycle: it installs a newly registered worker,
//! decides when it activates, and routes requests to whichever worker is
//! active.
//!
//! ```text
//! Installing -> Installed (waiting) -> Activating -> Activated -> Redundant
//!      \________________ install failed ______________________/
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::stats::StatsSnapshot;

/// Lifecycle state of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Installing,
    /// Installed and waiting for the current worker to be released.
    Installed,
    Activating,
    Activated,
    /// Failed to install, or superseded by a newer worker.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

/// Event handlers the host invokes.
#[async_trait]
pub trait ServiceWorker: Send + Sync {
    /// Label identifying this worker's version.
    fn version(&self) -> &str;

    /// Prepares the worker. A failure makes the worker redundant.
    async fn on_install(&self) -> Result<()>;

    /// Runs once when the worker takes over.
    async fn on_activate(&self) -> Result<()>;

    /// Answers an intercepted request.
    async fn on_fetch(&self, request: &Request) -> Result<Response>;

    /// Whether to activate as soon as installed instead of waiting for the
    /// current worker to be released.
    fn skip_waiting(&self) -> bool {
        false
    }

    /// Counters exposed on the status endpoint.
    fn stats(&self) -> Option<StatsSnapshot> {
        None
    }
}

struct Slots<W> {
    active: Option<Arc<W>>,
    waiting: Option<Arc<W>>,
    state: Option<WorkerState>,
}

/// Owns registered workers and dispatches requests to the active one.
pub struct WorkerHost<W> {
    slots: Mutex<Slots<W>>,
}

impl<W> Default for WorkerHost<W> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Slots {
                active: None,
                waiting: None,
                state: None,
            }),
        }
    }
}

impl<W: ServiceWorker> WorkerHost<W> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> Result<MutexGuard<'_, Slots<W>>> {
        self.slots
            .lock()
            .map_err(|_| Error::Storage("worker host lock poisoned".to_string()))
    }

    fn set_state(&self, state: WorkerState) -> Result<()> {
        self.slots()?.state = Some(state);
        Ok(())
    }

    /// Installs `worker` and, if allowed, activates it.
    ///
    /// Returns the worker's resulting state: [`WorkerState::Activated`] or
    /// [`WorkerState::Installed`] when it has to wait.
    ///
    /// # Errors
    ///
    /// Returns the install error; the worker is discarded and the current
    /// worker, if any, keeps serving.
    pub async fn register(&self, worker: W) -> Result<WorkerState> {
        let worker = Arc::new(worker);
        log::info!("Installing worker {}", worker.version());
        self.set_state(WorkerState::Installing)?;

        if let Err(e) = worker.on_install().await {
            log::error!("Worker {} failed to install: {e}", worker.version());
            self.set_state(WorkerState::Redundant)?;
            return Err(e);
        }

        let activate_now = {
            let mut slots = self.slots()?;
            if slots.active.is_none() || worker.skip_waiting() {
                // Anything still waiting is older than this worker.
                if let Some(stale) = slots.waiting.take() {
                    log::info!("Waiting worker {} is now redundant", stale.version());
                }
                true
            } else {
                if let Some(previous) = slots.waiting.replace(Arc::clone(&worker)) {
                    log::info!("Worker {} replaced by newer waiting worker", previous.version());
                }
                slots.state = Some(WorkerState::Installed);
                false
            }
        };

        if activate_now {
            self.activate(worker).await?;
            Ok(WorkerState::Activated)
        } else {
            log::info!("Worker {} installed, waiting", worker.version());
            Ok(WorkerState::Installed)
        }
    }

    /// Activates the waiting worker, if any. Returns true if one was activated.
    ///
    /// # Errors
    ///
    /// Returns an error only if the host's internal state is unusable.
    pub async fn activate_waiting(&self) -> Result<bool> {
        let waiting = self.slots()?.waiting.take();
        match waiting {
            Some(worker) => {
                self.activate(worker).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn activate(&self, worker: Arc<W>) -> Result<()> {
        self.set_state(WorkerState::Activating)?;
        log::info!("Activating worker {}", worker.version());
        if let Err(e) = worker.on_activate().await {
            log::warn!("Worker {} activate handler failed: {e}", worker.version());
        }

        let mut slots = self.slots()?;
        if let Some(previous) = slots.active.replace(Arc::clone(&worker)) {
            log::info!("Worker {} is now redundant", previous.version());
        }
        slots.state = Some(WorkerState::Activated);
        log::info!("Worker {} active", worker.version());
        Ok(())
    }

    /// Hands `request` to the active worker.
    ///
    /// The worker is resolved when the call starts; a request keeps running
    /// against it even if a newer worker activates meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveWorker`] when nothing is active, otherwise the
    /// worker's own error.
    pub async fn dispatch(&self, request: &Request) -> Result<Response> {
        let worker = self.active().ok_or(Error::NoActiveWorker)?;
        worker.on_fetch(request).await
    }

    /// The active worker, if any.
    #[must_use]
    pub fn active(&self) -> Option<Arc<W>> {
        self.slots().ok()?.active.clone()
    }

    /// Version label of the active worker.
    #[must_use]
    pub fn active_version(&self) -> Option<String> {
        self.active().map(|w| w.version().to_string())
    }

    /// Version label of the worker waiting to activate.
    #[must_use]
    pub fn waiting_version(&self) -> Option<String> {
        self.slots()
            .ok()?
            .waiting
            .as_ref()
            .map(|w| w.version().to_string())
    }

    /// State of the most recently registered worker. A worker that failed to
    /// install reports [`WorkerState::Redundant`] even though the previous
    /// worker keeps serving.
    #[must_use]
    pub fn state(&self) -> Option<WorkerState> {
        self.slots().ok()?.state
    }
}
