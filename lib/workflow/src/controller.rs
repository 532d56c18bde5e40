//! Run admission, debug pauses and abort signalling.
//!
//! One run is admitted at a time. A second request is rejected with
//! [`EngineError::RunInFlight`] rather than queued. Admission is held by a
//! [`RunGuard`] and released when the guard drops.

use crate::error::EngineError;
use flowloom_core::{NodeId, WorkflowId, WorkflowRunId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The run currently holding admission.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    /// Cancelled by [`RunController::abort`].
    pub abort: CancellationToken,
}

#[derive(Debug)]
struct Pause {
    node_id: NodeId,
    release: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct ControlState {
    active: Option<ActiveRun>,
    pauses: VecDeque<Pause>,
}

/// Execution-wide control state shared by the engine and running steps.
#[derive(Debug, Default)]
pub struct RunController {
    running: AtomicBool,
    debug: AtomicBool,
    // Never held across an await; the guard's Drop needs a sync lock.
    state: Mutex<ControlState>,
}

impl RunController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits a run, or rejects it if another is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RunInFlight`] while another guard is alive.
    pub fn admit(
        self: &Arc<Self>,
        run_id: WorkflowRunId,
        workflow_id: WorkflowId,
    ) -> Result<RunGuard, EngineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(%run_id, "run rejected, another run is in flight");
            return Err(EngineError::RunInFlight);
        }

        let abort = CancellationToken::new();
        self.state().active = Some(ActiveRun {
            run_id,
            workflow_id,
            abort: abort.clone(),
        });
        debug!(%run_id, %workflow_id, "run admitted");
        Ok(RunGuard {
            controller: Arc::clone(self),
            abort,
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn active_run(&self) -> Option<ActiveRun> {
        self.state().active.clone()
    }

    #[must_use]
    pub fn is_debug_mode(&self) -> bool {
        self.debug.load(Ordering::Acquire)
    }

    /// Flips debug mode and returns the new setting.
    ///
    /// Turning debug mode off releases every pending pause.
    pub fn toggle_debug_mode(&self) -> bool {
        let enabled = {
            let mut state = self.state();
            let enabled = !self.debug.fetch_xor(true, Ordering::AcqRel);
            if !enabled {
                release_all(&mut state);
            }
            enabled
        };
        info!(enabled, "debug mode toggled");
        enabled
    }

    /// Sets debug mode explicitly.
    pub fn set_debug_mode(&self, enabled: bool) {
        let mut state = self.state();
        self.debug.store(enabled, Ordering::Release);
        if !enabled {
            release_all(&mut state);
        }
    }

    /// Registers a paused node and returns the receiver it waits on, or
    /// `None` if debug mode is off.
    ///
    /// The flag is checked under the same lock that toggling takes, so a
    /// pause is never registered after debug mode has been turned off.
    /// The receiver errors if the pause is discarded by an abort.
    pub fn pause(&self, node_id: NodeId) -> Option<oneshot::Receiver<()>> {
        let mut state = self.state();
        if !self.is_debug_mode() {
            return None;
        }
        let (release, receiver) = oneshot::channel();
        state.pauses.push_back(Pause { node_id, release });
        debug!(%node_id, "node paused");
        Some(receiver)
    }

    /// Releases the oldest paused node, returning its id.
    pub fn step(&self) -> Option<NodeId> {
        loop {
            let pause = self.state().pauses.pop_front()?;
            // A pause whose step has already stopped is skipped.
            if pause.release.send(()).is_ok() {
                debug!(node_id = %pause.node_id, "stepped");
                return Some(pause.node_id);
            }
        }
    }

    /// Releases every paused node, returning how many were waiting.
    pub fn resume(&self) -> usize {
        release_all(&mut self.state())
    }

    /// The oldest node still waiting for a step.
    #[must_use]
    pub fn paused_node(&self) -> Option<NodeId> {
        self.state().pauses.front().map(|pause| pause.node_id)
    }

    /// Signals the active run to stop and discards all pauses.
    ///
    /// Returns the aborted run, or `None` if nothing was running.
    pub fn abort(&self) -> Option<ActiveRun> {
        let active = {
            let mut state = self.state();
            state.pauses.clear();
            state.active.clone()
        };
        if let Some(run) = &active {
            run.abort.cancel();
            info!(run_id = %run.run_id, "abort requested");
        }
        active
    }
}

fn release_all(state: &mut ControlState) -> usize {
    state
        .pauses
        .drain(..)
        .filter_map(|pause| pause.release.send(()).ok())
        .count()
}

/// Holds run admission; dropping it releases admission.
#[derive(Debug)]
pub struct RunGuard {
    controller: Arc<RunController>,
    abort: CancellationToken,
}

impl RunGuard {
    /// Token cancelled when the run is aborted.
    #[must_use]
    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        {
            let mut state = self.controller.state();
            state.active = None;
            state.pauses.clear();
        }
        self.controller.running.store(false, Ordering::Release);
    }
}
