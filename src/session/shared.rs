//! Session state shared between the controller and its tasks
//!
//! Every mutation of the state machine, the playback cursor and the
//! in-flight tool set happens under one lock. A generation counter tags each
//! session so work belonging to a stopped session can tell it is stale.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

use super::state::{SessionState, SessionStateMachine, Transition, Trigger};
use crate::audio::{AudioOutput, PlaybackScheduler};
use crate::devices::DeviceGuard;
use crate::events::{Notifier, SessionEvent};
use crate::transport::Transport;

/// Resources owned by a running session
///
/// Dropping it tears the session down: tasks are aborted, the transport is
/// closed, queued audio is discarded and every device guard is released.
pub(crate) struct ActiveSession {
    pub(crate) transport: Transport,
    pub(crate) output: Option<Arc<dyn AudioOutput>>,
    pub(crate) devices: Vec<DeviceGuard>,
    pub(crate) tasks: Vec<JoinHandle<()>>,
}

impl ActiveSession {
    pub(crate) const fn new(transport: Transport) -> Self {
        Self {
            transport,
            output: None,
            devices: Vec::new(),
            tasks: Vec::new(),
        }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.transport.close();
        if let Some(output) = self.output.take() {
            output.clear();
        }
        // Release in reverse acquisition order: camera, microphone, speaker
        while let Some(guard) = self.devices.pop() {
            drop(guard);
        }
    }
}

/// Everything guarded by the session lock
pub(crate) struct SessionCore {
    pub(crate) machine: SessionStateMachine,
    pub(crate) scheduler: PlaybackScheduler,
    /// In-flight tool invocations, correlation id to capability name
    pub(crate) in_flight: HashMap<String, String>,
    pub(crate) generation: u64,
    pub(crate) active: Option<ActiveSession>,
    notifier: Notifier,
}

impl SessionCore {
    /// Apply a trigger and announce the visible change, if any
    pub(crate) fn fire(&mut self, trigger: Trigger) -> Option<Transition> {
        let transition = self.machine.fire(trigger)?;
        tracing::info!(
            from = %transition.from,
            to = %transition.to,
            trigger = ?transition.trigger,
            "session state changed"
        );
        self.notifier.send(SessionEvent::StateChanged {
            from: transition.from,
            to: transition.to,
        });
        Some(transition)
    }

    pub(crate) const fn state(&self) -> SessionState {
        self.machine.state()
    }

    /// Forget per-session bookkeeping and hand back the session resources
    fn teardown(&mut self) -> Option<ActiveSession> {
        self.in_flight.clear();
        self.scheduler.reset();
        self.active.take()
    }
}

/// Lock-protected session core plus the event notifier
pub(crate) struct SessionShared {
    core: Mutex<SessionCore>,
    notifier: Notifier,
}

impl SessionShared {
    pub(crate) fn new(scheduler: PlaybackScheduler, notifier: Notifier) -> Self {
        Self {
            core: Mutex::new(SessionCore {
                machine: SessionStateMachine::new(),
                scheduler,
                in_flight: HashMap::new(),
                generation: 0,
                active: None,
                notifier: notifier.clone(),
            }),
            notifier,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock()
    }

    /// Lock only if `generation` is still the current session
    pub(crate) fn lock_current(&self, generation: u64) -> Option<MutexGuard<'_, SessionCore>> {
        let core = self.core.lock();
        (core.generation == generation).then_some(core)
    }

    pub(crate) const fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Fatal fault in session `generation`: report it, enter `error`, tear down
    pub(crate) fn fail(&self, generation: u64, message: &str) {
        let released = {
            let Some(mut core) = self.lock_current(generation) else {
                tracing::debug!(error = message, "ignoring failure from stale session");
                return;
            };
            if !core.state().is_active() {
                return;
            }
            tracing::error!(error = message, "session failed");
            self.notifier.error(message);
            core.fire(Trigger::Failed);
            core.teardown()
        };
        drop(released);
    }

    /// The transport of session `generation` closed: return to `idle`
    pub(crate) fn close(&self, generation: u64, reason: Option<&str>) {
        let released = {
            let Some(mut core) = self.lock_current(generation) else {
                return;
            };
            if !core.state().is_active() {
                return;
            }
            tracing::info!(reason = reason.unwrap_or(""), "session transport closed");
            core.fire(Trigger::Closed);
            core.teardown()
        };
        drop(released);
    }

    /// Cancel whatever is running; idempotent
    pub(crate) fn stop(&self) {
        let released = {
            let mut core = self.core.lock();
            // Invalidate anything a pending start or running task holds
            core.generation += 1;
            core.fire(Trigger::Stop);
            core.teardown()
        };

        if released.is_some() {
            tracing::info!("session stopped");
        }
        drop(released);
    }
}
