//! Run-level bookkeeping for the dispatcher: commands, stop and failure
//! flags, completion, and the worker concurrency limit.

use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::command::{Command, CommandReceiver};
use crate::core::config::EngineConfig;
use crate::domain::execution::Segment;
use crate::domain::model::Selector;
use crate::error::WorkflowError;

/// A variable write requested through [`Command::UpdateVariables`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariableUpdate {
    pub selector: Selector,
    pub value: Segment,
}

#[derive(Debug, Clone)]
struct WorkerScaling {
    /// Current limit; 0 means unlimited.
    limit: usize,
    min: usize,
    max: usize,
    threshold: usize,
}

impl WorkerScaling {
    fn new(config: &EngineConfig) -> Self {
        let max = if config.parallel_enabled {
            config.max_concurrency
        } else {
            1
        };
        let min = if max == 0 {
            0
        } else {
            config.min_workers.clamp(1, max)
        };
        Self {
            limit: min,
            min,
            max,
            threshold: config.scale_up_threshold,
        }
    }
}

pub struct ExecutionCoordinator {
    commands: Option<CommandReceiver>,
    cancel_token: CancellationToken,
    aborted: bool,
    abort_reason: Option<String>,
    pause_requested: bool,
    failure: Option<WorkflowError>,
    scaling: WorkerScaling,
    completed: bool,
}

impl ExecutionCoordinator {
    pub fn new(
        config: &EngineConfig,
        cancel_token: CancellationToken,
        commands: Option<CommandReceiver>,
    ) -> Self {
        Self {
            commands,
            cancel_token,
            aborted: false,
            abort_reason: None,
            pause_requested: false,
            failure: None,
            scaling: WorkerScaling::new(config),
            completed: false,
        }
    }

    /// Drain pending commands.
    ///
    /// Stop commands only flip flags (repeated calls are no-ops); variable
    /// updates are returned for the dispatcher to apply to the pool.
    pub fn check_commands(&mut self) -> Vec<VariableUpdate> {
        let mut updates = Vec::new();
        loop {
            let command = match self.commands.as_mut() {
                Some(rx) => match rx.try_recv() {
                    Ok(command) => command,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.commands = None;
                        break;
                    }
                },
                None => break,
            };
            match command {
                Command::Abort { reason } => self.abort(reason),
                Command::Pause => {
                    if !self.pause_requested && !self.aborted {
                        info!("pause requested, scheduling stopped");
                        self.pause_requested = true;
                    }
                }
                Command::UpdateVariables { variables } => {
                    for (key, value) in variables {
                        match Selector::parse_str(&key) {
                            Some(selector) => updates.push(VariableUpdate {
                                selector,
                                value: Segment::from_value(&value),
                            }),
                            None => warn!(key = %key, "ignoring variable update with invalid selector"),
                        }
                    }
                }
            }
        }
        updates
    }

    pub fn abort(&mut self, reason: Option<String>) {
        if self.aborted {
            return;
        }
        info!(reason = ?reason, "abort requested");
        self.aborted = true;
        self.abort_reason = reason;
        self.cancel_token.cancel();
    }

    /// Record a run failure; the first one wins.
    pub fn record_failure(&mut self, error: WorkflowError) {
        if self.failure.is_none() {
            warn!(error = %error, "run failed, draining in-flight nodes");
            self.failure = Some(error);
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn take_failure(&mut self) -> Option<WorkflowError> {
        self.failure.take()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause_requested
    }

    /// Whether new nodes may be started.
    pub fn should_schedule(&self) -> bool {
        !self.aborted && !self.pause_requested && self.failure.is_none() && !self.completed
    }

    pub fn has_capacity(&self, in_flight: usize) -> bool {
        self.scaling.limit == 0 || in_flight < self.scaling.limit
    }

    /// `None` when unlimited.
    pub fn concurrency_limit(&self) -> Option<usize> {
        match self.scaling.limit {
            0 => None,
            n => Some(n),
        }
    }

    /// Grow the worker limit under backlog, shrink it back when idle.
    pub fn check_scaling(&mut self, backlog: usize, in_flight: usize) {
        let s = &mut self.scaling;
        if s.max == 0 {
            return;
        }
        if backlog > s.threshold && s.limit < s.max {
            s.limit += 1;
            debug!(limit = s.limit, backlog, "scaled workers up");
        } else if backlog == 0 && in_flight < s.limit && s.limit > s.min {
            s.limit -= 1;
            debug!(limit = s.limit, "scaled workers down");
        }
    }

    /// Nothing in flight, and nothing more will be scheduled.
    pub fn is_execution_complete(&self, ready: usize, in_flight: usize) -> bool {
        in_flight == 0 && (ready == 0 || !self.should_schedule())
    }

    pub fn mark_complete(&mut self) {
        self.completed = true;
    }
}
