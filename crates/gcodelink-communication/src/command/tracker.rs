//! Command lifecycle tracking
//!
//! Every line the controller handles is wrapped in a [`CommandTracker`].
//! Stages move forward only:
//!
//! ```text
//! Staging -> Planning -> Submitted -> Completed | Error
//!    ^          |  \
//!    +----------+   +-> Cancelled
//! Staging -> Submitted            (immediate commands)
//! ```
//!
//! Trackers own a small lock and condition variable so that callers can
//! block in [`CommandTracker::wait`] without touching the controller's lock.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use gcodelink_core::CommandError;
use parking_lot::{Condvar, Mutex};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::machine_info::MachineInfo;

/// Stage of a command's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CommandStage {
    /// Created, not yet planned for sending
    #[default]
    Staging,
    /// In the backlog, waiting for a slot
    Planning,
    /// Sent to the device or running locally
    Submitted,
    /// Acknowledged with `ok` or finished locally
    Completed,
    /// Withdrawn before it was sent
    Cancelled,
    /// Rejected by the device or failed locally
    Error,
}

impl CommandStage {
    /// Whether the stage is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }
}

impl fmt::Display for CommandStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Staging => "staging",
            Self::Planning => "planning",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Where a command came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerInfo {
    /// Owning program, if any
    pub program: Option<String>,
    /// Index of the line within the program's final lines
    pub line_index: Option<usize>,
    /// Unique id of the owning program
    pub program_id: Option<u64>,
}

impl TrackerInfo {
    /// Metadata for line `line_index` of `program`
    pub fn for_program(program: impl Into<String>, line_index: usize) -> Self {
        Self {
            program: Some(program.into()),
            line_index: Some(line_index),
            program_id: None,
        }
    }
}

/// Callback invoked when a tracker completes or is cancelled
pub type TrackerCallback = Arc<dyn Fn(&CommandTracker) + Send + Sync>;

#[derive(Debug, Default)]
struct TrackerState {
    stage: CommandStage,
    submitted_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    elapsed: Duration,
    result: Option<String>,
    error: Option<CommandError>,
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\[([^\]]+)\]").expect("invalid regex pattern"))
}

/// Lifecycle tracker for one command
pub struct CommandTracker {
    command: String,
    info: TrackerInfo,
    runtime_vars: bool,
    callback: Option<TrackerCallback>,
    state: Mutex<TrackerState>,
    changed: Condvar,
}

impl CommandTracker {
    /// Track a bare command
    pub fn new(command: impl Into<String>) -> Self {
        Self::with_info(command, TrackerInfo::default(), None)
    }

    /// Track a command with metadata and an optional callback
    pub fn with_info(
        command: impl Into<String>,
        info: TrackerInfo,
        callback: Option<TrackerCallback>,
    ) -> Self {
        let command = command.into();
        let runtime_vars = placeholder_regex().is_match(&command);
        Self {
            command,
            info,
            runtime_vars,
            callback,
            state: Mutex::new(TrackerState::default()),
            changed: Condvar::new(),
        }
    }

    /// Command text as written, placeholders included
    pub fn raw_command(&self) -> &str {
        &self.command
    }

    /// Source metadata
    pub fn info(&self) -> &TrackerInfo {
        &self.info
    }

    /// Whether the command contains `[name]` placeholders
    pub fn has_runtime_vars(&self) -> bool {
        self.runtime_vars
    }

    /// Whether this is a `%name` pseudo-command
    pub fn is_pseudo(&self) -> bool {
        self.command.starts_with(gcodelink_gcode::PSEUDO_MARKER)
    }

    /// Pseudo-command name without its marker
    pub fn pseudo_name(&self) -> Option<&str> {
        self.command.strip_prefix(gcodelink_gcode::PSEUDO_MARKER)
    }

    /// Whether this is a `G38.x` probing move
    pub fn is_probe(&self) -> bool {
        self.command
            .split_whitespace()
            .any(|word| gcodelink_gcode::Token::new(word).is_probe())
    }

    /// Substitute placeholders with values from `machine`
    ///
    /// Values are written with three decimals. Nothing is substituted unless
    /// every placeholder resolves.
    pub fn resolve_command(&self, machine: &MachineInfo) -> Result<String, CommandError> {
        if !self.runtime_vars {
            return Ok(self.command.clone());
        }

        let mut resolved = String::with_capacity(self.command.len());
        let mut last = 0;
        for caps in placeholder_regex().captures_iter(&self.command) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = machine.get_var(name.as_str().trim())?;
            resolved.push_str(&self.command[last..whole.start()]);
            resolved.push_str(&format!("{:.3}", value));
            last = whole.end();
        }
        resolved.push_str(&self.command[last..]);

        Ok(resolved)
    }

    /// Current stage
    pub fn stage(&self) -> CommandStage {
        self.state.lock().stage
    }

    /// Whether the stage is final
    pub fn is_done(&self) -> bool {
        self.stage().is_terminal()
    }

    /// Response payload recorded on completion
    pub fn result(&self) -> Option<String> {
        self.state.lock().result.clone()
    }

    /// Failure recorded on error
    pub fn error_info(&self) -> Option<CommandError> {
        self.state.lock().error.clone()
    }

    /// Wall-clock time of submission
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().submitted_at
    }

    /// Wall-clock time the tracker reached a final stage
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().finished_at
    }

    /// Time between submission and completion
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    fn transition<F>(
        &self,
        operation: &'static str,
        allowed: &[CommandStage],
        apply: F,
    ) -> Result<(), CommandError>
    where
        F: FnOnce(&mut TrackerState),
    {
        let mut state = self.state.lock();
        if !allowed.contains(&state.stage) {
            return Err(CommandError::InvalidTransition {
                operation,
                stage: state.stage.to_string(),
            });
        }
        apply(&mut state);
        let terminal = state.stage.is_terminal();
        drop(state);

        if terminal {
            self.changed.notify_all();
        }
        Ok(())
    }

    fn finish(state: &mut TrackerState, stage: CommandStage) {
        state.stage = stage;
        state.finished_at = Some(Utc::now());
        if let Some(started) = state.started {
            state.elapsed = started.elapsed();
        }
    }

    fn notify(&self) {
        if let Some(callback) = &self.callback {
            callback(self);
        }
    }

    /// Staging -> Planning
    pub fn plan(&self) -> Result<(), CommandError> {
        self.transition("plan", &[CommandStage::Staging], |s| {
            s.stage = CommandStage::Planning
        })
    }

    /// Planning -> Staging
    pub fn unstage(&self) -> Result<(), CommandError> {
        self.transition("unstage", &[CommandStage::Planning], |s| {
            s.stage = CommandStage::Staging
        })
    }

    /// Planning or Staging -> Submitted; records the start time
    pub fn submit(&self) -> Result<(), CommandError> {
        self.transition(
            "submit",
            &[CommandStage::Planning, CommandStage::Staging],
            |s| {
                s.stage = CommandStage::Submitted;
                s.submitted_at = Some(Utc::now());
                s.started = Some(Instant::now());
            },
        )
    }

    /// Submitted -> Completed; records the result and runs the callback
    pub fn complete(&self, result: Option<String>) -> Result<(), CommandError> {
        self.transition("complete", &[CommandStage::Submitted], |s| {
            Self::finish(s, CommandStage::Completed);
            s.result = result;
        })?;
        self.notify();
        Ok(())
    }

    /// Planning -> Cancelled; runs the callback
    pub fn cancel(&self) -> Result<(), CommandError> {
        self.transition("cancel", &[CommandStage::Planning], |s| {
            Self::finish(s, CommandStage::Cancelled)
        })?;
        self.notify();
        Ok(())
    }

    /// Any non-final stage -> Error
    pub fn error(&self, error: CommandError) -> Result<(), CommandError> {
        self.transition(
            "fail",
            &[
                CommandStage::Staging,
                CommandStage::Planning,
                CommandStage::Submitted,
            ],
            |s| {
                Self::finish(s, CommandStage::Error);
                s.error = Some(error);
            },
        )
    }

    /// Block until the tracker reaches a final stage
    ///
    /// Returns immediately if it already has. With a timeout, gives up with
    /// `CommandError::Timeout` once the bound passes; the tracker itself is
    /// left untouched.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), CommandError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        while !state.stage.is_terminal() {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out()
                        && !state.stage.is_terminal()
                    {
                        return Err(CommandError::Timeout {
                            command: self.command.clone(),
                            timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
                        });
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }

        Ok(())
    }
}

impl fmt::Debug for CommandTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTracker")
            .field("command", &self.command)
            .field("info", &self.info)
            .field("stage", &self.stage())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::grbl::ProbeReport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_complete_from_staging_fails() {
        let tracker = CommandTracker::new("G0 X0");
        assert_eq!(
            tracker.complete(None),
            Err(CommandError::InvalidTransition {
                operation: "complete",
                stage: "staging".to_string()
            })
        );
        assert_eq!(tracker.stage(), CommandStage::Staging);
    }

    #[test]
    fn test_submit_complete_wait() {
        let tracker = CommandTracker::new("G0 X0");
        tracker.submit().unwrap();
        tracker.complete(Some("ok".to_string())).unwrap();
        tracker.wait(Some(Duration::from_millis(1))).unwrap();
        assert_eq!(tracker.stage(), CommandStage::Completed);
        assert_eq!(tracker.result().as_deref(), Some("ok"));
        assert!(tracker.submitted_at().is_some());
        assert!(tracker.finished_at().is_some());
    }

    #[test]
    fn test_cancel_only_from_planning() {
        let tracker = CommandTracker::new("G0 X0");
        tracker.plan().unwrap();
        tracker.submit().unwrap();
        assert!(matches!(
            tracker.cancel(),
            Err(CommandError::InvalidTransition { .. })
        ));

        let tracker = CommandTracker::new("G0 X0");
        tracker.plan().unwrap();
        tracker.cancel().unwrap();
        assert!(tracker.is_done());
    }

    #[test]
    fn test_unstage_returns_to_staging() {
        let tracker = CommandTracker::new("G0 X0");
        tracker.plan().unwrap();
        tracker.unstage().unwrap();
        assert_eq!(tracker.stage(), CommandStage::Staging);
        assert!(tracker.unstage().is_err());
    }

    #[test]
    fn test_error_is_terminal() {
        let tracker = CommandTracker::new("G0 X0");
        tracker.submit().unwrap();
        tracker
            .error(CommandError::Protocol {
                code: 22,
                description: "feed".to_string(),
            })
            .unwrap();
        assert_eq!(tracker.stage(), CommandStage::Error);
        assert!(tracker.error(CommandError::Handler { message: "again".into() }).is_err());
        assert!(tracker.complete(None).is_err());
    }

    #[test]
    fn test_wait_times_out() {
        let tracker = CommandTracker::new("G4 P10");
        tracker.submit().unwrap();
        let err = tracker.wait(Some(Duration::from_millis(20))).unwrap_err();
        assert_eq!(
            err,
            CommandError::Timeout {
                command: "G4 P10".to_string(),
                timeout_ms: 20
            }
        );
        assert_eq!(tracker.stage(), CommandStage::Submitted);
    }

    #[test]
    fn test_wait_wakes_on_completion() {
        let tracker = Arc::new(CommandTracker::new("G0 X0"));
        tracker.submit().unwrap();

        let remote = tracker.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.complete(None).unwrap();
        });

        tracker.wait(Some(Duration::from_secs(5))).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_callback_on_complete_and_cancel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback: TrackerCallback = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let done = CommandTracker::with_info("G0", TrackerInfo::default(), Some(callback.clone()));
        done.submit().unwrap();
        done.complete(None).unwrap();

        let cancelled = CommandTracker::with_info("G0", TrackerInfo::default(), Some(callback));
        cancelled.plan().unwrap();
        cancelled.cancel().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_resolve_placeholders() {
        let mut machine = MachineInfo::new();
        machine.apply_probe(&ProbeReport {
            position: [1.0, 2.0, -3.25],
            success: true,
        });

        let tracker = CommandTracker::new("G43.1 Z[posz]");
        assert!(tracker.has_runtime_vars());
        assert_eq!(tracker.resolve_command(&machine).unwrap(), "G43.1 Z-3.250");

        let tracker = CommandTracker::new("G0 X[posx] Y[posy]");
        assert_eq!(tracker.resolve_command(&machine).unwrap(), "G0 X1.000 Y2.000");
    }

    #[test]
    fn test_resolve_unknown_placeholder() {
        let tracker = CommandTracker::new("G0 X[posx] Y[nope]");
        assert_eq!(
            tracker.resolve_command(&MachineInfo::new()),
            Err(CommandError::UnresolvedVariable {
                name: "nope".to_string()
            })
        );
    }

    #[test]
    fn test_classification_helpers() {
        assert!(CommandTracker::new("G38.2 Z-10 F50").is_probe());
        assert!(!CommandTracker::new("G0 Z-10").is_probe());
        assert_eq!(
            CommandTracker::new("%wait_for_idle").pseudo_name(),
            Some("wait_for_idle")
        );
    }
}
