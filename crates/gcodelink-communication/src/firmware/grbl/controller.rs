//! GRBL Controller Implementation
//!
//! Streams commands to a GRBL-style device with a bounded in-flight window,
//! runs pseudo-commands locally, substitutes runtime variables at send time
//! and keeps the machine status model current from inbound reports.
//!
//! Two worker threads run once [`Controller::start`] is called: the dispatch
//! loop, which moves commands from the backlog to the device every tick, and
//! the status poller, which sends `?` at a fixed rate. Inbound lines are fed
//! in through [`Controller::handle_line`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use gcodelink_core::{
    event_bus, AppEvent, CommandError, CommandEvent, CommunicationEvent, ConnectionEvent,
    ControllerError, Error, MachineEvent, ProgramEvent, Result,
};
use gcodelink_gcode::GcodeProcessor;
use parking_lot::{Mutex, RwLock};

use super::error_decoder::{decode_error, format_alarm};
use super::pseudo::{PseudoCommandHandler, PseudoCommandRegistry};
use super::response_parser::DeviceMessage;
use crate::command::{CommandStage, CommandTracker, Program, ProgramKind};
use crate::communication::{CommandQueues, QueueStats, Transport};
use crate::machine_info::{MachineInfo, StatusUpdate};

/// Real-time status query
pub const STATUS_QUERY: &str = "?";

/// Homing cycle command
pub const HOME_COMMAND: &str = "$H";

/// Alarm unlock command
pub const UNLOCK_COMMAND: &str = "$X";

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(20);
const UNLOCK_SETTLE: Duration = Duration::from_millis(500);
const STATUS_TIMEOUT: Duration = Duration::from_secs(1);

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum unacknowledged commands on the device
    pub queue_capacity: usize,
    /// Status queries per second
    pub status_poll_hz: f64,
    /// Dispatch loop period
    pub dispatch_tick: Duration,
    /// Bound for pseudo-command waits
    pub wait_timeout: Duration,
    /// Homing attempts before giving up
    pub homing_attempts: u32,
    /// Bound for one homing cycle
    pub homing_timeout: Duration,
    /// Commands retained in history
    pub history_limit: usize,
    /// Directory searched by `exec_macro`
    pub macro_dir: PathBuf,
    /// Whether `start` spawns the status poller
    pub status_polling: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            status_poll_hz: 10.0,
            dispatch_tick: Duration::from_millis(100),
            wait_timeout: Duration::from_secs(60),
            homing_attempts: 3,
            homing_timeout: Duration::from_secs(60),
            history_limit: 1000,
            macro_dir: PathBuf::from("./macros"),
            status_polling: true,
        }
    }
}

impl ControllerConfig {
    fn status_period(&self) -> Duration {
        if self.status_poll_hz > 0.0 {
            Duration::from_secs_f64(1.0 / self.status_poll_hz)
        } else {
            Duration::from_secs(1)
        }
    }
}

/// Everything guarded by the controller lock
struct SharedState {
    queues: CommandQueues,
    machine: MachineInfo,
    program: Option<Arc<Program>>,
    program_running: bool,
    paused: bool,
    last_probe: Option<Arc<CommandTracker>>,
    last_dispatched: Option<Arc<CommandTracker>>,
    pending_status: Option<Arc<CommandTracker>>,
}

struct Inner {
    config: ControllerConfig,
    shared: Mutex<SharedState>,
    transport: Box<dyn Transport>,
    processor: Mutex<GcodeProcessor>,
    pseudo: RwLock<PseudoCommandRegistry>,
    running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a controller; clones share the same controller
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

fn publish(events: Vec<AppEvent>) {
    for event in events {
        event_bus().publish(event);
    }
}

/// Report an illegal tracker transition
///
/// Every transition the controller makes is legal by construction, so a
/// failure here is a queueing bug.
fn contract(result: std::result::Result<(), CommandError>) {
    if let Err(err) = result {
        tracing::error!("Command queue contract violated: {}", err);
        debug_assert!(false, "command queue contract violated: {}", err);
    }
}

impl Controller {
    /// Create a controller writing to `transport`
    ///
    /// The pipeline uses the built-in transformers and the pseudo-command
    /// registry holds the built-in commands. Worker threads are not started.
    pub fn new(config: ControllerConfig, transport: Box<dyn Transport>) -> Self {
        Self::with_processor(config, transport, GcodeProcessor::with_default_transformers())
    }

    /// Create a controller with a custom preprocessing pipeline
    pub fn with_processor(
        config: ControllerConfig,
        transport: Box<dyn Transport>,
        processor: GcodeProcessor,
    ) -> Self {
        tracing::info!(
            "Creating controller on {} (window {}, poll {} Hz)",
            transport.name(),
            config.queue_capacity,
            config.status_poll_hz
        );

        let shared = SharedState {
            queues: CommandQueues::new(config.queue_capacity, config.history_limit),
            machine: MachineInfo::new(),
            program: None,
            program_running: false,
            paused: false,
            last_probe: None,
            last_dispatched: None,
            pending_status: None,
        };

        Self {
            inner: Arc::new(Inner {
                config,
                shared: Mutex::new(shared),
                transport,
                processor: Mutex::new(processor),
                pseudo: RwLock::new(PseudoCommandRegistry::with_builtins()),
                running: AtomicBool::new(false),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Controller tuning
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    // ========================================================================
    // Worker threads
    // ========================================================================

    /// Spawn the dispatch loop and, if enabled, the status poller
    pub fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(ControllerError::Other {
                message: "Controller already started".to_string(),
            }
            .into());
        }

        let mut workers = self.inner.workers.lock();

        let weak = Arc::downgrade(&self.inner);
        workers.push(
            std::thread::Builder::new()
                .name("gcodelink-dispatch".to_string())
                .spawn(move || dispatch_loop(weak))?,
        );

        if self.inner.config.status_polling {
            let weak = Arc::downgrade(&self.inner);
            workers.push(
                std::thread::Builder::new()
                    .name("gcodelink-status".to_string())
                    .spawn(move || status_loop(weak))?,
            );
        }

        tracing::info!("Controller started with {} worker(s)", workers.len());
        publish(vec![AppEvent::Connection(ConnectionEvent::Started)]);
        Ok(())
    }

    /// Stop the worker threads and wait for them to exit
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let workers: Vec<JoinHandle<()>> = self.inner.workers.lock().drain(..).collect();
        let current = std::thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("Controller worker panicked");
            }
        }

        tracing::info!("Controller shut down");
        publish(vec![AppEvent::Connection(ConnectionEvent::Disconnected {
            reason: "shutdown".to_string(),
        })]);
    }

    /// Whether the worker threads are running
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Queueing
    // ========================================================================

    fn new_tracker(command: &str) -> Result<Arc<CommandTracker>> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ControllerError::Other {
                message: "Empty command".to_string(),
            }
            .into());
        }
        Ok(Arc::new(CommandTracker::new(command)))
    }

    fn enqueue(&self, command: &str, front: bool) -> Result<Arc<CommandTracker>> {
        let tracker = Self::new_tracker(command)?;
        let mut shared = self.inner.shared.lock();
        tracker.plan()?;
        if front {
            shared.queues.enqueue_front(tracker.clone());
        } else {
            shared.queues.enqueue(tracker.clone());
        }
        Ok(tracker)
    }

    /// Append a command to the backlog
    pub fn queue_command(&self, command: &str) -> Result<Arc<CommandTracker>> {
        self.enqueue(command, false)
    }

    /// Put a command at the front of the backlog
    pub fn queue_command_front(&self, command: &str) -> Result<Arc<CommandTracker>> {
        self.enqueue(command, true)
    }

    /// Send a command now, ignoring the in-flight window
    ///
    /// The command still takes its place in the acknowledgement order.
    /// `?` is a real-time query: GRBL answers it with a status report, not
    /// `ok`, so its tracker completes on the next report instead. Only one
    /// query is outstanding at a time; asking again while one is
    /// unanswered returns the outstanding tracker without sending.
    pub fn send_immediate(&self, command: &str) -> Result<Arc<CommandTracker>> {
        let tracker = Self::new_tracker(command)?;

        if tracker.is_pseudo() {
            self.run_pseudo(&tracker);
            return Ok(tracker);
        }

        let line = {
            let shared = self.inner.shared.lock();
            tracker.resolve_command(&shared.machine)?
        };

        let realtime = line == STATUS_QUERY;
        let sent = {
            let mut shared = self.inner.shared.lock();
            if realtime {
                if let Some(pending) = shared.pending_status.clone() {
                    return Ok(pending);
                }
            }
            tracker.submit()?;
            if realtime {
                shared.pending_status = Some(tracker.clone());
            } else {
                shared.queues.push_in_flight(tracker.clone());
                shared.queues.record(tracker.clone());
            }
            self.inner.transport.send_line(&format!("{}\n", line))
        };

        if let Err(err) = sent {
            self.abandon(&tracker, &err);
            return Err(err);
        }

        if !realtime {
            tracing::debug!("TX (immediate): {}", line);
            publish(vec![AppEvent::Communication(CommunicationEvent::DataSent {
                data: line,
            })]);
        }
        Ok(tracker)
    }

    /// Pull a tracker whose line never reached the device out of the queues
    fn abandon(&self, tracker: &Arc<CommandTracker>, err: &Error) {
        tracing::error!("Failed to send '{}': {}", tracker.raw_command(), err);
        {
            let mut shared = self.inner.shared.lock();
            Self::release_status_query(&mut shared, tracker);
            shared.queues.remove_in_flight(tracker);
        }
        contract(tracker.error(CommandError::SendFailed {
            reason: err.to_string(),
        }));
    }

    /// Clear the outstanding status query if it is `tracker`
    fn release_status_query(shared: &mut SharedState, tracker: &Arc<CommandTracker>) -> bool {
        let outstanding = shared
            .pending_status
            .as_ref()
            .is_some_and(|t| Arc::ptr_eq(t, tracker));
        if outstanding {
            shared.pending_status = None;
        }
        outstanding
    }

    /// Give up on an unanswered status query so the next one can be sent
    fn expire_status_query(&self, tracker: &Arc<CommandTracker>, timeout: Duration) {
        let expired = Self::release_status_query(&mut self.inner.shared.lock(), tracker);
        if expired {
            tracing::trace!("No status report within {:?}", timeout);
            contract(tracker.error(CommandError::Timeout {
                command: tracker.raw_command().to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }));
        }
    }

    /// Cancel every command waiting in the backlog
    ///
    /// Returns the number of commands cancelled. Program commands are
    /// cancelled too; the program is marked as no longer queued.
    pub fn cancel_pending(&self) -> usize {
        let drained = {
            let mut shared = self.inner.shared.lock();
            shared.program_running = false;
            if let Some(program) = &shared.program {
                program.set_queued(false);
            }
            shared.queues.drain_backlog()
        };

        for tracker in &drained {
            contract(tracker.cancel());
        }
        if !drained.is_empty() {
            tracing::info!("Cancelled {} pending command(s)", drained.len());
        }
        drained.len()
    }

    // ========================================================================
    // Programs
    // ========================================================================

    /// Install a preprocessed program as the current program
    ///
    /// Refused while a program is running. A previous program's unsent
    /// commands are pulled back out of the backlog.
    pub fn load_program(&self, program: Program) -> Result<Arc<Program>> {
        let program = Arc::new(program);
        let mut events = Vec::new();
        {
            let mut shared = self.inner.shared.lock();
            if shared.program_running {
                return Err(ControllerError::ProgramRunning.into());
            }

            if let Some(previous) = shared.program.take() {
                if previous.is_queued() {
                    let withdrawn = shared
                        .queues
                        .withdraw(|t| previous.owns(t) && t.stage() == CommandStage::Planning);
                    for tracker in &withdrawn {
                        contract(tracker.unstage());
                    }
                    previous.set_queued(false);
                }
            }

            events.push(AppEvent::Program(ProgramEvent::Loaded {
                name: program.name().to_string(),
                lines: program.lines().len(),
            }));
            shared.program = Some(program.clone());
        }

        tracing::info!(
            "Loaded program '{}' ({} commands)",
            program.name(),
            program.lines().len()
        );
        publish(events);
        Ok(program)
    }

    /// Preprocess and load a program given as lines
    pub fn load_program_lines<S: AsRef<str>>(&self, name: &str, lines: &[S]) -> Result<Arc<Program>> {
        if self.program_running() {
            return Err(ControllerError::ProgramRunning.into());
        }
        let program = Program::new(name, lines, &mut self.inner.processor.lock());
        self.load_program(program)
    }

    /// Preprocess and load a program given as text
    pub fn load_program_text(&self, name: &str, text: &str) -> Result<Arc<Program>> {
        let lines: Vec<&str> = text.lines().collect();
        self.load_program_lines(name, &lines)
    }

    /// Read, preprocess and load a program file
    pub fn load_program_file(&self, path: impl AsRef<std::path::Path>) -> Result<Arc<Program>> {
        if self.program_running() {
            return Err(ControllerError::ProgramRunning.into());
        }
        let program = Program::load(path, ProgramKind::Program, &mut self.inner.processor.lock())?;
        self.load_program(program)
    }

    /// Current program
    pub fn current_program(&self) -> Option<Arc<Program>> {
        self.inner.shared.lock().program.clone()
    }

    /// Whether the current program is marked running
    pub fn program_running(&self) -> bool {
        self.inner.shared.lock().program_running
    }

    /// Mark the current program running; the next tick queues it
    pub fn start_program(&self) -> Result<()> {
        let mut shared = self.inner.shared.lock();
        let Some(program) = &shared.program else {
            return Err(ControllerError::NoProgram.into());
        };
        tracing::info!("Starting program '{}'", program.name());
        shared.program_running = true;
        Ok(())
    }

    /// Mark the current program stopped; the next tick pulls back its
    /// unsent commands so a later start resumes where it left off
    pub fn stop_program(&self) -> Result<()> {
        let mut shared = self.inner.shared.lock();
        if shared.program.is_none() {
            return Err(ControllerError::NoProgram.into());
        }
        shared.program_running = false;
        Ok(())
    }

    /// Stop the current program and cancel its unsent commands
    pub fn abort_program(&self) -> Result<usize> {
        let (withdrawn, name) = {
            let mut shared = self.inner.shared.lock();
            let Some(program) = shared.program.clone() else {
                return Err(ControllerError::NoProgram.into());
            };
            shared.program_running = false;
            program.set_queued(false);
            let withdrawn = shared
                .queues
                .withdraw(|t| program.owns(t) && t.stage() == CommandStage::Planning);
            (withdrawn, program.name().to_string())
        };

        for tracker in &withdrawn {
            contract(tracker.cancel());
        }
        tracing::warn!(
            "Aborted program '{}', cancelled {} command(s)",
            name,
            withdrawn.len()
        );
        publish(vec![AppEvent::Program(ProgramEvent::Withdrawn {
            name,
            count: withdrawn.len(),
        })]);
        Ok(withdrawn.len())
    }

    /// Load `<macro_dir>/<name>.g` and queue it behind the current backlog
    pub fn exec_macro(&self, name: &str) -> Result<Arc<Program>> {
        let path = self.inner.config.macro_dir.join(format!("{}.g", name));
        tracing::info!("Running macro {}", path.display());

        let program = Arc::new(Program::load(
            &path,
            ProgramKind::Macro,
            &mut self.inner.processor.lock(),
        )?);

        {
            let mut shared = self.inner.shared.lock();
            for tracker in program.trackers() {
                contract(tracker.plan());
                shared.queues.enqueue(tracker.clone());
            }
            program.set_queued(true);
        }

        publish(vec![AppEvent::Program(ProgramEvent::Queued {
            name: program.name().to_string(),
        })]);
        Ok(program)
    }

    // ========================================================================
    // Pause / resume
    // ========================================================================

    /// Stop moving commands out of the backlog
    pub fn pause(&self) {
        self.inner.shared.lock().paused = true;
        tracing::info!("Dispatch paused");
    }

    /// Resume moving commands out of the backlog
    pub fn resume(&self) {
        self.inner.shared.lock().paused = false;
        tracing::info!("Dispatch resumed");
    }

    /// Whether dispatch is paused
    pub fn is_paused(&self) -> bool {
        self.inner.shared.lock().paused
    }

    // ========================================================================
    // Pseudo-commands
    // ========================================================================

    /// Register a pseudo-command handler under `name` (without `%`)
    pub fn register_pseudo_command<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Controller) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.pseudo.write().register(name, handler);
    }

    /// Registered pseudo-command names in lookup order
    pub fn pseudo_commands(&self) -> Vec<String> {
        self.inner
            .pseudo
            .read()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn run_pseudo(&self, tracker: &Arc<CommandTracker>) {
        let name = tracker.pseudo_name().unwrap_or_default().to_string();
        contract(tracker.submit());

        let handler: Option<PseudoCommandHandler> = self.inner.pseudo.read().get(&name);
        let outcome = match handler {
            Some(handler) => {
                tracing::debug!("Running custom command '{}'", name);
                handler(self).map_err(|err| match err {
                    Error::Command(err) => err,
                    other => CommandError::Handler {
                        message: other.to_string(),
                    },
                })
            }
            None => Err(CommandError::UnknownPseudoCommand { name: name.clone() }),
        };

        let event = match outcome {
            Ok(()) => {
                contract(tracker.complete(None));
                AppEvent::Command(CommandEvent::Completed {
                    command: tracker.raw_command().to_string(),
                    elapsed_ms: tracker.elapsed().as_millis() as u64,
                })
            }
            Err(err) => {
                tracing::warn!("Custom command '{}' failed: {}", name, err);
                let message = err.to_string();
                contract(tracker.error(err));
                AppEvent::Command(CommandEvent::Failed {
                    command: tracker.raw_command().to_string(),
                    error: message,
                })
            }
        };

        self.inner.shared.lock().queues.record(tracker.clone());
        publish(vec![event]);
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Move the current program in or out of the backlog to match its
    /// running flag
    fn sync_program(shared: &mut SharedState, events: &mut Vec<AppEvent>) {
        let Some(program) = shared.program.clone() else {
            return;
        };

        if shared.program_running && !program.is_queued() {
            let mut count = 0;
            for tracker in program.trackers() {
                if tracker.stage() == CommandStage::Staging {
                    contract(tracker.plan());
                    shared.queues.enqueue(tracker.clone());
                    count += 1;
                }
            }
            program.set_queued(true);
            tracing::info!("Queued {} command(s) of '{}'", count, program.name());
            events.push(AppEvent::Program(ProgramEvent::Queued {
                name: program.name().to_string(),
            }));
        } else if !shared.program_running && program.is_queued() {
            let withdrawn = shared
                .queues
                .withdraw(|t| program.owns(t) && t.stage() == CommandStage::Planning);
            for tracker in &withdrawn {
                contract(tracker.unstage());
            }
            program.set_queued(false);
            tracing::info!(
                "Withdrew {} command(s) of '{}'",
                withdrawn.len(),
                program.name()
            );
            events.push(AppEvent::Program(ProgramEvent::Withdrawn {
                name: program.name().to_string(),
                count: withdrawn.len(),
            }));
        } else if shared.program_running && program.is_finished() {
            tracing::info!("Program '{}' finished", program.name());
            shared.program_running = false;
            program.set_queued(false);
        }
    }

    /// Run one dispatch tick
    ///
    /// Syncs the current program with the backlog, then sends backlog
    /// commands while the in-flight window has room. Pseudo-commands run
    /// inline and never take a slot.
    pub fn dispatch_pass(&self) {
        let mut events = Vec::new();
        {
            let mut shared = self.inner.shared.lock();
            if shared.paused {
                return;
            }
            Self::sync_program(&mut shared, &mut events);
        }
        publish(events);

        loop {
            let next = {
                let mut shared = self.inner.shared.lock();
                if shared.paused || !shared.queues.has_room() {
                    break;
                }
                match shared.queues.next_pending() {
                    Some(tracker) => tracker,
                    None => break,
                }
            };

            if next.is_pseudo() {
                self.run_pseudo(&next);
            } else {
                self.dispatch_command(&next);
            }
        }
    }

    fn dispatch_command(&self, tracker: &Arc<CommandTracker>) {
        if tracker.has_runtime_vars() {
            if let Err(err) = self.await_probe() {
                self.fail_unsent(tracker, err);
                return;
            }
        }

        let sent = {
            let mut shared = self.inner.shared.lock();
            let line = match tracker.resolve_command(&shared.machine) {
                Ok(line) => line,
                Err(err) => {
                    drop(shared);
                    self.fail_unsent(tracker, err);
                    return;
                }
            };

            contract(tracker.submit());
            shared.queues.push_in_flight(tracker.clone());
            shared.queues.record(tracker.clone());
            shared.last_dispatched = Some(tracker.clone());
            if tracker.is_probe() {
                shared.last_probe = Some(tracker.clone());
            }

            self.inner
                .transport
                .send_line(&format!("{}\n", line))
                .map(|()| line)
        };

        match sent {
            Ok(line) => {
                tracing::debug!("TX: {}", line);
                publish(vec![AppEvent::Communication(CommunicationEvent::DataSent {
                    data: line,
                })]);
            }
            Err(err) => self.abandon(tracker, &err),
        }
    }

    /// Fail a command that was never written to the device
    fn fail_unsent(&self, tracker: &Arc<CommandTracker>, err: CommandError) {
        tracing::warn!("Cannot send '{}': {}", tracker.raw_command(), err);
        let message = err.to_string();
        contract(tracker.error(err));
        publish(vec![AppEvent::Command(CommandEvent::Failed {
            command: tracker.raw_command().to_string(),
            error: message,
        })]);
    }

    /// Block until the last dispatched G38 has finished
    ///
    /// Only a completed G38 releases commands that read machine variables.
    /// One that failed or is still running keeps blocking them until
    /// another G38 is dispatched.
    fn await_probe(&self) -> std::result::Result<(), CommandError> {
        let Some(probe) = self.inner.shared.lock().last_probe.clone() else {
            return Ok(());
        };

        tracing::debug!("Waiting for probe '{}'", probe.raw_command());
        probe.wait(Some(self.inner.config.wait_timeout))?;

        if probe.stage() != CommandStage::Completed {
            return Err(CommandError::DependencyFailed {
                command: probe.raw_command().to_string(),
                reason: probe
                    .error_info()
                    .map(|err| err.to_string())
                    .unwrap_or_else(|| probe.stage().to_string()),
            });
        }

        let mut shared = self.inner.shared.lock();
        if shared
            .last_probe
            .as_ref()
            .is_some_and(|p| Arc::ptr_eq(p, &probe))
        {
            shared.last_probe = None;
        }
        Ok(())
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Handle one line received from the device
    pub fn handle_line(&self, line: &str) {
        let Some(message) = DeviceMessage::parse(line) else {
            return;
        };
        let mut events = vec![AppEvent::Communication(CommunicationEvent::DataReceived {
            data: line.trim().to_string(),
        })];

        match message {
            DeviceMessage::Ok => {
                let acked = self.inner.shared.lock().queues.acknowledge();
                match acked {
                    Some(tracker) => {
                        contract(tracker.complete(Some("ok".to_string())));
                        tracing::debug!(
                            "Completed '{}' in {:?}",
                            tracker.raw_command(),
                            tracker.elapsed()
                        );
                        events.push(AppEvent::Command(CommandEvent::Completed {
                            command: tracker.raw_command().to_string(),
                            elapsed_ms: tracker.elapsed().as_millis() as u64,
                        }));
                    }
                    None => tracing::warn!("Received 'ok' with nothing in flight"),
                }
            }
            DeviceMessage::Error(code) => {
                let acked = self.inner.shared.lock().queues.acknowledge();
                let err = CommandError::Protocol {
                    code,
                    description: decode_error(code),
                };
                match acked {
                    Some(tracker) => {
                        tracing::error!("'{}' rejected: {}", tracker.raw_command(), err);
                        events.push(AppEvent::Command(CommandEvent::Failed {
                            command: tracker.raw_command().to_string(),
                            error: err.to_string(),
                        }));
                        contract(tracker.error(err));
                    }
                    None => tracing::warn!("Received '{}' with nothing in flight", err),
                }
            }
            DeviceMessage::Alarm(code) => tracing::error!("{}", format_alarm(code)),
            DeviceMessage::Status(report) => {
                let (update, pending) = {
                    let mut shared = self.inner.shared.lock();
                    let update = shared.machine.apply_status(&report);
                    (update, shared.pending_status.take())
                };
                if let Some(tracker) = pending {
                    contract(tracker.complete(Some(line.trim().to_string())));
                }
                if let StatusUpdate::StateChanged { old, new } = update {
                    events.push(AppEvent::Machine(MachineEvent::StateChanged { old, new }));
                }
            }
            DeviceMessage::Probe(probe) => {
                self.inner.shared.lock().machine.apply_probe(&probe);
                events.push(AppEvent::Machine(MachineEvent::ProbeReported {
                    position: probe.position,
                    success: probe.success,
                }));
            }
            DeviceMessage::Message(text) => tracing::debug!("RX: {}", text),
        }

        publish(events);
    }

    // ========================================================================
    // Machine state
    // ========================================================================

    /// Snapshot of the machine status model
    pub fn machine(&self) -> MachineInfo {
        self.inner.shared.lock().machine.clone()
    }

    /// Register a runtime variable for `[name]` placeholders
    pub fn register_variable(&self, name: &str, accessor: crate::machine_info::VariableAccessor) {
        self.inner
            .shared
            .lock()
            .machine
            .register_variable(name, accessor);
    }

    /// Queue occupancy
    pub fn stats(&self) -> QueueStats {
        self.inner.shared.lock().queues.stats()
    }

    /// Commands awaiting acknowledgement, oldest first
    pub fn in_flight(&self) -> Vec<Arc<CommandTracker>> {
        self.inner.shared.lock().queues.in_flight().cloned().collect()
    }

    /// Commands waiting to be sent, in send order
    pub fn backlog(&self) -> Vec<Arc<CommandTracker>> {
        self.inner.shared.lock().queues.backlog().cloned().collect()
    }

    /// Dispatched commands still in history, oldest first
    pub fn history(&self) -> Vec<Arc<CommandTracker>> {
        self.inner.shared.lock().queues.history().cloned().collect()
    }

    /// Nothing in flight and the machine reports Idle
    pub fn check_idle(&self) -> bool {
        let shared = self.inner.shared.lock();
        shared.queues.in_flight_len() == 0 && shared.machine.is_idle()
    }

    /// Block until [`check_idle`](Self::check_idle) holds
    pub fn wait_for_idle(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        while !self.check_idle() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ControllerError::Timeout {
                    operation: "wait_for_idle".to_string(),
                    timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
                }
                .into());
            }
            std::thread::sleep(IDLE_POLL_INTERVAL);
        }
        Ok(())
    }

    /// Block until the most recently sent device command has finished
    pub fn wait_for_last_command(&self) -> Result<()> {
        let last = self.inner.shared.lock().last_dispatched.clone();
        match last {
            Some(tracker) => {
                tracing::debug!("Waiting for '{}'", tracker.raw_command());
                tracker.wait(Some(self.inner.config.wait_timeout))?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Run the homing cycle, unlocking and retrying on failure
    pub fn home(&self) -> Result<()> {
        let attempts = self.inner.config.homing_attempts.max(1);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            let tracker = self.queue_command(HOME_COMMAND)?;
            if let Err(err) = tracker.wait(Some(self.inner.config.homing_timeout)) {
                reason = err.to_string();
            } else if tracker.stage() == CommandStage::Completed {
                tracing::info!("Homing succeeded on attempt {}", attempt);
                return Ok(());
            } else if let Some(err) = tracker.error_info() {
                reason = err.to_string();
            }

            tracing::warn!("Homing attempt {}/{} failed: {}", attempt, attempts, reason);
            if attempt < attempts {
                self.send_immediate(UNLOCK_COMMAND)?;
                std::thread::sleep(UNLOCK_SETTLE);
            }
        }

        Err(ControllerError::HomingFailed { attempts, reason }.into())
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

fn dispatch_loop(weak: Weak<Inner>) {
    loop {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        let tick = inner.config.dispatch_tick;
        Controller { inner }.dispatch_pass();
        std::thread::sleep(tick);
    }
    tracing::debug!("Dispatch loop exited");
}

fn status_loop(weak: Weak<Inner>) {
    loop {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        let period = inner.config.status_period();
        let started = Instant::now();
        let controller = Controller { inner };

        let sent = controller.send_immediate(STATUS_QUERY);
        drop(controller);

        match sent {
            Ok(tracker) => {
                let timeout = period.max(STATUS_TIMEOUT);
                if tracker.wait(Some(timeout)).is_err() {
                    if let Some(inner) = weak.upgrade() {
                        Controller { inner }.expire_status_query(&tracker, timeout);
                    }
                }
            }
            Err(err) => tracing::warn!("Status query failed: {}", err),
        }

        std::thread::sleep(period.saturating_sub(started.elapsed()));
    }
    tracing::debug!("Status loop exited");
}
