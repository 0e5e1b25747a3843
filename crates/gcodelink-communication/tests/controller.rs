use gcodelink_communication::{CommandStage, Controller, ControllerConfig, ProgramKind, Transport};
use gcodelink_core::{CommandError, ConnectionError, ControllerError, Error, MachineState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

const IDLE_REPORT: &str = "<Idle|MPos:0.000,0.000,0.000|FS:0,0>";

// Transport that records every line and forwards it to a simulated device
struct Wire {
    sent: Arc<Mutex<Vec<String>>>,
    tx: Option<mpsc::Sender<String>>,
}

impl Transport for Wire {
    fn send_line(&self, line: &str) -> gcodelink_core::Result<()> {
        let line = line.trim_end().to_string();
        self.sent.lock().unwrap().push(line.clone());
        if let Some(tx) = &self.tx {
            let _ = tx.send(line);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "wire"
    }
}

struct BrokenWire;

impl Transport for BrokenWire {
    fn send_line(&self, _line: &str) -> gcodelink_core::Result<()> {
        Err(ConnectionError::WriteFailed {
            reason: "unplugged".to_string(),
        }
        .into())
    }
}

fn test_config() -> ControllerConfig {
    ControllerConfig {
        dispatch_tick: Duration::from_millis(5),
        wait_timeout: Duration::from_secs(5),
        homing_timeout: Duration::from_secs(5),
        status_polling: false,
        ..ControllerConfig::default()
    }
}

// Controller with no device on the other end; replies are fed by hand
fn offline(config: ControllerConfig) -> (Controller, Arc<Mutex<Vec<String>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let wire = Wire {
        sent: sent.clone(),
        tx: None,
    };
    (Controller::new(config, Box::new(wire)), sent)
}

// Controller wired to a device thread answering each line with `reply`
fn simulated<F>(config: ControllerConfig, reply: F) -> (Controller, Arc<Mutex<Vec<String>>>)
where
    F: Fn(&str) -> Vec<String> + Send + 'static,
{
    let sent = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel::<String>();
    let wire = Wire {
        sent: sent.clone(),
        tx: Some(tx),
    };
    let controller = Controller::new(config, Box::new(wire));

    let device = controller.clone();
    std::thread::spawn(move || {
        for line in rx {
            for response in reply(&line) {
                device.handle_line(&response);
            }
        }
    });

    (controller, sent)
}

fn ok_and_idle(_line: &str) -> Vec<String> {
    vec!["ok".to_string(), IDLE_REPORT.to_string()]
}

fn sent_lines(sent: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    sent.lock().unwrap().clone()
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_window_limits_in_flight_commands() {
    let (controller, sent) = offline(test_config());

    let trackers: Vec<_> = (0..12)
        .map(|i| controller.queue_command(&format!("G0 X{}", i)).unwrap())
        .collect();

    controller.dispatch_pass();
    assert_eq!(sent_lines(&sent).len(), 10);
    assert_eq!(controller.stats().in_flight, 10);
    assert_eq!(controller.stats().backlog, 2);
    assert_eq!(trackers[10].stage(), CommandStage::Planning);
    assert_eq!(trackers[11].stage(), CommandStage::Planning);

    for _ in 0..10 {
        controller.handle_line("ok");
    }
    for tracker in &trackers[..10] {
        assert_eq!(tracker.stage(), CommandStage::Completed);
        assert_eq!(tracker.result().as_deref(), Some("ok"));
    }

    controller.dispatch_pass();
    let lines = sent_lines(&sent);
    assert_eq!(lines.len(), 12);
    assert_eq!(lines[10], "G0 X10");
    assert_eq!(lines[11], "G0 X11");
    assert_eq!(trackers[11].stage(), CommandStage::Submitted);
}

#[test]
fn test_error_response_fails_oldest_command() {
    let (controller, _sent) = offline(test_config());
    let first = controller.queue_command("G0 X1").unwrap();
    let second = controller.queue_command("G0 X2").unwrap();
    controller.dispatch_pass();

    controller.handle_line("error:20");
    assert_eq!(first.stage(), CommandStage::Error);
    assert!(matches!(
        first.error_info(),
        Some(CommandError::Protocol { code: 20, .. })
    ));
    assert_eq!(second.stage(), CommandStage::Submitted);

    controller.handle_line("ok");
    assert_eq!(second.stage(), CommandStage::Completed);
    assert_eq!(controller.stats().in_flight, 0);
}

#[test]
fn test_unknown_error_code_still_acknowledges() {
    let (controller, _sent) = offline(test_config());
    let first = controller.queue_command("G0 X1").unwrap();
    let second = controller.queue_command("G0 X2").unwrap();
    controller.dispatch_pass();

    controller.handle_line("error:300");
    assert_eq!(first.stage(), CommandStage::Error);
    assert!(matches!(
        first.error_info(),
        Some(CommandError::Protocol { code: 300, .. })
    ));
    assert_eq!(second.stage(), CommandStage::Submitted);
    assert_eq!(controller.stats().in_flight, 1);

    controller.handle_line("ok");
    assert_eq!(second.stage(), CommandStage::Completed);
    assert_eq!(controller.stats().in_flight, 0);
}

#[test]
fn test_unmatched_ok_is_ignored() {
    let (controller, _sent) = offline(test_config());
    controller.handle_line("ok");
    controller.handle_line("error:1");
    assert_eq!(controller.stats().in_flight, 0);
}

#[test]
fn test_unknown_pseudo_command_fails_locally() {
    let (controller, sent) = offline(test_config());
    let tracker = controller.queue_command("%dance").unwrap();
    let after = controller.queue_command("G0 X1").unwrap();

    controller.dispatch_pass();

    assert_eq!(tracker.stage(), CommandStage::Error);
    assert_eq!(
        tracker.error_info(),
        Some(CommandError::UnknownPseudoCommand {
            name: "dance".to_string()
        })
    );
    assert_eq!(after.stage(), CommandStage::Submitted);
    assert_eq!(sent_lines(&sent), vec!["G0 X1"]);
}

#[test]
fn test_custom_pseudo_command_runs_in_order() {
    let (controller, sent) = offline(test_config());
    let beeps = Arc::new(AtomicUsize::new(0));
    let counter = beeps.clone();
    controller.register_pseudo_command("beep", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    controller.register_pseudo_command("fail", |_| Err(Error::other("no tone")));

    controller.queue_command("G0 X1").unwrap();
    let beep = controller.queue_command("%beep").unwrap();
    let fail = controller.queue_command("%fail").unwrap();
    controller.queue_command("G0 X2").unwrap();
    controller.dispatch_pass();

    assert_eq!(beeps.load(Ordering::SeqCst), 1);
    assert_eq!(beep.stage(), CommandStage::Completed);
    assert_eq!(
        fail.error_info(),
        Some(CommandError::Handler {
            message: "no tone".to_string()
        })
    );
    assert_eq!(sent_lines(&sent), vec!["G0 X1", "G0 X2"]);
    assert_eq!(controller.stats().in_flight, 2);
    assert_eq!(
        controller.pseudo_commands(),
        vec!["wait_for_idle", "wait_for_last_command", "beep", "fail"]
    );
}

#[test]
fn test_probe_result_feeds_next_command() {
    let (controller, sent) = simulated(test_config(), |line| {
        if line.starts_with("G38") {
            vec!["[PRB:1.000,2.000,-3.500:1]".to_string(), "ok".to_string()]
        } else {
            vec!["ok".to_string()]
        }
    });

    let probe = controller.queue_command("G38.2 Z-10 F50").unwrap();
    let follow = controller.queue_command("G0 Z[posz]").unwrap();
    controller.dispatch_pass();

    assert_eq!(probe.stage(), CommandStage::Completed);
    assert!(controller.machine().probe_succeeded());
    assert_eq!(controller.machine().probe(), [1.0, 2.0, -3.5]);
    assert_eq!(sent_lines(&sent), vec!["G38.2 Z-10 F50", "G0 Z-3.500"]);
    assert!(follow.wait(Some(Duration::from_secs(5))).is_ok());
    assert_eq!(follow.raw_command(), "G0 Z[posz]");
}

#[test]
fn test_failed_touch_off_blocks_dependent_move() {
    let (controller, sent) = simulated(test_config(), |line| {
        if line.starts_with("G38") {
            vec!["error:9".to_string()]
        } else {
            vec!["ok".to_string()]
        }
    });

    let touch = controller.queue_command("G38.2 Z-10 F50").unwrap();
    let follow = controller.queue_command("G0 Z[posz]").unwrap();
    let later = controller.queue_command("G0 X[posx]").unwrap();
    controller.dispatch_pass();

    assert_eq!(touch.stage(), CommandStage::Error);
    assert_eq!(follow.stage(), CommandStage::Error);
    assert!(matches!(
        follow.error_info(),
        Some(CommandError::DependencyFailed { command, .. }) if command == "G38.2 Z-10 F50"
    ));
    assert_eq!(later.stage(), CommandStage::Error);
    assert_eq!(sent_lines(&sent), vec!["G38.2 Z-10 F50"]);
}

#[test]
fn test_unfinished_touch_off_blocks_dependent_move() {
    let config = ControllerConfig {
        wait_timeout: Duration::from_millis(50),
        ..test_config()
    };
    let (controller, sent) = offline(config);

    let touch = controller.queue_command("G38.2 Z-10 F50").unwrap();
    let follow = controller.queue_command("G0 Z[posz]").unwrap();
    controller.dispatch_pass();

    assert_eq!(touch.stage(), CommandStage::Submitted);
    assert_eq!(follow.stage(), CommandStage::Error);
    assert_eq!(
        follow.error_info(),
        Some(CommandError::Timeout {
            command: "G38.2 Z-10 F50".to_string(),
            timeout_ms: 50,
        })
    );
    assert_eq!(sent_lines(&sent), vec!["G38.2 Z-10 F50"]);

    // Once the device finishes, dependent moves go out with its result
    controller.handle_line("[PRB:1.000,2.000,-3.500:1]");
    controller.handle_line("ok");
    assert_eq!(touch.stage(), CommandStage::Completed);
    let retry = controller.queue_command("G0 Z[posz]").unwrap();
    controller.dispatch_pass();
    assert_eq!(retry.stage(), CommandStage::Submitted);
    assert_eq!(sent_lines(&sent), vec!["G38.2 Z-10 F50", "G0 Z-3.500"]);
}

#[test]
fn test_unresolved_placeholder_fails_without_sending() {
    let (controller, sent) = offline(test_config());
    let tracker = controller.queue_command("G0 Z[nope]").unwrap();
    controller.dispatch_pass();

    assert_eq!(tracker.stage(), CommandStage::Error);
    assert_eq!(
        tracker.error_info(),
        Some(CommandError::UnresolvedVariable {
            name: "nope".to_string()
        })
    );
    assert!(sent_lines(&sent).is_empty());
}

#[test]
fn test_registered_variable_resolves() {
    let (controller, sent) = offline(test_config());
    controller.register_variable("safe_z", |_| 5.0);
    controller.queue_command("G0 Z[safe_z]").unwrap();
    controller.dispatch_pass();
    assert_eq!(sent_lines(&sent), vec!["G0 Z5.000"]);
}

#[test]
fn test_status_query_completes_on_report() {
    let (controller, sent) = offline(test_config());
    let query = controller.send_immediate("?").unwrap();

    assert_eq!(sent_lines(&sent), vec!["?"]);
    assert_eq!(query.stage(), CommandStage::Submitted);
    assert_eq!(controller.stats().in_flight, 0);

    controller.handle_line("<Run|MPos:1.000,2.000,3.000|FS:500,0>");
    assert_eq!(query.stage(), CommandStage::Completed);
    assert_eq!(controller.machine().state(), MachineState::Run);
    assert_eq!(controller.machine().position(), [1.0, 2.0, 3.0]);
    assert!(!controller.check_idle());

    controller.handle_line(IDLE_REPORT);
    assert!(controller.check_idle());
}

#[test]
fn test_one_status_query_outstanding() {
    let (controller, sent) = offline(test_config());
    let first = controller.send_immediate("?").unwrap();
    for _ in 0..100 {
        let again = controller.send_immediate("?").unwrap();
        assert!(Arc::ptr_eq(&again, &first));
    }
    assert_eq!(sent_lines(&sent), vec!["?"]);

    controller.handle_line(IDLE_REPORT);
    assert_eq!(first.stage(), CommandStage::Completed);

    let next = controller.send_immediate("?").unwrap();
    assert!(!Arc::ptr_eq(&next, &first));
    assert_eq!(sent_lines(&sent), vec!["?", "?"]);
}

#[test]
fn test_unanswered_status_query_times_out() {
    let config = ControllerConfig {
        status_polling: true,
        status_poll_hz: 50.0,
        ..test_config()
    };
    let (controller, sent) = offline(config);
    controller.start().unwrap();
    assert!(eventually(|| !sent_lines(&sent).is_empty()));

    let query = controller.send_immediate("?").unwrap();
    assert!(query.wait(Some(Duration::from_secs(5))).is_ok());
    assert_eq!(query.stage(), CommandStage::Error);
    assert!(matches!(query.error_info(), Some(CommandError::Timeout { .. })));

    assert!(eventually(|| sent_lines(&sent).iter().filter(|l| *l == "?").count() >= 2));
    controller.shutdown();
}

#[test]
fn test_send_immediate_skips_backlog() {
    let (controller, sent) = offline(test_config());
    let queued = controller.queue_command("G0 X1").unwrap();
    let immediate = controller.send_immediate("$X").unwrap();

    assert_eq!(sent_lines(&sent), vec!["$X"]);
    assert_eq!(queued.stage(), CommandStage::Planning);
    controller.handle_line("ok");
    assert_eq!(immediate.stage(), CommandStage::Completed);
}

#[test]
fn test_empty_command_is_rejected() {
    let (controller, _sent) = offline(test_config());
    assert!(controller.queue_command("   ").is_err());
}

#[test]
fn test_transport_failure_fails_command() {
    let controller = Controller::new(test_config(), Box::new(BrokenWire));
    let tracker = controller.queue_command("G0 X1").unwrap();
    controller.dispatch_pass();

    assert_eq!(tracker.stage(), CommandStage::Error);
    assert!(matches!(
        tracker.error_info(),
        Some(CommandError::SendFailed { .. })
    ));
    assert_eq!(controller.stats().in_flight, 0);
}

#[test]
fn test_pause_holds_backlog() {
    let (controller, sent) = offline(test_config());
    controller.pause();
    controller.queue_command("G0 X1").unwrap();
    controller.dispatch_pass();
    assert!(sent_lines(&sent).is_empty());
    assert!(controller.is_paused());

    controller.resume();
    controller.dispatch_pass();
    assert_eq!(sent_lines(&sent), vec!["G0 X1"]);
}

#[test]
fn test_queue_front_jumps_backlog() {
    let (controller, sent) = offline(test_config());
    controller.queue_command("G0 X1").unwrap();
    controller.queue_command_front("G0 X0").unwrap();
    controller.dispatch_pass();
    assert_eq!(sent_lines(&sent), vec!["G0 X0", "G0 X1"]);
}

#[test]
fn test_cancel_pending() {
    let (controller, _sent) = offline(test_config());
    let trackers: Vec<_> = (0..3)
        .map(|i| controller.queue_command(&format!("G0 Y{}", i)).unwrap())
        .collect();

    assert_eq!(controller.cancel_pending(), 3);
    assert!(trackers
        .iter()
        .all(|t| t.stage() == CommandStage::Cancelled));
    assert_eq!(controller.stats().backlog, 0);
}

#[test]
fn test_program_control_errors() {
    let (controller, _sent) = offline(test_config());
    assert!(matches!(
        controller.start_program(),
        Err(Error::Controller(ControllerError::NoProgram))
    ));

    controller.load_program_text("a", "G0 X1").unwrap();
    controller.start_program().unwrap();
    assert!(matches!(
        controller.load_program_text("b", "G0 X2"),
        Err(Error::Controller(ControllerError::ProgramRunning))
    ));
}

#[test]
fn test_stop_withdraws_and_start_resumes() {
    let config = ControllerConfig {
        queue_capacity: 1,
        ..test_config()
    };
    let (controller, sent) = offline(config);
    let program = controller
        .load_program_text("job", "G0 X1\nG0 X2\nG0 X3")
        .unwrap();

    controller.start_program().unwrap();
    controller.dispatch_pass();
    assert!(program.is_queued());
    assert_eq!(sent_lines(&sent), vec!["G0 X1"]);
    assert_eq!(controller.stats().backlog, 2);

    controller.stop_program().unwrap();
    controller.dispatch_pass();
    assert!(!program.is_queued());
    assert_eq!(controller.stats().backlog, 0);
    assert_eq!(program.trackers()[1].stage(), CommandStage::Staging);

    controller.handle_line("ok");
    assert_eq!(program.progress(), 1);

    controller.start_program().unwrap();
    controller.dispatch_pass();
    assert_eq!(sent_lines(&sent), vec!["G0 X1", "G0 X2"]);
}

#[test]
fn test_abort_cancels_unsent_program_commands() {
    let config = ControllerConfig {
        queue_capacity: 1,
        ..test_config()
    };
    let (controller, _sent) = offline(config);
    let program = controller
        .load_program_text("job", "G0 X1\nG0 X2\nG0 X3")
        .unwrap();

    controller.start_program().unwrap();
    controller.dispatch_pass();

    assert_eq!(controller.abort_program().unwrap(), 2);
    assert!(!controller.program_running());
    assert_eq!(program.trackers()[0].stage(), CommandStage::Submitted);
    assert_eq!(program.trackers()[1].stage(), CommandStage::Cancelled);
    assert_eq!(program.trackers()[2].stage(), CommandStage::Cancelled);
}

#[test]
fn test_program_with_stop_runs_to_completion() {
    let (controller, sent) = simulated(test_config(), ok_and_idle);
    let program = controller
        .load_program_text("job", "G1 X10 F100\nM0\nG1 X20")
        .unwrap();
    assert_eq!(
        program.lines(),
        &[
            "G1 X10 F100",
            "%wait_for_idle",
            "M0",
            "%wait_for_last_command",
            "G1 X20"
        ]
    );

    controller.start().unwrap();
    controller.start_program().unwrap();

    program.wait(Some(Duration::from_secs(5))).unwrap();
    assert!(program
        .trackers()
        .iter()
        .all(|t| t.stage() == CommandStage::Completed));
    assert_eq!(program.progress(), 5);
    assert_eq!(sent_lines(&sent), vec!["G1 X10 F100", "M0", "G1 X20"]);

    assert!(eventually(|| !controller.program_running()));
    controller.shutdown();
    assert!(!controller.is_running());
}

#[test]
fn test_exec_macro_queues_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("square.g"), "G0 X0\n; corner\nG0 X10\n").unwrap();

    let config = ControllerConfig {
        macro_dir: dir.path().to_path_buf(),
        ..test_config()
    };
    let (controller, sent) = offline(config);

    let program = controller.exec_macro("square").unwrap();
    assert_eq!(program.kind(), ProgramKind::Macro);
    assert!(program.is_queued());
    assert_eq!(controller.stats().backlog, 2);

    controller.dispatch_pass();
    assert_eq!(sent_lines(&sent), vec!["G0 X0", "G0 X10"]);

    assert!(controller.exec_macro("missing").is_err());
}

#[test]
fn test_home_unlocks_and_retries() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let (controller, sent) = simulated(test_config(), move |line| {
        if line == "$H" && seen.fetch_add(1, Ordering::SeqCst) == 0 {
            vec!["error:9".to_string()]
        } else {
            vec!["ok".to_string()]
        }
    });

    controller.start().unwrap();
    controller.home().unwrap();
    controller.shutdown();

    assert_eq!(sent_lines(&sent), vec!["$H", "$X", "$H"]);
}

#[test]
fn test_home_gives_up() {
    let config = ControllerConfig {
        homing_attempts: 2,
        ..test_config()
    };
    let (controller, _sent) = simulated(config, |line| {
        if line == "$H" {
            vec!["ALARM:9".to_string(), "error:9".to_string()]
        } else {
            vec!["ok".to_string()]
        }
    });

    controller.start().unwrap();
    let result = controller.home();
    controller.shutdown();

    assert!(matches!(
        result,
        Err(Error::Controller(ControllerError::HomingFailed { attempts: 2, .. }))
    ));
}

#[test]
fn test_wait_for_idle_times_out() {
    let (controller, _sent) = offline(test_config());
    let err = controller
        .wait_for_idle(Some(Duration::from_millis(30)))
        .unwrap_err();
    assert!(err.is_timeout());
}
