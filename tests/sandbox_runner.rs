// Integration tests for running scripts behind the sandbox boundary.
// A POSIX shell stands in for the interpreter and speaks the bridge protocol
// by hand, so these tests do not need Python.

use rpi_sim::config::{Config, SandboxConfig};
use rpi_sim::event::{Event, EventKind};
use rpi_sim::model::{SharedModel, SystemModel};
use rpi_sim::sandbox::{ExecutionOutcome, SandboxRunner};
use rpi_sim::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

fn shell_config(timeout_secs: u64) -> SandboxConfig {
    SandboxConfig {
        interpreter: "sh".into(),
        args: Vec::new(),
        bridge: false,
        timeout_secs,
        ..SandboxConfig::default()
    }
}

fn shared_model() -> SharedModel {
    Arc::new(Mutex::new(SystemModel::new("sandbox", &Config::default())))
}

async fn history(model: &SharedModel) -> Vec<Event> {
    model.lock().await.events().history().cloned().collect()
}

fn type_names(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind.type_name()).collect()
}

const GPIO_SCRIPT: &str = r#"
echo '@@HW {"id":1,"call":"setmode","mode":"BCM"}'
read reply
echo '@@HW {"id":2,"call":"setup","pin":17,"mode":"OUT"}'
read reply
echo '@@HW {"id":3,"call":"output","pin":17,"value":1}'
read reply
echo "done $reply"
"#;

#[tokio::test]
async fn test_hardware_calls_precede_completion() {
    let runner = SandboxRunner::new(shell_config(10));
    let model = shared_model();
    let (_stop_tx, stop_rx) = oneshot::channel();
    let outcome = runner.run(GPIO_SCRIPT, model.clone(), stop_rx).await;
    assert_eq!(outcome, ExecutionOutcome::Completed);

    let events = history(&model).await;
    assert_eq!(
        type_names(&events),
        vec![
            "execution_started",
            "gpio_setmode",
            "gpio_setup",
            "digital_output",
            "output",
            "execution_completed",
        ]
    );
    match &events[4].kind {
        EventKind::Output { content } => assert_eq!(content, r#"done {"id":3,"ok":null}"#),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(model.lock().await.gpio().pin(17).unwrap().value);
}

#[tokio::test]
async fn test_hardware_error_is_replied_not_fatal() {
    let runner = SandboxRunner::new(shell_config(10));
    let model = shared_model();
    let (_stop_tx, stop_rx) = oneshot::channel();
    let script = r#"
echo '@@HW {"id":1,"call":"output","pin":17,"value":1}'
read reply
echo "$reply" >&2
"#;
    assert_eq!(runner.run(script, model.clone(), stop_rx).await, ExecutionOutcome::Completed);
    let events = history(&model).await;
    match &events[1].kind {
        EventKind::Log { content } => assert!(content.contains("PrerequisiteError")),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_is_terminal() {
    let runner = SandboxRunner::new(shell_config(1));
    let model = shared_model();
    let (_stop_tx, stop_rx) = oneshot::channel();
    let outcome = runner.run("echo tick\nsleep 5\necho late", model.clone(), stop_rx).await;
    assert_eq!(outcome, ExecutionOutcome::TimedOut);

    let last_seq = model.lock().await.events().last_seq();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let events = history(&model).await;
    assert_eq!(model.lock().await.events().last_seq(), last_seq);
    assert_eq!(type_names(&events), vec!["execution_started", "output", "error"]);
}

#[tokio::test]
async fn test_nonzero_exit_reports_failure() {
    let runner = SandboxRunner::new(shell_config(10));
    let model = shared_model();
    let (_stop_tx, stop_rx) = oneshot::channel();
    let outcome = runner.run("exit 3", model.clone(), stop_rx).await;
    assert_eq!(outcome, ExecutionOutcome::Failed { exit_code: Some(3) });

    let events = history(&model).await;
    assert_eq!(type_names(&events), vec!["execution_started", "error", "execution_completed"]);
    match &events[2].kind {
        EventKind::ExecutionCompleted { success, exit_code, .. } => {
            assert!(!success);
            assert_eq!(*exit_code, Some(3));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_stop_kills_the_run() {
    let runner = SandboxRunner::new(shell_config(10));
    let model = shared_model();
    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = {
        let model = model.clone();
        tokio::spawn(async move { runner.run("sleep 5", model, stop_rx).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    stop_tx.send(()).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert_eq!(outcome, ExecutionOutcome::Stopped);
    let events = history(&model).await;
    assert!(matches!(events.last().unwrap().kind, EventKind::ExecutionStopped { .. }));
}

#[tokio::test]
async fn test_empty_code_is_rejected() {
    let runner = SandboxRunner::new(shell_config(10));
    let model = shared_model();
    let (_stop_tx, stop_rx) = oneshot::channel();
    assert_eq!(runner.run("  ", model.clone(), stop_rx).await, ExecutionOutcome::Rejected);
    assert_eq!(type_names(&history(&model).await), vec!["error"]);
}

#[tokio::test]
async fn test_session_refuses_concurrent_runs() {
    let mut config = Config::default();
    config.sandbox = shell_config(10);
    config.session.tick_interval_ms = 0;
    let manager = SessionManager::new(config);
    let session = manager.open(Some("busy".into())).await;

    session.execute("sleep 5".into()).await.unwrap();
    assert!(session.execute("echo again".into()).await.is_err());
    assert_eq!(session.stop().await, Some(ExecutionOutcome::Stopped));

    session.execute("echo again".into()).await.unwrap();
    assert_eq!(session.wait_for_execution().await, Some(ExecutionOutcome::Completed));
    manager.teardown("busy").await;
}

fn outputs(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::Output { content } => Some(content.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_next_run_starts_from_a_clean_board() {
    let runner = SandboxRunner::new(shell_config(10));
    let model = shared_model();
    let first = r#"
echo '@@HW {"id":1,"call":"setmode","mode":"BCM"}'
read reply
echo '@@HW {"id":2,"call":"setwarnings","flag":false}'
read reply
echo '@@HW {"id":3,"call":"spi_open","bus":0,"device":0}'
read reply
"#;
    let (_stop_tx, stop_rx) = oneshot::channel();
    assert_eq!(runner.run(first, model.clone(), stop_rx).await, ExecutionOutcome::Completed);

    let second = r#"
echo '@@HW {"id":1,"call":"setup","pin":17,"mode":"OUT"}'
read reply
echo "R1 $reply"
echo '@@HW {"id":2,"call":"spi_xfer","bus":0,"device":0,"data":[1,128,0]}'
read reply
echo "R2 $reply"
"#;
    let (_stop_tx, stop_rx) = oneshot::channel();
    assert_eq!(runner.run(second, model.clone(), stop_rx).await, ExecutionOutcome::Completed);

    let printed = outputs(&history(&model).await);
    assert_eq!(printed.len(), 2);
    assert!(printed[0].starts_with("R1 ") && printed[0].contains("PrerequisiteError"), "{}", printed[0]);
    assert!(printed[1].starts_with("R2 ") && printed[1].contains("NotConfiguredError"), "{}", printed[1]);

    let guard = model.lock().await;
    assert_eq!(guard.gpio().numbering(), None);
    assert!(guard.gpio().warnings());
    assert!(guard.spi().devices().all(|d| !d.open));
}

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

const BLINK_SCRIPT: &str = r#"
import RPi.GPIO as GPIO
import spidev

GPIO.setmode(GPIO.BCM)
GPIO.setup(17, GPIO.OUT)
GPIO.output(17, GPIO.HIGH)

GPIO.setup(27, GPIO.IN, pull_up_down=GPIO.PUD_UP)
print("input", GPIO.input(27))

try:
    GPIO.output(27, GPIO.LOW)
except Exception as e:
    print("raised", type(e).__name__)

try:
    spidev.SpiDev().xfer([1, 128, 0])
except Exception as e:
    print("raised", type(e).__name__)

try:
    GPIO.setup(99, GPIO.OUT)
except ValueError as e:
    print("raised", type(e).__name__)
"#;

#[tokio::test]
async fn test_bridge_blink_scenario() {
    if !python_available() {
        eprintln!("python3 not found, skipping bridge test");
        return;
    }
    let runner = SandboxRunner::new(SandboxConfig::default());
    let model = shared_model();
    let (_stop_tx, stop_rx) = oneshot::channel();
    let outcome = runner.run(BLINK_SCRIPT, model.clone(), stop_rx).await;
    let events = history(&model).await;
    assert_eq!(outcome, ExecutionOutcome::Completed, "{events:?}");

    let names = type_names(&events);
    assert_eq!(
        &names[..4],
        &["execution_started", "gpio_setmode", "gpio_setup", "digital_output"]
    );
    assert_eq!(names.last(), Some(&"execution_completed"));
    assert_eq!(
        outputs(&events),
        vec!["input 1", "raised ModeError", "raised NotConfiguredError", "raised ValidationError"]
    );
    assert!(model.lock().await.gpio().pin(17).unwrap().value);
}
