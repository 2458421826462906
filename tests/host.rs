#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use procbus::{
    Config, Event, EventKind, HostError, HostManager, Inline, LaunchParams, ProcessSpec, State,
};
use tokio::sync::broadcast::error::TryRecvError;

fn echo_args() -> ProcessSpec {
    ProcessSpec::new("sh").args(["-c", "echo \"$@\"", "sh"])
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => out.push(ev),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return out,
        }
    }
}

#[tokio::test]
async fn child_receives_launch_parameters() {
    let host = HostManager::bind(0, Arc::new(Inline), Config::default())
        .await
        .unwrap();
    let sup = host.supervise(echo_args()).unwrap();
    let mut rx = sup.subscribe();
    let done = sup.when_state_is(State::ExitedSuccessfully, None);

    sup.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), done)
        .await
        .unwrap()
        .unwrap();

    let line = drain(&mut rx)
        .into_iter()
        .find(|e| e.kind == EventKind::OutputLine)
        .and_then(|e| e.line)
        .expect("echoed arguments");
    let tokens = std::iter::once("sh").chain(line.split_whitespace());
    let params = LaunchParams::parse(tokens).unwrap();

    assert_eq!(params.parent_port, host.server().port());
    assert_eq!(params.parent_pid, std::process::id());
    assert_eq!(params.child_port, sup.client().partner_port());
    assert_ne!(params.child_port, params.parent_port);

    host.dispose().await;
}

#[tokio::test]
async fn registers_children_by_program_name() {
    let host = HostManager::bind(0, Arc::new(Inline), Config::default())
        .await
        .unwrap();

    let sh = host.supervise(echo_args()).unwrap();
    let sleeper = host.supervise(ProcessSpec::new("/bin/sleep").arg("1")).unwrap();

    let mut names = host.names();
    names.sort();
    assert_eq!(names, vec!["sh", "sleep"]);
    assert!(Arc::ptr_eq(&host.get("sh").unwrap(), &sh));
    assert!(host.get("missing").is_none());
    assert_ne!(sh.client().partner_port(), sleeper.client().partner_port());

    let err = host.supervise(echo_args()).err().unwrap();
    assert!(matches!(err, HostError::Duplicate(ref name) if name == "sh"));

    host.dispose().await;
}

#[tokio::test]
async fn dispose_stops_running_children_once() {
    let cfg = Config {
        stop_timeout: Duration::from_millis(200),
        ..Config::default()
    };
    let host = HostManager::bind(0, Arc::new(Inline), cfg).await.unwrap();
    let spec = ProcessSpec::new("sleep")
        .arg("30")
        .run_type(procbus::RunType::NonTerminating);
    let sup = host.supervise(spec).unwrap();
    let port = host.server().port();

    sup.start().await.unwrap();
    assert_eq!(sup.current_state(), State::Running);

    tokio::time::timeout(Duration::from_secs(10), host.dispose())
        .await
        .unwrap();
    host.dispose().await;

    assert_eq!(sup.current_state(), State::ExitedKilled);
    assert!(host.names().is_empty());
    assert_eq!(host.server().port(), port);
}
