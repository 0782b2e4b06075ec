#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader, Read};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use biowire::frame::SensorsData;
use biowire::session::{ClientSession, Dispatcher, SessionConfig, SessionEvents};
use serde_json::Value;

fn free_port() -> u16 {
    let scratch = TcpListener::bind("127.0.0.1:0").expect("port lookup bind should succeed");
    scratch.local_addr().expect("port lookup has an address").port()
}

/// Start `biowire serve` and block until it reports that it is listening.
fn spawn_serve(port: u16, extra: &[&str]) -> Child {
    let mut child = Command::new(env!("CARGO_BIN_EXE_biowire"))
        .args(["--log-level", "info", "--format", "json", "serve"])
        .args(["--host", "127.0.0.1", "--port", &port.to_string()])
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve command should start");

    let stderr = child.stderr.take().expect("stderr is piped");
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next() {
            Some(Ok(line)) if line.contains("monitoring server ready") => break,
            Some(Ok(_)) => continue,
            _ => {
                let _ = child.kill();
                panic!("serve exited before it was ready");
            }
        }
    }
    thread::spawn(move || {
        for _ in lines {}
    });
    child
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> i32 {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().expect("child should be waitable") {
            return status.code().unwrap_or(-1);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("serve did not exit within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn stdout_json_lines(child: &mut Child) -> Vec<Value> {
    let mut stdout = String::new();
    child
        .stdout
        .take()
        .expect("stdout is piped")
        .read_to_string(&mut stdout)
        .expect("stdout should be readable");
    stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be json"))
        .collect()
}

#[test]
fn serve_prints_messages_from_a_client_session() {
    let port = free_port();
    let mut child = spawn_serve(port, &["--name", "Ward monitor", "--count", "2"]);

    let client = ClientSession::new(
        SessionConfig::named("Test rig"),
        Arc::new(Dispatcher::new()),
        SessionEvents::new(),
    );
    let server = client
        .connect_with_port("127.0.0.1", port)
        .expect("client should connect");
    assert_eq!(server.name, "Ward monitor");

    assert!(client.send_chat_message("Hello monitor"));
    assert!(client.send_sensors_data(SensorsData::new(36.6, 1250.0, 0.02, 72.0)));

    assert_eq!(wait_for_exit(&mut child, Duration::from_secs(10)), 0);
    let lines = stdout_json_lines(&mut child);
    assert_eq!(lines.len(), 2);

    assert_eq!(lines[0]["kind"], "CHAT");
    assert_eq!(lines[0]["peer"], "Test rig");
    assert_eq!(lines[0]["data"], "Hello monitor");
    assert_eq!(lines[0]["payload_size"], 13);

    assert_eq!(lines[1]["kind"], "SENSORS");
    assert_eq!(lines[1]["payload_size"], 32);
    assert_eq!(lines[1]["data"]["temperature"], 36.6);
    assert_eq!(lines[1]["data"]["pulse"], 72.0);
}

#[test]
fn send_command_delivers_settings_to_serve() {
    let port = free_port();
    let mut child = spawn_serve(port, &["--name", "Ward monitor", "--count", "1"]);

    let output = Command::new(env!("CARGO_BIN_EXE_biowire"))
        .args(["--log-level", "error", "--format", "json", "send"])
        .args(["--port", &port.to_string(), "--name", "Bench rig"])
        .args(["--setting", "gain=4", "--setting", "mode=calm"])
        .output()
        .expect("send should run");
    assert!(
        output.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let sent: Value = serde_json::from_slice(&output.stdout).expect("send output is json");
    assert_eq!(sent["sent"], "SETTINGS");
    assert_eq!(sent["server"], "Ward monitor");

    assert_eq!(wait_for_exit(&mut child, Duration::from_secs(10)), 0);
    let lines = stdout_json_lines(&mut child);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["kind"], "SETTINGS");
    assert_eq!(lines[0]["peer"], "Bench rig");
    assert_eq!(lines[0]["data"]["gain"], "4");
    assert_eq!(lines[0]["data"]["mode"], "calm");
}

#[test]
fn serve_on_busy_port_returns_3() {
    let holder = TcpListener::bind("127.0.0.1:0").expect("holder bind should succeed");
    let port = holder.local_addr().expect("holder has an address").port();

    let output = Command::new(env!("CARGO_BIN_EXE_biowire"))
        .args(["--log-level", "error", "serve", "--host", "127.0.0.1"])
        .args(["--port", &port.to_string()])
        .output()
        .expect("serve should run");

    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("bind failed"));
}
