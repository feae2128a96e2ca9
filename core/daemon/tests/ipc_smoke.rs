use sleepguard_protocol::{Method, Request, Response, PROTOCOL_VERSION};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn write_config(home: &Path, max_denials: u32) {
    let dir = home.join(".sleepguard");
    std::fs::create_dir_all(&dir).expect("create config dir");
    let config = format!(
        "mode = \"push_edge\"\nmax_denials = {}\ninput_state_path = \"{}\"\n",
        max_denials,
        input_state_path(home).display()
    );
    std::fs::write(dir.join("config.toml"), config).expect("write config");
}

fn input_state_path(home: &Path) -> PathBuf {
    home.join("input-state")
}

fn set_input(home: &Path, bitmask: u32) {
    std::fs::write(input_state_path(home), format!("0x{:08x}\n", bitmask))
        .expect("write input state");
}

fn spawn_daemon(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_sleepguard-daemon"))
        .env("HOME", home)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn sleepguard-daemon")
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".sleepguard").join("guard.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("failed to connect to daemon socket");
    serde_json::to_writer(&mut stream, &request).expect("failed to serialize request");
    stream.write_all(b"\n").expect("failed to write request");
    stream.flush().expect("failed to flush request");
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("failed to parse response JSON")
}

fn power_event(socket: &Path, event: &str) -> Response {
    send_request(
        socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::PowerEvent,
            id: Some(format!("evt-{}", event)),
            params: Some(serde_json::json!({ "event": event })),
        },
    )
}

fn event_status(response: &Response) -> String {
    response
        .data
        .as_ref()
        .and_then(|data| data.get("status"))
        .and_then(|value| value.as_str())
        .unwrap_or("missing")
        .to_string()
}

const HOME_BUTTON: u32 = 0x0001_0000;

#[test]
fn daemon_answers_suspend_queries_end_to_end() {
    let home = TempDir::new().expect("failed to create temp HOME");
    write_config(home.path(), 3);
    set_input(home.path(), 0);

    let socket = socket_path(home.path());
    let _guard = DaemonGuard {
        child: spawn_daemon(home.path()),
    };
    wait_for_socket(&socket, Duration::from_secs(2));

    let health = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetHealth,
            id: Some("health-check".to_string()),
            params: None,
        },
    );
    assert!(health.ok, "health response was not ok");

    // Press without the override combo: the veto arms and queries bounce.
    let press = power_event(&socket, "switch_pressed");
    assert!(press.ok);
    assert_eq!(event_status(&press), "accept");

    for _ in 0..3 {
        let query = power_event(&socket, "suspend_query");
        assert_eq!(event_status(&query), "busy");
    }

    // Fourth query hits the denial ceiling and is forced through.
    let forced = power_event(&socket, "suspend_query");
    assert_eq!(event_status(&forced), "accept");

    let status = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetStatus,
            id: Some("status-check".to_string()),
            params: None,
        },
    );
    assert!(status.ok, "status response was not ok");
    let data = status.data.expect("status payload");
    assert_eq!(
        data.get("mode").and_then(|value| value.as_str()),
        Some("push_edge")
    );
    let policy = data.get("policy").expect("policy snapshot");
    assert_eq!(
        policy.get("forced_allows").and_then(|value| value.as_u64()),
        Some(1)
    );
    assert_eq!(
        policy
            .get("consecutive_denials")
            .and_then(|value| value.as_u64()),
        Some(0)
    );

    // Press while holding the override combo: suspend goes straight through.
    set_input(home.path(), HOME_BUTTON);
    let press = power_event(&socket, "switch_pressed");
    assert_eq!(event_status(&press), "accept");
    let query = power_event(&socket, "suspend_query");
    assert_eq!(event_status(&query), "accept");

    // A release through any path clears the veto.
    set_input(home.path(), 0);
    power_event(&socket, "switch_pressed");
    let release = power_event(&socket, "switch_released");
    assert_eq!(event_status(&release), "accept");
    let query = power_event(&socket, "suspend_query");
    assert_eq!(event_status(&query), "accept");
}

#[test]
fn shutdown_method_stops_daemon_and_removes_socket() {
    let home = TempDir::new().expect("failed to create temp HOME");
    write_config(home.path(), 10);
    set_input(home.path(), 0);

    let socket = socket_path(home.path());
    let mut child = spawn_daemon(home.path());
    wait_for_socket(&socket, Duration::from_secs(2));

    let response = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::Shutdown,
            id: Some("shutdown".to_string()),
            params: None,
        },
    );
    assert!(response.ok, "shutdown response was not ok");

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match child.try_wait().expect("try_wait") {
            Some(_status) => break,
            None if Instant::now() < deadline => sleep(Duration::from_millis(25)),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                panic!("daemon did not exit after shutdown request");
            }
        }
    }

    assert!(!socket.exists(), "socket file should be removed on shutdown");
}
