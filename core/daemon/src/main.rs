//! sleepguard daemon entrypoint.
//!
//! A resident guard that answers the host's suspend queries. The unix
//! socket is the host-facing event bridge: each connection carries one
//! JSON request (a power event or a diagnostics query) and gets one JSON
//! response, with the accept/busy status for suspend queries delivered
//! synchronously in the reply.

use fs_err as fs;
use std::env;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sleepguard_core::config::{self, GuardConfig, ObserverMode};
use sleepguard_core::{Guard, HandlerStatus, PowerEvent, SuspendBus, SuspendPolicyEngine};
use sleepguard_protocol::{
    parse_power_event, ErrorInfo, Method, PowerEventKind, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};

mod dispatcher;
mod sampler;

use dispatcher::CallbackTable;
use sampler::FileInputSampler;

const SOCKET_NAME: &str = "guard.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const ACCEPT_POLL_INTERVAL_MS: u64 = 50;
const DEFAULT_INPUT_STATE_RELATIVE_PATH: &str = ".sleepguard/input-state";

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

struct DaemonContext {
    table: Arc<CallbackTable>,
    engine: Arc<SuspendPolicyEngine>,
    mode: ObserverMode,
    started_at: String,
}

fn main() {
    init_logging();
    install_signal_handlers();

    let config = match config::load(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load guard config; using defaults");
            GuardConfig::default()
        }
    };

    let socket_path = match socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };
    if let Err(err) = listener.set_nonblocking(true) {
        error!(error = %err, "Failed to make daemon socket non-blocking");
        std::process::exit(1);
    }

    let input_path = match input_state_path(&config) {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve input state path");
            std::process::exit(1);
        }
    };

    let table = Arc::new(CallbackTable::new());
    let sampler = Arc::new(FileInputSampler::new(input_path));

    // Registration must complete before any suspend event can arrive; a
    // failure here leaves nothing registered, so the guard fails safely by
    // simply not providing protection.
    let bus: Arc<dyn SuspendBus> = table.clone();
    let guard = match Guard::start(bus, sampler, &config) {
        Ok(guard) => guard,
        Err(err) => {
            error!(error = %err, "Failed to start suspend guard");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        slot = guard.slot(),
        mode = mode_str(config.mode),
        "sleepguard daemon started"
    );

    let context = Arc::new(DaemonContext {
        table: Arc::clone(&table),
        engine: Arc::clone(guard.engine()),
        mode: config.mode,
        started_at: chrono::Utc::now().to_rfc3339(),
    });

    accept_loop(&listener, &context);

    // Teardown order matters: unregister from the bus first so no further
    // query can be routed to the handler, then wake and join the worker.
    if let Err(err) = guard.stop() {
        error!(error = %err, "Guard teardown reported an error");
    }
    if let Err(err) = fs::remove_file(&socket_path) {
        warn!(error = %err, "Failed to remove socket on shutdown");
    }
    info!("sleepguard daemon stopped");
}

fn accept_loop(listener: &UnixListener, context: &Arc<DaemonContext>) {
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let context = Arc::clone(context);
                thread::spawn(move || handle_connection(stream, context));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                if SHUTDOWN.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep(Duration::from_millis(ACCEPT_POLL_INTERVAL_MS));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, request_shutdown as libc::sighandler_t);
        libc::signal(libc::SIGTERM, request_shutdown as libc::sighandler_t);
    }
}

fn init_logging() {
    let debug_enabled = env::var("SLEEPGUARD_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn sleepguard_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".sleepguard"))
}

fn socket_path() -> Result<PathBuf, String> {
    Ok(sleepguard_dir()?.join(SOCKET_NAME))
}

fn input_state_path(config: &GuardConfig) -> Result<PathBuf, String> {
    match &config.input_state_path {
        Some(path) => Ok(path.clone()),
        None => {
            let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
            Ok(home.join(DEFAULT_INPUT_STATE_RELATIVE_PATH))
        }
    }
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, context: Arc<DaemonContext>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &context);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut line = String::new();
    let mut reader = BufReader::new((&*stream).take((MAX_REQUEST_BYTES + 1) as u64));
    match reader.read_line(&mut line) {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            return Err(ErrorInfo::new("read_timeout", "request timed out"));
        }
        Err(err) => {
            return Err(ErrorInfo::new(
                "read_error",
                format!("failed to read request: {}", err),
            ));
        }
    }

    if line.len() > MAX_REQUEST_BYTES {
        return Err(ErrorInfo::new(
            "request_too_large",
            "request exceeded maximum size",
        ));
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_str(trimmed).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, context: &DaemonContext) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "started_at": context.started_at,
            }),
        ),
        Method::GetStatus => {
            let snapshot = context.engine.policy().snapshot();
            match serde_json::to_value(&snapshot) {
                Ok(policy) => Response::ok(
                    request.id,
                    serde_json::json!({
                        "mode": mode_str(context.mode),
                        "occupied_slots": context.table.occupied_slots(),
                        "policy": policy,
                    }),
                ),
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize policy state: {}", err),
                ),
            }
        }
        Method::PowerEvent => handle_power_event(request, context),
        Method::Shutdown => {
            info!("Shutdown requested over the socket");
            SHUTDOWN.store(true, Ordering::SeqCst);
            Response::ok(request.id, serde_json::json!({ "stopping": true }))
        }
    }
}

fn handle_power_event(request: Request, context: &DaemonContext) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "event payload is required"),
    };

    let envelope = match parse_power_event(params) {
        Ok(envelope) => envelope,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    let event = map_event(envelope.event);
    info!(event = ?envelope.event, origin = ?envelope.origin, "Power event received");

    let status = context.table.dispatch(event);
    let status_str = match status {
        HandlerStatus::Accept => "accept",
        HandlerStatus::Busy => "busy",
    };

    Response::ok(
        request.id,
        serde_json::json!({
            "status": status_str,
            "veto_active": context.engine.policy().veto_active(),
        }),
    )
}

fn map_event(kind: PowerEventKind) -> PowerEvent {
    match kind {
        PowerEventKind::SuspendQuery => PowerEvent::SuspendQuery,
        PowerEventKind::SuspendCancelled => PowerEvent::SuspendCancelled,
        PowerEventKind::SuspendStarted => PowerEvent::SuspendStarted,
        PowerEventKind::SwitchPressed => PowerEvent::SwitchPressed,
        PowerEventKind::SwitchReleased => PowerEvent::SwitchReleased,
    }
}

fn mode_str(mode: ObserverMode) -> &'static str {
    match mode {
        ObserverMode::PushEdge => "push_edge",
        ObserverMode::HoldPoll => "hold_poll",
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
