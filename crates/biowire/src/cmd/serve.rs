use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use biowire_frame::{KindCode, Message};
use biowire_session::{Dispatcher, ServerSession, SessionConfig, SessionEvents};
use tracing::{info, warn};

use crate::cmd::ServeArgs;
use crate::exit::{io_error, session_error, CliError, CliResult, DATA_INVALID, INTERNAL, SUCCESS};
use crate::output::{print_message, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum Event {
    Peer(String),
    Disconnected,
    Message(Message),
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = load_config(&args)?;
    let (tx, rx) = mpsc::channel();

    let server = ServerSession::new(config, Arc::new(dispatcher(&tx)), events(&tx));
    drop(tx);
    server
        .bind(&args.host)
        .map_err(|err| session_error("bind failed", err))?;
    if let Some(addr) = server.local_addr() {
        info!(%addr, name = %server.config().display_name, "monitoring server ready");
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut peer = String::new();
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Event::Peer(name)) => peer = name,
            Ok(Event::Disconnected) => {
                info!(peer = %peer, "peer disconnected");
                peer.clear();
            }
            Ok(Event::Message(message)) => {
                print_message(&message, &peer, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    server.stop();
    Ok(SUCCESS)
}

fn load_config(args: &ServeArgs) -> CliResult<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
            SessionConfig::from_json(&text).map_err(|err| {
                CliError::new(
                    DATA_INVALID,
                    format!("invalid config {}: {err}", path.display()),
                )
            })?
        }
        None => SessionConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(name) = &args.name {
        config.display_name = name.clone();
    }
    Ok(config)
}

fn dispatcher(tx: &Sender<Event>) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    for kind in KindCode::WIRE.into_iter().filter(|kind| !kind.is_handshake()) {
        let tx = tx.clone();
        dispatcher.on(kind, move |message| {
            let _ = tx.send(Event::Message(message.clone()));
        });
    }
    dispatcher
}

fn events(tx: &Sender<Event>) -> SessionEvents {
    let mut events = SessionEvents::new();
    {
        let tx = tx.clone();
        events.on_peer_connected(move |peer| {
            let _ = tx.send(Event::Peer(peer.name.clone()));
        });
    }
    {
        let tx = tx.clone();
        events.on_disconnected(move || {
            let _ = tx.send(Event::Disconnected);
        });
    }
    events.on_error(|err| warn!(error = %err, "peer session failed"));
    events
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
