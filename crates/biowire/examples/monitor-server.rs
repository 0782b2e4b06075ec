//! Minimal monitoring server: prints chat and sensor traffic and answers
//! every chat message.
//!
//! Run with:
//!   cargo run --example monitor-server
//!
//! In another terminal:
//!   cargo run --features cli -- send --chat "hello"

use std::sync::mpsc;
use std::sync::Arc;

use biowire::session::{Dispatcher, ServerSession, SessionConfig, SessionEvents};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (tx, rx) = mpsc::channel();

    let mut dispatcher = Dispatcher::new();
    dispatcher
        .on_chat(move |text| {
            let _ = tx.send(text.to_string());
        })
        .on_sensors(|data| {
            eprintln!(
                "sensors: temperature={} skin_resistance={} motion={} pulse={}",
                data.temperature, data.skin_resistance, data.motion, data.pulse
            );
        });

    let mut events = SessionEvents::new();
    events
        .on_peer_connected(|peer| eprintln!("client connected: {}", peer.name))
        .on_disconnected(|| eprintln!("client disconnected"));

    let server = ServerSession::new(
        SessionConfig::named("Example monitor"),
        Arc::new(dispatcher),
        events,
    );
    server.bind("127.0.0.1")?;
    if let Some(addr) = server.local_addr() {
        eprintln!("Listening on {addr}");
    }

    for text in rx {
        eprintln!("chat: {text}");
        server.send_chat_message(format!("received: {text}").as_str());
    }
    Ok(())
}
