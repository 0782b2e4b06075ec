//! Sensor client: streams a few synthetic readings to a monitoring server.
//!
//! Run with:
//!   cargo run --example monitor-server
//!   cargo run --example sensor-client

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use biowire::frame::SensorsData;
use biowire::session::{ClientSession, Dispatcher, SessionConfig, SessionEvents};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut dispatcher = Dispatcher::new();
    dispatcher.on_chat(|text| eprintln!("server says: {text}"));

    let client = ClientSession::new(
        SessionConfig::named("Example sensor rig"),
        Arc::new(dispatcher),
        SessionEvents::new(),
    );
    let server = client.connect("127.0.0.1")?;
    eprintln!("Connected to {}", server.name);

    client.send_chat_message("starting session");
    for step in 0..10u32 {
        let t = f64::from(step);
        let reading = SensorsData::new(36.4 + t * 0.01, 1200.0 - t * 5.0, 0.02, 68.0 + t);
        if !client.send_sensors_data(reading) {
            eprintln!("server went away");
            break;
        }
        thread::sleep(Duration::from_millis(200));
    }

    client.flush(Duration::from_secs(1));
    client.disconnect();
    Ok(())
}
