use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use biowire_frame::{KindCode, Message, SENSORS_PAYLOAD_SIZE};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    kind: &'a str,
    payload_size: usize,
    peer: &'a str,
    data: Value,
    timestamp: String,
}

pub fn print_message(message: &Message, peer: &str, format: OutputFormat) {
    let kind = message.kind();
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                kind: kind.name(),
                payload_size: payload_size(message),
                peer,
                data: message_data(message),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "SIZE", "PEER", "CONTENT"])
                .add_row(vec![
                    kind.name().to_string(),
                    payload_size(message).to_string(),
                    peer.to_string(),
                    summary(message),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "kind={} ({}) size={} peer={} {}",
                kind.as_u8(),
                kind.name(),
                payload_size(message),
                peer,
                summary(message)
            );
        }
    }
}

/// Print the outcome of `biowire send`.
pub fn print_sent(kind: KindCode, server: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                json!({ "sent": kind.name(), "server": server, "timestamp": now_unix_seconds() })
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["SENT", "SERVER"])
                .add_row(vec![kind.name(), server]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("sent {} to {server}", kind.name()),
    }
}

fn payload_size(message: &Message) -> usize {
    match message {
        Message::Chat(text) | Message::ClientInfo(text) | Message::ServerInfo(text) => text.len(),
        Message::Voice(window) => window.len(),
        Message::Sensors(_) => SENSORS_PAYLOAD_SIZE,
        Message::Settings(_) | Message::ProtocolInfo(_) => message
            .encode()
            .map(|frame| frame.payload.len())
            .unwrap_or(0),
    }
}

fn message_data(message: &Message) -> Value {
    match message {
        Message::Chat(text) | Message::ClientInfo(text) | Message::ServerInfo(text) => {
            Value::String(text.clone())
        }
        Message::Voice(window) => json!({ "bytes": window.len() }),
        Message::Sensors(data) => serde_json::to_value(data).unwrap_or(Value::Null),
        Message::Settings(settings) => serde_json::to_value(settings).unwrap_or(Value::Null),
        Message::ProtocolInfo(info) => serde_json::to_value(info).unwrap_or(Value::Null),
    }
}

fn summary(message: &Message) -> String {
    match message {
        Message::Chat(text) | Message::ClientInfo(text) | Message::ServerInfo(text) => {
            text.clone()
        }
        Message::Voice(window) => format!("<voice {} bytes>", window.len()),
        Message::Sensors(data) => format!(
            "temperature={} skin_resistance={} motion={} pulse={}",
            data.temperature, data.skin_resistance, data.motion, data.pulse
        ),
        Message::Settings(settings) => settings
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(", "),
        Message::ProtocolInfo(info) => format!("{} {}", info.protocol, info.version),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
