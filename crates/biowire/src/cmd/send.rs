use std::fs;
use std::sync::Arc;
use std::time::Duration;

use biowire_frame::{Message, SensorsData, Settings};
use biowire_session::{parse_duration, ClientSession, Dispatcher, SessionConfig, SessionEvents};
use tracing::debug;

use crate::cmd::SendArgs;
use crate::exit::{
    io_error, session_error, CliError, CliResult, DATA_INVALID, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_sent, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    let message = resolve_message(&args)?;
    let kind = message.kind();

    let config = SessionConfig {
        port: args.port,
        handshake_timeout: timeout,
        ..SessionConfig::named(args.name.clone())
    };
    let client = ClientSession::new(config, Arc::new(Dispatcher::new()), SessionEvents::new());
    let server = client
        .connect_with_port(&args.host, args.port)
        .map_err(|err| session_error("connect failed", err))?;

    let queued = match message {
        Message::Chat(text) => client.send_chat_message(text.as_str()),
        Message::Sensors(data) => client.send_sensors_data(data),
        Message::Voice(window) => client.send_voice_window(&window),
        Message::Settings(settings) => client.send_settings(&settings),
        _ => false,
    };
    if !queued {
        client.disconnect();
        return Err(CliError::new(
            DATA_INVALID,
            format!("{} message was rejected", kind.name()),
        ));
    }

    if !client.flush(timeout) {
        client.disconnect();
        return Err(CliError::new(
            TIMEOUT,
            format!("{} message not written within {timeout:?}", kind.name()),
        ));
    }
    client.disconnect();
    debug!(?kind, server = %server.name, "message sent");

    print_sent(kind, &server.name, format);
    Ok(SUCCESS)
}

fn resolve_message(args: &SendArgs) -> CliResult<Message> {
    if let Some(text) = &args.chat {
        if text.is_empty() {
            return Err(CliError::new(USAGE, "--chat text must not be empty"));
        }
        return Ok(Message::Chat(text.clone()));
    }
    if let Some(readings) = &args.sensors {
        return parse_sensors(readings).map(Message::Sensors);
    }
    if let Some(path) = &args.voice_file {
        let window = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        if window.is_empty() {
            return Err(CliError::new(
                DATA_INVALID,
                format!("{} is empty", path.display()),
            ));
        }
        return Ok(Message::Voice(window.into()));
    }
    if !args.setting.is_empty() {
        let mut settings = Settings::new();
        for entry in &args.setting {
            let (key, value) = parse_setting(entry)?;
            settings.insert(key, value);
        }
        return Ok(Message::Settings(settings));
    }
    Err(CliError::new(USAGE, "nothing to send"))
}

fn parse_sensors(input: &str) -> CliResult<SensorsData> {
    let values = input
        .split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| CliError::new(USAGE, format!("invalid sensor reading: {part:?}")))
        })
        .collect::<CliResult<Vec<f64>>>()?;

    match values[..] {
        [temperature, skin_resistance, motion, pulse] => Ok(SensorsData::new(
            temperature,
            skin_resistance,
            motion,
            pulse,
        )),
        _ => Err(CliError::new(
            USAGE,
            format!("--sensors expects 4 readings, got {}", values.len()),
        )),
    }
}

fn parse_setting(input: &str) -> CliResult<(&str, &str)> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => Err(CliError::new(
            USAGE,
            format!("--setting expects KEY=VALUE, got {input:?}"),
        )),
    }
}

fn parse_timeout(input: &str) -> CliResult<Duration> {
    let timeout = parse_duration(input)
        .map_err(|err| CliError::new(USAGE, format!("invalid --timeout: {err}")))?;
    if timeout.is_zero() {
        return Err(CliError::new(USAGE, "--timeout must be greater than zero"));
    }
    Ok(timeout)
}
