use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a monitoring server and print received messages.
    Serve(ServeArgs),
    /// Connect as a sensor client and send a single message.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
    /// Port to listen on. Overrides the config file.
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
    /// Display name announced to clients. Overrides the config file.
    #[arg(long)]
    pub name: Option<String>,
    /// JSON session config file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
#[command(group(
    clap::ArgGroup::new("message")
        .required(true)
        .args(["chat", "sensors", "voice_file", "setting"])
))]
pub struct SendArgs {
    /// Server host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Server port.
    #[arg(long, short = 'p', default_value_t = biowire_transport::PROTOCOL_PORT)]
    pub port: u16,
    /// Display name announced to the server.
    #[arg(long, default_value = "biowire-cli")]
    pub name: String,
    /// Chat text.
    #[arg(long)]
    pub chat: Option<String>,
    /// Sensor readings as temperature,skin_resistance,motion,pulse.
    #[arg(long, value_name = "T,S,M,P")]
    pub sensors: Option<String>,
    /// Send the file contents as one voice window.
    #[arg(long, value_name = "FILE")]
    pub voice_file: Option<PathBuf>,
    /// Setting as KEY=VALUE. Repeat for several settings.
    #[arg(long, value_name = "KEY=VALUE")]
    pub setting: Vec<String>,
    /// Maximum time to wait for the message to be written (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
