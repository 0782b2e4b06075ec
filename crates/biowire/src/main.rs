mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "biowire", version, about = "Biofeedback telemetry protocol CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_chat() {
        let cli = Cli::try_parse_from(["biowire", "send", "--port", "12000", "--chat", "hello"])
            .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.port, 12000);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.chat.as_deref(), Some("hello"));
    }

    #[test]
    fn send_collects_repeated_settings() {
        let cli = Cli::try_parse_from([
            "biowire",
            "send",
            "--setting",
            "gain=4",
            "--setting",
            "mode=calm",
        ])
        .expect("settings should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.setting, vec!["gain=4", "mode=calm"]);
    }

    #[test]
    fn rejects_conflicting_messages() {
        let err = Cli::try_parse_from([
            "biowire",
            "send",
            "--chat",
            "hello",
            "--sensors",
            "1,2,3,4",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn send_requires_a_message() {
        let err = Cli::try_parse_from(["biowire", "send"]).expect_err("message is required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_serve_with_global_format() {
        let cli = Cli::try_parse_from([
            "biowire", "serve", "--port", "0", "--count", "2", "--format", "json",
        ])
        .expect("serve args should parse");

        assert_eq!(cli.format, Some(OutputFormat::Json));
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, Some(0));
        assert_eq!(args.count, Some(2));
        assert_eq!(args.host, "0.0.0.0");
    }
}
