mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "glasslink", version, about = "Frame tools for BLE smart glasses")]
struct Cli {
    /// Output format. Default: table on a terminal, JSON otherwise.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "warn",
        env = "GLASSLINK_LOG",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
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
    fn parses_encode_with_negative_parameters() {
        let cli = Cli::try_parse_from(["glasslink", "encode", "shift", "-4", "2"])
            .expect("encode args should parse");
        match cli.command {
            Command::Encode(args) => {
                assert_eq!(args.command, glasslink_frame::CommandType::Shift);
                assert_eq!(args.args, ["-4", "2"]);
            }
            other => panic!("expected encode, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_command_name() {
        let err = Cli::try_parse_from(["glasslink", "encode", "teleport"])
            .expect_err("unknown command should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parse_requires_input() {
        let err = Cli::try_parse_from(["glasslink", "parse"]).expect_err("input is required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let err = Cli::try_parse_from(["glasslink", "parse", "--hex", "FF", "--file", "x.bin"])
            .expect_err("conflicting inputs should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_plan_flags() {
        let cli = Cli::try_parse_from([
            "glasslink",
            "plan",
            "--hex",
            "FF010005AA",
            "--mtu",
            "64",
            "--write-timeout",
            "5ms",
            "--without-response",
        ])
        .expect("plan args should parse");
        assert!(matches!(cli.command, Command::Plan(ref args) if args.mtu == 64));
    }
}
