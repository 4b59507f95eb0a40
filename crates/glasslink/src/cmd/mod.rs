use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use data_encoding::HEXLOWER_PERMISSIVE;
use glasslink_frame::CommandType;

use crate::exit::{io_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod encode;
pub mod parse;
pub mod plan;
pub mod upload_check;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode a command and print the frame.
    Encode(EncodeArgs),
    /// Run bytes through the frame parser and print decoded messages.
    Parse(ParseArgs),
    /// Validate a hex upload file and summarise its frames.
    UploadCheck(UploadCheckArgs),
    /// Dry-run a payload through the sender and print the write schedule.
    Plan(PlanArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Encode(args) => encode::run(args, format),
        Command::Parse(args) => parse::run(args, format),
        Command::UploadCheck(args) => upload_check::run(args, format),
        Command::Plan(args) => plan::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Command name, e.g. `txt`, `cfgWrite`, `power`.
    pub command: CommandType,
    /// Command parameters in wire order.
    #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
    pub args: Vec<String>,
    /// Tag the frame with this correlation id.
    #[arg(long, value_name = "ID")]
    pub id: Option<u64>,
    /// Use these pre-encoded parameter bytes (hex) instead of `args`.
    #[arg(long, value_name = "HEX", conflicts_with = "args")]
    pub params: Option<String>,
    /// Left-pad `layoutDisplay` text to this width.
    #[arg(long, value_name = "WIDTH")]
    pub pad_to: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Hex input.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub hex: Option<String>,
    /// Read binary input from file.
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Feed the parser this many bytes at a time.
    #[arg(long, default_value = "20")]
    pub chunk: usize,
}

#[derive(Args, Debug)]
pub struct UploadCheckArgs {
    /// Hex upload file, one chunk per line.
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Hex upload file, one chunk per line.
    #[arg(conflicts_with = "hex", required_unless_present = "hex")]
    pub file: Option<PathBuf>,
    /// A single hex chunk.
    #[arg(long)]
    pub hex: Option<String>,
    /// Largest single write.
    #[arg(long, default_value = "20")]
    pub mtu: usize,
    /// Bytes taken per top-level slice. Default: the MTU.
    #[arg(long)]
    pub slice_size: Option<usize>,
    /// Pause after each write (e.g. 20ms, 1s).
    #[arg(long, default_value = "0ms")]
    pub write_timeout: String,
    /// Use unacknowledged writes.
    #[arg(long)]
    pub without_response: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Decode hex, ignoring whitespace and case.
pub fn decode_hex(input: &str) -> CliResult<Vec<u8>> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    HEXLOWER_PERMISSIVE
        .decode(compact.as_bytes())
        .map_err(|err| CliError::usage(format!("invalid hex: {err}")))
}

pub fn read_file(path: &Path) -> CliResult<Vec<u8>> {
    fs::read(path).map_err(|err| io_error(&format!("failed reading {}", path.display()), err))
}

pub fn read_text(path: &Path) -> CliResult<String> {
    fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))
}

/// Parse `250ms`, `2s` or a bare number of seconds. Zero is allowed.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
