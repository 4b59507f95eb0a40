use std::str::FromStr;

use bytes::Bytes;
use glasslink_frame::{BleConnectParams, Command, CommandType, CorrelationId};
use serde::Serialize;

use crate::cmd::{decode_hex, EncodeArgs};
use crate::exit::{frame_error, CliError, CliResult, SUCCESS};
use crate::output::{hex, print_json, print_raw, table, OutputFormat};

#[derive(Serialize)]
struct EncodedOutput {
    command: &'static str,
    command_id: u8,
    correlation_id: Option<u64>,
    size: usize,
    frame: String,
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let command = match &args.params {
        Some(params) => Command::Generic {
            command: args.command,
            params: Bytes::from(decode_hex(params)?),
        },
        None => build_command(args.command, &args.args, args.pad_to)?,
    };
    let correlation_id = args.id.map(CorrelationId);
    let frame = command
        .encode(correlation_id)
        .map_err(|err| frame_error("encode failed", err))?;
    tracing::debug!(command = %args.command, size = frame.len(), "encoded frame");

    match format {
        OutputFormat::Json => print_json(&EncodedOutput {
            command: args.command.name(),
            command_id: args.command.into(),
            correlation_id: args.id,
            size: frame.len(),
            frame: hex(&frame),
        }),
        OutputFormat::Table => {
            let mut table = table(["COMMAND", "ID", "CORRELATION", "SIZE", "FRAME"]);
            table.add_row(vec![
                args.command.name().to_string(),
                format!("0x{:02X}", u8::from(args.command)),
                args.id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                frame.len().to_string(),
                hex(&frame),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", hex(&frame)),
        OutputFormat::Raw => print_raw(&frame),
    }
    Ok(SUCCESS)
}

/// Positional command parameters, consumed in wire order.
struct Params<'a> {
    command: CommandType,
    args: std::slice::Iter<'a, String>,
}

impl Params<'_> {
    fn next<T: FromStr>(&mut self, name: &str) -> CliResult<T> {
        let raw = self.args.next().ok_or_else(|| {
            CliError::usage(format!("{}: missing parameter <{name}>", self.command))
        })?;
        raw.parse().map_err(|_| {
            CliError::usage(format!("{}: invalid <{name}>: {raw}", self.command))
        })
    }

    fn switch(&mut self, name: &str) -> CliResult<bool> {
        let raw: String = self.next(name)?;
        match raw.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Ok(true),
            "off" | "false" | "0" => Ok(false),
            _ => Err(CliError::usage(format!(
                "{}: <{name}> must be on or off, got {raw}",
                self.command
            ))),
        }
    }

    /// Everything left, joined by spaces.
    fn text(&mut self, name: &str) -> CliResult<String> {
        let words: Vec<&str> = self.args.by_ref().map(String::as_str).collect();
        if words.is_empty() {
            return Err(CliError::usage(format!(
                "{}: missing parameter <{name}>",
                self.command
            )));
        }
        Ok(words.join(" "))
    }

    fn finish(mut self, command: Command) -> CliResult<Command> {
        match self.args.next() {
            Some(extra) => Err(CliError::usage(format!(
                "{}: unexpected parameter {extra}",
                self.command
            ))),
            None => Ok(command),
        }
    }
}

/// Build a typed command from positional parameters.
pub fn build_command(
    command: CommandType,
    args: &[String],
    pad_to: Option<usize>,
) -> CliResult<Command> {
    use CommandType as T;

    let mut p = Params {
        command,
        args: args.iter(),
    };
    let built = match command {
        T::Power => Command::Power(p.switch("on")?),
        T::Led => Command::Led(p.switch("on")?),
        T::Sensor => Command::Sensor(p.switch("on")?),
        T::Gesture => Command::Gesture(p.switch("on")?),
        T::Als => Command::Als(p.switch("on")?),
        T::Clear => Command::Clear,
        T::Battery => Command::Battery,
        T::Version => Command::Version,
        T::Settings => Command::Settings,
        T::ImgList => Command::ImgList,
        T::LayoutList => Command::LayoutList,
        T::CfgList => Command::CfgList,
        T::CfgFreeSpace => Command::CfgFreeSpace,
        T::Grey => Command::Grey(p.next("level")?),
        T::Demo => Command::Demo(p.next("id")?),
        T::Luma => Command::Luma(p.next("level")?),
        T::Dim => Command::Dim(p.next("percent")?),
        T::Color => Command::Color(p.next("level")?),
        T::HoldFlush => Command::HoldFlush(p.next("action")?),
        T::ImgDelete => Command::ImgDelete(p.next("id")?),
        T::LayoutClear => Command::LayoutClear(p.next("id")?),
        T::LayoutDelete => Command::LayoutDelete(p.next("id")?),
        T::Shift => Command::Shift {
            x: p.next("x")?,
            y: p.next("y")?,
        },
        T::SetName => Command::SetName(p.text("name")?),
        T::Point => Command::Point {
            x: p.next("x")?,
            y: p.next("y")?,
        },
        T::Line | T::Rect | T::Rectf => {
            let (x0, y0, x1, y1) = (p.next("x0")?, p.next("y0")?, p.next("x1")?, p.next("y1")?);
            match command {
                T::Line => Command::Line { x0, y0, x1, y1 },
                T::Rect => Command::Rect { x0, y0, x1, y1 },
                _ => Command::Rectf { x0, y0, x1, y1 },
            }
        }
        T::Circ | T::Circf => {
            let (x, y, r) = (p.next("x")?, p.next("y")?, p.next("r")?);
            if command == T::Circ {
                Command::Circ { x, y, r }
            } else {
                Command::Circf { x, y, r }
            }
        }
        T::Txt => Command::Txt {
            x: p.next("x")?,
            y: p.next("y")?,
            rotation: p.next("rotation")?,
            font: p.next("font")?,
            color: p.next("color")?,
            text: p.text("text")?,
        },
        T::ImgDisplay => Command::ImgDisplay {
            id: p.next("id")?,
            x: p.next("x")?,
            y: p.next("y")?,
        },
        T::LayoutDisplay => Command::LayoutDisplay {
            id: p.next("id")?,
            text: p.text("text")?,
            pad_to,
        },
        T::SetBleConnectParam => Command::SetBleConnectParam(BleConnectParams {
            interval_min_ms: p.next("interval-min-ms")?,
            interval_max_ms: p.next("interval-max-ms")?,
            slave_latency: p.next("slave-latency")?,
            supervision_timeout_ms: p.next("supervision-timeout-ms")?,
        }),
        T::CfgWrite => Command::CfgWrite {
            name: p.next("name")?,
            version: p.next("version")?,
            password: p.next("password")?,
        },
        T::CfgRead => Command::CfgRead(p.next("name")?),
        T::CfgSet => Command::CfgSet(p.next("name")?),
        T::CfgDelete => Command::CfgDelete(p.next("name")?),
        T::CfgRename => Command::CfgRename {
            old: p.next("old")?,
            new: p.next("new")?,
            password: p.next("password")?,
        },
        T::Test | T::Debug | T::LumaMode | T::ImgSave | T::LayoutSave | T::ErrorReport => {
            return Err(CliError::usage(format!(
                "{command}: no typed parameters; pass them with --params <HEX>"
            )));
        }
    };
    p.finish(built)
}
