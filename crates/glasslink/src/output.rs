use std::io::{IsTerminal, Write};
use std::time::UNIX_EPOCH;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Row, Table};
use data_encoding::HEXUPPER;
use glasslink_frame::{Message, ResponseData};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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

pub fn hex(data: &[u8]) -> String {
    HEXUPPER.encode(data)
}

/// One JSON document per line.
pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn table(header: impl Into<Row>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

#[derive(Serialize)]
pub struct MessageOutput<'a> {
    pub command: String,
    pub command_id: u8,
    pub correlation_id: Option<u64>,
    pub payload_size: usize,
    pub payload: String,
    pub data: Option<&'a ResponseData>,
    pub received_at_ms: u128,
}

impl<'a> From<&'a Message> for MessageOutput<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            command: command_label(message),
            command_id: message.command_id,
            correlation_id: message.correlation_id.map(|id| id.0),
            payload_size: message.raw_payload.len(),
            payload: hex(&message.raw_payload),
            data: message.data.as_ref(),
            received_at_ms: message
                .received_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default(),
        }
    }
}

pub fn print_messages(messages: &[Message], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for message in messages {
                print_json(&MessageOutput::from(message));
            }
        }
        OutputFormat::Table => {
            let mut table = table(["COMMAND", "ID", "CORRELATION", "SIZE", "DATA"]);
            for message in messages {
                table.add_row(vec![
                    command_label(message),
                    format!("0x{:02X}", message.command_id),
                    correlation_label(message),
                    message.raw_payload.len().to_string(),
                    data_preview(message),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for message in messages {
                println!(
                    "{} (0x{:02X}) correlation={} size={} data={}",
                    command_label(message),
                    message.command_id,
                    correlation_label(message),
                    message.raw_payload.len(),
                    data_preview(message)
                );
            }
        }
        OutputFormat::Raw => {
            for message in messages {
                print_raw(&message.raw_payload);
            }
        }
    }
}

fn command_label(message: &Message) -> String {
    match message.command_type() {
        Some(command) => command.name().to_string(),
        None => "unknown".to_string(),
    }
}

fn correlation_label(message: &Message) -> String {
    message
        .correlation_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn data_preview(message: &Message) -> String {
    match &message.data {
        Some(data) => serde_json::to_string(data).unwrap_or_default(),
        None => hex(&message.raw_payload),
    }
}
