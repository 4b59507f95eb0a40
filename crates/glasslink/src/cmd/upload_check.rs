use std::collections::BTreeMap;

use glasslink_frame::{CommandType, Frame, UploadFile};
use serde::Serialize;

use crate::cmd::{read_text, UploadCheckArgs};
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

#[derive(Serialize, Debug, PartialEq, Eq)]
struct CommandSummary {
    command: String,
    command_id: u8,
    frames: usize,
    payload_bytes: usize,
}

#[derive(Serialize)]
struct UploadSummary {
    file: String,
    chunks: usize,
    bytes: usize,
    frames: usize,
    commands: Vec<CommandSummary>,
}

pub fn run(args: UploadCheckArgs, format: OutputFormat) -> CliResult<i32> {
    let text = read_text(&args.file)?;
    let upload = UploadFile::parse(&text).map_err(|err| frame_error("invalid upload file", err))?;
    let frames = upload
        .frames()
        .map_err(|err| frame_error("invalid upload file", err))?;
    tracing::debug!(chunks = upload.chunks().len(), frames = frames.len(), "upload file decoded");

    let summary = UploadSummary {
        file: args.file.display().to_string(),
        chunks: upload.chunks().len(),
        bytes: upload.total_len(),
        frames: frames.len(),
        commands: summarise(&frames),
    };

    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&summary),
        OutputFormat::Table => {
            let mut table = table(["COMMAND", "ID", "FRAMES", "PAYLOAD BYTES"]);
            for entry in &summary.commands {
                table.add_row(vec![
                    entry.command.clone(),
                    format!("0x{:02X}", entry.command_id),
                    entry.frames.to_string(),
                    entry.payload_bytes.to_string(),
                ]);
            }
            println!("{table}");
            println!(
                "{} chunk(s), {} byte(s), {} frame(s)",
                summary.chunks, summary.bytes, summary.frames
            );
        }
        OutputFormat::Pretty => {
            println!(
                "{}: {} chunk(s), {} byte(s), {} frame(s)",
                summary.file, summary.chunks, summary.bytes, summary.frames
            );
            for entry in &summary.commands {
                println!(
                    "  {} (0x{:02X}) x{} payload={}B",
                    entry.command, entry.command_id, entry.frames, entry.payload_bytes
                );
            }
        }
    }
    Ok(SUCCESS)
}

/// Frame and payload counts per command id, in id order.
fn summarise(frames: &[Frame]) -> Vec<CommandSummary> {
    let mut counts: BTreeMap<u8, (usize, usize)> = BTreeMap::new();
    for frame in frames {
        let entry = counts.entry(frame.command_id).or_default();
        entry.0 += 1;
        entry.1 += frame.payload.len();
    }
    counts
        .into_iter()
        .map(|(command_id, (frames, payload_bytes))| CommandSummary {
            command: CommandType::try_from(command_id)
                .map_or_else(|_| "unknown".to_string(), |c| c.name().to_string()),
            command_id,
            frames,
            payload_bytes,
        })
        .collect()
}
