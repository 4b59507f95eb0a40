use std::sync::Arc;

use bytes::Bytes;
use glasslink_channel::{ChannelConfig, CommandChannel, SenderConfig};
use glasslink_frame::UploadFile;
use glasslink_transport::{RecordedWrite, RecordingTransport, WriteKind};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cmd::{decode_hex, parse_duration, read_text, PlanArgs};
use crate::exit::{channel_error, frame_error, io_error, CliError, CliResult, SUCCESS};
use crate::output::{hex, print_json, print_raw, table, OutputFormat};

#[derive(Serialize, Debug)]
struct WriteOutput {
    index: usize,
    offset: usize,
    size: usize,
    with_response: bool,
    data: String,
}

#[derive(Serialize)]
struct PlanOutput {
    mtu: usize,
    slice_size: usize,
    chunks: usize,
    total: usize,
    writes: Vec<WriteOutput>,
}

pub fn run(args: PlanArgs, format: OutputFormat) -> CliResult<i32> {
    if args.mtu == 0 || args.slice_size == Some(0) {
        return Err(CliError::usage("--mtu and --slice-size must be greater than zero"));
    }
    let chunks = match (&args.hex, &args.file) {
        (Some(hex), _) => vec![Bytes::from(decode_hex(hex)?)],
        (None, Some(path)) => UploadFile::parse(&read_text(path)?)
            .map_err(|err| frame_error("invalid upload file", err))?
            .into_chunks(),
        (None, None) => return Err(CliError::usage("pass a file or --hex")),
    };

    let config = SenderConfig {
        mtu: args.mtu,
        slice_size: args.slice_size,
        write_timeout: parse_duration(&args.write_timeout)?,
        send_with_response: !args.without_response,
    };
    let slice_size = config.slice_size();
    let total: usize = chunks.iter().map(Bytes::len).sum();
    let chunk_count = chunks.len();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|err| io_error("failed starting runtime", err))?;
    let writes = runtime.block_on(simulate(chunks, config))?;

    let output = PlanOutput {
        mtu: args.mtu,
        slice_size,
        chunks: chunk_count,
        total,
        writes: schedule(&writes),
    };

    match format {
        OutputFormat::Json => print_json(&output),
        OutputFormat::Table => {
            let mut table = table(["#", "OFFSET", "SIZE", "ACK", "DATA"]);
            for write in &output.writes {
                table.add_row(vec![
                    write.index.to_string(),
                    write.offset.to_string(),
                    write.size.to_string(),
                    if write.with_response { "yes" } else { "no" }.to_string(),
                    write.data.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} byte(s) in {} chunk(s) -> {} write(s) (mtu {}, slice {})",
                output.total,
                output.chunks,
                output.writes.len(),
                output.mtu,
                output.slice_size
            );
            for write in &output.writes {
                println!("  #{:<4} +{:<6} {:>3}B {}", write.index, write.offset, write.size, write.data);
            }
        }
        OutputFormat::Raw => {
            for write in &writes {
                print_raw(&write.data);
            }
        }
    }
    Ok(SUCCESS)
}

/// Replay `chunks` through a command channel backed by a recording transport.
async fn simulate(chunks: Vec<Bytes>, sender: SenderConfig) -> CliResult<Vec<RecordedWrite>> {
    let transport = Arc::new(RecordingTransport::new());
    let channel = CommandChannel::new(
        transport.clone(),
        ChannelConfig {
            sender,
            ..ChannelConfig::default()
        },
    );
    channel
        .send_raw_commands(chunks, None, CancellationToken::new())
        .await
        .map_err(|err| channel_error("replay failed", err))?;
    channel.disconnect();
    Ok(transport.writes())
}

fn schedule(writes: &[RecordedWrite]) -> Vec<WriteOutput> {
    let mut offset = 0;
    writes
        .iter()
        .enumerate()
        .map(|(index, write)| {
            let out = WriteOutput {
                index,
                offset,
                size: write.data.len(),
                with_response: write.kind == WriteKind::WithResponse,
                data: hex(&write.data),
            };
            offset += write.data.len();
            out
        })
        .collect()
}
