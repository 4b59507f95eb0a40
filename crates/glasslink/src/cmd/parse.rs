use glasslink_frame::{FrameParser, Message, ParserState};
use tracing::{debug, warn};

use crate::cmd::{decode_hex, read_file, ParseArgs};
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_messages, OutputFormat};

pub fn run(args: ParseArgs, format: OutputFormat) -> CliResult<i32> {
    if args.chunk == 0 {
        return Err(CliError::new(USAGE, "--chunk must be greater than zero"));
    }
    let input = match (&args.hex, &args.file) {
        (Some(hex), _) => decode_hex(hex)?,
        (None, Some(path)) => read_file(path)?,
        (None, None) => return Err(CliError::new(USAGE, "pass --hex or --file")),
    };

    let outcome = parse_chunks(&input, args.chunk);
    print_messages(&outcome.messages, format);

    if outcome.errors > 0 {
        return Err(CliError::new(
            DATA_INVALID,
            format!("{} parse error(s) in input", outcome.errors),
        ));
    }
    if outcome.state != ParserState::Waiting {
        return Err(CliError::new(
            DATA_INVALID,
            format!("input ends mid-frame (parser state {:?})", outcome.state),
        ));
    }
    Ok(SUCCESS)
}

struct Outcome {
    messages: Vec<Message>,
    errors: usize,
    state: ParserState,
}

/// Feed `input` to a fresh parser `chunk` bytes at a time.
fn parse_chunks(input: &[u8], chunk: usize) -> Outcome {
    let mut parser = FrameParser::new();
    let mut outcome = Outcome {
        messages: Vec::new(),
        errors: 0,
        state: ParserState::Waiting,
    };
    for piece in input.chunks(chunk) {
        for result in parser.feed(piece) {
            if let Some(err) = result.error {
                warn!(%err, "parse error");
                outcome.errors += 1;
            }
            if let Some(progress) = result.progress {
                debug!(received = progress.received, total = progress.total, "receiving");
            }
            if let Some(message) = result.message {
                outcome.messages.push(message);
            }
        }
    }
    outcome.state = parser.state();
    outcome
}

#[cfg(test)]
mod tests {
    use glasslink_frame::{CommandType, ResponseData};

    use super::*;

    #[test]
    fn parses_frames_split_across_chunks() {
        let input = [
            0xFF, 0xD7, 0x00, 0x05, 0xAA, // cfgFreeSpace request
            0xFF, 0x05, 0x00, 0x06, 0x3C, 0xAA, // battery 60%
        ];
        for chunk in 1..=input.len() {
            let outcome = parse_chunks(&input, chunk);
            assert_eq!(outcome.messages.len(), 2, "chunk size {chunk}");
            assert_eq!(
                outcome.messages[0].command_type(),
                Some(CommandType::CfgFreeSpace)
            );
            assert_eq!(outcome.messages[1].data, Some(ResponseData::Battery(60)));
            assert_eq!(outcome.errors, 0);
            assert_eq!(outcome.state, ParserState::Waiting);
        }
    }

    #[test]
    fn reports_incomplete_input() {
        let outcome = parse_chunks(&[0xFF, 0x05, 0x00, 0x06], 20);
        assert!(outcome.messages.is_empty());
        assert_ne!(outcome.state, ParserState::Waiting);
    }

    #[test]
    fn counts_footer_errors() {
        let outcome = parse_chunks(&[0xFF, 0x05, 0x00, 0x06, 0x3C, 0x00], 20);
        assert_eq!(outcome.errors, 1);
        assert!(outcome.messages.is_empty());
    }
}
