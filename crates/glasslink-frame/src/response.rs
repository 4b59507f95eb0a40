//! Typed decoding of response payloads.

use tracing::trace;

use crate::command::CommandType;
use crate::text::from_latin1;

/// Display and sensor settings reported by the glasses.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Settings {
    pub shift_x: i8,
    pub shift_y: i8,
    pub luma: u8,
    pub als: bool,
    pub gesture: bool,
}

/// Configuration storage usage, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FreeSpace {
    pub total_size: u32,
    pub free_space: u32,
}

/// One stored configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ConfigEntry {
    pub name: String,
    pub size: u32,
    pub version: u32,
    pub usage_count: u8,
    pub install_count: u8,
    pub system: bool,
}

/// Contents summary of one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ConfigInfo {
    pub version: u32,
    pub images: u8,
    pub layouts: u8,
    pub fonts: u8,
    pub pages: u8,
    pub gauges: u8,
}

/// Error reported by the glasses for a command they could not execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceError {
    pub command_id: u8,
    pub error: u8,
    pub sub_error: u8,
}

/// Decoded payload of a response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize),
    serde(tag = "type", content = "value", rename_all = "snake_case")
)]
pub enum ResponseData {
    Version(String),
    Battery(u8),
    Settings(Settings),
    FreeSpace(FreeSpace),
    ConfigList(Vec<ConfigEntry>),
    ConfigInfo(ConfigInfo),
    Error(DeviceError),
}

/// Config list names: NUL-terminated within the first 11 bytes, else exactly
/// 11 bytes with no terminator.
const LIST_NAME_LEN: usize = 11;
const LIST_RECORD_TAIL: usize = 11;

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Decode a response payload for `command_id`.
///
/// Unknown commands, and payloads too short for their shape, decode to
/// `None`. That is not an error: the raw payload stays available on the
/// message.
pub fn decode_response(command_id: u8, payload: &[u8]) -> Option<ResponseData> {
    let command = CommandType::try_from(command_id).ok()?;
    let data = match command {
        CommandType::Version => {
            let [a, b, c, d, ..] = *payload else {
                return None;
            };
            ResponseData::Version(format!("{a}.{b}.{c}{}", char::from(d)))
        }
        CommandType::Battery => ResponseData::Battery(*payload.first()?),
        CommandType::Settings => {
            let [x, y, luma, als, gesture, ..] = *payload else {
                return None;
            };
            ResponseData::Settings(Settings {
                shift_x: x as i8,
                shift_y: y as i8,
                luma,
                als: als != 0,
                gesture: gesture != 0,
            })
        }
        CommandType::CfgFreeSpace => {
            let mut padded = [0u8; 8];
            let n = payload.len().min(padded.len());
            padded[..n].copy_from_slice(&payload[..n]);
            ResponseData::FreeSpace(FreeSpace {
                total_size: be_u32(&padded[..4]),
                free_space: be_u32(&padded[4..]),
            })
        }
        CommandType::CfgList => ResponseData::ConfigList(decode_config_list(payload)),
        CommandType::CfgRead => {
            if payload.len() < 4 {
                return None;
            }
            let count = |i: usize| payload.get(4 + i).copied().unwrap_or_default();
            ResponseData::ConfigInfo(ConfigInfo {
                version: be_u32(payload),
                images: count(0),
                layouts: count(1),
                fonts: count(2),
                pages: count(3),
                gauges: count(4),
            })
        }
        CommandType::ErrorReport => {
            let [command_id, error, sub_error, ..] = *payload else {
                return None;
            };
            ResponseData::Error(DeviceError {
                command_id,
                error,
                sub_error,
            })
        }
        _ => return None,
    };
    trace!(%command, "decoded response");
    Some(data)
}

fn decode_config_list(mut rest: &[u8]) -> Vec<ConfigEntry> {
    let mut entries = Vec::new();
    while !rest.is_empty() {
        let window = &rest[..rest.len().min(LIST_NAME_LEN)];
        let (name, consumed) = match window.iter().position(|&b| b == 0) {
            Some(end) => (&rest[..end], end + 1),
            None if rest.len() >= LIST_NAME_LEN => (&rest[..LIST_NAME_LEN], LIST_NAME_LEN),
            None => break,
        };
        let record = &rest[consumed..];
        if record.len() < LIST_RECORD_TAIL {
            break;
        }
        entries.push(ConfigEntry {
            name: from_latin1(name),
            size: be_u32(&record[0..4]),
            version: be_u32(&record[4..8]),
            usage_count: record[8],
            install_count: record[9],
            system: record[10] != 0,
        });
        rest = &record[LIST_RECORD_TAIL..];
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_record(name: &[u8], size: u32, version: u32, flags: [u8; 3]) -> Vec<u8> {
        let mut record = name.to_vec();
        record.extend(size.to_be_bytes());
        record.extend(version.to_be_bytes());
        record.extend(flags);
        record
    }

    #[test]
    fn test_version() {
        let data = decode_response(CommandType::Version.into(), &[4, 12, 3, b'b']);
        assert_eq!(data, Some(ResponseData::Version("4.12.3b".to_string())));
    }

    #[test]
    fn test_settings_signed_shift() {
        let data = decode_response(CommandType::Settings.into(), &[0xFE, 3, 12, 1, 0]);
        assert_eq!(
            data,
            Some(ResponseData::Settings(Settings {
                shift_x: -2,
                shift_y: 3,
                luma: 12,
                als: true,
                gesture: false,
            }))
        );
    }

    #[test]
    fn test_free_space() {
        let data = decode_response(
            CommandType::CfgFreeSpace.into(),
            &[0, 0, 0x10, 0, 0, 0, 0x08, 0],
        );
        assert_eq!(
            data,
            Some(ResponseData::FreeSpace(FreeSpace {
                total_size: 0x1000,
                free_space: 0x0800,
            }))
        );
    }

    #[test]
    fn test_free_space_empty_payload_is_zero() {
        let data = decode_response(CommandType::CfgFreeSpace.into(), &[]);
        assert_eq!(
            data,
            Some(ResponseData::FreeSpace(FreeSpace {
                total_size: 0,
                free_space: 0,
            }))
        );
    }

    #[test]
    fn test_config_list_terminated_and_fixed_names() {
        let mut payload = list_record(b"nav\0", 1024, 3, [5, 1, 0]);
        payload.extend(list_record(b"ABCDEFGHIJK", 2048, 7, [0, 2, 1]));

        let Some(ResponseData::ConfigList(entries)) =
            decode_response(CommandType::CfgList.into(), &payload)
        else {
            panic!("expected config list");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "nav");
        assert_eq!(entries[0].size, 1024);
        assert_eq!(entries[0].usage_count, 5);
        assert!(!entries[0].system);
        assert_eq!(entries[1].name, "ABCDEFGHIJK");
        assert_eq!(entries[1].version, 7);
        assert_eq!(entries[1].install_count, 2);
        assert!(entries[1].system);
    }

    #[test]
    fn test_config_list_name_boundary() {
        // longest terminated name, then an eleven byte name whose size starts with 0
        let mut payload = list_record(b"ABCDEFGHIJ\0", 1024, 3, [5, 1, 0]);
        payload.extend(list_record(b"KLMNOPQRSTU", 1024, 4, [1, 1, 1]));

        let Some(ResponseData::ConfigList(entries)) =
            decode_response(CommandType::CfgList.into(), &payload)
        else {
            panic!("expected config list");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "ABCDEFGHIJ");
        assert_eq!(entries[0].size, 1024);
        assert_eq!(entries[0].version, 3);
        assert_eq!(entries[1].name, "KLMNOPQRSTU");
        assert_eq!(entries[1].size, 1024);
        assert_eq!(entries[1].version, 4);
        assert_eq!(entries[1].usage_count, 1);
    }

    #[test]
    fn test_config_list_drops_truncated_record() {
        let mut payload = list_record(b"a\0", 1, 1, [0, 0, 0]);
        payload.extend(b"b\0\0\0");

        let data = decode_response(CommandType::CfgList.into(), &payload);
        let Some(ResponseData::ConfigList(entries)) = data else {
            panic!("expected config list");
        };
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_config_info_missing_counts() {
        let data = decode_response(CommandType::CfgRead.into(), &[0, 0, 0, 9, 4]);
        assert_eq!(
            data,
            Some(ResponseData::ConfigInfo(ConfigInfo {
                version: 9,
                images: 4,
                layouts: 0,
                fonts: 0,
                pages: 0,
                gauges: 0,
            }))
        );
    }

    #[test]
    fn test_error_report() {
        let data = decode_response(CommandType::ErrorReport.into(), &[0x37, 2, 1]);
        assert_eq!(
            data,
            Some(ResponseData::Error(DeviceError {
                command_id: 0x37,
                error: 2,
                sub_error: 1,
            }))
        );
    }

    #[test]
    fn test_unknown_or_short_is_none() {
        assert_eq!(decode_response(0xEE, &[1, 2, 3]), None);
        assert_eq!(decode_response(CommandType::Txt.into(), &[1]), None);
        assert_eq!(decode_response(CommandType::Version.into(), &[1, 2]), None);
        assert_eq!(decode_response(CommandType::Battery.into(), &[]), None);
    }
}
