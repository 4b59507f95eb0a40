//! Command identifiers and typed command parameters.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{encode_frame, CorrelationId};
use crate::error::{FrameError, Result};
use crate::text::{self, TEXT_MAX_LEN};

/// Width of a configuration name field.
pub const CONFIG_NAME_LEN: usize = 12;

/// Longest advertised device name.
pub const DEVICE_NAME_LEN: usize = 15;

macro_rules! command_types {
    ($($name:ident = $id:literal => $label:literal,)+) => {
        /// One-byte command id carried in every frame.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum CommandType {
            $($name = $id,)+
        }

        impl CommandType {
            /// Every known command, in id order.
            pub const ALL: &'static [CommandType] = &[$(CommandType::$name,)+];

            /// Protocol name of the command.
            pub fn name(self) -> &'static str {
                match self {
                    $(CommandType::$name => $label,)+
                }
            }
        }

        impl TryFrom<u8> for CommandType {
            type Error = u8;

            fn try_from(id: u8) -> std::result::Result<Self, u8> {
                match id {
                    $($id => Ok(CommandType::$name),)+
                    other => Err(other),
                }
            }
        }
    };
}

command_types! {
    Power = 0x00 => "power",
    Clear = 0x01 => "clear",
    Grey = 0x02 => "grey",
    Demo = 0x03 => "demo",
    Test = 0x04 => "test",
    Battery = 0x05 => "battery",
    Version = 0x06 => "vers",
    Debug = 0x07 => "debug",
    Led = 0x08 => "led",
    Shift = 0x09 => "shift",
    Settings = 0x0A => "settings",
    SetName = 0x0B => "setName",
    Luma = 0x10 => "luma",
    Dim = 0x11 => "dim",
    LumaMode = 0x12 => "lumaMode",
    Sensor = 0x20 => "sensor",
    Gesture = 0x21 => "gesture",
    Als = 0x22 => "als",
    Color = 0x30 => "color",
    Point = 0x31 => "point",
    Line = 0x32 => "line",
    Rect = 0x33 => "rect",
    Rectf = 0x34 => "rectf",
    Circ = 0x35 => "circ",
    Circf = 0x36 => "circf",
    Txt = 0x37 => "txt",
    HoldFlush = 0x39 => "holdFlush",
    ImgList = 0x40 => "imgList",
    ImgSave = 0x41 => "imgSave",
    ImgDisplay = 0x42 => "imgDisplay",
    ImgDelete = 0x43 => "imgDelete",
    LayoutSave = 0x60 => "layoutSave",
    LayoutDelete = 0x61 => "layoutDelete",
    LayoutDisplay = 0x62 => "layoutDisplay",
    LayoutClear = 0x63 => "layoutClear",
    LayoutList = 0x64 => "layoutList",
    SetBleConnectParam = 0xA4 => "setBLEConnectParam",
    CfgWrite = 0xD0 => "cfgWrite",
    CfgRead = 0xD1 => "cfgRead",
    CfgSet = 0xD2 => "cfgSet",
    CfgList = 0xD3 => "cfgList",
    CfgRename = 0xD4 => "cfgRename",
    CfgDelete = 0xD5 => "cfgDelete",
    CfgFreeSpace = 0xD7 => "cfgFreeSpace",
    ErrorReport = 0xE3 => "error",
}

impl From<CommandType> for u8 {
    fn from(command: CommandType) -> u8 {
        command as u8
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CommandType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        CommandType::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown command: {s}"))
    }
}

/// BLE connection parameters requested from the glasses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleConnectParams {
    pub interval_min_ms: u32,
    pub interval_max_ms: u32,
    pub slave_latency: u16,
    pub supervision_timeout_ms: u32,
}

impl BleConnectParams {
    /// Connection intervals travel in 1.25 ms units.
    fn interval_ticks(ms: u32) -> Option<u16> {
        let ticks = (u64::from(ms) * 100 + 62) / 125;
        u16::try_from(ticks).ok()
    }

    fn encode(&self, dst: &mut Vec<u8>) -> Result<()> {
        let invalid = |reason: &str| FrameError::InvalidParameter {
            command: CommandType::SetBleConnectParam,
            reason: reason.to_string(),
        };
        if self.interval_min_ms > self.interval_max_ms {
            return Err(invalid("minimum interval exceeds maximum"));
        }
        let min = Self::interval_ticks(self.interval_min_ms)
            .ok_or_else(|| invalid("minimum interval out of range"))?;
        let max = Self::interval_ticks(self.interval_max_ms)
            .ok_or_else(|| invalid("maximum interval out of range"))?;
        let timeout = u16::try_from(self.supervision_timeout_ms / 10)
            .map_err(|_| invalid("supervision timeout out of range"))?;

        dst.put_u16(min);
        dst.put_u16(max);
        dst.put_u16(self.slave_latency);
        dst.put_u16(timeout);
        Ok(())
    }
}

/// A command with typed parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Power(bool),
    Clear,
    Grey(u8),
    Demo(u8),
    Battery,
    Version,
    Led(bool),
    /// Display offset in pixels; negative values shift left/up.
    Shift {
        x: i16,
        y: i16,
    },
    Settings,
    SetName(String),
    Luma(u8),
    Dim(u8),
    Sensor(bool),
    Gesture(bool),
    Als(bool),
    Color(u8),
    Point {
        x: u16,
        y: u16,
    },
    Line {
        x0: u16,
        y0: u16,
        x1: u16,
        y1: u16,
    },
    Rect {
        x0: u16,
        y0: u16,
        x1: u16,
        y1: u16,
    },
    Rectf {
        x0: u16,
        y0: u16,
        x1: u16,
        y1: u16,
    },
    Circ {
        x: u16,
        y: u16,
        r: u8,
    },
    Circf {
        x: u16,
        y: u16,
        r: u8,
    },
    Txt {
        x: u16,
        y: u16,
        rotation: u8,
        font: u8,
        color: u8,
        text: String,
    },
    HoldFlush(u8),
    ImgList,
    ImgDisplay {
        id: u8,
        x: u16,
        y: u16,
    },
    ImgDelete(u8),
    /// Show a saved layout with its text argument, optionally left-padded to a width.
    LayoutDisplay {
        id: u8,
        text: String,
        pad_to: Option<usize>,
    },
    LayoutClear(u8),
    LayoutDelete(u8),
    LayoutList,
    SetBleConnectParam(BleConnectParams),
    /// `version` and `password` go out as raw little-endian words; pass
    /// `f32::to_bits` for float-valued ones.
    CfgWrite {
        name: String,
        version: u32,
        password: u32,
    },
    CfgRead(String),
    CfgSet(String),
    CfgList,
    CfgRename {
        old: String,
        new: String,
        password: u32,
    },
    CfgDelete(String),
    CfgFreeSpace,
    /// Any command id with pre-encoded parameters.
    Generic { command: CommandType, params: Bytes },
    /// A pre-built frame (or frames) sent verbatim.
    Raw(Bytes),
}

impl Command {
    /// The frame's command id. `None` for [`Command::Raw`].
    pub fn command_type(&self) -> Option<CommandType> {
        use CommandType as T;
        let ty = match self {
            Command::Power(_) => T::Power,
            Command::Clear => T::Clear,
            Command::Grey(_) => T::Grey,
            Command::Demo(_) => T::Demo,
            Command::Battery => T::Battery,
            Command::Version => T::Version,
            Command::Led(_) => T::Led,
            Command::Shift { .. } => T::Shift,
            Command::Settings => T::Settings,
            Command::SetName(_) => T::SetName,
            Command::Luma(_) => T::Luma,
            Command::Dim(_) => T::Dim,
            Command::Sensor(_) => T::Sensor,
            Command::Gesture(_) => T::Gesture,
            Command::Als(_) => T::Als,
            Command::Color(_) => T::Color,
            Command::Point { .. } => T::Point,
            Command::Line { .. } => T::Line,
            Command::Rect { .. } => T::Rect,
            Command::Rectf { .. } => T::Rectf,
            Command::Circ { .. } => T::Circ,
            Command::Circf { .. } => T::Circf,
            Command::Txt { .. } => T::Txt,
            Command::HoldFlush(_) => T::HoldFlush,
            Command::ImgList => T::ImgList,
            Command::ImgDisplay { .. } => T::ImgDisplay,
            Command::ImgDelete(_) => T::ImgDelete,
            Command::LayoutDisplay { .. } => T::LayoutDisplay,
            Command::LayoutClear(_) => T::LayoutClear,
            Command::LayoutDelete(_) => T::LayoutDelete,
            Command::LayoutList => T::LayoutList,
            Command::SetBleConnectParam(_) => T::SetBleConnectParam,
            Command::CfgWrite { .. } => T::CfgWrite,
            Command::CfgRead(_) => T::CfgRead,
            Command::CfgSet(_) => T::CfgSet,
            Command::CfgList => T::CfgList,
            Command::CfgRename { .. } => T::CfgRename,
            Command::CfgDelete(_) => T::CfgDelete,
            Command::CfgFreeSpace => T::CfgFreeSpace,
            Command::Generic { command, .. } => *command,
            Command::Raw(_) => return None,
        };
        Some(ty)
    }

    /// Encode the parameters. For [`Command::Raw`] this is the raw bytes.
    pub fn payload(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Command::Power(on)
            | Command::Led(on)
            | Command::Sensor(on)
            | Command::Gesture(on)
            | Command::Als(on) => buf.put_u8(u8::from(*on)),
            Command::Clear
            | Command::Battery
            | Command::Version
            | Command::Settings
            | Command::ImgList
            | Command::LayoutList
            | Command::CfgList
            | Command::CfgFreeSpace => {}
            Command::Grey(v)
            | Command::Demo(v)
            | Command::Luma(v)
            | Command::Dim(v)
            | Command::Color(v)
            | Command::HoldFlush(v)
            | Command::ImgDelete(v)
            | Command::LayoutClear(v)
            | Command::LayoutDelete(v) => buf.put_u8(*v),
            Command::Shift { x, y } => {
                buf.put_i16(*x);
                buf.put_i16(*y);
            }
            Command::SetName(name) => buf.extend(text::encode_text(name, DEVICE_NAME_LEN)),
            Command::Point { x, y } => {
                buf.put_u16(*x);
                buf.put_u16(*y);
            }
            Command::Line { x0, y0, x1, y1 }
            | Command::Rect { x0, y0, x1, y1 }
            | Command::Rectf { x0, y0, x1, y1 } => {
                for v in [x0, y0, x1, y1] {
                    buf.put_u16(*v);
                }
            }
            Command::Circ { x, y, r } | Command::Circf { x, y, r } => {
                buf.put_u16(*x);
                buf.put_u16(*y);
                buf.put_u8(*r);
            }
            Command::Txt {
                x,
                y,
                rotation,
                font,
                color,
                text,
            } => {
                buf.put_u16(*x);
                buf.put_u16(*y);
                buf.put_u8(*rotation);
                buf.put_u8(*font);
                buf.put_u8(*color);
                buf.extend(text::encode_text(text, TEXT_MAX_LEN));
            }
            Command::ImgDisplay { id, x, y } => {
                buf.put_u8(*id);
                buf.put_u16(*x);
                buf.put_u16(*y);
            }
            Command::LayoutDisplay { id, text, pad_to } => {
                let mut projected = text::to_latin1(text);
                if let Some(width) = pad_to {
                    projected = text::pad_left(&projected, *width);
                }
                buf.put_u8(*id);
                buf.extend(text::terminate(projected, TEXT_MAX_LEN));
            }
            Command::SetBleConnectParam(params) => params.encode(&mut buf)?,
            Command::CfgWrite {
                name,
                version,
                password,
            } => {
                buf.extend(text::encode_fixed(name, CONFIG_NAME_LEN));
                buf.put_u32_le(*version);
                buf.put_u32_le(*password);
            }
            Command::CfgRead(name) | Command::CfgSet(name) | Command::CfgDelete(name) => {
                buf.extend(text::encode_text(name, CONFIG_NAME_LEN))
            }
            Command::CfgRename { old, new, password } => {
                buf.extend(text::encode_fixed(old, CONFIG_NAME_LEN));
                buf.extend(text::encode_fixed(new, CONFIG_NAME_LEN));
                buf.put_u32_le(*password);
            }
            Command::Generic { params, .. } | Command::Raw(params) => buf.extend_from_slice(params),
        }
        Ok(buf)
    }

    /// Encode the complete frame, optionally tagged with a correlation id.
    ///
    /// [`Command::Raw`] is returned verbatim; the correlation id is not
    /// inserted into pre-built frames.
    pub fn encode(&self, correlation_id: Option<CorrelationId>) -> Result<Bytes> {
        let Some(command) = self.command_type() else {
            return Ok(match self {
                Command::Raw(frame) => frame.clone(),
                _ => Bytes::new(),
            });
        };
        let payload = self.payload()?;
        let mut dst = BytesMut::new();
        encode_frame(command.into(), correlation_id, &payload, &mut dst)?;
        Ok(dst.freeze())
    }
}
