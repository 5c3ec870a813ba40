use std::fmt;

#[cfg(feature = "protocol_serde")]
use serde::{Deserialize, Serialize};

/// One bus frame is always 8 bytes.
pub const FRAME_LENGTH: usize = 8;

/// The wired remote bus runs at 500 baud, 8 data bits, even parity, 1 stop bit.
pub const BAUD_RATE: u32 = 500;

/// Minimum quiet time after a receive before we may assert the bus.
/// The indoor unit or another controller may still be driving the line;
/// there is no collision detection, only this guard interval.
pub const MIN_TX_DELAY: std::time::Duration = std::time::Duration::from_millis(50);

/// A controller counts as bound while a frame addressed to it arrived
/// within this window.
pub const BOUND_WINDOW: std::time::Duration = std::time::Duration::from_millis(1000);

/// Default threshold after which the session is considered dead and the
/// login/discovery state gets reset.
pub const DEFAULT_RECEIVE_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(2000);

/// Bus addresses. The login bit occupies bit 5 of the destination byte,
/// which is also the distinguishing bit of the PRIMARY address - an
/// overlap inherited from the wire protocol, not a mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Address {
    Unknown = 0,
    Unit = 1,
    Primary = 32,
    Secondary = 33,
}

impl From<u8> for Address {
    fn from(value: u8) -> Self {
        match value {
            1 => Address::Unit,
            32 => Address::Primary,
            33 => Address::Secondary,
            _ => Address::Unknown,
        }
    }
}

/// 2-bit frame type field. Value 3 is reserved and never sent by us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum MessageType {
    Status = 0,
    Error = 1,
    Login = 2,
    Unknown = 3,
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value {
            0 => MessageType::Status,
            1 => MessageType::Error,
            2 => MessageType::Login,
            _ => MessageType::Unknown,
        }
    }
}

/// Operating mode, 3-bit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum AcMode {
    Unknown = 0,
    Fan = 1,
    Dry = 2,
    Cool = 3,
    Heat = 4,
    Auto = 5,
}

impl From<u8> for AcMode {
    fn from(value: u8) -> Self {
        match value {
            1 => AcMode::Fan,
            2 => AcMode::Dry,
            3 => AcMode::Cool,
            4 => AcMode::Heat,
            5 => AcMode::Auto,
            _ => AcMode::Unknown,
        }
    }
}

impl fmt::Display for AcMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AcMode::Unknown => write!(f, "unknown"),
            AcMode::Fan => write!(f, "fan"),
            AcMode::Dry => write!(f, "dry"),
            AcMode::Cool => write!(f, "cool"),
            AcMode::Heat => write!(f, "heat"),
            AcMode::Auto => write!(f, "auto"),
        }
    }
}

/// Fan speed, 3-bit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum FanMode {
    Auto = 0,
    Quiet = 1,
    Low = 2,
    Medium = 3,
    High = 4,
    Unknown = 5,
}

impl From<u8> for FanMode {
    fn from(value: u8) -> Self {
        match value {
            0 => FanMode::Auto,
            1 => FanMode::Quiet,
            2 => FanMode::Low,
            3 => FanMode::Medium,
            4 => FanMode::High,
            _ => FanMode::Unknown,
        }
    }
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FanMode::Auto => write!(f, "auto"),
            FanMode::Quiet => write!(f, "quiet"),
            FanMode::Low => write!(f, "low"),
            FanMode::Medium => write!(f, "medium"),
            FanMode::High => write!(f, "high"),
            FanMode::Unknown => write!(f, "unknown"),
        }
    }
}

/// Position of one bitfield inside the 8-byte frame.
struct BitField {
    index: usize,
    mask: u8,
    offset: u8,
}

impl BitField {
    fn get(&self, buf: &[u8; FRAME_LENGTH]) -> u8 {
        (buf[self.index] & self.mask) >> self.offset
    }

    fn set(&self, buf: &mut [u8; FRAME_LENGTH], value: u8) {
        buf[self.index] = (buf[self.index] & !self.mask) | ((value << self.offset) & self.mask);
    }
}

// Byte/mask assignments are fixed constants of the wire protocol and
// must be preserved bit-for-bit.
const ON_OFF: BitField = BitField { index: 3, mask: 0b0000_0001, offset: 0 };
const AC_MODE: BitField = BitField { index: 3, mask: 0b0000_1110, offset: 1 };
const FAN_MODE: BitField = BitField { index: 3, mask: 0b0111_0000, offset: 4 };
const AC_ERROR: BitField = BitField { index: 3, mask: 0b1000_0000, offset: 7 };
const TEMPERATURE: BitField = BitField { index: 4, mask: 0b0111_1111, offset: 0 };
const ECONOMY_MODE: BitField = BitField { index: 4, mask: 0b1000_0000, offset: 7 };
const SWING_STEP: BitField = BitField { index: 5, mask: 0b0000_0010, offset: 1 };
const SWING_MODE: BitField = BitField { index: 5, mask: 0b0000_0100, offset: 2 };
const UPDATE_MAGIC: BitField = BitField { index: 5, mask: 0b1111_0000, offset: 4 };
const CONTROLLER_PRESENT: BitField = BitField { index: 6, mask: 0b0000_0001, offset: 0 };
// The top bit of byte 6 is not decoded; suspected (unverified) sign bit
// for sub-zero controller temperatures.
const CONTROLLER_TEMP: BitField = BitField { index: 6, mask: 0b0111_1110, offset: 1 };

const DEST_MASK: u8 = 0b0111_1111;
const LOGIN_BIT: u8 = 0b0010_0000;
const UNKNOWN_BIT: u8 = 0b1000_0000;
const TYPE_MASK: u8 = 0b0011_0000;
const TYPE_OFFSET: u8 = 4;
const WRITE_BIT: u8 = 0b0000_1000;

/// XOR every byte with 0xFF. The bus carries inverted logic levels, so
/// this runs once on every received frame and once before every transmit.
pub fn invert(buf: &mut [u8; FRAME_LENGTH]) {
    for b in buf.iter_mut() {
        *b ^= 0xFF;
    }
}

/// Decoded representation of one 8-byte bus frame.
///
/// `temperature` and `controller_temp` are the raw wire encodings, not
/// plain Celsius. `update_magic` and `unknown_bit` are opaque sentinels
/// observed on the bus; their meaning is not fully reverse-engineered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct ControlFrame {
    pub message_source: u8,
    pub message_dest: u8,
    pub message_type: MessageType,
    pub write_bit: bool,
    pub login_bit: bool,
    pub unknown_bit: bool,
    pub ac_error: u8,
    pub temperature: u8,
    pub ac_mode: AcMode,
    pub fan_mode: FanMode,
    pub economy_mode: bool,
    pub swing_mode: bool,
    pub swing_step: bool,
    pub controller_present: bool,
    pub update_magic: u8,
    pub on_off: bool,
    pub controller_temp: u8,
}

impl Default for ControlFrame {
    fn default() -> Self {
        Self {
            message_source: 0,
            message_dest: 0,
            message_type: MessageType::Status,
            write_bit: false,
            login_bit: false,
            unknown_bit: false,
            ac_error: 0,
            temperature: 0,
            ac_mode: AcMode::Unknown,
            fan_mode: FanMode::Auto,
            economy_mode: false,
            swing_mode: false,
            swing_step: false,
            controller_present: false,
            update_magic: 0,
            on_off: false,
            controller_temp: 0,
        }
    }
}

impl ControlFrame {
    /// Decodes a frame from already line-inverted bytes. Total: any 8
    /// bytes decode to some value, validity is the session's concern.
    pub fn decode(buf: &[u8; FRAME_LENGTH]) -> Self {
        Self {
            message_source: buf[0],
            message_dest: buf[1] & DEST_MASK,
            message_type: MessageType::from((buf[2] & TYPE_MASK) >> TYPE_OFFSET),
            write_bit: buf[2] & WRITE_BIT != 0,
            login_bit: buf[1] & LOGIN_BIT != 0,
            unknown_bit: buf[1] & UNKNOWN_BIT != 0,
            ac_error: AC_ERROR.get(buf),
            temperature: TEMPERATURE.get(buf),
            ac_mode: AcMode::from(AC_MODE.get(buf)),
            fan_mode: FanMode::from(FAN_MODE.get(buf)),
            economy_mode: ECONOMY_MODE.get(buf) != 0,
            swing_mode: SWING_MODE.get(buf) != 0,
            swing_step: SWING_STEP.get(buf) != 0,
            controller_present: CONTROLLER_PRESENT.get(buf) != 0,
            update_magic: UPDATE_MAGIC.get(buf),
            on_off: ON_OFF.get(buf) != 0,
            controller_temp: CONTROLLER_TEMP.get(buf),
        }
    }

    /// Encodes into a fresh all-zero buffer; bits not covered by a named
    /// field are zero in the output. The login bit is written after the
    /// destination and overrides bit 5 of that byte (see [`Address`]).
    pub fn encode(&self) -> [u8; FRAME_LENGTH] {
        let mut buf = [0u8; FRAME_LENGTH];

        buf[0] = self.message_source;
        buf[1] = self.message_dest & DEST_MASK;
        buf[2] = (self.message_type as u8) << TYPE_OFFSET;

        if self.write_bit {
            buf[2] |= WRITE_BIT;
        }
        if self.unknown_bit {
            buf[1] |= UNKNOWN_BIT;
        }
        if self.login_bit {
            buf[1] |= LOGIN_BIT;
        } else {
            buf[1] &= !LOGIN_BIT;
        }

        ON_OFF.set(&mut buf, self.on_off as u8);
        AC_MODE.set(&mut buf, self.ac_mode as u8);
        FAN_MODE.set(&mut buf, self.fan_mode as u8);
        AC_ERROR.set(&mut buf, self.ac_error);
        TEMPERATURE.set(&mut buf, self.temperature);
        ECONOMY_MODE.set(&mut buf, self.economy_mode as u8);
        SWING_MODE.set(&mut buf, self.swing_mode as u8);
        SWING_STEP.set(&mut buf, self.swing_step as u8);
        CONTROLLER_PRESENT.set(&mut buf, self.controller_present as u8);
        UPDATE_MAGIC.set(&mut buf, self.update_magic);
        CONTROLLER_TEMP.set(&mut buf, self.controller_temp);

        buf
    }
}

impl fmt::Display for ControlFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "src:{} dst:{} type:{:?} write:{} login:{} unknown:{} onOff:{} temp:{} mode:{} fan:{} cP:{} uM:{} cTemp:{} err:{}",
            self.message_source,
            self.message_dest,
            self.message_type,
            self.write_bit as u8,
            self.login_bit as u8,
            self.unknown_bit as u8,
            self.on_off as u8,
            self.temperature,
            self.ac_mode,
            self.fan_mode,
            self.controller_present as u8,
            self.update_magic,
            self.controller_temp,
            self.ac_error,
        )
    }
}
