use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// EtherType of IEC 61850-8-1 GOOSE
pub const ETHERTYPE_GOOSE: u16 = 0x88b8;
/// EtherType of IEC 61850-9-2 Sampled Values
pub const ETHERTYPE_SV: u16 = 0x88ba;
/// IEEE 802.1Q tag protocol identifier
pub const TPID_VLAN: u16 = 0x8100;
/// Frames shorter than this are never parsed as bus traffic.
pub const MIN_BUS_FRAME_LEN: usize = 64;

/// Ethernet MAC address, printed as `01:0C:CD:04:00:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddr(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Reads the address from the first six bytes of `buffer`.
    pub fn from_slice(buffer: &[u8]) -> Option<Self> {
        let bytes: [u8; 6] = buffer.get(..6)?.try_into().ok()?;
        Some(MacAddr(bytes))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid MAC address `{0}`")]
pub struct MacParseError(pub String);

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let decoded = hex::decode(&digits).map_err(|_| MacParseError(s.to_string()))?;
        let bytes: [u8; 6] = decoded
            .try_into()
            .map_err(|_| MacParseError(s.to_string()))?;
        Ok(MacAddr(bytes))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Time quality flags according to IEC 61850-7-2 Table 30
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TimeQuality {
    pub leap_second_known: bool,
    pub clock_failure: bool,
    pub clock_not_synchronized: bool,
    pub time_accuracy: u8, // 5 bits (0-31)
}

impl TimeQuality {
    pub fn from_byte(byte: u8) -> Self {
        TimeQuality {
            leap_second_known: byte & 0x80 != 0,
            clock_failure: byte & 0x40 != 0,
            clock_not_synchronized: byte & 0x20 != 0,
            time_accuracy: byte & 0x1f,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut byte = self.time_accuracy & 0x1f;
        if self.leap_second_known {
            byte |= 0x80;
        }
        if self.clock_failure {
            byte |= 0x40;
        }
        if self.clock_not_synchronized {
            byte |= 0x20;
        }
        byte
    }
}

/// IEC 61850 UtcTime: 4 bytes seconds, 3 bytes binary fraction, 1 byte quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UtcTime {
    /// Seconds since Unix epoch
    pub seconds: u32,
    /// 24-bit fraction of a second
    pub fraction: u32,
    pub quality: TimeQuality,
}

impl UtcTime {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        UtcTime {
            seconds: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            fraction: u32::from_be_bytes([0, bytes[4], bytes[5], bytes[6]]),
            quality: TimeQuality::from_byte(bytes[7]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&self.seconds.to_be_bytes());
        bytes[4..7].copy_from_slice(&self.fraction.to_be_bytes()[1..4]);
        bytes[7] = self.quality.to_byte();
        bytes
    }

    pub fn fraction_as_nanos(&self) -> u32 {
        // fraction / 2^24 * 10^9
        ((self.fraction as u64 * 1_000_000_000) >> 24) as u32
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds as i64, self.fraction_as_nanos())
    }

    pub fn from_datetime(time: DateTime<Utc>, quality: TimeQuality) -> Self {
        let seconds = time.timestamp().clamp(0, u32::MAX as i64) as u32;
        let fraction = ((time.timestamp_subsec_nanos() as u64) << 24) / 1_000_000_000;
        UtcTime {
            seconds,
            fraction: fraction as u32,
            quality,
        }
    }
}

/// Coarse classification of a parse failure, used for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Frame is too short or not the expected protocol.
    Framing,
    /// BER structure is broken.
    Structural,
    /// Structure is fine but a mandatory field is missing.
    Incomplete,
}

/// Reasons a GOOSE or SV frame could not be turned into a passport.
///
/// Offsets are absolute positions in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("frame of {len} bytes is too short")]
    TooShort { len: usize },
    #[error("unexpected EtherType {ether_type:#06x}")]
    WrongEtherType { ether_type: u16 },
    #[error("expected tag {expected:#04x} at offset {offset}, found {found:#04x}")]
    UnexpectedTag { expected: u8, found: u8, offset: usize },
    #[error("element at offset {offset} runs past the end of its container")]
    Truncated { offset: usize },
    #[error("unsupported BER length encoding at offset {offset}")]
    BadLength { offset: usize },
    #[error("integer of {len} bytes at offset {offset} does not fit")]
    BadInteger { offset: usize, len: usize },
    #[error("long-form length at offset {offset} where a single byte is required")]
    LongFormLength { offset: usize },
    #[error("mandatory field {field} missing")]
    Incomplete { field: &'static str },
}

impl ParseError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ParseError::TooShort { .. } | ParseError::WrongEtherType { .. } => ErrorClass::Framing,
            ParseError::Incomplete { .. } => ErrorClass::Incomplete,
            _ => ErrorClass::Structural,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("buffer too small: {required} bytes required, {available} available")]
    BufferTooSmall { required: usize, available: usize },
    #[error("length {value} exceeds the three-byte BER range")]
    LengthOutOfRange { value: usize },
    #[error("frame of {len} bytes exceeds the 16-bit APDU length")]
    FrameTooLarge { len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utc_time_from_bytes() {
        let bytes = [0x65, 0x4a, 0x2c, 0x80, 0x12, 0x34, 0x56, 0x0a];
        let time = UtcTime::from_bytes(bytes);

        assert_eq!(time.seconds, 0x654a2c80);
        assert_eq!(time.fraction, 0x123456);
        assert_eq!(time.quality.time_accuracy, 10);
        assert_eq!(time.to_bytes(), bytes);
    }

    #[test]
    fn test_utc_time_to_datetime() {
        let time = UtcTime {
            seconds: 1698502245, // 2023-10-28
            fraction: 0x800000,
            quality: TimeQuality::default(),
        };

        let datetime = time.to_datetime().unwrap();
        assert_eq!(datetime.timestamp(), 1698502245);
        assert!((datetime.timestamp_subsec_nanos() as i64 - 500_000_000).abs() < 100);
        assert!(datetime.to_rfc3339().starts_with("2023-10-28"));
    }

    #[test]
    fn test_utc_time_from_datetime() {
        let datetime = DateTime::from_timestamp(1698502245, 125_000_000).unwrap();
        let time = UtcTime::from_datetime(datetime, TimeQuality::from_byte(0x0a));

        assert_eq!(time.seconds, 1698502245);
        assert_eq!(time.fraction, 0x200000);
        assert_eq!(time.quality.time_accuracy, 10);
    }

    #[test]
    fn test_time_quality_bits() {
        let quality = TimeQuality::from_byte(0xea);
        assert!(quality.leap_second_known);
        assert!(quality.clock_failure);
        assert!(quality.clock_not_synchronized);
        assert_eq!(quality.time_accuracy, 0x0a);
        assert_eq!(quality.to_byte(), 0xea);
    }

    #[test]
    fn test_mac_display_and_parse() {
        let mac = MacAddr::new([0x01, 0x0c, 0xcd, 0x04, 0x00, 0x00]);
        assert_eq!(mac.to_string(), "01:0C:CD:04:00:00");
        assert_eq!("01:0c:cd:04:00:00".parse::<MacAddr>().unwrap(), mac);
        assert_eq!("01-0C-CD-04-00-00".parse::<MacAddr>().unwrap(), mac);
        assert!("01:0C:CD:04:00".parse::<MacAddr>().is_err());
        assert!("zz:0C:CD:04:00:00".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_serde() {
        let mac = MacAddr::new([0x01, 0x0c, 0xcd, 0x01, 0x00, 0x01]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"01:0C:CD:01:00:01\"");
        assert_eq!(serde_json::from_str::<MacAddr>(&json).unwrap(), mac);
    }

    #[test]
    fn test_error_class() {
        assert_eq!(ParseError::TooShort { len: 10 }.class(), ErrorClass::Framing);
        assert_eq!(
            ParseError::WrongEtherType { ether_type: 0x0800 }.class(),
            ErrorClass::Framing
        );
        assert_eq!(ParseError::Truncated { offset: 40 }.class(), ErrorClass::Structural);
        assert_eq!(
            ParseError::Incomplete { field: "goID" }.class(),
            ErrorClass::Incomplete
        );
    }
}
