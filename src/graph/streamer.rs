//! Streamers: policies deciding when selected readings are exported.

use super::slot::SlotIdentifier;
use crate::error::{Result, SensorGraphError};
use crate::id::WalkerId;
use crate::stream::DataStreamSelector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const BINARY_STREAMER_SIZE: usize = 14;

const TRIGGER_MANUAL: u8 = 0;
const TRIGGER_AUTOMATIC: u8 = 1;
const TRIGGER_WITH_OTHER: u8 = 0x80;

/// Packaging scheme of an exported report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Individual = 0,
    HashedList = 1,
    SignedListUserKey = 2,
    SignedListDeviceKey = 3,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 4] = [
        ReportFormat::Individual,
        ReportFormat::HashedList,
        ReportFormat::SignedListUserKey,
        ReportFormat::SignedListDeviceKey,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ReportFormat::Individual => "individual",
            ReportFormat::HashedList => "hashedlist",
            ReportFormat::SignedListUserKey => "signedlist_userkey",
            ReportFormat::SignedListDeviceKey => "signedlist_devicekey",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = SensorGraphError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|format| format.name() == s)
            .ok_or_else(|| SensorGraphError::Argument(format!("unknown report format '{}'", s)))
    }
}

/// How a report is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Broadcast = 1,
    #[default]
    Telegram = 2,
    Synchronous = 4,
}

impl ReportType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ReportType::Broadcast => "broadcast",
            ReportType::Telegram => "telegram",
            ReportType::Synchronous => "synchronous",
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ReportType::Broadcast),
            2 => Some(ReportType::Telegram),
            4 => Some(ReportType::Synchronous),
            _ => None,
        }
    }
}

/// Exports readings matching `selector` to `dest`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStreamer {
    pub selector: DataStreamSelector,
    pub dest: SlotIdentifier,
    pub format: ReportFormat,
    /// Fire whenever unexported data exists
    pub automatic: bool,
    #[serde(default)]
    pub report_type: ReportType,
    /// Fire together with this other streamer
    #[serde(default)]
    pub with_other: Option<usize>,
}

impl DataStreamer {
    pub fn new(selector: DataStreamSelector, format: ReportFormat, automatic: bool) -> Self {
        Self {
            selector,
            dest: SlotIdentifier::Controller,
            format,
            automatic,
            report_type: ReportType::default(),
            with_other: None,
        }
    }

    pub fn to_binary(&self) -> Result<[u8; BINARY_STREAMER_SIZE]> {
        let trigger = match (self.automatic, self.with_other) {
            (true, _) => TRIGGER_AUTOMATIC,
            (false, Some(other)) => {
                let other = u8::try_from(other).ok().filter(|o| *o < TRIGGER_WITH_OTHER).ok_or_else(|| {
                    SensorGraphError::Data(format!("with_other streamer index {} is too large", other))
                })?;
                TRIGGER_WITH_OTHER | other
            }
            (false, None) => TRIGGER_MANUAL,
        };

        let mut out = [0u8; BINARY_STREAMER_SIZE];
        out[0..8].copy_from_slice(&self.dest.encode());
        out[8..10].copy_from_slice(&self.selector.encode().to_le_bytes());
        out[10] = trigger;
        out[11] = self.format.code();
        out[12] = self.report_type.code();
        Ok(out)
    }

    pub fn from_binary(data: &[u8]) -> Result<Self> {
        if data.len() != BINARY_STREAMER_SIZE {
            return Err(SensorGraphError::Argument(format!(
                "binary streamer descriptor has {} bytes, expected {}",
                data.len(),
                BINARY_STREAMER_SIZE
            )));
        }

        let mut dest = [0u8; 8];
        dest.copy_from_slice(&data[0..8]);
        let dest = SlotIdentifier::from_encoded(&dest)?;
        let selector = DataStreamSelector::from_encoded(u16::from_le_bytes([data[8], data[9]]))?;

        let (automatic, with_other) = match data[10] {
            TRIGGER_MANUAL => (false, None),
            TRIGGER_AUTOMATIC => (true, None),
            code if code & TRIGGER_WITH_OTHER != 0 => {
                (false, Some((code & !TRIGGER_WITH_OTHER) as usize))
            }
            code => {
                return Err(SensorGraphError::Argument(format!(
                    "unknown streamer trigger code {}",
                    code
                )))
            }
        };

        let format = ReportFormat::ALL
            .iter()
            .copied()
            .find(|f| f.code() == data[11])
            .ok_or_else(|| SensorGraphError::Argument(format!("unknown report format code {}", data[11])))?;
        let report_type = ReportType::from_code(data[12])
            .ok_or_else(|| SensorGraphError::Argument(format!("unknown report type code {}", data[12])))?;

        Ok(Self {
            selector,
            dest,
            format,
            automatic,
            report_type,
            with_other,
        })
    }
}

impl fmt::Display for DataStreamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.automatic {
            write!(f, "manual ")?;
        }
        if self.format == ReportFormat::SignedListUserKey {
            write!(f, "signed ")?;
        }
        if self.format == ReportFormat::Individual {
            write!(f, "realtime ")?;
        }
        write!(f, "streamer on {}", self.selector)?;
        if !self.dest.is_controller() {
            write!(f, " to {}", self.dest)?;
        }
        if let Some(other) = self.with_other {
            write!(f, " with streamer {}", other)?;
        }
        Ok(())
    }
}

/// Runtime progress of one streamer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamerState {
    /// Set by `trigger_streamer` or a manual request, cleared on export
    pub marked: bool,
    /// Lowest reading id not yet exported
    pub next_reading_id: u32,
    /// Walker following a non-persisted selected stream
    pub walker: Option<WalkerId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let mut streamer = DataStreamer::new("all outputs".parse().unwrap(), ReportFormat::HashedList, true);
        assert_eq!(streamer.to_string(), "streamer on all outputs");

        streamer.automatic = false;
        streamer.format = ReportFormat::SignedListUserKey;
        streamer.dest = SlotIdentifier::Slot(2);
        streamer.with_other = Some(1);
        assert_eq!(
            streamer.to_string(),
            "manual signed streamer on all outputs to slot 2 with streamer 1"
        );

        let realtime = DataStreamer::new("unbuffered 1".parse().unwrap(), ReportFormat::Individual, true);
        assert_eq!(realtime.to_string(), "realtime streamer on unbuffered 1");
    }

    #[test]
    fn test_binary_layout() {
        let mut streamer = DataStreamer::new("all outputs".parse().unwrap(), ReportFormat::HashedList, false);
        streamer.with_other = Some(3);
        let binary = streamer.to_binary().unwrap();
        assert_eq!(&binary[8..10], &0xD7FFu16.to_le_bytes());
        assert_eq!(binary[10], 0x83);
        assert_eq!(binary[11], 1);
        assert_eq!(binary[12], 2);
        assert_eq!(binary[13], 0);
        assert_eq!(DataStreamer::from_binary(&binary).unwrap(), streamer);
    }

    #[test]
    fn test_invalid_binary() {
        let streamer = DataStreamer::new("output 1".parse().unwrap(), ReportFormat::Individual, true);
        let mut binary = streamer.to_binary().unwrap();
        binary[12] = 3;
        assert!(DataStreamer::from_binary(&binary).is_err());
        assert!(DataStreamer::from_binary(&binary[..13]).is_err());
    }
}
