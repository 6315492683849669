//! Tile slot identifiers.

use super::known_constants::CONTROLLER_ADDRESS;
use crate::error::{Result, SensorGraphError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SLOT_ADDRESS_BASE: u8 = 10;

const KIND_SLOT: u8 = 1;
const KIND_CONTROLLER: u8 = 2;

/// Address of a tile: the controller or a numbered slot (1..=31)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SlotIdentifier {
    Controller,
    Slot(u8),
}

impl SlotIdentifier {
    pub fn slot(number: u8) -> Result<Self> {
        if !(1..32).contains(&number) {
            return Err(SensorGraphError::Argument(format!(
                "slot number {} out of range, must be between 1 and 31",
                number
            )));
        }
        Ok(SlotIdentifier::Slot(number))
    }

    pub fn is_controller(&self) -> bool {
        matches!(self, SlotIdentifier::Controller)
    }

    /// Bus address: 8 for the controller, 10 + N for slot N
    pub fn address(&self) -> u8 {
        match self {
            SlotIdentifier::Controller => CONTROLLER_ADDRESS,
            SlotIdentifier::Slot(n) => SLOT_ADDRESS_BASE + n,
        }
    }

    /// 8-byte target form used by streamer and config descriptors
    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        match self {
            SlotIdentifier::Controller => out[7] = KIND_CONTROLLER,
            SlotIdentifier::Slot(n) => {
                out[0] = *n;
                out[7] = KIND_SLOT;
            }
        }
        out
    }

    pub fn from_encoded(data: &[u8; 8]) -> Result<Self> {
        match data[7] {
            KIND_CONTROLLER => Ok(SlotIdentifier::Controller),
            KIND_SLOT => Self::slot(data[0]),
            kind => Err(SensorGraphError::Argument(format!(
                "unknown slot kind {} in encoded slot identifier",
                kind
            ))),
        }
    }
}

impl FromStr for SlotIdentifier {
    type Err = SensorGraphError;

    fn from_str(s: &str) -> Result<Self> {
        let words: Vec<&str> = s.split_whitespace().collect();
        match words.as_slice() {
            ["controller"] => Ok(SlotIdentifier::Controller),
            ["slot", number] => {
                let parsed = match number.strip_prefix("0x") {
                    Some(hex) => u8::from_str_radix(hex, 16),
                    None => number.parse(),
                };
                let number = parsed.map_err(|_| {
                    SensorGraphError::Argument(format!("invalid slot number in '{}'", s))
                })?;
                Self::slot(number)
            }
            _ => Err(SensorGraphError::Argument(format!(
                "illegal slot identifier '{}', expected 'controller' or 'slot N'",
                s
            ))),
        }
    }
}

impl fmt::Display for SlotIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotIdentifier::Controller => write!(f, "controller"),
            SlotIdentifier::Slot(n) => write!(f, "slot {}", n),
        }
    }
}

impl TryFrom<String> for SlotIdentifier {
    type Error = SensorGraphError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SlotIdentifier> for String {
    fn from(slot: SlotIdentifier) -> Self {
        slot.to_string()
    }
}
