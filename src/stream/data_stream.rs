//! Typed, indexed stream identifiers.

use crate::error::{Result, SensorGraphError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved id used by selectors to mean "any id"
pub const WILDCARD_ID: u16 = 0x7FF;

/// Streams with ids at or above this value are internal to the engine
pub const INTERNAL_ID_START: u16 = 0x400;

const SYSTEM_MASK: u16 = 0x0800;
const ID_MASK: u16 = 0x07FF;

/// Category of a data stream, with its binary type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamType {
    Buffered = 0,
    Unbuffered = 1,
    Constant = 2,
    Input = 3,
    Counter = 4,
    Output = 5,
}

impl StreamType {
    pub const ALL: [StreamType; 6] = [
        StreamType::Buffered,
        StreamType::Unbuffered,
        StreamType::Constant,
        StreamType::Input,
        StreamType::Counter,
        StreamType::Output,
    ];

    /// Type code used in encoded streams and selectors
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|ty| ty.code() == code)
    }

    /// Whether readings of this type are kept by the storage engine
    pub fn is_persisted(self) -> bool {
        matches!(self, StreamType::Buffered | StreamType::Output)
    }

    /// Keyword used in the singular text form (`counter 1`)
    pub fn keyword(self) -> &'static str {
        match self {
            StreamType::Buffered => "buffered",
            StreamType::Unbuffered => "unbuffered",
            StreamType::Constant => "constant",
            StreamType::Input => "input",
            StreamType::Counter => "counter",
            StreamType::Output => "output",
        }
    }

    /// Keyword used in wildcard selectors (`all counters`)
    pub fn plural(self) -> &'static str {
        match self {
            StreamType::Buffered => "buffered",
            StreamType::Unbuffered => "unbuffered",
            StreamType::Constant => "constants",
            StreamType::Input => "inputs",
            StreamType::Counter => "counters",
            StreamType::Output => "outputs",
        }
    }

    /// Parse either the singular or plural keyword
    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|ty| ty.keyword() == word || ty.plural() == word)
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Identifier of one telemetry channel
///
/// Streams order by type, then system flag, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataStream {
    pub stream_type: StreamType,
    pub system: bool,
    pub stream_id: u16,
}

impl DataStream {
    /// Create a user stream
    pub fn new(stream_type: StreamType, stream_id: u16) -> Self {
        Self {
            stream_type,
            system: false,
            stream_id,
        }
    }

    /// Create a system stream
    pub fn system(stream_type: StreamType, stream_id: u16) -> Self {
        Self {
            stream_type,
            system: true,
            stream_id,
        }
    }

    /// Create a stream checking the id is encodable
    pub fn checked(stream_type: StreamType, stream_id: u16, system: bool) -> Result<Self> {
        if stream_id >= WILDCARD_ID {
            return Err(SensorGraphError::Argument(format!(
                "stream id {} out of range (must be below {})",
                stream_id, WILDCARD_ID
            )));
        }
        Ok(Self {
            stream_type,
            system,
            stream_id,
        })
    }

    pub fn is_persisted(&self) -> bool {
        self.stream_type.is_persisted()
    }

    /// Compact 16-bit encoding: `type << 12 | system << 11 | id`
    pub fn encode(&self) -> u16 {
        let mut encoded = (self.stream_type.code() << 12) | (self.stream_id & ID_MASK);
        if self.system {
            encoded |= SYSTEM_MASK;
        }
        encoded
    }

    /// Decode the compact form produced by [`DataStream::encode`]
    pub fn from_encoded(encoded: u16) -> Result<Self> {
        let code = encoded >> 12;
        let stream_type = StreamType::from_code(code).ok_or_else(|| {
            SensorGraphError::Argument(format!(
                "invalid stream type code {} in encoded stream 0x{:04X}",
                code, encoded
            ))
        })?;

        Self::checked(
            stream_type,
            encoded & ID_MASK,
            encoded & SYSTEM_MASK != 0,
        )
    }
}

/// Parse a stream id in decimal or `0x` hex
pub(crate) fn parse_id(text: &str) -> Result<u16> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse::<u16>(),
    };
    parsed.map_err(|_| SensorGraphError::Argument(format!("could not parse stream id '{}'", text)))
}

impl FromStr for DataStream {
    type Err = SensorGraphError;

    fn from_str(s: &str) -> Result<Self> {
        let words: Vec<&str> = s.split_whitespace().collect();
        let (system, rest) = match words.split_first() {
            Some((&"system", rest)) => (true, rest),
            _ => (false, words.as_slice()),
        };

        let (type_word, id_word) = match rest {
            [type_word, id_word] => (*type_word, *id_word),
            _ => {
                return Err(SensorGraphError::Argument(format!(
                    "invalid stream '{}', expected '[system] <type> <id>'",
                    s
                )))
            }
        };

        let stream_type = StreamType::ALL
            .iter()
            .copied()
            .find(|ty| ty.keyword() == type_word)
            .ok_or_else(|| {
                SensorGraphError::Argument(format!("unknown stream type '{}'", type_word))
            })?;

        Self::checked(stream_type, parse_id(id_word)?, system)
    }
}

impl fmt::Display for DataStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.system {
            write!(f, "system ")?;
        }
        write!(f, "{} {}", self.stream_type, self.stream_id)
    }
}

impl TryFrom<String> for DataStream {
    type Error = SensorGraphError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DataStream> for String {
    fn from(stream: DataStream) -> Self {
        stream.to_string()
    }
}
