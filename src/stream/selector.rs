//! Predicates over data streams.

use super::data_stream::{DataStream, StreamType, INTERNAL_ID_START, WILDCARD_ID};
use crate::error::{Result, SensorGraphError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type code used to encode the persisted (buffered or output) class
const PERSISTED_CODE: u16 = 7;

/// Which user/system streams a wildcard selector matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorSpec {
    /// User streams only
    User,
    /// System streams only
    System,
    /// User streams plus system streams in the internal id range
    UserAndBreaks,
    /// Every stream of the category
    Combined,
}

impl SelectorSpec {
    fn bits(self) -> u16 {
        match self {
            SelectorSpec::User => 0,
            SelectorSpec::System => 0x0800,
            SelectorSpec::UserAndBreaks => 0x8000,
            SelectorSpec::Combined => 0x8800,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits & 0x8800 {
            0x0800 => SelectorSpec::System,
            0x8000 => SelectorSpec::UserAndBreaks,
            0x8800 => SelectorSpec::Combined,
            _ => SelectorSpec::User,
        }
    }

    fn modifier(self) -> Option<&'static str> {
        match self {
            SelectorSpec::User => Some("user"),
            SelectorSpec::System => Some("system"),
            SelectorSpec::UserAndBreaks => None,
            SelectorSpec::Combined => Some("combined"),
        }
    }

    fn matches(self, stream: &DataStream) -> bool {
        match self {
            SelectorSpec::User => !stream.system,
            SelectorSpec::System => stream.system,
            SelectorSpec::UserAndBreaks => !stream.system || stream.stream_id >= INTERNAL_ID_START,
            SelectorSpec::Combined => true,
        }
    }
}

/// Category a selector applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorTarget {
    Type(StreamType),
    /// Buffered or output streams
    Persisted,
}

impl SelectorTarget {
    fn accepts(self, stream_type: StreamType) -> bool {
        match self {
            SelectorTarget::Type(ty) => ty == stream_type,
            SelectorTarget::Persisted => stream_type.is_persisted(),
        }
    }
}

/// A predicate matching one stream or a class of streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataStreamSelector {
    pub target: SelectorTarget,
    /// `None` matches any id
    pub match_id: Option<u16>,
    pub spec: SelectorSpec,
}

impl DataStreamSelector {
    /// Selector matching exactly one stream
    pub fn exact(stream: DataStream) -> Self {
        Self {
            target: SelectorTarget::Type(stream.stream_type),
            match_id: Some(stream.stream_id),
            spec: if stream.system {
                SelectorSpec::System
            } else {
                SelectorSpec::User
            },
        }
    }

    /// Wildcard selector over one category
    pub fn all(stream_type: StreamType, spec: SelectorSpec) -> Self {
        Self {
            target: SelectorTarget::Type(stream_type),
            match_id: None,
            spec,
        }
    }

    /// Wildcard selector over every persisted stream
    pub fn persisted(spec: SelectorSpec) -> Self {
        Self {
            target: SelectorTarget::Persisted,
            match_id: None,
            spec,
        }
    }

    /// The single stream this selector names, if it is not a wildcard
    pub fn as_stream(&self) -> Option<DataStream> {
        match (self.target, self.match_id) {
            (SelectorTarget::Type(stream_type), Some(stream_id)) => Some(DataStream {
                stream_type,
                system: self.spec == SelectorSpec::System,
                stream_id,
            }),
            _ => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.match_id.is_none()
    }

    /// Whether every stream this selector can match is persisted
    pub fn is_persisted(&self) -> bool {
        match self.target {
            SelectorTarget::Type(ty) => ty.is_persisted(),
            SelectorTarget::Persisted => true,
        }
    }

    /// Whether a stream of this type could ever match
    pub fn covers_type(&self, stream_type: StreamType) -> bool {
        self.target.accepts(stream_type)
    }

    pub fn matches(&self, stream: &DataStream) -> bool {
        if !self.target.accepts(stream.stream_type) {
            return false;
        }

        match self.match_id {
            Some(id) => stream.stream_id == id && stream.system == (self.spec == SelectorSpec::System),
            None => self.spec.matches(stream),
        }
    }

    /// 16-bit encoding: `type << 12 | id-or-wildcard | spec bits`
    pub fn encode(&self) -> u16 {
        let code = match self.target {
            SelectorTarget::Type(ty) => ty.code(),
            SelectorTarget::Persisted => PERSISTED_CODE,
        };
        let id = self.match_id.unwrap_or(WILDCARD_ID);
        (code << 12) | id | self.spec.bits()
    }

    pub fn from_encoded(encoded: u16) -> Result<Self> {
        let code = (encoded >> 12) & 0x7;
        let target = if code == PERSISTED_CODE {
            SelectorTarget::Persisted
        } else {
            SelectorTarget::Type(StreamType::from_code(code).ok_or_else(|| {
                SensorGraphError::Argument(format!(
                    "invalid stream type code {} in encoded selector 0x{:04X}",
                    code, encoded
                ))
            })?)
        };

        let id = encoded & WILDCARD_ID;
        let spec = SelectorSpec::from_bits(encoded);

        if id == WILDCARD_ID {
            return Ok(Self {
                target,
                match_id: None,
                spec,
            });
        }

        if target == SelectorTarget::Persisted || encoded & 0x8000 != 0 {
            return Err(SensorGraphError::Argument(format!(
                "encoded selector 0x{:04X} mixes an exact id with a wildcard class",
                encoded
            )));
        }

        Ok(Self {
            target,
            match_id: Some(id),
            spec,
        })
    }
}

impl From<DataStream> for DataStreamSelector {
    fn from(stream: DataStream) -> Self {
        Self::exact(stream)
    }
}

impl FromStr for DataStreamSelector {
    type Err = SensorGraphError;

    fn from_str(s: &str) -> Result<Self> {
        let words: Vec<&str> = s.split_whitespace().collect();

        if words.first() != Some(&"all") {
            return s.parse::<DataStream>().map(Self::exact);
        }

        let (spec, type_word) = match &words[1..] {
            [type_word] => (SelectorSpec::UserAndBreaks, *type_word),
            [modifier, type_word] => {
                let spec = match *modifier {
                    "user" => SelectorSpec::User,
                    "system" => SelectorSpec::System,
                    "combined" => SelectorSpec::Combined,
                    other => {
                        return Err(SensorGraphError::Argument(format!(
                            "unknown selector modifier '{}'",
                            other
                        )))
                    }
                };
                (spec, *type_word)
            }
            _ => {
                return Err(SensorGraphError::Argument(format!(
                    "invalid selector '{}', expected 'all [user|system|combined] <types>'",
                    s
                )))
            }
        };

        if type_word == "persisted" {
            return Ok(Self::persisted(spec));
        }

        let stream_type = StreamType::from_keyword(type_word).ok_or_else(|| {
            SensorGraphError::Argument(format!("unknown stream type '{}' in selector", type_word))
        })?;
        Ok(Self::all(stream_type, spec))
    }
}

impl fmt::Display for DataStreamSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(stream) = self.as_stream() {
            return write!(f, "{}", stream);
        }

        write!(f, "all ")?;
        if let Some(modifier) = self.spec.modifier() {
            write!(f, "{} ", modifier)?;
        }
        match self.target {
            SelectorTarget::Type(ty) => write!(f, "{}", ty.plural()),
            SelectorTarget::Persisted => write!(f, "persisted"),
        }
    }
}

impl TryFrom<String> for DataStreamSelector {
    type Error = SensorGraphError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DataStreamSelector> for String {
    fn from(selector: DataStreamSelector) -> Self {
        selector.to_string()
    }
}
