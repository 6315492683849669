//! Scheduled inputs for the simulator.

use crate::error::{Result, SensorGraphError};
use crate::parser::{lexer::parse_number, time_unit_seconds};
use crate::stream::{DataStream, StreamType};
use std::fmt;
use std::str::FromStr;

/// A value pushed into an input stream at a simulated time
///
/// Text form: `[<N> <unit>: ][system ]input <id> = <value>`. Without a
/// time prefix the stimulus is due at time 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationStimulus {
    /// Seconds since the simulation started
    pub time: u32,
    pub stream: DataStream,
    pub value: i32,
}

impl SimulationStimulus {
    /// Create a stimulus; only input streams can be stimulated
    pub fn new(time: u32, stream: DataStream, value: i32) -> Result<Self> {
        if stream.stream_type != StreamType::Input {
            return Err(SensorGraphError::Argument(format!(
                "cannot stimulate {}, only input streams accept external readings",
                stream
            )));
        }
        Ok(Self {
            time,
            stream,
            value,
        })
    }
}

fn parse_time(text: &str) -> Result<u32> {
    let invalid = || SensorGraphError::Argument(format!("invalid stimulus time '{}'", text.trim()));

    let words: Vec<&str> = text.split_whitespace().collect();
    let [count, unit] = words.as_slice() else {
        return Err(invalid());
    };
    let count = parse_number(count)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(invalid)?;
    let unit = time_unit_seconds(unit).ok_or_else(invalid)?;
    count.checked_mul(unit).ok_or_else(invalid)
}

impl FromStr for SimulationStimulus {
    type Err = SensorGraphError;

    fn from_str(s: &str) -> Result<Self> {
        let (time, rest) = match s.split_once(':') {
            Some((time, rest)) => (parse_time(time)?, rest),
            None => (0, s),
        };

        let (stream, value) = rest.split_once('=').ok_or_else(|| {
            SensorGraphError::Argument(format!(
                "invalid stimulus '{}', expected '<stream> = <value>'",
                s
            ))
        })?;

        let stream: DataStream = stream.trim().parse()?;
        let value = parse_number(value.trim())
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| {
                SensorGraphError::Argument(format!("invalid stimulus value '{}'", value.trim()))
            })?;

        Self::new(time, stream, value)
    }
}

impl fmt::Display for SimulationStimulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} seconds: {} = {}", self.time, self.stream, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_time() {
        let stim: SimulationStimulus = "10 minutes: input 1 = 15".parse().unwrap();
        assert_eq!(stim.time, 600);
        assert_eq!(stim.stream, "input 1".parse().unwrap());
        assert_eq!(stim.value, 15);
    }

    #[test]
    fn test_parse_without_time() {
        let stim: SimulationStimulus = "system input 1025 = 0x0b".parse().unwrap();
        assert_eq!(stim.time, 0);
        assert!(stim.stream.system);
        assert_eq!(stim.value, 11);

        let negative: SimulationStimulus = "1 second: input 2 = -4".parse().unwrap();
        assert_eq!(negative.value, -4);
    }

    #[test]
    fn test_non_input_streams_rejected() {
        for text in ["output 1 = 2", "1 hour: unbuffered 1 = 2", "system counter 3 = 0"] {
            let err = text.parse::<SimulationStimulus>().unwrap_err();
            assert!(err.is_argument(), "{}", text);
        }
    }

    #[test]
    fn test_garbage_rejected() {
        for text in [
            "input 1",
            "input 1 = seven",
            "ten minutes: input 1 = 1",
            "10 fortnights: input 1 = 1",
            "input 1 = 99999999999",
        ] {
            assert!(text.parse::<SimulationStimulus>().unwrap_err().is_argument(), "{}", text);
        }
    }
}
