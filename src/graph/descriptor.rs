//! Text and 20-byte binary forms of node descriptors.
//!
//! Text: `(<stream> <trigger> [&&|'||' <stream> <trigger>]) => <stream> using <function>`
//!
//! Binary, little-endian:
//!
//! | offset | field |
//! |---|---|
//! | 0 | reference of trigger A (u32) |
//! | 4 | reference of trigger B (u32) |
//! | 8 | encoded output stream (u16) |
//! | 10 | encoded input A selector (u16) |
//! | 12 | encoded input B selector or `0xFFFF` (u16) |
//! | 14 | function code |
//! | 15 | trigger A condition |
//! | 16 | trigger B condition |
//! | 17 | combiner |
//! | 18 | padding (2 bytes) |

use super::node::{
    Combiner, Comparison, InputTrigger, NodeDescriptor, NodeInput, ProcessingFunction,
    TriggerSource,
};
use crate::error::{Result, SensorGraphError};
use crate::stream::{DataStream, DataStreamSelector};
use std::fmt;
use std::str::FromStr;

pub const BINARY_NODE_SIZE: usize = 20;

const NO_INPUT: u16 = 0xFFFF;

impl NodeDescriptor {
    pub fn to_binary(&self) -> [u8; BINARY_NODE_SIZE] {
        let (cond_a, ref_a) = self.input_a.trigger.encode();
        let (input_b, (cond_b, ref_b)) = match &self.input_b {
            Some(input) => (input.selector.encode(), input.trigger.encode()),
            None => (NO_INPUT, InputTrigger::Always.encode()),
        };

        let mut out = [0u8; BINARY_NODE_SIZE];
        out[0..4].copy_from_slice(&ref_a.to_le_bytes());
        out[4..8].copy_from_slice(&ref_b.to_le_bytes());
        out[8..10].copy_from_slice(&self.output.encode().to_le_bytes());
        out[10..12].copy_from_slice(&self.input_a.selector.encode().to_le_bytes());
        out[12..14].copy_from_slice(&input_b.to_le_bytes());
        out[14] = self.function.code();
        out[15] = cond_a;
        out[16] = cond_b;
        out[17] = self.combiner.code();
        out
    }

    pub fn from_binary(data: &[u8]) -> Result<Self> {
        if data.len() != BINARY_NODE_SIZE {
            return Err(SensorGraphError::Argument(format!(
                "binary node descriptor has {} bytes, expected {}",
                data.len(),
                BINARY_NODE_SIZE
            )));
        }

        let u32_at = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let u16_at = |at: usize| u16::from_le_bytes([data[at], data[at + 1]]);

        let output = DataStream::from_encoded(u16_at(8))?;

        let encoded_a = u16_at(10);
        if encoded_a == NO_INPUT {
            return Err(SensorGraphError::Argument(
                "binary node descriptor has no first input".to_string(),
            ));
        }
        let input_a = NodeInput::new(
            DataStreamSelector::from_encoded(encoded_a)?,
            InputTrigger::decode(data[15], u32_at(0))?,
        );

        let encoded_b = u16_at(12);
        let input_b = if encoded_b == NO_INPUT {
            None
        } else {
            Some(NodeInput::new(
                DataStreamSelector::from_encoded(encoded_b)?,
                InputTrigger::decode(data[16], u32_at(4))?,
            ))
        };

        let function = ProcessingFunction::from_code(data[14]).ok_or_else(|| {
            SensorGraphError::Argument(format!("unknown processing function code {}", data[14]))
        })?;

        let combiner = match (data[17], input_b.is_some()) {
            (0 | 1, false) => Combiner::None,
            (0, true) => Combiner::And,
            (1, true) => Combiner::Or,
            (code, _) => {
                return Err(SensorGraphError::Argument(format!(
                    "invalid trigger combiner {} in binary node descriptor",
                    code
                )))
            }
        };

        Ok(Self {
            input_a,
            input_b,
            combiner,
            output,
            function,
        })
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.input_a)?;
        if let Some(input_b) = &self.input_b {
            let symbol = self.combiner.symbol().unwrap_or("||");
            write!(f, " {} {}", symbol, input_b)?;
        }
        write!(f, ") => {} using {}", self.output, self.function)
    }
}

impl FromStr for NodeDescriptor {
    type Err = SensorGraphError;

    fn from_str(s: &str) -> Result<Self> {
        let spaced = s.replace('(', " ( ").replace(')', " ) ");
        let mut tokens = Tokens {
            words: spaced.split_whitespace().collect(),
            pos: 0,
            source: s,
        };

        tokens.expect("(")?;
        let input_a = tokens.input()?;

        let (combiner, input_b) = match tokens.peek() {
            Some("&&") => {
                tokens.next()?;
                (Combiner::And, Some(tokens.input()?))
            }
            Some("||") => {
                tokens.next()?;
                (Combiner::Or, Some(tokens.input()?))
            }
            _ => (Combiner::None, None),
        };

        tokens.expect(")")?;
        tokens.expect("=>")?;
        let output = tokens.stream()?;
        tokens.expect("using")?;
        let function = tokens.next()?.parse()?;
        tokens.finish()?;

        Ok(Self {
            input_a,
            input_b,
            combiner,
            output,
            function,
        })
    }
}

struct Tokens<'a> {
    words: Vec<&'a str>,
    pos: usize,
    source: &'a str,
}

impl<'a> Tokens<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.words.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<&'a str> {
        let word = self.peek().ok_or_else(|| self.error("unexpected end of descriptor"))?;
        self.pos += 1;
        Ok(word)
    }

    fn expect(&mut self, expected: &str) -> Result<()> {
        let word = self.next()?;
        if word != expected {
            return Err(self.error(&format!("expected '{}', found '{}'", expected, word)));
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(word) => Err(self.error(&format!("unexpected trailing '{}'", word))),
        }
    }

    /// `[system] <type> [node] <id>`
    fn stream(&mut self) -> Result<DataStream> {
        let mut text = String::new();
        if self.peek() == Some("system") {
            text.push_str("system ");
            self.pos += 1;
        }
        text.push_str(self.next()?);
        if self.peek() == Some("node") {
            self.pos += 1;
        }
        text.push(' ');
        text.push_str(self.next()?);
        text.parse()
    }

    fn input(&mut self) -> Result<NodeInput> {
        let stream = self.stream()?;
        let trigger = match self.next()? {
            "always" => InputTrigger::Always,
            "when" => {
                let source_word = self.next()?;
                let source = TriggerSource::from_keyword(source_word)
                    .ok_or_else(|| self.error(&format!("unknown trigger source '{}'", source_word)))?;
                let op_word = self.next()?;
                let op = Comparison::from_symbol(op_word)
                    .ok_or_else(|| self.error(&format!("unknown comparison '{}'", op_word)))?;
                let reference = parse_reference(self.next()?)
                    .ok_or_else(|| self.error("trigger reference must be an unsigned integer"))?;
                InputTrigger::when(source, op, reference)
            }
            other => return Err(self.error(&format!("expected a trigger, found '{}'", other))),
        };
        Ok(NodeInput::new(stream, trigger))
    }

    fn error(&self, message: &str) -> SensorGraphError {
        SensorGraphError::Argument(format!("invalid node descriptor '{}': {}", self.source, message))
    }
}

fn parse_reference(text: &str) -> Option<u32> {
    match text.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(text: &str) -> NodeDescriptor {
        text.parse().unwrap()
    }

    #[test]
    fn test_parse_dual_input() {
        let node = desc("(input 1 always && input 2 when count >= 1) => unbuffered 1 using copy_all");
        assert_eq!(node.combiner, Combiner::And);
        assert_eq!(node.function, ProcessingFunction::CopyAllA);
        assert_eq!(node.output, "unbuffered 1".parse().unwrap());
        assert_eq!(
            node.input_b.unwrap().trigger,
            InputTrigger::when(TriggerSource::Count, Comparison::GreaterEqual, 1)
        );
        assert_eq!(
            node.to_string(),
            "(input 1 always && input 2 when count >= 1) => unbuffered 1 using copy_all_a"
        );
    }

    #[test]
    fn test_parse_tolerates_node_keyword_and_hex() {
        let node = desc("(system input node 2 when value == 0x10) => counter 1024 using copy_latest_a");
        assert_eq!(
            node.input_a.trigger,
            InputTrigger::when(TriggerSource::Value, Comparison::Equal, 16)
        );
        assert_eq!(node.combiner, Combiner::None);
    }

    #[test]
    fn test_parse_errors() {
        for text in [
            "input 1 always) => output 1 using copy_latest_a",
            "(input 1 sometimes) => output 1 using copy_latest_a",
            "(input 1 always) => output 1 using copy_everything",
            "(input 1 when value != 3) => output 1 using copy_latest_a",
            "(input 1 always) => output 1 using copy_latest_a extra",
        ] {
            assert!(text.parse::<NodeDescriptor>().is_err(), "{}", text);
        }
    }

    #[test]
    fn test_binary_layout() {
        let node = desc("(input 1 always && input 2 when count >= 1) => unbuffered 1 using copy_all_a");
        let binary = node.to_binary();
        assert_eq!(&binary[0..4], &[0, 0, 0, 0]);
        assert_eq!(&binary[4..8], &[1, 0, 0, 0]);
        assert_eq!(&binary[8..10], &0x1001u16.to_le_bytes());
        assert_eq!(&binary[10..12], &0x3001u16.to_le_bytes());
        assert_eq!(&binary[12..14], &0x3002u16.to_le_bytes());
        assert_eq!(binary[14], 2);
        assert_eq!(binary[15], 10);
        assert_eq!(binary[16], 5);
        assert_eq!(binary[17], 0);
        assert_eq!(NodeDescriptor::from_binary(&binary).unwrap(), node);
    }

    #[test]
    fn test_single_input_binary_uses_or_combiner() {
        let node = desc("(counter 1024 when count >= 6) => output 3 using average_a");
        let binary = node.to_binary();
        assert_eq!(&binary[12..14], &[0xFF, 0xFF]);
        assert_eq!(binary[17], 1);
        assert_eq!(NodeDescriptor::from_binary(&binary).unwrap(), node);
    }

    #[test]
    fn test_invalid_binary() {
        assert!(NodeDescriptor::from_binary(&[0u8; 19]).is_err());

        let mut binary = desc("(input 1 always) => output 1 using copy_latest_a").to_binary();
        binary[14] = 99;
        assert!(NodeDescriptor::from_binary(&binary).is_err());

        let mut binary = desc("(input 1 always) => output 1 using copy_latest_a").to_binary();
        binary[10] = 0xFF;
        binary[11] = 0xFF;
        assert!(NodeDescriptor::from_binary(&binary).is_err());
    }
}
