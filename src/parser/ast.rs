//! Parsed statements of a sensor graph program.

use crate::config::ConfigType;
use crate::graph::{Comparison, NodeDescriptor, SlotIdentifier, TriggerSource};
use crate::stream::{DataStream, DataStreamSelector};
use std::fmt;

/// Seconds per time unit keyword, singular or plural
pub fn time_unit_seconds(unit: &str) -> Option<u32> {
    let unit = unit.strip_suffix('s').unwrap_or(unit);
    match unit {
        "second" => Some(1),
        "minute" => Some(60),
        "hour" => Some(60 * 60),
        "day" => Some(24 * 60 * 60),
        "week" => Some(7 * 24 * 60 * 60),
        "month" => Some(30 * 24 * 60 * 60),
        "year" => Some(365 * 24 * 60 * 60),
        _ => None,
    }
}

/// Source of periodic ticks an interval counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockBasis {
    /// Wall clock seconds, driven by the system or fast tick
    Seconds,
    UserTick1,
    UserTick2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub count: u32,
    pub basis: ClockBasis,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.basis {
            ClockBasis::Seconds => write!(f, "{} seconds", self.count),
            ClockBasis::UserTick1 => write!(f, "{} tick_1", self.count),
            ClockBasis::UserTick2 => write!(f, "{} tick_2", self.count),
        }
    }
}

/// `value(stream) op N` or `count(stream) op N`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTrigger {
    pub source: TriggerSource,
    pub stream: DataStream,
    pub op: Comparison,
    pub reference: u32,
}

impl fmt::Display for StreamTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) {} {}",
            self.source.keyword(),
            self.stream,
            self.op,
            self.reference
        )
    }
}

/// One operand of an `on` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerClause {
    Stream(DataStream),
    Condition(StreamTrigger),
    /// Identifier resolved by the enclosing scope
    Named(String),
}

impl fmt::Display for TriggerClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerClause::Stream(stream) => write!(f, "{}", stream),
            TriggerClause::Condition(trigger) => write!(f, "{}", trigger),
            TriggerClause::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCombiner {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockHeader {
    Every(Interval),
    WhenConnected(SlotIdentifier),
    Latch(StreamTrigger),
    Config(SlotIdentifier),
    On {
        first: TriggerClause,
        second: Option<(BlockCombiner, TriggerClause)>,
    },
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockHeader::Every(interval) => write!(f, "every {}", interval),
            BlockHeader::WhenConnected(slot) => write!(f, "when connected to {}", slot),
            BlockHeader::Latch(trigger) => write!(f, "when {}", trigger),
            BlockHeader::Config(slot) => write!(f, "config {}", slot),
            BlockHeader::On { first, second } => {
                write!(f, "on {}", first)?;
                match second {
                    Some((BlockCombiner::And, clause)) => write!(f, " and {}", clause),
                    Some((BlockCombiner::Or, clause)) => write!(f, " or {}", clause),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Literal assigned by `meta` or `set`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Number(i64),
    String(String),
    Binary(Vec<u8>),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(value) => write!(f, "{}", value),
            Literal::String(text) => write!(f, "{:?}", text),
            Literal::Binary(bytes) => {
                write!(f, "hex:")?;
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// A number or a name to be resolved at compile time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Number(i64),
    Name(String),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Number(value) => write!(f, "0x{:X}", value),
            Reference::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    Latest,
    All,
    Count,
    Average,
}

impl CopyMode {
    fn keyword(self) -> Option<&'static str> {
        match self {
            CopyMode::Latest => None,
            CopyMode::All => Some("all"),
            CopyMode::Count => Some("count"),
            CopyMode::Average => Some("average"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopySource {
    Stream(DataStream),
    Constant(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Signed,
    Encrypted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerStatement {
    pub manual: bool,
    pub security: Option<Security>,
    pub realtime: bool,
    pub selector: DataStreamSelector,
    pub dest: Option<SlotIdentifier>,
    pub with_other: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Meta {
        name: String,
        value: Literal,
    },
    Require {
        name: String,
        op: Comparison,
        value: i64,
    },
    Set {
        target: Reference,
        value: Literal,
        declared_type: Option<ConfigType>,
    },
    Call {
        rpc: Reference,
        slot: SlotIdentifier,
        output: Option<DataStream>,
    },
    Streamer(StreamerStatement),
    Copy {
        mode: CopyMode,
        source: Option<CopySource>,
        output: DataStream,
    },
    Subtract {
        input: DataStream,
        output: DataStream,
        default: Option<i64>,
    },
    TriggerStreamer(usize),
    Node(NodeDescriptor),
    Block {
        header: BlockHeader,
        body: Vec<Statement>,
    },
}

/// A statement and the line it starts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub line: usize,
    pub kind: StatementKind,
}

impl Statement {
    pub fn children(&self) -> &[Statement] {
        match &self.kind {
            StatementKind::Block { body, .. } => body,
            _ => &[],
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StatementKind::Meta { name, value } => write!(f, "meta {} = {};", name, value),
            StatementKind::Require { name, op, value } => {
                write!(f, "require {} {} {};", name, op, value)
            }
            StatementKind::Set {
                target,
                value,
                declared_type,
            } => {
                write!(f, "set {} to {}", target, value)?;
                if let Some(ty) = declared_type {
                    write!(f, " as {}", ty)?;
                }
                write!(f, ";")
            }
            StatementKind::Call { rpc, slot, output } => {
                write!(f, "call {} on {}", rpc, slot)?;
                if let Some(output) = output {
                    write!(f, " => {}", output)?;
                }
                write!(f, ";")
            }
            StatementKind::Streamer(streamer) => {
                if streamer.manual {
                    write!(f, "manual ")?;
                }
                match streamer.security {
                    Some(Security::Signed) => write!(f, "signed ")?,
                    Some(Security::Encrypted) => write!(f, "encrypted ")?,
                    None => {}
                }
                if streamer.realtime {
                    write!(f, "realtime ")?;
                }
                write!(f, "streamer on {}", streamer.selector)?;
                if let Some(dest) = streamer.dest {
                    write!(f, " to {}", dest)?;
                }
                if let Some(other) = streamer.with_other {
                    write!(f, " with streamer {}", other)?;
                }
                write!(f, ";")
            }
            StatementKind::Copy {
                mode,
                source,
                output,
            } => {
                write!(f, "copy")?;
                if let Some(keyword) = mode.keyword() {
                    write!(f, " {}", keyword)?;
                }
                match source {
                    Some(CopySource::Stream(stream)) => write!(f, " {}", stream)?,
                    Some(CopySource::Constant(value)) => write!(f, " {}", value)?,
                    None => {}
                }
                write!(f, " => {};", output)
            }
            StatementKind::Subtract {
                input,
                output,
                default,
            } => {
                write!(f, "subtract {} => {}", input, output)?;
                if let Some(default) = default {
                    write!(f, ", default {}", default)?;
                }
                write!(f, ";")
            }
            StatementKind::TriggerStreamer(index) => write!(f, "trigger streamer {};", index),
            StatementKind::Node(descriptor) => write!(f, "{};", descriptor),
            StatementKind::Block { header, .. } => write!(f, "{}", header),
        }
    }
}

/// Render statements one per line, indenting block bodies by four spaces
pub fn dump_tree(statements: &[Statement]) -> String {
    let mut out = String::new();
    for statement in statements {
        dump_statement(statement, 0, &mut out);
    }
    out
}

fn dump_statement(statement: &Statement, depth: usize, out: &mut String) {
    out.push_str(&"    ".repeat(depth));
    out.push_str(&statement.to_string());
    out.push('\n');
    for child in statement.children() {
        dump_statement(child, depth + 1, out);
    }
}
