//! Node building blocks: triggers, combiners and processing functions.

use crate::error::{Result, SensorGraphError};
use crate::id::WalkerId;
use crate::storage::SensorLog;
use crate::stream::{DataStream, DataStreamSelector};
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a trigger, with its binary code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Greater = 0,
    Less = 1,
    GreaterEqual = 2,
    LessEqual = 3,
    Equal = 4,
}

/// Binary op code of the `always` trigger
pub(crate) const ALWAYS_CODE: u8 = 5;

impl Comparison {
    pub const ALL: [Comparison; 5] = [
        Comparison::Greater,
        Comparison::Less,
        Comparison::GreaterEqual,
        Comparison::LessEqual,
        Comparison::Equal,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.code() == code)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Greater => ">",
            Comparison::Less => "<",
            Comparison::GreaterEqual => ">=",
            Comparison::LessEqual => "<=",
            Comparison::Equal => "==",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.symbol() == symbol)
    }

    pub fn compare(self, observed: i64, reference: i64) -> bool {
        match self {
            Comparison::Greater => observed > reference,
            Comparison::Less => observed < reference,
            Comparison::GreaterEqual => observed >= reference,
            Comparison::LessEqual => observed <= reference,
            Comparison::Equal => observed == reference,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// What a comparison trigger looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    /// Value of the next pending reading
    Value = 0,
    /// Number of pending readings
    Count = 1,
}

impl TriggerSource {
    pub fn keyword(self) -> &'static str {
        match self {
            TriggerSource::Value => "value",
            TriggerSource::Count => "count",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "value" => Some(TriggerSource::Value),
            "count" => Some(TriggerSource::Count),
            _ => None,
        }
    }
}

/// Condition on one node input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputTrigger {
    Always,
    Compare {
        source: TriggerSource,
        op: Comparison,
        reference: u32,
    },
}

impl InputTrigger {
    pub fn when(source: TriggerSource, op: Comparison, reference: u32) -> Self {
        InputTrigger::Compare {
            source,
            op,
            reference,
        }
    }

    /// Evaluate against the current state of a walker
    pub fn triggered(&self, log: &SensorLog, walker: WalkerId) -> Result<bool> {
        let (source, op, reference) = match *self {
            InputTrigger::Always => return Ok(true),
            InputTrigger::Compare {
                source,
                op,
                reference,
            } => (source, op, reference),
        };

        let count = log.count(walker)?;
        let observed = match source {
            TriggerSource::Count => count as i64,
            TriggerSource::Value if count == 0 => return Ok(false),
            TriggerSource::Value => log.peek(walker)?.value as i64,
        };
        Ok(op.compare(observed, reference as i64))
    }

    /// Binary `(op << 1) | source` byte and reference
    pub(crate) fn encode(&self) -> (u8, u32) {
        match *self {
            InputTrigger::Always => (ALWAYS_CODE << 1, 0),
            InputTrigger::Compare {
                source,
                op,
                reference,
            } => ((op.code() << 1) | source as u8, reference),
        }
    }

    pub(crate) fn decode(condition: u8, reference: u32) -> Result<Self> {
        let source = match condition & 0b1 {
            0 => TriggerSource::Value,
            _ => TriggerSource::Count,
        };
        let op_code = condition >> 1;
        if op_code == ALWAYS_CODE {
            return Ok(InputTrigger::Always);
        }

        let op = Comparison::from_code(op_code).ok_or_else(|| {
            SensorGraphError::Argument(format!(
                "unknown operation {} in binary trigger 0x{:02X}",
                op_code, condition
            ))
        })?;
        Ok(InputTrigger::when(source, op, reference))
    }
}

impl fmt::Display for InputTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputTrigger::Always => write!(f, "always"),
            InputTrigger::Compare {
                source,
                op,
                reference,
            } => write!(f, "when {} {} {}", source.keyword(), op, reference),
        }
    }
}

/// How the triggers of a two-input node are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combiner {
    And,
    Or,
    /// Single-input node; input B is ignored
    None,
}

impl Combiner {
    pub fn symbol(self) -> Option<&'static str> {
        match self {
            Combiner::And => Some("&&"),
            Combiner::Or => Some("||"),
            Combiner::None => None,
        }
    }

    /// Binary code; single-input nodes encode as `or`
    pub fn code(self) -> u8 {
        match self {
            Combiner::And => 0,
            Combiner::Or | Combiner::None => 1,
        }
    }
}

/// The closed set of functions a node can apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingFunction {
    CopyLatestA = 0,
    AverageA = 1,
    CopyAllA = 2,
    SumA = 3,
    CopyCountA = 4,
    TriggerStreamer = 5,
    CallRpc = 6,
    SubtractAFromB = 7,
}

impl ProcessingFunction {
    pub const ALL: [ProcessingFunction; 8] = [
        ProcessingFunction::CopyLatestA,
        ProcessingFunction::AverageA,
        ProcessingFunction::CopyAllA,
        ProcessingFunction::SumA,
        ProcessingFunction::CopyCountA,
        ProcessingFunction::TriggerStreamer,
        ProcessingFunction::CallRpc,
        ProcessingFunction::SubtractAFromB,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            ProcessingFunction::CopyLatestA => "copy_latest_a",
            ProcessingFunction::AverageA => "average_a",
            ProcessingFunction::CopyAllA => "copy_all_a",
            ProcessingFunction::SumA => "sum_a",
            ProcessingFunction::CopyCountA => "copy_count_a",
            ProcessingFunction::TriggerStreamer => "trigger_streamer",
            ProcessingFunction::CallRpc => "call_rpc",
            ProcessingFunction::SubtractAFromB => "subtract_afromb",
        }
    }

    /// Functions whose effect is visible outside the graph
    pub fn has_side_effects(self) -> bool {
        matches!(
            self,
            ProcessingFunction::TriggerStreamer | ProcessingFunction::CallRpc
        )
    }
}

impl FromStr for ProcessingFunction {
    type Err = SensorGraphError;

    fn from_str(s: &str) -> Result<Self> {
        let canonical = match s {
            "copy_latest" => "copy_latest_a",
            "copy_all" => "copy_all_a",
            "average" => "average_a",
            "sum" => "sum_a",
            "copy_count" => "copy_count_a",
            other => other,
        };
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == canonical)
            .ok_or_else(|| SensorGraphError::Argument(format!("unknown processing function '{}'", s)))
    }
}

impl fmt::Display for ProcessingFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One input of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeInput {
    pub selector: DataStreamSelector,
    pub trigger: InputTrigger,
}

impl NodeInput {
    pub fn new(selector: impl Into<DataStreamSelector>, trigger: InputTrigger) -> Self {
        Self {
            selector: selector.into(),
            trigger,
        }
    }

    pub fn always(selector: impl Into<DataStreamSelector>) -> Self {
        Self::new(selector, InputTrigger::Always)
    }
}

impl fmt::Display for NodeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.selector, self.trigger)
    }
}

/// Everything needed to build a node, independent of any graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeDescriptor {
    pub input_a: NodeInput,
    pub input_b: Option<NodeInput>,
    pub combiner: Combiner,
    pub output: DataStream,
    pub function: ProcessingFunction,
}

impl NodeDescriptor {
    pub fn single(input: NodeInput, output: DataStream, function: ProcessingFunction) -> Self {
        Self {
            input_a: input,
            input_b: None,
            combiner: Combiner::None,
            output,
            function,
        }
    }

    pub fn dual(
        input_a: NodeInput,
        combiner: Combiner,
        input_b: NodeInput,
        output: DataStream,
        function: ProcessingFunction,
    ) -> Self {
        Self {
            input_a,
            input_b: Some(input_b),
            combiner,
            output,
            function,
        }
    }

    pub fn inputs(&self) -> impl Iterator<Item = &NodeInput> {
        std::iter::once(&self.input_a).chain(self.input_b.iter())
    }

    /// Whether `stream` feeds either input of this node
    pub fn consumes(&self, stream: &DataStream) -> bool {
        self.inputs().any(|input| input.selector.matches(stream))
    }
}

/// A node attached to a graph, with the walkers reading its inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorGraphNode {
    pub descriptor: NodeDescriptor,
    pub walker_a: WalkerId,
    pub walker_b: Option<WalkerId>,
}

impl SensorGraphNode {
    pub fn output(&self) -> DataStream {
        self.descriptor.output
    }

    pub fn function(&self) -> ProcessingFunction {
        self.descriptor.function
    }

    /// Evaluate both triggers and combine them
    pub fn triggered(&self, log: &SensorLog) -> Result<bool> {
        let a = self.descriptor.input_a.trigger.triggered(log, self.walker_a)?;

        let (input_b, walker_b) = match (&self.descriptor.input_b, self.walker_b) {
            (Some(input), Some(walker)) => (input, walker),
            _ => return Ok(a),
        };

        match self.descriptor.combiner {
            Combiner::And => Ok(a && input_b.trigger.triggered(log, walker_b)?),
            Combiner::Or => Ok(a || input_b.trigger.triggered(log, walker_b)?),
            Combiner::None => Ok(a),
        }
    }

    pub fn walkers(&self) -> impl Iterator<Item = WalkerId> {
        std::iter::once(self.walker_a).chain(self.walker_b)
    }
}
