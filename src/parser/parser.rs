//! Recursive descent parser producing [`Statement`]s.

use super::ast::{
    time_unit_seconds, BlockCombiner, BlockHeader, ClockBasis, CopyMode, CopySource, Interval,
    Literal, Reference, Security, Statement, StatementKind, StreamTrigger, StreamerStatement,
    TriggerClause,
};
use super::lexer::{tokenize, Token, TokenKind};
use crate::config::ConfigType;
use crate::error::{Result, SensorGraphError};
use crate::graph::{Comparison, NodeDescriptor, SlotIdentifier, TriggerSource};
use crate::stream::{DataStream, DataStreamSelector, StreamType};
use std::path::{Path, PathBuf};

/// Nesting limit for `include` statements
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Parse source text; relative includes resolve against the working directory
pub fn parse(source: &str) -> Result<Vec<Statement>> {
    Parser::new(tokenize(source)?, None, 0).program()
}

/// Parse a file; includes resolve relative to it
pub fn parse_file(path: impl AsRef<Path>) -> Result<Vec<Statement>> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)?;
    let base = path.parent().map(Path::to_path_buf);
    Parser::new(tokenize(&source)?, base, 0)
        .program()
        .map_err(|e| e.with_context(format!("{}", path.display())))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    base_dir: Option<PathBuf>,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, base_dir: Option<PathBuf>, depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            base_dir,
            depth,
        }
    }

    fn program(mut self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        while self.peek().is_some() {
            statements.extend(self.statement()?);
        }
        Ok(statements)
    }

    // ---- token helpers ----

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_word(&self) -> Option<&str> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Ident(word)) => Some(word),
            _ => None,
        }
    }

    fn line(&self) -> usize {
        self.peek()
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn error(&self, message: impl Into<String>) -> SensorGraphError {
        SensorGraphError::syntax(self.line(), message)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn check_symbol(&self, symbol: &str) -> bool {
        self.peek().is_some_and(|t| t.is_symbol(symbol))
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        let found = self.check_symbol(symbol);
        if found {
            self.pos += 1;
        }
        found
    }

    fn eat_word(&mut self, word: &str) -> bool {
        let found = self.peek().is_some_and(|t| t.is_word(word));
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<()> {
        if self.eat_symbol(symbol) {
            return Ok(());
        }
        Err(self.unexpected(&format!("'{}'", symbol)))
    }

    fn expect_word(&mut self, word: &str) -> Result<()> {
        if self.eat_word(word) {
            return Ok(());
        }
        Err(self.unexpected(&format!("'{}'", word)))
    }

    fn unexpected(&self, expected: &str) -> SensorGraphError {
        match self.peek() {
            Some(token) => self.error(format!("expected {}, found '{}'", expected, token)),
            None => self.error(format!("expected {}, found end of input", expected)),
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Ident(word)) => {
                self.pos += 1;
                Ok(word)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn number(&mut self) -> Result<i64> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Number(value)) => {
                let value = *value;
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.unexpected("a number")),
        }
    }

    fn unsigned<T: TryFrom<i64>>(&mut self, what: &str) -> Result<T> {
        let line = self.line();
        let value = self.number()?;
        T::try_from(value)
            .map_err(|_| SensorGraphError::syntax(line, format!("{} {} out of range", what, value)))
    }

    fn string(&mut self) -> Result<String> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Str(text)) => {
                self.pos += 1;
                Ok(text)
            }
            _ => Err(self.unexpected("a quoted string")),
        }
    }

    fn literal(&mut self) -> Result<Literal> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Number(value) => Ok(Literal::Number(value)),
            TokenKind::Str(text) => Ok(Literal::String(text)),
            TokenKind::Hex(bytes) => Ok(Literal::Binary(bytes)),
            _ => Err(SensorGraphError::syntax(
                token.line,
                format!("expected a number, string or hex value, found '{}'", token),
            )),
        }
    }

    fn reference(&mut self) -> Result<Reference> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Number(value)) => {
                self.pos += 1;
                Ok(Reference::Number(value))
            }
            Some(TokenKind::Ident(name)) => {
                self.pos += 1;
                Ok(Reference::Name(name))
            }
            _ => Err(self.unexpected("a number or identifier")),
        }
    }

    fn comparison(&mut self) -> Result<Comparison> {
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Symbol(symbol)) => Comparison::from_symbol(symbol),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                Ok(op)
            }
            None => Err(self.unexpected("a comparison operator")),
        }
    }

    // ---- shared grammar pieces ----

    fn starts_stream(&self) -> bool {
        match self.peek_word() {
            Some("system") => true,
            Some(word) => StreamType::ALL.iter().any(|ty| ty.keyword() == word),
            None => false,
        }
    }

    fn stream(&mut self) -> Result<DataStream> {
        let line = self.line();
        let system = self.eat_word("system");
        let type_word = self.ident()?;
        let stream_type = StreamType::ALL
            .iter()
            .copied()
            .find(|ty| ty.keyword() == type_word)
            .ok_or_else(|| SensorGraphError::syntax(line, format!("unknown stream type '{}'", type_word)))?;
        let stream_id: u16 = self.unsigned("stream id")?;
        self.eat_word("node");

        DataStream::checked(stream_type, stream_id, system)
            .map_err(|e| SensorGraphError::syntax(line, e.to_string()))
    }

    fn selector(&mut self) -> Result<DataStreamSelector> {
        let line = self.line();
        if !self.eat_word("all") {
            return self.stream().map(DataStreamSelector::exact);
        }

        let mut words = vec!["all".to_string()];
        if let Some(modifier @ ("user" | "system" | "combined")) = self.peek_word() {
            words.push(modifier.to_string());
            self.pos += 1;
        }
        words.push(self.ident()?);
        self.eat_word("nodes");

        words
            .join(" ")
            .parse()
            .map_err(|e: SensorGraphError| SensorGraphError::syntax(line, e.to_string()))
    }

    fn slot(&mut self) -> Result<SlotIdentifier> {
        let line = self.line();
        if self.eat_word("controller") {
            return Ok(SlotIdentifier::Controller);
        }
        self.expect_word("slot")?;
        let number: u8 = self.unsigned("slot number")?;
        SlotIdentifier::slot(number).map_err(|e| SensorGraphError::syntax(line, e.to_string()))
    }

    fn stream_trigger(&mut self) -> Result<StreamTrigger> {
        let line = self.line();
        let source = self
            .peek_word()
            .and_then(TriggerSource::from_keyword)
            .ok_or_else(|| self.unexpected("'value' or 'count'"))?;
        self.pos += 1;

        self.expect_symbol("(")?;
        let stream = self.stream()?;
        self.expect_symbol(")")?;
        let op = self.comparison()?;
        let reference = self.number()?;
        let reference = u32::try_from(reference).map_err(|_| {
            SensorGraphError::syntax(line, format!("trigger reference {} out of range", reference))
        })?;

        Ok(StreamTrigger {
            source,
            stream,
            op,
            reference,
        })
    }

    fn starts_stream_trigger(&self) -> bool {
        matches!(self.peek_word(), Some("value" | "count"))
            && self.tokens.get(self.pos + 1).is_some_and(|t| t.is_symbol("("))
    }

    fn trigger_clause(&mut self) -> Result<TriggerClause> {
        if self.starts_stream_trigger() {
            return self.stream_trigger().map(TriggerClause::Condition);
        }
        if self.starts_stream() {
            return self.stream().map(TriggerClause::Stream);
        }
        self.ident().map(TriggerClause::Named)
    }

    fn interval(&mut self) -> Result<Interval> {
        let line = self.line();
        let count: u32 = self.unsigned("interval")?;
        if count == 0 {
            return Err(SensorGraphError::syntax(line, "interval must be positive"));
        }

        let unit = self.ident()?;
        let interval = match unit.as_str() {
            "tick_1" => Interval {
                count,
                basis: ClockBasis::UserTick1,
            },
            "tick_2" => Interval {
                count,
                basis: ClockBasis::UserTick2,
            },
            other => {
                let seconds = time_unit_seconds(other).ok_or_else(|| {
                    SensorGraphError::syntax(line, format!("unknown time unit '{}'", other))
                })?;
                let count = count
                    .checked_mul(seconds)
                    .ok_or_else(|| SensorGraphError::syntax(line, "interval too long"))?;
                Interval {
                    count,
                    basis: ClockBasis::Seconds,
                }
            }
        };
        Ok(interval)
    }

    // ---- statements ----

    fn statement(&mut self) -> Result<Vec<Statement>> {
        let line = self.line();
        if self.check_symbol("(") {
            return Ok(vec![self.raw_node(line)?]);
        }

        let keyword = self.peek_word().map(str::to_string).ok_or_else(|| self.unexpected("a statement"))?;
        let kind = match keyword.as_str() {
            "include" => return self.include(line),
            "every" | "when" | "config" | "on" => return Ok(vec![self.block(line)?]),
            "meta" => self.meta()?,
            "require" => self.require()?,
            "set" => self.set()?,
            "call" => self.call()?,
            "manual" | "signed" | "encrypted" | "realtime" | "streamer" => self.streamer()?,
            "copy" => self.copy()?,
            "subtract" => self.subtract()?,
            "trigger" => {
                self.pos += 1;
                self.expect_word("streamer")?;
                StatementKind::TriggerStreamer(self.unsigned("streamer index")?)
            }
            other => return Err(self.error(format!("unknown statement '{}'", other))),
        };
        self.expect_symbol(";")?;
        Ok(vec![Statement { line, kind }])
    }

    fn raw_node(&mut self, line: usize) -> Result<Statement> {
        let mut words = Vec::new();
        while !self.check_symbol(";") {
            words.push(self.next()?.to_string());
        }
        self.expect_symbol(";")?;

        let descriptor: NodeDescriptor = words
            .join(" ")
            .parse()
            .map_err(|e: SensorGraphError| SensorGraphError::syntax(line, e.to_string()))?;
        Ok(Statement {
            line,
            kind: StatementKind::Node(descriptor),
        })
    }

    fn include(&mut self, line: usize) -> Result<Vec<Statement>> {
        self.pos += 1;
        let target = self.string()?;
        self.expect_symbol(";")?;

        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(SensorGraphError::syntax(
                line,
                format!("includes nested deeper than {} levels", MAX_INCLUDE_DEPTH),
            ));
        }

        let path = match &self.base_dir {
            Some(base) if Path::new(&target).is_relative() => base.join(&target),
            _ => PathBuf::from(&target),
        };
        let source = std::fs::read_to_string(&path).map_err(|e| {
            SensorGraphError::syntax(line, format!("could not resolve include \"{}\": {}", target, e))
        })?;
        tracing::debug!("Including {}", path.display());

        let base = path.parent().map(Path::to_path_buf);
        Parser::new(tokenize(&source)?, base, self.depth + 1)
            .program()
            .map_err(|e| e.with_context(format!("included from line {}: {}", line, path.display())))
    }

    fn block(&mut self, line: usize) -> Result<Statement> {
        let keyword = self.ident()?;
        let header = match keyword.as_str() {
            "every" => BlockHeader::Every(self.interval()?),
            "config" => BlockHeader::Config(self.slot()?),
            "when" if self.eat_word("connected") => {
                self.expect_word("to")?;
                BlockHeader::WhenConnected(self.slot()?)
            }
            "when" => BlockHeader::Latch(self.stream_trigger()?),
            _ => {
                let first = self.trigger_clause()?;
                let combiner = if self.eat_word("and") {
                    Some(BlockCombiner::And)
                } else if self.eat_word("or") {
                    Some(BlockCombiner::Or)
                } else {
                    None
                };
                let second = match combiner {
                    Some(combiner) => Some((combiner, self.trigger_clause()?)),
                    None => None,
                };
                BlockHeader::On { first, second }
            }
        };

        self.expect_symbol("{")?;
        let mut body = Vec::new();
        while !self.eat_symbol("}") {
            if self.peek().is_none() {
                return Err(SensorGraphError::syntax(
                    line,
                    format!("block '{}' is missing its closing '}}'", header),
                ));
            }
            body.extend(self.statement()?);
        }

        Ok(Statement {
            line,
            kind: StatementKind::Block { header, body },
        })
    }

    fn meta(&mut self) -> Result<StatementKind> {
        self.pos += 1;
        let name = self.ident()?;
        self.expect_symbol("=")?;
        let value = match self.literal()? {
            Literal::Binary(_) => return Err(self.error("meta values must be numbers or strings")),
            value => value,
        };
        Ok(StatementKind::Meta { name, value })
    }

    fn require(&mut self) -> Result<StatementKind> {
        self.pos += 1;
        let name = self.ident()?;
        let op = self.comparison()?;
        let value = self.number()?;
        Ok(StatementKind::Require { name, op, value })
    }

    fn set(&mut self) -> Result<StatementKind> {
        self.pos += 1;
        let target = self.reference()?;
        self.expect_word("to")?;
        let value = self.literal()?;

        let declared_type = if self.eat_word("as") {
            let line = self.line();
            let word = self.ident()?;
            Some(
                word.parse::<ConfigType>()
                    .map_err(|e| SensorGraphError::syntax(line, e.to_string()))?,
            )
        } else {
            None
        };

        Ok(StatementKind::Set {
            target,
            value,
            declared_type,
        })
    }

    fn call(&mut self) -> Result<StatementKind> {
        self.pos += 1;
        let rpc = self.reference()?;
        self.expect_word("on")?;
        let slot = self.slot()?;
        let output = if self.eat_symbol("=>") {
            Some(self.stream()?)
        } else {
            None
        };
        Ok(StatementKind::Call { rpc, slot, output })
    }

    fn streamer(&mut self) -> Result<StatementKind> {
        let manual = self.eat_word("manual");
        let security = if self.eat_word("signed") {
            Some(Security::Signed)
        } else if self.eat_word("encrypted") {
            Some(Security::Encrypted)
        } else {
            None
        };
        let realtime = self.eat_word("realtime");

        self.expect_word("streamer")?;
        self.expect_word("on")?;
        let selector = self.selector()?;

        let dest = if self.eat_word("to") {
            Some(self.slot()?)
        } else {
            None
        };
        let with_other = if self.eat_word("with") {
            self.expect_word("streamer")?;
            Some(self.unsigned("streamer index")?)
        } else {
            None
        };

        Ok(StatementKind::Streamer(StreamerStatement {
            manual,
            security,
            realtime,
            selector,
            dest,
            with_other,
        }))
    }

    fn copy(&mut self) -> Result<StatementKind> {
        self.pos += 1;
        let mode = if self.eat_word("all") {
            CopyMode::All
        } else if self.eat_word("count") {
            CopyMode::Count
        } else if self.eat_word("average") {
            CopyMode::Average
        } else {
            CopyMode::Latest
        };

        let source = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Symbol("=>")) => None,
            Some(TokenKind::Number(value)) => {
                let value = *value;
                self.pos += 1;
                Some(CopySource::Constant(value))
            }
            _ => Some(CopySource::Stream(self.stream()?)),
        };

        self.expect_symbol("=>")?;
        let output = self.stream()?;
        Ok(StatementKind::Copy {
            mode,
            source,
            output,
        })
    }

    fn subtract(&mut self) -> Result<StatementKind> {
        self.pos += 1;
        let input = self.stream()?;
        self.expect_symbol("=>")?;
        let output = self.stream()?;
        let default = if self.eat_symbol(",") {
            self.expect_word("default")?;
            Some(self.number()?)
        } else {
            None
        };
        Ok(StatementKind::Subtract {
            input,
            output,
            default,
        })
    }
}
