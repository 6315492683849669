//! The sensor graph language: tokenizer, parser and compiler.
//!
//! Source text is parsed into a tree of [`Statement`]s which the compiler
//! walks with a stack of scopes, emitting nodes, streamers, constants and
//! config variables for a given [`DeviceModel`].

mod allocator;
pub mod ast;
mod compiler;
pub mod lexer;
#[allow(clippy::module_inception)]
pub mod parser;
mod scope;

pub use allocator::StreamAllocator;
pub use ast::{dump_tree, time_unit_seconds, Statement, StatementKind};
pub use compiler::{check_acyclic, compile, compile_parts};
pub use parser::{parse, parse_file, MAX_INCLUDE_DEPTH};

use crate::config::DeviceModel;
use crate::error::Result;
use crate::graph::SensorGraph;
use std::path::Path;

/// Parse and compile a program in one step
pub fn compile_source(source: &str, model: &DeviceModel) -> Result<SensorGraph> {
    compile(&parse(source)?, model)
}

/// Parse and compile a program file; includes resolve relative to it
pub fn compile_file(path: impl AsRef<Path>, model: &DeviceModel) -> Result<SensorGraph> {
    compile(&parse_file(path)?, model)
}
