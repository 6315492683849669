//! Renderings of a compiled sensor graph.
//!
//! | Format | Content |
//! |---|---|
//! | nodes | one node descriptor per line |
//! | ast | the parsed program, one statement per line |
//! | snippet | shell commands that program a controller |
//! | ascii | hex dump of the binary descriptors |
//! | config | config variables as JSON |
//! | script | binary update script (not printable) |

mod script;
mod text;

pub use script::{format_script, script_records, ScriptRecord, SCRIPT_MAGIC};
pub use text::{format_ascii, format_config, format_nodes, format_snippet};

use crate::error::{Result, SensorGraphError};
use crate::graph::SensorGraph;
use crate::parser::{dump_tree, Statement};
use std::fmt;
use std::str::FromStr;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Nodes,
    Ast,
    Snippet,
    Ascii,
    Config,
    Script,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Nodes,
        OutputFormat::Ast,
        OutputFormat::Snippet,
        OutputFormat::Ascii,
        OutputFormat::Config,
        OutputFormat::Script,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Nodes => "nodes",
            OutputFormat::Ast => "ast",
            OutputFormat::Snippet => "snippet",
            OutputFormat::Ascii => "ascii",
            OutputFormat::Config => "config",
            OutputFormat::Script => "script",
        }
    }

    /// Binary formats cannot be written to a terminal
    pub fn is_binary(self) -> bool {
        matches!(self, OutputFormat::Script)
    }
}

impl FromStr for OutputFormat {
    type Err = SensorGraphError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|format| format.name() == s)
            .ok_or_else(|| SensorGraphError::Argument(format!("unsupported output format '{}'", s)))
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Render `graph` (or, for `ast`, the `program` it was compiled from)
pub fn render(format: OutputFormat, program: &[Statement], graph: &SensorGraph) -> Result<Vec<u8>> {
    let text = match format {
        OutputFormat::Nodes => format_nodes(graph),
        OutputFormat::Ast => dump_tree(program),
        OutputFormat::Snippet => format_snippet(graph),
        OutputFormat::Ascii => format_ascii(graph)?,
        OutputFormat::Config => format_config(graph)?,
        OutputFormat::Script => return format_script(graph),
    };
    Ok(text.into_bytes())
}
