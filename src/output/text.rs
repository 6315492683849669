//! Printable output formats.

use crate::config::ConfigValue;
use crate::error::{Result, SensorGraphError};
use crate::graph::SensorGraph;
use serde_json::{json, Map, Value};
use std::fmt::Write;

/// One node descriptor per line, in graph order
pub fn format_nodes(graph: &SensorGraph) -> String {
    let mut out = String::new();
    for node in graph.nodes() {
        let _ = writeln!(out, "{}", node.descriptor);
    }
    out
}

/// Shell commands that load the graph onto a controller
///
/// The graph is disabled and cleared first, then nodes, streamers and
/// constants are added and persisted. Config variables follow in the
/// config database context.
pub fn format_snippet(graph: &SensorGraph) -> String {
    let mut out = String::new();
    out.push_str("disable\nclear\nreset\n");

    for node in graph.nodes() {
        let _ = writeln!(out, "add_node \"{}\"", node.descriptor);
    }

    for streamer in graph.streamers() {
        let _ = write!(
            out,
            "add_streamer \"{}\" \"{}\" {} {} {}",
            streamer.selector,
            streamer.dest,
            streamer.automatic,
            streamer.format.name(),
            streamer.report_type.name()
        );
        if let Some(other) = streamer.with_other {
            let _ = write!(out, " --withother {}", other);
        }
        out.push('\n');
    }

    for (stream, value) in graph.constants() {
        let _ = writeln!(out, "set_constant \"{}\" {}", stream, value);
    }
    out.push_str("persist\nback\n");

    if !graph.config().is_empty() {
        out.push_str("config_database\nclear_variables\n");
        for ((slot, config_id), value) in graph.config() {
            let _ = writeln!(
                out,
                "set_variable \"{}\" {} {} {}",
                slot,
                config_id,
                value.config_type(),
                snippet_value(value)
            );
        }
        out.push_str("back\n");
    }
    out
}

fn snippet_value(value: &ConfigValue) -> String {
    match value {
        ConfigValue::Integer(_, v) => v.to_string(),
        ConfigValue::Array(_, values) => {
            let items: Vec<String> = values.iter().map(i64::to_string).collect();
            format!("\"[{}]\"", items.join(","))
        }
        ConfigValue::String(text) => format!("{:?}", text),
        ConfigValue::Binary(bytes) => format!("hex:{}", hex(bytes)),
    }
}

/// Line oriented dump of every binary record in the graph
pub fn format_ascii(graph: &SensorGraph) -> Result<String> {
    let mut out = String::from("# sensorgraph ascii\n");

    for (name, value) in graph.metadata() {
        let _ = writeln!(out, "meta {} {}", name, value);
    }
    for node in graph.nodes() {
        let _ = writeln!(out, "node {}", hex(&node.descriptor.to_binary()));
    }
    for (index, streamer) in graph.streamers().iter().enumerate() {
        let binary = streamer
            .to_binary()
            .map_err(|e| e.with_context(format!("encoding streamer {}", index)))?;
        let _ = writeln!(out, "streamer {}", hex(&binary));
    }
    for (stream, value) in graph.constants() {
        let _ = writeln!(out, "constant 0x{:04x} {}", stream.encode(), value);
    }
    for ((slot, config_id), value) in graph.config() {
        let _ = writeln!(
            out,
            "config {} 0x{:04x} {} {}",
            slot.address(),
            config_id,
            value.config_type(),
            hex(&value.to_bytes())
        );
    }
    Ok(out)
}

/// Config variables grouped by slot, as pretty JSON
///
/// ```json
/// { "slot 1": { "0x8000": { "type": "uint32_t", "value": 5 } } }
/// ```
pub fn format_config(graph: &SensorGraph) -> Result<String> {
    let mut slots = Map::new();
    for ((slot, config_id), value) in graph.config() {
        let entry = slots
            .entry(slot.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(vars) = entry {
            vars.insert(
                format!("0x{:04x}", config_id),
                json!({
                    "type": value.config_type().as_str(),
                    "value": json_value(value),
                }),
            );
        }
    }

    let mut text = serde_json::to_string_pretty(&Value::Object(slots))
        .map_err(SensorGraphError::from)?;
    text.push('\n');
    Ok(text)
}

fn json_value(value: &ConfigValue) -> Value {
    match value {
        ConfigValue::Integer(_, v) => json!(v),
        ConfigValue::Array(_, values) => json!(values),
        ConfigValue::String(text) => json!(text),
        ConfigValue::Binary(bytes) => json!(hex(bytes)),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceModel;
    use crate::parser::compile_source;

    const PROGRAM: &str = r#"
        meta app_tag = 1024;
        config slot 1 {
            set 0x8000 to 5 as uint32_t;
            set 0x8001 to "abc";
        }
        every 10 minutes {
            copy input 1 => output 1;
        }
        manual streamer on output 1;
    "#;

    fn graph() -> SensorGraph {
        compile_source(PROGRAM, &DeviceModel::default()).unwrap()
    }

    #[test]
    fn test_nodes_one_per_line() {
        let graph = graph();
        let text = format_nodes(&graph);
        assert_eq!(text.lines().count(), graph.nodes().len());
        assert!(text.lines().any(|l| l.ends_with("=> output 1 using copy_latest_a")));
    }

    #[test]
    fn test_snippet_structure() {
        let text = format_snippet(&graph());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(&lines[..3], &["disable", "clear", "reset"]);
        assert!(lines.contains(&"add_streamer \"output 1\" \"controller\" false hashedlist telegram"));
        assert!(lines.contains(&"set_variable \"slot 1\" 32768 uint32_t 5"));
        assert_eq!(lines.last(), Some(&"back"));
    }

    #[test]
    fn test_ascii_lists_records() {
        let graph = graph();
        let text = format_ascii(&graph).unwrap();
        assert!(text.starts_with("# sensorgraph ascii\n"));
        assert!(text.contains("meta app_tag 1024"));
        assert_eq!(
            text.lines().filter(|l| l.starts_with("node ")).count(),
            graph.nodes().len()
        );
        assert!(text.contains("config 11 0x8000 uint32_t 05000000"));
    }

    #[test]
    fn test_config_json() {
        let text = format_config(&graph()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["slot 1"]["0x8000"]["type"], "uint32_t");
        assert_eq!(value["slot 1"]["0x8000"]["value"], 5);
        assert_eq!(value["slot 1"]["0x8001"]["value"], "abc");
    }
}
