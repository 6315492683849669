//! Compiling program files and rendering them in every output format

mod common;

use sensorgraph_rs::output::ScriptRecord;
use sensorgraph_rs::{compile_file, parse_file, render, DeviceModel, OutputFormat};
use std::fs;
use tempfile::TempDir;

const PROGRAM: &str = r#"meta app_tag = 2049;
meta app_version = "2.1";

config slot 1 {
    set 0x8000 to 100 as uint16_t;
}

include "blocks/sampling.sgf";

streamer on all outputs;
"#;

const SAMPLING: &str = r#"every 10 minutes {
    copy average input 1 => output 1;
}
on value(input 2) > 5 {
    copy => output 2;
}
"#;

fn write_program(dir: &TempDir) -> std::path::PathBuf {
    fs::create_dir(dir.path().join("blocks")).unwrap();
    fs::write(dir.path().join("blocks/sampling.sgf"), SAMPLING).unwrap();
    let main = dir.path().join("main.sgf");
    fs::write(&main, PROGRAM).unwrap();
    main
}

#[test]
fn test_every_format_renders() {
    let dir = TempDir::new().unwrap();
    let main = write_program(&dir);
    let program = parse_file(&main).unwrap();
    let graph = compile_file(&main, &DeviceModel::default()).unwrap();

    for format in OutputFormat::ALL {
        let rendered = render(format, &program, &graph).unwrap();
        assert!(!rendered.is_empty(), "{} rendered nothing", format);
        if !format.is_binary() {
            assert!(String::from_utf8(rendered).is_ok(), "{} is not text", format);
        }
    }
}

#[test]
fn test_ast_shows_included_statements() {
    let dir = TempDir::new().unwrap();
    let main = write_program(&dir);
    let program = parse_file(&main).unwrap();
    let graph = compile_file(&main, &DeviceModel::default()).unwrap();

    let ast = String::from_utf8(render(OutputFormat::Ast, &program, &graph).unwrap()).unwrap();
    assert!(ast.contains("copy average input 1 => output 1;"));
    assert!(ast.contains("streamer on all outputs;"));
}

#[test]
fn test_script_contains_every_node() {
    let dir = TempDir::new().unwrap();
    let main = write_program(&dir);
    let graph = compile_file(&main, &DeviceModel::default()).unwrap();

    let script = render(OutputFormat::Script, &[], &graph).unwrap();
    let records = ScriptRecord::decode_script(&script).unwrap();
    let nodes: Vec<&ScriptRecord> = records.iter().filter(|r| r.rpc_id == 0x2003).collect();
    assert_eq!(nodes.len(), graph.nodes().len());
    for (record, node) in nodes.iter().zip(graph.nodes()) {
        assert_eq!(record.payload, node.descriptor.to_binary());
    }
}

#[test]
fn test_syntax_error_in_include_names_line() {
    let dir = TempDir::new().unwrap();
    let main = dir.path().join("main.sgf");
    fs::write(dir.path().join("bad.sgf"), "meta a = 1;\n\ncopy => ;\n").unwrap();
    fs::write(&main, "meta b = 2;\ninclude \"bad.sgf\";\n").unwrap();

    let err = compile_file(&main, &DeviceModel::default()).unwrap_err();
    assert_eq!(err.syntax_line(), Some(3));
}

#[test]
fn test_cycle_rejected_without_partial_graph() {
    let dir = TempDir::new().unwrap();
    let main = dir.path().join("cycle.sgf");
    fs::write(
        &main,
        "(unbuffered 1 always) => unbuffered 2 using copy_latest_a;\n(unbuffered 2 always) => unbuffered 1 using copy_latest_a;\n",
    )
    .unwrap();

    let err = compile_file(&main, &DeviceModel::default()).unwrap_err();
    assert!(err.is_data());
}

#[test]
fn test_device_model_limits_apply() {
    let dir = TempDir::new().unwrap();
    let main = write_program(&dir);
    let model_path = dir.path().join("model.toml");
    fs::write(&model_path, "name = \"tiny\"\nmax_nodes = 2\n").unwrap();

    let model = DeviceModel::load(&model_path).unwrap();
    assert_eq!(model.name, "tiny");
    assert!(compile_file(&main, &model).is_err());
}
