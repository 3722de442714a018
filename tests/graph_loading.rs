use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use conductor_core::types::NodeId;
use conductor_core::ServiceContainer;
use conductor_graph::diagnostics::{self, Severity};
use conductor_graph::{GraphRecord, Registry, StateMachine};
use conductor_notebook::Notebook;
use conductor_test_utils::{graph_file, test_config, AND_GATE};

fn sample(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(name)
}

#[test]
fn test_sample_graphs_build_cleanly() {
    let registry = Registry::with_builtins();
    for name in ["graphs/logic.toml", "graphs/ticker.toml", "graphs/greeting.json"] {
        let record = GraphRecord::load(&sample(name)).unwrap_or_else(|e| panic!("{}: {}", name, e));
        let store = record
            .build(&registry)
            .unwrap_or_else(|e| panic!("{}: {}", name, e));
        let errors: Vec<_> = diagnostics::check(&store)
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
            .collect();
        assert!(errors.is_empty(), "{}: {:?}", name, errors);
    }
}

#[test]
fn test_toml_and_json_forms_agree() {
    let (_dir, toml_path) = graph_file("gate.toml", AND_GATE);
    let from_toml = GraphRecord::load(&toml_path).unwrap();

    let json_text = serde_json::to_string(&from_toml).unwrap();
    let (_dir2, json_path) = graph_file("gate.json", &json_text);
    let from_json = GraphRecord::load(&json_path).unwrap();

    assert_eq!(from_toml, from_json);
}

#[test]
fn test_dangling_edge_is_rejected() {
    let (_dir, path) = graph_file(
        "broken.toml",
        r#"
[[nodes]]
id = "a"
type = "switch"

[[edges]]
source = "a"
target = "ghost"
"#,
    );
    let record = GraphRecord::load(&path).unwrap();
    let err = record.build(&Registry::with_builtins()).unwrap_err();
    assert!(err.to_string().contains("ghost"));
}

#[tokio::test]
async fn test_greeting_sample_renders_template() {
    let record = GraphRecord::load(&sample("graphs/greeting.json")).unwrap();
    let machine =
        StateMachine::from_record(Arc::new(Registry::with_builtins()), &record, test_config())
            .unwrap();
    machine.open(ServiceContainer::new()).await.unwrap();

    machine.set_output("who", "result", json!("Ada")).unwrap();
    machine.flush().await.unwrap();

    let out = machine.node(&NodeId::from("out")).unwrap();
    assert_eq!(out.inputs["input"], json!("Hello, Ada!"));
    machine.close();
}

#[test]
fn test_sample_notebook_evaluates() {
    let content = std::fs::read_to_string(sample("notebooks/budget.txt")).unwrap();
    let notebook = Notebook::from_sources(
        content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#')),
    );

    assert!(notebook.cells().iter().all(|c| !c.result.is_error()));
    assert_eq!(notebook.value_of("total"), Some(&json!(60)));
    assert_eq!(notebook.value_of("label"), Some(&json!("Total: 60")));
    let last = notebook.cells().pop().unwrap();
    assert_eq!(last.result.value(), Some(&json!("over budget")));
}
