use conductor_graph::diagnostics::{self, Diagnostic, Severity};
use conductor_graph::{GraphRecord, Registry};

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

/// Print structural checks for a graph. Returns false when any check fails.
pub fn run_check(record: &GraphRecord, registry: &Registry) -> bool {
    let mut checks = Vec::new();

    // 1. Every node type is registered
    checks.push(check_types(record, registry));

    // 2. Graph materializes: ids unique, edges point at real properties
    let store = match record.build(registry) {
        Ok(store) => {
            checks.push(CheckResult {
                label: "Structure".into(),
                ok: true,
                detail: format!("{} nodes, {} edges", store.len(), store.edges().len()),
            });
            Some(store)
        }
        Err(e) => {
            checks.push(CheckResult {
                label: "Structure".into(),
                ok: false,
                detail: e.to_string(),
            });
            None
        }
    };

    // 3. Static analysis
    if let Some(store) = &store {
        let found = diagnostics::check(store);
        checks.push(summarize(&found));
        for diagnostic in &found {
            checks.push(CheckResult {
                label: format!("  {}", diagnostic.severity),
                ok: diagnostic.severity != Severity::Error,
                detail: describe(diagnostic),
            });
        }
    }

    let mut ok_count = 0;
    let mut fail_count = 0;
    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
    fail_count == 0
}

fn check_types(record: &GraphRecord, registry: &Registry) -> CheckResult {
    let unknown: Vec<&str> = record
        .nodes
        .iter()
        .filter(|n| registry.get(&n.kind).is_none())
        .map(|n| n.kind.as_str())
        .collect();
    if unknown.is_empty() {
        CheckResult {
            label: "Node types".into(),
            ok: true,
            detail: format!("{} nodes, all types registered", record.nodes.len()),
        }
    } else {
        CheckResult {
            label: "Node types".into(),
            ok: false,
            detail: format!("Unknown types: {}", unknown.join(", ")),
        }
    }
}

fn summarize(found: &[Diagnostic]) -> CheckResult {
    let count = |s: Severity| found.iter().filter(|d| d.severity == s).count();
    let errors = count(Severity::Error);
    CheckResult {
        label: "Analysis".into(),
        ok: errors == 0,
        detail: format!(
            "{} errors, {} warnings, {} notes",
            errors,
            count(Severity::Warning),
            count(Severity::Info)
        ),
    }
}

fn describe(diagnostic: &Diagnostic) -> String {
    match &diagnostic.node_id {
        Some(node) => format!("{}: {}", node, diagnostic.message),
        None => diagnostic.message.clone(),
    }
}
