//! Notebook cells and incremental recomputation.
//!
//! A cell is either `name = expression` or a bare `expression`. Named cells
//! can be referenced from other cells. Editing a cell re-evaluates only that
//! cell and the cells that transitively read it, in dependency order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use conductor_core::error::{ConductorError, Result};
use conductor_core::types::Value;

use crate::expr::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(pub usize);

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of evaluating one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CellResult {
    Ok { value: Value },
    Error { message: String },
}

impl CellResult {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Ok { value } => Some(value),
            Self::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::Ok { value },
            Err(e) => Self::Error {
                message: e.to_string(),
            },
        }
    }
}

/// Read-only view of a cell, in notebook order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellView {
    pub id: CellId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: String,
    pub result: CellResult,
}

#[derive(Debug)]
struct Cell {
    name: Option<String>,
    source: String,
    expr: std::result::Result<Expr, String>,
    references: BTreeSet<String>,
    result: CellResult,
}

impl Cell {
    fn parse(source: &str) -> Self {
        let (name, body) = split_assignment(source);
        let expr = Expr::parse(body).map_err(|e| ConductorError::from(e).to_string());
        let references = expr
            .as_ref()
            .map(|e| e.references())
            .unwrap_or_default();
        Self {
            name,
            source: source.to_string(),
            expr,
            references,
            result: CellResult::Error {
                message: "not evaluated".into(),
            },
        }
    }
}

/// Split `name = body` at the first assignment `=`. Comparison operators
/// (`==`, `!=`, `<=`, `>=`) are not assignments.
fn split_assignment(source: &str) -> (Option<String>, &str) {
    let bytes = source.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'=' {
            continue;
        }
        let prev = i.checked_sub(1).map(|p| bytes[p]);
        let next = bytes.get(i + 1).copied();
        if matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) || next == Some(b'=') {
            continue;
        }
        let name = source[..i].trim();
        if is_identifier(name) {
            return (Some(name.to_string()), source[i + 1..].trim());
        }
        break;
    }
    (None, source.trim())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_') && !matches!(s, "true" | "false" | "null")
}

#[derive(Debug, Default)]
pub struct Notebook {
    cells: BTreeMap<CellId, Cell>,
    next_id: usize,
}

impl Notebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a notebook from cell sources, one cell per entry.
    pub fn from_sources<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut notebook = Self::new();
        for source in sources {
            let id = notebook.allocate(source.as_ref());
            debug!(cell = %id, "Cell loaded");
        }
        notebook.recompute_all();
        notebook
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn allocate(&mut self, source: &str) -> CellId {
        let id = CellId(self.next_id);
        self.next_id += 1;
        self.cells.insert(id, Cell::parse(source));
        id
    }

    // ── Editing ─────────────────────────────────────────────────

    pub fn add_cell(&mut self, source: &str) -> CellId {
        let id = self.allocate(source);
        let names = self.cells[&id].name.iter().cloned().collect();
        self.recompute(BTreeSet::from([id]), names);
        id
    }

    /// Replace a cell's source. Returns false when the cell does not exist.
    pub fn update_cell(&mut self, id: CellId, source: &str) -> bool {
        let Some(cell) = self.cells.get_mut(&id) else {
            return false;
        };
        let old_name = cell.name.take();
        *cell = Cell::parse(source);
        let names = old_name.into_iter().chain(cell.name.clone()).collect();
        self.recompute(BTreeSet::from([id]), names);
        true
    }

    /// Remove a cell; cells that read it are re-evaluated. Idempotent.
    pub fn remove_cell(&mut self, id: CellId) -> bool {
        let Some(cell) = self.cells.remove(&id) else {
            return false;
        };
        self.recompute(BTreeSet::new(), cell.name.into_iter().collect());
        true
    }

    // ── Reading ─────────────────────────────────────────────────

    pub fn value(&self, id: CellId) -> Option<&CellResult> {
        self.cells.get(&id).map(|c| &c.result)
    }

    /// Current value of the cell named `name`, if it evaluated cleanly.
    pub fn value_of(&self, name: &str) -> Option<&Value> {
        let mut defining = self.defining(name);
        let cell = defining.next()?;
        if defining.next().is_some() {
            return None;
        }
        self.cells.get(&cell)?.result.value()
    }

    pub fn cells(&self) -> Vec<CellView> {
        self.cells
            .iter()
            .map(|(id, cell)| CellView {
                id: *id,
                name: cell.name.clone(),
                source: cell.source.clone(),
                result: cell.result.clone(),
            })
            .collect()
    }

    pub fn recompute_all(&mut self) {
        let all = self.cells.keys().copied().collect();
        self.recompute(all, BTreeSet::new());
    }

    // ── Evaluation ──────────────────────────────────────────────

    fn defining<'a>(&'a self, name: &'a str) -> impl Iterator<Item = CellId> + 'a {
        self.cells
            .iter()
            .filter(move |(_, c)| c.name.as_deref() == Some(name))
            .map(|(id, _)| *id)
    }

    /// Seeds plus every cell that transitively reads them or shares a name
    /// with one of them.
    fn affected(&self, seeds: BTreeSet<CellId>, names: BTreeSet<String>) -> BTreeSet<CellId> {
        let mut affected = BTreeSet::new();
        let mut queue: VecDeque<String> = names.into_iter().collect();
        let mut seen_names = BTreeSet::new();

        for id in seeds {
            if affected.insert(id) {
                if let Some(name) = self.cells.get(&id).and_then(|c| c.name.clone()) {
                    queue.push_back(name);
                }
            }
        }

        while let Some(name) = queue.pop_front() {
            if !seen_names.insert(name.clone()) {
                continue;
            }
            for (id, cell) in &self.cells {
                let touched =
                    cell.name.as_deref() == Some(name.as_str()) || cell.references.contains(&name);
                if touched && affected.insert(*id) {
                    if let Some(own) = &cell.name {
                        queue.push_back(own.clone());
                    }
                }
            }
        }
        affected
    }

    /// Cells within `scope` that `id` reads.
    fn upstream(&self, id: CellId, scope: &BTreeSet<CellId>) -> BTreeSet<CellId> {
        let Some(cell) = self.cells.get(&id) else {
            return BTreeSet::new();
        };
        scope
            .iter()
            .copied()
            .filter(|other| {
                self.cells
                    .get(other)
                    .and_then(|c| c.name.as_ref())
                    .is_some_and(|n| cell.references.contains(n))
            })
            .collect()
    }

    fn recompute(&mut self, seeds: BTreeSet<CellId>, names: BTreeSet<String>) {
        let scope = self.affected(seeds, names);
        if scope.is_empty() {
            return;
        }

        let upstream: BTreeMap<CellId, BTreeSet<CellId>> = scope
            .iter()
            .map(|id| (*id, self.upstream(*id, &scope)))
            .collect();
        let mut waiting: BTreeMap<CellId, usize> =
            upstream.iter().map(|(id, up)| (*id, up.len())).collect();
        let mut ready: BTreeSet<CellId> = waiting
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(scope.len());
        while order.len() < scope.len() {
            let Some(id) = ready.pop_first() else {
                // Remaining cells are blocked: mark cycle members, then let
                // their downstream cells evaluate against the failures.
                let blocked: BTreeSet<CellId> = waiting
                    .iter()
                    .filter(|(_, n)| **n > 0)
                    .map(|(id, _)| *id)
                    .collect();
                let cyclic: Vec<CellId> = blocked
                    .iter()
                    .copied()
                    .filter(|id| reaches_itself(*id, &upstream, &blocked))
                    .collect();
                let Some(first) = cyclic.first().copied() else {
                    break;
                };
                let names: Vec<String> = cyclic
                    .iter()
                    .map(|id| self.display_name(*id))
                    .chain(std::iter::once(self.display_name(first)))
                    .collect();
                let message = ConductorError::DependencyCycle(names).to_string();
                for id in &cyclic {
                    if let Some(cell) = self.cells.get_mut(id) {
                        cell.result = CellResult::Error {
                            message: message.clone(),
                        };
                    }
                    waiting.insert(*id, 0);
                    order.push(*id);
                }
                for id in &cyclic {
                    self.release(*id, &upstream, &mut waiting, &mut ready);
                }
                continue;
            };

            let result = self.evaluate(id);
            if let Some(cell) = self.cells.get_mut(&id) {
                cell.result = result;
            }
            self.release(id, &upstream, &mut waiting, &mut ready);
            order.push(id);
        }

        debug!(cells = order.len(), "Notebook recomputed");
    }

    fn release(
        &self,
        done: CellId,
        upstream: &BTreeMap<CellId, BTreeSet<CellId>>,
        waiting: &mut BTreeMap<CellId, usize>,
        ready: &mut BTreeSet<CellId>,
    ) {
        waiting.insert(done, 0);
        for (id, up) in upstream {
            if *id != done && up.contains(&done) {
                if let Some(n) = waiting.get_mut(id) {
                    if *n > 0 {
                        *n -= 1;
                        if *n == 0 {
                            ready.insert(*id);
                        }
                    }
                }
            }
        }
    }

    fn display_name(&self, id: CellId) -> String {
        self.cells
            .get(&id)
            .and_then(|c| c.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn evaluate(&self, id: CellId) -> CellResult {
        let Some(cell) = self.cells.get(&id) else {
            return CellResult::Error {
                message: format!("cell {} not found", id),
            };
        };
        if let Some(name) = &cell.name {
            if self.defining(name).count() > 1 {
                return CellResult::Error {
                    message: format!("name '{}' is defined by more than one cell", name),
                };
            }
        }
        let expr = match &cell.expr {
            Ok(expr) => expr,
            Err(message) => {
                return CellResult::Error {
                    message: message.clone(),
                }
            }
        };
        let lookup = |name: &str| -> Result<Value> { self.lookup(name) };
        CellResult::from_result(expr.eval(&lookup))
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        let mut defining = self.defining(name);
        let Some(id) = defining.next() else {
            return Err(ConductorError::Expression(format!(
                "unknown identifier '{}'",
                name
            )));
        };
        if defining.next().is_some() {
            return Err(ConductorError::Expression(format!(
                "'{}' is ambiguous",
                name
            )));
        }
        match self.cells.get(&id).map(|c| &c.result) {
            Some(CellResult::Ok { value }) => Ok(value.clone()),
            _ => Err(ConductorError::Expression(format!(
                "depends on failed cell '{}'",
                name
            ))),
        }
    }
}

/// Whether `start` can reach itself through upstream links inside `within`.
fn reaches_itself(
    start: CellId,
    upstream: &BTreeMap<CellId, BTreeSet<CellId>>,
    within: &BTreeSet<CellId>,
) -> bool {
    let mut stack: Vec<CellId> = upstream
        .get(&start)
        .map(|u| u.iter().copied().collect())
        .unwrap_or_default();
    let mut visited = BTreeSet::new();
    while let Some(id) = stack.pop() {
        if id == start {
            return true;
        }
        if !within.contains(&id) || !visited.insert(id) {
            continue;
        }
        if let Some(up) = upstream.get(&id) {
            stack.extend(up.iter().copied());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(notebook: &Notebook, id: CellId) -> String {
        match notebook.value(id).unwrap() {
            CellResult::Error { message } => message.clone(),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_split_assignment() {
        assert_eq!(split_assignment("x = 1 + 2"), (Some("x".into()), "1 + 2"));
        assert_eq!(split_assignment("a == b"), (None, "a == b"));
        assert_eq!(split_assignment("ok = a >= b"), (Some("ok".into()), "a >= b"));
        assert_eq!(split_assignment(" 1 + 2 "), (None, "1 + 2"));
        assert_eq!(split_assignment("\"k=v\""), (None, "\"k=v\""));
    }

    #[test]
    fn test_cells_evaluate_in_dependency_order() {
        let nb = Notebook::from_sources(["total = price * qty", "price = 2.5", "qty = 4"]);
        assert_eq!(nb.value_of("total"), Some(&json!(10)));
        assert_eq!(nb.cells().len(), 3);
        assert_eq!(nb.cells()[0].name.as_deref(), Some("total"));
    }

    #[test]
    fn test_update_recomputes_dependents() {
        let mut nb = Notebook::new();
        let a = nb.add_cell("a = 1");
        let b = nb.add_cell("b = a + 1");
        let c = nb.add_cell("c = b * 10");
        let other = nb.add_cell("other = 'x'");
        assert_eq!(nb.value_of("c"), Some(&json!(20)));

        assert!(nb.update_cell(a, "a = 5"));
        assert_eq!(nb.value(b).unwrap().value(), Some(&json!(6)));
        assert_eq!(nb.value(c).unwrap().value(), Some(&json!(60)));
        assert_eq!(nb.value(other).unwrap().value(), Some(&json!("x")));
        assert!(!nb.update_cell(CellId(99), "1"));
    }

    #[test]
    fn test_renaming_breaks_readers() {
        let mut nb = Notebook::new();
        let a = nb.add_cell("a = 1");
        let b = nb.add_cell("b = a + 1");
        nb.update_cell(a, "z = 1");
        assert!(message(&nb, b).contains("unknown identifier 'a'"));
        nb.update_cell(a, "a = 3");
        assert_eq!(nb.value(b).unwrap().value(), Some(&json!(4)));
    }

    #[test]
    fn test_cycle_is_isolated() {
        let mut nb = Notebook::new();
        let x = nb.add_cell("x = y + 1");
        let y = nb.add_cell("y = x + 1");
        let after = nb.add_cell("after = x * 2");
        let free = nb.add_cell("free = 7");

        assert!(message(&nb, x).contains("Dependency cycle"));
        assert!(message(&nb, y).contains("Dependency cycle"));
        assert!(message(&nb, after).contains("depends on failed cell 'x'"));
        assert_eq!(nb.value(free).unwrap().value(), Some(&json!(7)));

        nb.update_cell(y, "y = 1");
        assert_eq!(nb.value_of("x"), Some(&json!(2)));
        assert_eq!(nb.value_of("after"), Some(&json!(4)));
    }

    #[test]
    fn test_self_reference() {
        let mut nb = Notebook::new();
        let n = nb.add_cell("n = n + 1");
        assert!(message(&nb, n).contains("Dependency cycle: n -> n"));
    }

    #[test]
    fn test_duplicate_names() {
        let mut nb = Notebook::new();
        let first = nb.add_cell("v = 1");
        let second = nb.add_cell("v = 2");
        let reader = nb.add_cell("v + 1");
        assert!(message(&nb, first).contains("more than one cell"));
        assert!(message(&nb, second).contains("more than one cell"));
        assert!(message(&nb, reader).contains("ambiguous"));

        assert!(nb.remove_cell(second));
        assert_eq!(nb.value(first).unwrap().value(), Some(&json!(1)));
        assert_eq!(nb.value(reader).unwrap().value(), Some(&json!(2)));
        assert!(!nb.remove_cell(second));
    }

    #[test]
    fn test_parse_errors_are_per_cell() {
        let mut nb = Notebook::new();
        let bad = nb.add_cell("broken = 1 +");
        let good = nb.add_cell("fine = 2");
        assert!(message(&nb, bad).contains("Expression error"));
        assert_eq!(nb.value(good).unwrap().value(), Some(&json!(2)));
    }

    #[test]
    fn test_deep_expressions_fail_only_their_cell() {
        let mut nb = Notebook::new();
        let before = nb.add_cell("base = 3");
        let long_sum = nb.add_cell(&format!("x = 1{}", " + 1".repeat(2000)));
        let nested = nb.add_cell(&format!("y = {}1{}", "(".repeat(500), ")".repeat(500)));
        let reader = nb.add_cell("x + 1");
        let after = nb.add_cell("after = base * 2");

        assert!(message(&nb, long_sum).contains("levels deep"));
        assert!(message(&nb, nested).contains("levels deep"));
        assert!(message(&nb, reader).contains("depends on failed cell 'x'"));
        assert_eq!(nb.value(before).unwrap().value(), Some(&json!(3)));
        assert_eq!(nb.value(after).unwrap().value(), Some(&json!(6)));

        nb.update_cell(long_sum, &format!("x = 1{}", " + 1".repeat(99)));
        assert_eq!(nb.value_of("x"), Some(&json!(100)));
        assert_eq!(nb.value(reader).unwrap().value(), Some(&json!(101)));
    }

    #[test]
    fn test_cell_result_serializes_with_status() {
        let ok = serde_json::to_value(CellResult::Ok { value: json!(1) }).unwrap();
        assert_eq!(ok, json!({"status": "ok", "value": 1}));
    }
}
