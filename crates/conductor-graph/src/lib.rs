//! Reactive dataflow graph engine.
//!
//! A graph is a set of [`NodeInstance`]s joined by property-level [`Edge`]s.
//! The [`StateMachine`] owns the [`GraphStore`], runs passes through the
//! [`Executor`] whenever the [`ForcedOutputTable`] schedules new seeds, and
//! publishes every change on the event bus.

pub mod builtin;
pub mod descriptor;
pub mod diagnostics;
pub mod edge;
pub mod executor;
pub mod forced;
pub mod instance;
pub mod machine;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod store;

pub use descriptor::{Disposer, InvokeContext, InvokeFn, NodeDescriptor, OpenContext, OpenFn};
pub use diagnostics::{Diagnostic, RuntimeDiagnostics, Severity};
pub use edge::Edge;
pub use executor::{Executor, PassContext, PassReport};
pub use forced::{Emitter, ForcedOutputTable};
pub use instance::{NodeInstance, NodeState};
pub use machine::{GraphSnapshot, StateMachine};
pub use record::{EdgeRecord, GraphRecord, NodeRecord};
pub use registry::Registry;
pub use resolver::{DependencyResolver, TopoOrder};
pub use store::GraphStore;
