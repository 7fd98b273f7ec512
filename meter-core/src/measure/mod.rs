//! Measure configuration, capture pipelines and the parent/child graph

pub mod graph;
pub mod options;
pub(crate) mod pipeline;

pub use graph::{MeasureId, MeasureRegistry, ScopeId};
pub use options::{OptionReader, OutputKind, Selector};
