#![forbid(unsafe_code)]
//! chronoflow-exec: the push-based runtime.
//!
//! Each transformation sits behind a transport node that is scheduled on a
//! shared worker pool; its dataset buffers output in a builder cache and
//! flushes blocks downstream when their trigger fires. Sources run on their
//! own threads and read from a [`chronoflow_io::StorageReader`]. The
//! executor wires a physical plan into nodes and hands back one result
//! stream per result procedure.

pub mod aggregate;
pub mod cache;
pub mod context;
pub mod dataset;
pub mod executor;
pub mod expression;
pub mod failpoints;
pub mod metrics;
pub mod registry;
pub mod result;
pub mod scheduler;
pub mod selector;
pub mod source;
pub mod testing;
pub mod transformation;
pub mod transport;
pub mod trigger;

pub use aggregate::{Aggregate, AggregateTransformation, Fold};
pub use cache::BuilderCache;
pub use context::{CancelToken, ExecutionContext, SourceContext};
pub use dataset::{AccumulationMode, Dataset};
pub use executor::{Executor, Query};
pub use registry::{Registry, SourceConstructor, TransformationConstructor};
pub use result::{result_channel, ResultSink, ResultStream};
pub use selector::{IndexSelect, Picker, RowSelect, Selector, SelectorTransformation};
pub use source::{ReadWindow, Source, StorageSource};
pub use transformation::{Downstream, Message, Transformation};
pub use trigger::{Trigger, TriggerSpec};
