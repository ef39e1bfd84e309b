//! What constructors get to see when the executor builds a query.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chronoflow_core::id::{DatasetId, ProcedureId};
use chronoflow_core::{Bounds, EngineConfig, Time};
use chronoflow_io::StorageReader;
use chronoflow_mem::Allocator;

use crate::transformation::Downstream;
use crate::trigger::TriggerSpec;

/// Shared cancellation flag of one query.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct ExecutionContext {
    pub id: ProcedureId,
    pub name: String,
    pub parents: Vec<DatasetId>,
    /// Resolved plan bounds.
    pub bounds: Bounds,
    pub now: Time,
    pub config: EngineConfig,
    pub allocator: Allocator,
}

impl ExecutionContext {
    /// The trigger every dataset gets unless its transformation says otherwise.
    pub fn default_trigger(&self) -> TriggerSpec {
        TriggerSpec::AfterWatermark {
            allowed_lateness: chronoflow_core::Duration(self.config.default_lateness_ns),
        }
    }
}

pub struct SourceContext {
    pub id: DatasetId,
    pub name: String,
    /// Resolved plan bounds.
    pub bounds: Bounds,
    pub now: Time,
    pub outputs: Vec<Arc<dyn Downstream>>,
    pub reader: Arc<dyn StorageReader>,
    pub allocator: Allocator,
    pub cancel: CancelToken,
    pub config: EngineConfig,
}
