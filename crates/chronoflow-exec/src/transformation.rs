//! The push protocol between datasets and transformations.

use chronoflow_block::{Block, BlockMetadata};
use chronoflow_core::id::DatasetId;
use chronoflow_core::{Error, Result, Time};

/// One message from an upstream dataset. Every variant names its source.
#[derive(Debug, Clone)]
pub enum Message {
    Retract { src: DatasetId, meta: BlockMetadata },
    Process { src: DatasetId, block: Block },
    UpdateWatermark { src: DatasetId, time: Time },
    UpdateProcessingTime { src: DatasetId, time: Time },
    Finish { src: DatasetId, err: Option<Error> },
}

impl Message {
    pub fn src(&self) -> DatasetId {
        match self {
            Message::Retract { src, .. }
            | Message::Process { src, .. }
            | Message::UpdateWatermark { src, .. }
            | Message::UpdateProcessingTime { src, .. }
            | Message::Finish { src, .. } => *src,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::Retract { .. } => "retract",
            Message::Process { .. } => "process",
            Message::UpdateWatermark { .. } => "watermark",
            Message::UpdateProcessingTime { .. } => "processing_time",
            Message::Finish { .. } => "finish",
        }
    }
}

/// A consumer of one transformation's messages.
///
/// An `Err` from any handler finishes the transformation with that error;
/// the runtime then drops its remaining input.
pub trait Transformation: Send {
    fn retract_block(&mut self, src: DatasetId, meta: &BlockMetadata) -> Result<()>;
    fn process(&mut self, src: DatasetId, block: &Block) -> Result<()>;
    fn update_watermark(&mut self, src: DatasetId, time: Time) -> Result<()>;
    fn update_processing_time(&mut self, src: DatasetId, time: Time) -> Result<()>;
    fn finish(&mut self, src: DatasetId, err: Option<Error>);
}

/// Where a dataset or source sends its output.
pub trait Downstream: Send + Sync {
    fn push(&self, msg: Message);

    /// True while the receiver wants the producer to back off.
    fn is_full(&self) -> bool {
        false
    }
}
