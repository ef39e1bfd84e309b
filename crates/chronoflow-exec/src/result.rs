//! Delivery of a result dataset's blocks to the caller.

use chronoflow_block::format::formatted;
use chronoflow_block::Block;
use chronoflow_core::{Error, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use tracing::trace;

use crate::transformation::{Downstream, Message};

enum Event {
    Block(Block),
    End(Option<Error>),
}

/// Terminal downstream of a result dataset.
pub struct ResultSink {
    name: String,
    tx: Sender<Event>,
    capacity: usize,
}

/// Blocks of one result, in emission order. Ends after the dataset
/// finished; a failed dataset yields its error once, then ends.
pub struct ResultStream {
    name: String,
    rx: Receiver<Event>,
    ended: bool,
}

/// A sink and the stream reading from it. The sink reports full once
/// `capacity` blocks are waiting to be read.
pub fn result_channel(name: &str, capacity: usize) -> (ResultSink, ResultStream) {
    let (tx, rx) = unbounded();
    (
        ResultSink {
            name: name.to_string(),
            tx,
            capacity: capacity.max(1),
        },
        ResultStream {
            name: name.to_string(),
            rx,
            ended: false,
        },
    )
}

impl Downstream for ResultSink {
    fn push(&self, msg: Message) {
        let ev = match msg {
            Message::Process { block, .. } => {
                trace!(result = %self.name, "delivering\n{}", formatted(&block).head(5));
                Event::Block(block)
            }
            Message::Finish { err, .. } => Event::End(err),
            other => {
                trace!(result = %self.name, message = other.name(), "ignored by result");
                return;
            }
        };
        // The reader may have gone away; nothing to deliver to then.
        let _ = self.tx.send(ev);
    }

    fn is_full(&self) -> bool {
        self.tx.len() >= self.capacity
    }
}

impl ResultStream {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drains the stream, failing on the first error.
    pub fn collect_blocks(self) -> Result<Vec<Block>> {
        self.collect()
    }
}

impl Iterator for ResultStream {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ended {
            return None;
        }
        match self.rx.recv() {
            Ok(Event::Block(b)) => Some(Ok(b)),
            Ok(Event::End(None)) => {
                self.ended = true;
                None
            }
            Ok(Event::End(Some(e))) => {
                self.ended = true;
                Some(Err(e))
            }
            Err(_) => {
                self.ended = true;
                Some(Err(Error::Internal(format!(
                    "result {} closed without finishing",
                    self.name
                ))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dataset_id, float_block};
    use chronoflow_core::{Bounds, Time};

    #[test]
    fn error_is_yielded_once() {
        let (sink, mut stream) = result_channel("r", 1);
        let b = float_block(Bounds::new(Time(0), Time(1)), &[], &[(0, 1.0)]).expect("block");
        sink.push(Message::Process {
            src: dataset_id("x"),
            block: b,
        });
        assert!(sink.is_full());
        sink.push(Message::Finish {
            src: dataset_id("x"),
            err: Some(Error::Canceled),
        });
        assert!(stream.next().expect("block").is_ok());
        assert!(matches!(stream.next(), Some(Err(Error::Canceled))));
        assert!(stream.next().is_none());
    }
}
