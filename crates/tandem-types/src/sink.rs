//! One-way envelope delivery across a context boundary.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::Action;

/// The receiving side is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("envelope sink closed")]
pub struct SinkClosed;

/// Somewhere an envelope can be handed off without waiting.
///
/// Delivery never blocks. A closed sink reports [`SinkClosed`] and the caller
/// decides whether that is worth a log line.
pub trait EnvelopeSink: Send + Sync {
    fn deliver(&self, action: Action) -> Result<(), SinkClosed>;
}

impl EnvelopeSink for mpsc::UnboundedSender<Action> {
    fn deliver(&self, action: Action) -> Result<(), SinkClosed> {
        self.send(action).map_err(|_| SinkClosed)
    }
}

impl<T: EnvelopeSink + ?Sized> EnvelopeSink for Arc<T> {
    fn deliver(&self, action: Action) -> Result<(), SinkClosed> {
        (**self).deliver(action)
    }
}

impl<T: EnvelopeSink + ?Sized> EnvelopeSink for Box<T> {
    fn deliver(&self, action: Action) -> Result<(), SinkClosed> {
        (**self).deliver(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_reports_closed() {
        let (tx, rx) = mpsc::unbounded_channel::<Action>();
        tx.deliver(Action::new("A")).expect("open");
        drop(rx);
        assert_eq!(tx.deliver(Action::new("B")), Err(SinkClosed));
    }
}
