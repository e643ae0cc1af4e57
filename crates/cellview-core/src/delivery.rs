//! Delivery strategies realizing classified operations as outbound messages.
//!
//! The [`RevalidationEngine`](crate::engine::RevalidationEngine) classifies
//! changes; a [`DeliveryScheduler`] decides how the resulting operations
//! reach the viewer's transport. Strategies are interchangeable behind the
//! trait, so switching between per-operation and batched delivery never
//! touches engine code.
//!
//! Remove operations are resolved here, at execution time: the object
//! directory decides between a soft unload (object still exists, merely out
//! of view) and a hard delete (object gone). Classification happened
//! earlier in the tick, and the object may have been deleted in between.

use tracing::trace;

use crate::cell::CellId;
use crate::config::DeliveryMode;
use crate::engine::ObjectDirectory;
use crate::op::{CellMessage, CellOp};

/// Transport seam for one viewer's outbound messages.
///
/// Sends never fail from the caller's point of view: an implementation whose
/// session has been torn down drops the message and returns `false`, which
/// callers may count but must not treat as an error.
pub trait MessageSink {
    /// Hands a message to the transport. Returns true if it was accepted.
    fn send(&self, message: CellMessage) -> bool;
}

/// Strategy for realizing one tick's classified operations as messages.
pub trait DeliveryScheduler {
    /// Realizes `ops` in order against `sink`, resolving removals through
    /// `directory`. Returns the number of messages accepted by the sink.
    fn deliver(
        &self,
        ops: &[CellOp],
        directory: &dyn ObjectDirectory,
        sink: &dyn MessageSink,
    ) -> usize;
}

/// Builds the message for one operation, resolving removals against the
/// current state of the object graph.
fn realize(op: &CellOp, directory: &dyn ObjectDirectory) -> CellMessage {
    match op {
        CellOp::Load(desc) => CellMessage::Load {
            id: desc.id,
            parent: desc.parent,
            bounds: desc.local_bounds,
            transform: desc.transform.clone(),
            content: desc.content.clone(),
        },
        CellOp::Move { id, transform } => CellMessage::Move {
            id: *id,
            transform: transform.clone(),
        },
        CellOp::UpdateContent { id, content } => CellMessage::UpdateContent {
            id: *id,
            content: content.clone(),
        },
        CellOp::Remove { id } => resolve_remove(*id, directory),
    }
}

fn resolve_remove(id: CellId, directory: &dyn ObjectDirectory) -> CellMessage {
    if directory.exists(id) {
        CellMessage::Unload { id }
    } else {
        // Deleted between classification and execution, or before the pass;
        // either way the client must discard it permanently.
        trace!(cell = %id, "object gone, unload becomes delete");
        CellMessage::Delete { id }
    }
}

/// Sends one message per operation, synchronously, in classification order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl DeliveryScheduler for ImmediateScheduler {
    fn deliver(
        &self,
        ops: &[CellOp],
        directory: &dyn ObjectDirectory,
        sink: &dyn MessageSink,
    ) -> usize {
        let mut accepted = 0;
        for op in ops {
            if sink.send(realize(op, directory)) {
                accepted += 1;
            }
        }
        accepted
    }
}

/// Accumulates all operations of a tick into a single ordered batch message.
///
/// Cuts transport overhead under high per-tick change volume; intra-tick
/// order is preserved inside the batch. An empty tick sends nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregatingScheduler;

impl DeliveryScheduler for AggregatingScheduler {
    fn deliver(
        &self,
        ops: &[CellOp],
        directory: &dyn ObjectDirectory,
        sink: &dyn MessageSink,
    ) -> usize {
        if ops.is_empty() {
            return 0;
        }
        let items = ops.iter().map(|op| realize(op, directory)).collect();
        usize::from(sink.send(CellMessage::Batch { items }))
    }
}

/// Discards every operation without sending anything.
///
/// Breaks synchronization on purpose; only useful in tests that want the
/// diff to run while ignoring delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScheduler;

impl DeliveryScheduler for NoopScheduler {
    fn deliver(
        &self,
        _ops: &[CellOp],
        _directory: &dyn ObjectDirectory,
        _sink: &dyn MessageSink,
    ) -> usize {
        0
    }
}

/// Constructs the configured delivery strategy.
#[must_use]
pub fn scheduler_for(mode: DeliveryMode) -> Box<dyn DeliveryScheduler + Send + Sync> {
    match mode {
        DeliveryMode::Immediate => Box::new(ImmediateScheduler),
        DeliveryMode::Aggregate => Box::new(AggregatingScheduler),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashSet;

    use nalgebra::Point3;

    use super::*;
    use crate::cell::{BoundingSphere, CellDescriptor, CellTransform};

    /// Sink recording every accepted message; optionally refuses all sends
    /// like a transport torn down by a disconnect.
    #[derive(Default)]
    struct RecordingSink {
        connected: bool,
        messages: RefCell<Vec<CellMessage>>,
    }

    impl RecordingSink {
        fn connected() -> Self {
            Self {
                connected: true,
                messages: RefCell::new(Vec::new()),
            }
        }

        fn disconnected() -> Self {
            Self::default()
        }
    }

    impl MessageSink for RecordingSink {
        fn send(&self, message: CellMessage) -> bool {
            if self.connected {
                self.messages.borrow_mut().push(message);
            }
            self.connected
        }
    }

    struct FixedDirectory(HashSet<CellId>);

    impl ObjectDirectory for FixedDirectory {
        fn exists(&self, id: CellId) -> bool {
            self.0.contains(&id)
        }
    }

    fn descriptor(id: u64) -> CellDescriptor {
        CellDescriptor {
            id: CellId::new(id),
            parent: None,
            local_bounds: BoundingSphere::new(Point3::origin(), 1.0),
            transform: CellTransform::identity(),
            transform_version: 1,
            content_version: 1,
            movable: false,
            content: serde_json::Value::Null,
        }
    }

    fn sample_ops() -> Vec<CellOp> {
        vec![
            CellOp::Load(descriptor(1)),
            CellOp::Move {
                id: CellId::new(2),
                transform: CellTransform::identity(),
            },
            CellOp::Remove { id: CellId::new(3) },
            CellOp::Remove { id: CellId::new(4) },
        ]
    }

    // cell-3 still exists (out of view), cell-4 is deleted.
    fn directory() -> FixedDirectory {
        FixedDirectory([CellId::new(1), CellId::new(2), CellId::new(3)].into())
    }

    #[test]
    fn immediate_sends_one_message_per_op_in_order() {
        let sink = RecordingSink::connected();
        let accepted = ImmediateScheduler.deliver(&sample_ops(), &directory(), &sink);

        assert_eq!(accepted, 4);
        let kinds: Vec<&str> = sink.messages.borrow().iter().map(CellMessage::kind).collect();
        assert_eq!(kinds, vec!["load", "move", "unload", "delete"]);
    }

    #[test]
    fn aggregate_sends_a_single_ordered_batch() {
        let sink = RecordingSink::connected();
        let accepted = AggregatingScheduler.deliver(&sample_ops(), &directory(), &sink);

        assert_eq!(accepted, 1);
        let messages = sink.messages.borrow();
        let CellMessage::Batch { items } = &messages[0] else {
            panic!("expected a batch message");
        };
        let kinds: Vec<&str> = items.iter().map(CellMessage::kind).collect();
        assert_eq!(kinds, vec!["load", "move", "unload", "delete"]);
    }

    #[test]
    fn aggregate_skips_empty_ticks() {
        let sink = RecordingSink::connected();
        assert_eq!(AggregatingScheduler.deliver(&[], &directory(), &sink), 0);
        assert!(sink.messages.borrow().is_empty());
    }

    #[test]
    fn disconnected_sink_drops_without_error() {
        let sink = RecordingSink::disconnected();
        assert_eq!(ImmediateScheduler.deliver(&sample_ops(), &directory(), &sink), 0);
        assert_eq!(AggregatingScheduler.deliver(&sample_ops(), &directory(), &sink), 0);
    }

    #[test]
    fn noop_ignores_everything() {
        let sink = RecordingSink::connected();
        assert_eq!(NoopScheduler.deliver(&sample_ops(), &directory(), &sink), 0);
        assert!(sink.messages.borrow().is_empty());
    }
}
