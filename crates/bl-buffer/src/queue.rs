//! Per-buffer FIFO of operations. Only the head may be in flight.

use std::collections::VecDeque;

use crate::operation::{Operation, OperationId, OperationKind};

#[derive(Debug, Default)]
pub(crate) struct OperationQueue {
    ops: VecDeque<Operation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail. Returns `true` if the operation is now the only
    /// entry and should be started.
    pub fn push(&mut self, op: Operation) -> bool {
        self.ops.push_back(op);
        self.ops.len() == 1
    }

    /// Insert ahead of the current head.
    pub fn unshift(&mut self, op: Operation) {
        self.ops.push_front(op);
    }

    pub fn head(&self) -> Option<&Operation> {
        self.ops.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut Operation> {
        self.ops.front_mut()
    }

    pub fn pop(&mut self) -> Option<Operation> {
        self.ops.pop_front()
    }

    /// Remove a specific entry wherever it sits.
    pub fn remove(&mut self, id: OperationId) -> Option<Operation> {
        let index = self.ops.iter().position(|op| op.id == id)?;
        self.ops.remove(index)
    }

    /// Take every entry except the head.
    pub fn drain_pending(&mut self) -> Vec<Operation> {
        if self.ops.len() <= 1 {
            return Vec::new();
        }
        self.ops.drain(1..).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn kinds(&self) -> Vec<OperationKind> {
        self.ops.iter().map(|op| op.kind).collect()
    }
}
