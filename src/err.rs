use std::error;
use std::fmt;

/// An error returned from the [`LockFreeQueue::try_dequeue`] method.
///
/// Dequeueing can only fail because the queue was observed to be empty at the moment of the
/// call. This is an expected outcome rather than a fault, and trying again later may succeed.
///
/// [`LockFreeQueue::try_dequeue`]: crate::LockFreeQueue::try_dequeue
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct DequeueError;

impl fmt::Debug for DequeueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "DequeueError".fmt(f)
    }
}

impl fmt::Display for DequeueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "dequeueing from an empty queue".fmt(f)
    }
}

impl error::Error for DequeueError {}
