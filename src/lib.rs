//! An unbounded lock-free multi-producer multi-consumer queue.
//!
//! [`LockFreeQueue`] is a Michael—Scott queue: a singly-linked list with a sentinel node at the
//! front, updated exclusively through compare-and-swap. Producers that find the tail lagging
//! behind a freshly linked node move it forward themselves, so no thread ever waits on another.
//!
//! The ends of the list and every `next` link are counted pointers: a node address paired with a
//! generation that is bumped by every successful update and wraps around modulo 64. Every
//! operation pins the thread with [`crossbeam_epoch`] before taking snapshots, and unlinked nodes
//! are reclaimed only once no pinned thread can still be reading them, so a node's address is
//! never reused while a stale snapshot of it exists. Together with the generation this keeps a
//! stale snapshot from winning a CAS after the list has changed underneath it.
//!
//! ```
//! use crossbeam_msqueue::LockFreeQueue;
//! use crossbeam_utils::thread::scope;
//!
//! let q = LockFreeQueue::new();
//!
//! scope(|s| {
//!     s.spawn(|_| {
//!         for i in 0..100 {
//!             q.enqueue(i);
//!         }
//!     });
//! })
//! .unwrap();
//!
//! let v: Vec<_> = q.into_iter().collect();
//! assert_eq!(v, (0..100).collect::<Vec<_>>());
//! ```
//!
//! # Features
//!
//! * `tracing`: emits `trace`-level events through the [`tracing`] crate when a thread completes
//!   another thread's tail update, and enables [`init_tracing`].
//!
//! [`tracing`]: https://docs.rs/tracing

#![doc(test(
    no_crate_inject,
    attr(allow(dead_code, unused_assignments, unused_variables))
))]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unsafe_op_in_unsafe_fn
)]

pub(crate) mod counted;
mod err;
mod ms_queue;
mod trace;

pub use crate::err::DequeueError;
pub use crate::ms_queue::{IntoIter, LockFreeQueue};
pub use crate::trace::init_tracing;
