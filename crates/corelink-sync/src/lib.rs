mod bounded;
mod dispatch;
mod error;
mod event;
mod queue;
mod worker;

pub use bounded::BoundedBuffer;
pub use dispatch::{DrainPolicy, MessageQueueThread};
pub use error::{HandlerError, QueueError, ThreadError};
pub use event::{InitialState, NotifyKind, ResetKind, SyncEvent};
pub use queue::ConcurrentQueue;
pub use worker::{ThreadGroup, Worker, WorkerThread};

pub(crate) use corelink_utils::lock_unpoisoned as guard;
