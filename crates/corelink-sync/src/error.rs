use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("timed out waiting for a queue item")]
    Timeout,
    #[error("queue empty")]
    Empty,
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ThreadError {
    #[error("worker thread not started")]
    NotStarted,
    #[error("worker thread already running")]
    AlreadyStarted,
    #[error("thread already in group")]
    AlreadyInGroup,
    #[error("cannot join a group from one of its own threads")]
    SelfJoin,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("message handler already registered")]
    AlreadyRegistered,
    #[error("message decode failed: {0}")]
    Decode(String),
    #[error("message handler failed: {0}")]
    Handler(String),
}
