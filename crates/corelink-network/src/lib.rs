mod frame;
pub mod tcp;
pub mod udp;

pub use frame::{
    CheckBytesFn, FrameError, FramingConfig, MessageReceivedFn, NULL_ENDPOINT, SendOption,
};

pub(crate) use corelink_utils::lock_unpoisoned as guard;
