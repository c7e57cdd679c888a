use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue_store_failed:{message}")]
    Store { message: String },
    #[error("queue_encode_failed:{message}")]
    Encode { message: String },
    #[error("queue_dispatch_failed:{message}")]
    Dispatch { message: String },
}
