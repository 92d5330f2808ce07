use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Position, remove, reorder or jump target outside the queue. State is unchanged.
    #[error("index {index} is out of range for a queue of {len} items")]
    IndexOutOfRange { index: usize, len: usize },

    /// Navigation attempted with nothing queued.
    #[error("queue is empty")]
    EmptyQueue,

    /// The persistence collaborator gave up after retrying.
    #[error("persistence failed: {0}")]
    PersistenceFailure(String),

    #[error("queue service has shut down")]
    ServiceStopped,
}
