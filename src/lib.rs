pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod history;
pub mod model;
pub mod navigation;
pub mod persistence;
pub mod queue;
pub mod service;
pub mod shuffle;
pub mod transport;

pub use error::{QueueError, Result};
pub use events::{EventBridge, QueueEvent};
pub use guard::{Command, QueueHandle};
pub use model::{ItemId, LoopMode, QueueItem, QueueSnapshot, SavedQueue, TrackId, TrackRef};
pub use navigation::{Navigation, NavigationController};
pub use service::QueueService;
