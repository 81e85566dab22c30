pub mod manager;
pub mod models;

pub use manager::QueueManager;
pub use models::{AttachmentData, EnqueueRequest, QueueListFilter, QueueStats};
