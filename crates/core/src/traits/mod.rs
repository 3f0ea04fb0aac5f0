pub mod ephemeral_store;
pub mod message_queue;
pub mod notification;
pub mod repository;

pub use ephemeral_store::EphemeralStore;
pub use message_queue::MessageQueue;
pub use notification::NotificationChannel;
pub use repository::{BulkInsertSummary, JobRepository, OrderRepository};
