pub mod database;
pub mod in_memory_queue;
pub mod in_memory_store;
pub mod message_queue;
pub mod notification_hub;
pub mod redis_store;

pub use database::*;
pub use in_memory_queue::{InMemoryMessageQueue, QueueStats};
pub use in_memory_store::InMemoryEphemeralStore;
pub use message_queue::RabbitMQMessageQueue;
pub use notification_hub::NotificationHub;
pub use redis_store::RedisEphemeralStore;
