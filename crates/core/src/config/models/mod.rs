pub mod app_config;
pub mod database;
pub mod dispatch;
pub mod ingestion;
pub mod message_queue;
pub mod observability;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatch::DispatchConfig;
pub use ingestion::IngestionConfig;
pub use message_queue::{MessageQueueConfig, MessageQueueType, RedisConfig};
pub use observability::ObservabilityConfig;
