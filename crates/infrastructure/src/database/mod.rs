pub mod manager;
pub mod postgres_job_repository;
pub mod postgres_order_repository;

pub use manager::DatabaseManager;
pub use postgres_job_repository::PostgresJobRepository;
pub use postgres_order_repository::PostgresOrderRepository;

/// 连接类错误，批量写入时整体失败而不是记录到单条结果中
pub(crate) fn is_connectivity_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
