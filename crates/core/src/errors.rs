use thiserror::Error;

use crate::models::{JobStatus, StoreType};

/// 调度系统错误类型定义
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("运单未找到: {job_id}")]
    JobNotFound { job_id: String },

    #[error("司机 {driver_id} 名下未找到运单: {job_id}")]
    DriverJobNotFound { job_id: String, driver_id: String },

    #[error("运单 {job_id} 不处于可应答状态 (当前: {current})")]
    JobNotAssignable { job_id: String, current: JobStatus },

    #[error("运单 {job_id} 状态转换无效: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("订单已存在 (幂等校验): {order_id}/{store_type}")]
    OrderConflict {
        order_id: String,
        store_type: StoreType,
    },

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("临时存储错误: {0}")]
    EphemeralStore(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl DispatchError {
    /// 存储或队列连接类的错误，调用方可以重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DispatchError::Database(_)
                | DispatchError::EphemeralStore(_)
                | DispatchError::MessageQueue(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DispatchError::JobNotFound { .. } | DispatchError::DriverJobNotFound { .. }
        )
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            DispatchError::JobNotAssignable { .. } | DispatchError::InvalidTransition { .. }
        )
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, DispatchError>;
