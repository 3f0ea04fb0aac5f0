//! 持久化仓储接口
//!
//! - `JobRepository` 运单的 insert-only 写入与整单保存
//! - `OrderRepository` 订单的幂等导入，唯一键为 (orderId, storeType)
//!
//! 单条记录的写入依赖数据库自身的原子性，不跨记录开启事务。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    models::{Job, JobStatus, NewOrder, Order, StoreType},
    Result,
};

/// 运单仓储
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 仅在 jobId 不存在时插入，已存在时不修改任何字段
    ///
    /// 返回是否真正插入。
    async fn insert_if_absent(&self, job: &Job) -> Result<bool>;

    async fn find_by_id(&self, job_id: &str) -> Result<Option<Job>>;

    /// 按 (jobId, driverId) 查找
    async fn find_for_driver(&self, job_id: &str, driver_id: &str) -> Result<Option<Job>>;

    /// 查询司机名下指定状态的运单，不保证顺序
    async fn list_for_driver(&self, driver_id: &str, statuses: &[JobStatus]) -> Result<Vec<Job>>;

    /// 整单覆盖保存
    async fn save(&self, job: &Job) -> Result<()>;
}

/// 批量导入结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkInsertSummary {
    /// 新插入记录的下标
    pub inserted: Vec<usize>,
    /// 已存在记录的下标
    pub duplicates: Vec<usize>,
    /// 单条写入失败的下标与原因
    pub failed: Vec<(usize, String)>,
}

impl BulkInsertSummary {
    pub fn is_failed(&self, index: usize) -> bool {
        self.failed.iter().any(|(i, _)| *i == index)
    }
}

/// 订单仓储
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find(&self, order_id: &str, store_type: StoreType) -> Result<Option<Order>>;

    /// 仅在 (orderId, storeType) 不存在时插入，返回是否真正插入
    async fn insert_if_absent(&self, order: &NewOrder) -> Result<bool>;

    /// 无序批量 insert-only 写入
    ///
    /// 单条失败记录在结果中，不影响其他记录；只有连接类错误才返回 `Err`。
    async fn bulk_insert_if_absent(&self, orders: &[NewOrder]) -> Result<BulkInsertSummary>;
}
