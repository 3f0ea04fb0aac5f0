use std::time::Duration;

use async_trait::async_trait;

use crate::{models::GeoMember, Result};

/// 带 TTL 与地理索引的临时存储
///
/// 所有调度尝试共享同一个存储，客户端不做额外加锁；
/// 互斥完全依赖 `set_if_absent` 的原子性。
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// 写入或刷新地理索引中的成员坐标
    async fn geo_add(&self, index: &str, member: &str, lng: f64, lat: f64) -> Result<()>;

    /// 半径查询，结果按距离升序，最多 `limit` 个
    async fn geo_radius(
        &self,
        index: &str,
        lng: f64,
        lat: f64,
        radius_meters: f64,
        limit: usize,
    ) -> Result<Vec<GeoMember>>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// 原子的 set-if-absent，返回是否获得
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<()>;

    /// 写入哈希字段，`ttl` 作用于整个键
    async fn set_fields(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// 发布一次性信号
    async fn publish_signal(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.set(key, value, Some(ttl)).await
    }

    /// 等待信号出现，超时返回 `None`
    ///
    /// 默认实现按 `poll_interval` 轮询 `get`。
    async fn await_signal(
        &self,
        key: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(value) = self.get(key).await? {
                return Ok(Some(value));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    async fn clear_signal(&self, key: &str) -> Result<()> {
        self.del(key).await
    }
}
