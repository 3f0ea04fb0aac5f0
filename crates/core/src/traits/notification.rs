use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::DriverEvent;

/// 面向司机的实时推送通道
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// 注册司机连接，重复注册会替换旧连接
    async fn register(&self, driver_id: &str) -> mpsc::Receiver<DriverEvent>;

    async fn unregister(&self, driver_id: &str);

    /// 推送事件，返回是否已投递到在线连接
    async fn push(&self, driver_id: &str, event: &DriverEvent) -> bool;

    async fn is_connected(&self, driver_id: &str) -> bool;
}
