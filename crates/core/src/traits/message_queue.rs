use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    models::{Delivery, DeliveryHandle},
    Result,
};

/// 消息队列抽象接口
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布持久化消息到指定队列
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()>;

    /// 开始消费指定队列，未确认消息数量不超过 `prefetch`
    ///
    /// 返回的通道在消费者被取消或连接断开时关闭。
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<mpsc::Receiver<Delivery>>;

    /// 确认消息处理完成
    async fn ack(&self, handle: &DeliveryHandle) -> Result<()>;

    /// 拒绝消息，`requeue = false` 时由 broker 转入死信
    async fn nack(&self, handle: &DeliveryHandle, requeue: bool) -> Result<()>;
}
