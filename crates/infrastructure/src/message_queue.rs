use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_core::{
    config::MessageQueueConfig,
    models::{Delivery, DeliveryHandle},
    traits::MessageQueue,
    DispatchError, Result,
};
use futures::StreamExt;
use lapin::{
    options::*,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// RabbitMQ消息队列实现
///
/// 同一个通道用于发布、消费与确认，delivery tag 只在该通道内有效。
pub struct RabbitMQMessageQueue {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    declared: Mutex<HashSet<String>>,
}

impl RabbitMQMessageQueue {
    /// 创建新的RabbitMQ消息队列实例
    pub async fn new(config: &MessageQueueConfig) -> Result<Self> {
        let connection = Self::connect_with_retry(config).await?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| DispatchError::MessageQueue(format!("创建通道失败: {e}")))?;

        info!("Connected to RabbitMQ");

        Ok(Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
            declared: Mutex::new(HashSet::new()),
        })
    }

    async fn connect_with_retry(config: &MessageQueueConfig) -> Result<Connection> {
        let attempts = config.max_retries.max(1);
        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let connect = Connection::connect(&config.url, ConnectionProperties::default());
            match tokio::time::timeout(timeout, connect).await {
                Ok(Ok(connection)) => {
                    if attempt > 1 {
                        debug!("Connected to RabbitMQ after {} attempts", attempt);
                    }
                    return Ok(connection);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("连接超时 ({}s)", config.connection_timeout_seconds),
            }

            if attempt < attempts {
                warn!(
                    "Failed to connect to RabbitMQ (attempt {}/{}): {}. Retrying in {}s...",
                    attempt, attempts, last_error, config.retry_delay_seconds
                );
                tokio::time::sleep(Duration::from_secs(config.retry_delay_seconds)).await;
            }
        }

        Err(DispatchError::MessageQueue(format!(
            "连接RabbitMQ失败，已重试 {attempts} 次: {last_error}"
        )))
    }

    /// 声明带死信交换机的持久化队列
    ///
    /// 被 `nack(requeue = false)` 的消息进入 `{queue}.dead`。
    pub async fn declare_queue_with_dead_letter(
        &self,
        queue_name: &str,
        dead_letter_exchange: &str,
    ) -> Result<()> {
        let channel = self.channel.lock().await;
        let dead_queue = format!("{queue_name}.dead");

        channel
            .exchange_declare(
                dead_letter_exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                DispatchError::MessageQueue(format!(
                    "声明死信交换机 {dead_letter_exchange} 失败: {e}"
                ))
            })?;

        Self::declare_queue(&channel, &dead_queue, FieldTable::default()).await?;

        channel
            .queue_bind(
                &dead_queue,
                dead_letter_exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                DispatchError::MessageQueue(format!("绑定死信队列 {dead_queue} 失败: {e}"))
            })?;

        let mut arguments = FieldTable::default();
        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(dead_letter_exchange.into()),
        );
        Self::declare_queue(&channel, queue_name, arguments).await?;
        drop(channel);

        self.declared.lock().await.insert(queue_name.to_string());
        info!(
            queue = queue_name,
            dead_letter_exchange, "Declared queue with dead-letter routing"
        );
        Ok(())
    }

    async fn ensure_queue(&self, queue_name: &str) -> Result<()> {
        let mut declared = self.declared.lock().await;
        if declared.contains(queue_name) {
            return Ok(());
        }

        let channel = self.channel.lock().await;
        Self::declare_queue(&channel, queue_name, FieldTable::default()).await?;
        declared.insert(queue_name.to_string());
        Ok(())
    }

    /// 声明持久化队列
    async fn declare_queue(
        channel: &Channel,
        queue_name: &str,
        arguments: FieldTable,
    ) -> Result<()> {
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                arguments,
            )
            .await
            .map_err(|e| {
                DispatchError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}"))
            })?;

        debug!("队列 {} 声明成功", queue_name);
        Ok(())
    }

    /// 获取连接状态
    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// 关闭连接
    pub async fn close(&self) -> Result<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| DispatchError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ connection closed");
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RabbitMQMessageQueue {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        self.ensure_queue(queue).await?;
        let channel = self.channel.lock().await;

        let confirm = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // 2 = persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| {
                DispatchError::MessageQueue(format!("发布消息到队列 {queue} 失败: {e}"))
            })?;

        confirm
            .await
            .map_err(|e| DispatchError::MessageQueue(format!("消息发布确认失败: {e}")))?;

        debug!("消息已发布到队列: {}", queue);
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<mpsc::Receiver<Delivery>> {
        self.ensure_queue(queue).await?;
        let channel = self.channel.lock().await;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| DispatchError::MessageQueue(format!("设置prefetch失败: {e}")))?;

        let mut consumer = channel
            .basic_consume(
                queue,
                &format!("{queue}-consumer"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| DispatchError::MessageQueue(format!("创建消费者失败: {e}")))?;

        let (tx, rx) = mpsc::channel(prefetch as usize);
        let queue_name = queue.to_string();

        tokio::spawn(async move {
            while let Some(item) = consumer.next().await {
                match item {
                    Ok(delivery) => {
                        let message = Delivery {
                            handle: DeliveryHandle {
                                queue: queue_name.clone(),
                                delivery_tag: delivery.delivery_tag,
                            },
                            data: delivery.data,
                            redelivered: delivery.redelivered,
                        };
                        if tx.send(message).await.is_err() {
                            debug!(queue = %queue_name, "Delivery receiver dropped, stopping consumer");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(queue = %queue_name, "Consumer stream error: {}", e);
                        break;
                    }
                }
            }
            warn!(queue = %queue_name, "Consumer stream ended");
        });

        info!(queue, prefetch, "Started consuming");
        Ok(rx)
    }

    async fn ack(&self, handle: &DeliveryHandle) -> Result<()> {
        let channel = self.channel.lock().await;
        channel
            .basic_ack(handle.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| DispatchError::MessageQueue(format!("确认消息失败: {e}")))
    }

    async fn nack(&self, handle: &DeliveryHandle, requeue: bool) -> Result<()> {
        let channel = self.channel.lock().await;
        channel
            .basic_nack(
                handle.delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| DispatchError::MessageQueue(format!("拒绝消息失败: {e}")))
    }
}
