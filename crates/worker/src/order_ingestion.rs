use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dispatch_core::{
    config::IngestionConfig,
    models::{Delivery, DeliveryHandle, NewOrder, OrderImportEnvelope},
    traits::{BulkInsertSummary, MessageQueue, OrderRepository},
    DispatchError, DispatchResult,
};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

struct BufferedOrder {
    order: NewOrder,
    handle: DeliveryHandle,
}

/// 持有期间其他批次不会开始写入，释放时复位标记，写入任务 panic 时同样生效
struct FlushPermit {
    flushing: Arc<AtomicBool>,
}

impl Drop for FlushPermit {
    fn drop(&mut self) {
        self.flushing.store(false, Ordering::Release);
    }
}

/// 单次批量写入的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub batch_size: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub dead_lettered: usize,
    /// 写入尝试次数，包括首次
    pub attempts: u32,
}

/// 订单导入消费者
///
/// 从持久化队列消费订单导入消息，按数量或时间窗口攒批后幂等写入。
/// 未确认消息数受 prefetch 限制，消息在批次写入完成后才确认。
pub struct OrderIngestionWorker {
    queue: Arc<dyn MessageQueue>,
    orders: Arc<dyn OrderRepository>,
    config: IngestionConfig,
    buffer: Mutex<Vec<BufferedOrder>>,
    flushing: Arc<AtomicBool>,
}

impl OrderIngestionWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        orders: Arc<dyn OrderRepository>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            queue,
            orders,
            config,
            buffer: Mutex::new(Vec::new()),
            flushing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// 消费主循环，收到关闭信号后等待在途批次并写完剩余缓冲
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> DispatchResult<()> {
        let mut deliveries = self
            .queue
            .consume(&self.config.queue_name, self.config.prefetch)
            .await?;

        let period = self.config.max_batch_time();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flushes: JoinSet<()> = JoinSet::new();

        info!(
            queue = %self.config.queue_name,
            max_batch_size = self.config.max_batch_size,
            prefetch = self.config.prefetch,
            "Order ingestion worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Order ingestion worker shutting down");
                    break;
                }
                Some(joined) = flushes.join_next() => {
                    if let Err(e) = joined {
                        error!("批次写入任务异常退出: {}", e);
                    }
                    // 在途批次期间跳过的阈值触发在这里补上
                    if self.buffered().await >= self.config.max_batch_size {
                        self.spawn_flush(&mut flushes).await;
                    }
                }
                delivery = deliveries.recv() => {
                    let Some(delivery) = delivery else {
                        warn!(queue = %self.config.queue_name, "消费通道已关闭");
                        break;
                    };
                    if self.handle_delivery(delivery).await {
                        self.spawn_flush(&mut flushes).await;
                    }
                }
                _ = ticker.tick() => {
                    self.spawn_flush(&mut flushes).await;
                }
            }
        }

        // 已投递到本地通道的消息也要写入，否则会一直处于未确认状态
        deliveries.close();
        while let Ok(delivery) = deliveries.try_recv() {
            self.handle_delivery(delivery).await;
        }

        while let Some(joined) = flushes.join_next().await {
            if let Err(e) = joined {
                error!("批次写入任务异常退出: {}", e);
            }
        }

        while let Some(report) = self.flush().await {
            debug!(batch_size = report.batch_size, "关闭前写入剩余订单");
        }

        info!("Order ingestion worker stopped");
        Ok(())
    }

    /// 处理一条投递，返回缓冲是否已达到批量上限
    ///
    /// 无法解析或校验失败的消息直接确认丢弃，不会重试。
    pub async fn handle_delivery(&self, delivery: Delivery) -> bool {
        let envelope = match OrderImportEnvelope::parse(&delivery.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    delivery_tag = delivery.handle.delivery_tag,
                    redelivered = delivery.redelivered,
                    "丢弃无效的订单导入消息: {}",
                    e
                );
                metrics::counter!("orders_ingested_total", "result" => "malformed").increment(1);
                self.ack(&delivery.handle).await;
                return false;
            }
        };

        let mut buffer = self.buffer.lock().await;
        buffer.push(BufferedOrder {
            order: envelope.payload,
            handle: delivery.handle,
        });
        buffer.len() >= self.config.max_batch_size
    }

    /// 立即写入一批缓冲订单，另一批写入进行中或缓冲为空时返回 `None`
    pub async fn flush(&self) -> Option<FlushReport> {
        let (permit, batch) = self.begin_flush().await?;
        let report = self.write_batch(batch).await;
        drop(permit);
        Some(report)
    }

    async fn spawn_flush(self: &Arc<Self>, flushes: &mut JoinSet<()>) {
        // 先同步取出批次，之后到达的消息继续进入缓冲
        if let Some((permit, batch)) = self.begin_flush().await {
            let worker = Arc::clone(self);
            flushes.spawn(async move {
                let _permit = permit;
                worker.write_batch(batch).await;
            });
        }
    }

    fn try_acquire_permit(&self) -> Option<FlushPermit> {
        self.flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlushPermit {
                flushing: Arc::clone(&self.flushing),
            })
    }

    async fn begin_flush(&self) -> Option<(FlushPermit, Vec<BufferedOrder>)> {
        let Some(permit) = self.try_acquire_permit() else {
            debug!("已有批次在写入，跳过本次触发");
            return None;
        };

        let batch = {
            let mut buffer = self.buffer.lock().await;
            let take = buffer.len().min(self.config.max_batch_size);
            buffer.drain(..take).collect::<Vec<_>>()
        };

        if batch.is_empty() {
            return None;
        }
        Some((permit, batch))
    }

    /// 在独立任务中调用仓储，仓储 panic 按一次失败的写入处理
    async fn try_write(&self, orders: &Arc<[NewOrder]>) -> DispatchResult<BulkInsertSummary> {
        let repository = Arc::clone(&self.orders);
        let orders = Arc::clone(orders);
        tokio::spawn(async move { repository.bulk_insert_if_absent(&orders).await })
            .await
            .map_err(|e| DispatchError::Internal(format!("批量写入任务异常: {e}")))?
    }

    /// 有限次指数退避重试，仍失败则整批转入死信
    #[instrument(skip_all, fields(batch_size = batch.len()))]
    async fn write_batch(&self, batch: Vec<BufferedOrder>) -> FlushReport {
        let orders: Arc<[NewOrder]> = batch.iter().map(|item| item.order.clone()).collect();
        let mut report = FlushReport {
            batch_size: batch.len(),
            ..FlushReport::default()
        };
        metrics::counter!("order_batches_flushed_total").increment(1);

        loop {
            report.attempts += 1;
            match self.try_write(&orders).await {
                Ok(summary) => {
                    self.settle(&batch, &summary, &mut report).await;
                    info!(
                        inserted = report.inserted,
                        duplicates = report.duplicates,
                        dead_lettered = report.dead_lettered,
                        "订单批次写入完成"
                    );
                    return report;
                }
                Err(e) if report.attempts <= self.config.max_flush_retries => {
                    let delay = self.config.retry_delay(report.attempts);
                    warn!(
                        attempt = report.attempts,
                        transient = e.is_transient(),
                        "订单批次写入失败，{:?} 后重试: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        attempts = report.attempts,
                        "订单批次写入重试耗尽，整批转入死信: {}", e
                    );
                    for item in &batch {
                        self.dead_letter(&item.handle).await;
                    }
                    report.dead_lettered = batch.len();
                    metrics::counter!("orders_ingested_total", "result" => "dead_lettered")
                        .increment(batch.len() as u64);
                    return report;
                }
            }
        }
    }

    async fn settle(
        &self,
        batch: &[BufferedOrder],
        summary: &BulkInsertSummary,
        report: &mut FlushReport,
    ) {
        for (index, item) in batch.iter().enumerate() {
            if let Some((_, reason)) = summary.failed.iter().find(|(i, _)| *i == index) {
                warn!(order_id = %item.order.order_id, "订单写入失败，转入死信: {}", reason);
                self.dead_letter(&item.handle).await;
                report.dead_lettered += 1;
            } else {
                self.ack(&item.handle).await;
            }
        }

        report.inserted = summary.inserted.len();
        report.duplicates = summary.duplicates.len();
        metrics::counter!("orders_ingested_total", "result" => "inserted")
            .increment(report.inserted as u64);
        metrics::counter!("orders_ingested_total", "result" => "duplicate")
            .increment(report.duplicates as u64);
        metrics::counter!("orders_ingested_total", "result" => "dead_lettered")
            .increment(report.dead_lettered as u64);
    }

    async fn ack(&self, handle: &DeliveryHandle) {
        if let Err(e) = self.queue.ack(handle).await {
            error!(delivery_tag = handle.delivery_tag, "消息确认失败: {}", e);
        }
    }

    async fn dead_letter(&self, handle: &DeliveryHandle) {
        if let Err(e) = self.queue.nack(handle, false).await {
            error!(delivery_tag = handle.delivery_tag, "消息拒绝失败: {}", e);
        }
    }
}
