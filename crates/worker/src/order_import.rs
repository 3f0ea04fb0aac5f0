use std::sync::Arc;

use dispatch_core::{
    config::IngestionConfig,
    models::{NewOrder, Order, OrderImportEnvelope},
    traits::{MessageQueue, OrderRepository},
    DispatchError, DispatchResult,
};
use tracing::{info, instrument};

/// 将订单导入请求投递到导入队列，由 [`crate::OrderIngestionWorker`] 异步写入
pub struct OrderImportPublisher {
    queue: Arc<dyn MessageQueue>,
    queue_name: String,
}

impl OrderImportPublisher {
    pub fn new(queue: Arc<dyn MessageQueue>, config: &IngestionConfig) -> Self {
        Self {
            queue,
            queue_name: config.queue_name.clone(),
        }
    }

    #[instrument(skip(self, order), fields(order_id = %order.order_id, store_type = %order.store_type))]
    pub async fn submit(&self, order: NewOrder) -> DispatchResult<OrderImportEnvelope> {
        order.validate()?;

        let envelope = OrderImportEnvelope::new(order);
        self.queue
            .publish(&self.queue_name, &envelope.to_bytes()?)
            .await?;

        info!("订单导入请求已入队");
        Ok(envelope)
    }
}

/// 同步导入单个订单
pub struct OrderImportService {
    orders: Arc<dyn OrderRepository>,
}

impl OrderImportService {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    /// 订单 `(orderId, storeType)` 已存在时返回 `OrderConflict`
    #[instrument(skip(self, order), fields(order_id = %order.order_id, store_type = %order.store_type))]
    pub async fn import_order(&self, order: NewOrder) -> DispatchResult<Order> {
        order.validate()?;

        if !self.orders.insert_if_absent(&order).await? {
            return Err(DispatchError::OrderConflict {
                order_id: order.order_id,
                store_type: order.store_type,
            });
        }

        let (order_id, store_type) = order.key();
        self.orders
            .find(order_id, store_type)
            .await?
            .ok_or_else(|| DispatchError::Internal(format!("订单 {order_id} 写入后未能读取")))
    }
}
