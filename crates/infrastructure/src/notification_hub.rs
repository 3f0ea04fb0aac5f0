use std::collections::HashMap;

use async_trait::async_trait;
use dispatch_core::{models::DriverEvent, traits::NotificationChannel};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// 单个司机连接的缓冲事件数
const DEFAULT_CONNECTION_BUFFER: usize = 32;

/// 司机连接注册表
///
/// 由传输层在连接建立/断开时调用 `register`/`unregister`，
/// 进程退出前调用 `shutdown` 关闭所有连接。
pub struct NotificationHub {
    connections: RwLock<HashMap<String, mpsc::Sender<DriverEvent>>>,
    buffer: usize,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_CONNECTION_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    pub async fn connected_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// 断开所有连接
    pub async fn shutdown(&self) {
        let mut connections = self.connections.write().await;
        let count = connections.len();
        connections.clear();
        info!(count, "Notification hub closed all driver connections");
    }
}

#[async_trait]
impl NotificationChannel for NotificationHub {
    async fn register(&self, driver_id: &str) -> mpsc::Receiver<DriverEvent> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let previous = self
            .connections
            .write()
            .await
            .insert(driver_id.to_string(), tx);
        if previous.is_some() {
            debug!(driver_id, "Replaced existing driver connection");
        } else {
            debug!(driver_id, "Driver connected");
        }
        rx
    }

    async fn unregister(&self, driver_id: &str) {
        if self.connections.write().await.remove(driver_id).is_some() {
            debug!(driver_id, "Driver disconnected");
        }
    }

    async fn push(&self, driver_id: &str, event: &DriverEvent) -> bool {
        let sender = self.connections.read().await.get(driver_id).cloned();
        let Some(sender) = sender else {
            debug!(driver_id, "Driver not connected, push skipped");
            return false;
        };

        match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(driver_id, "Driver connection buffer full, push dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let mut connections = self.connections.write().await;
                if connections
                    .get(driver_id)
                    .is_some_and(|current| current.same_channel(&sender))
                {
                    connections.remove(driver_id);
                }
                debug!(driver_id, "Driver connection closed, removed from hub");
                false
            }
        }
    }

    async fn is_connected(&self, driver_id: &str) -> bool {
        self.connections
            .read()
            .await
            .get(driver_id)
            .is_some_and(|sender| !sender.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::models::JobStatus;

    fn update(status: JobStatus) -> DriverEvent {
        DriverEvent::JobUpdate {
            job_id: "job:O1".to_string(),
            status,
        }
    }

    #[tokio::test]
    async fn test_push_to_registered_driver() {
        let hub = NotificationHub::new();
        let mut rx = hub.register("D1").await;

        assert!(hub.push("D1", &update(JobStatus::Accepted)).await);
        assert_eq!(rx.recv().await, Some(update(JobStatus::Accepted)));
        assert!(!hub.push("D2", &update(JobStatus::Accepted)).await);
    }

    #[tokio::test]
    async fn test_closed_connection_is_not_delivered() {
        let hub = NotificationHub::new();
        let rx = hub.register("D1").await;
        drop(rx);

        assert!(!hub.is_connected("D1").await);
        assert!(!hub.push("D1", &update(JobStatus::Delivered)).await);
        assert_eq!(hub.connected_count().await, 0);
    }

    #[tokio::test]
    async fn test_full_buffer_is_not_delivered() {
        let hub = NotificationHub::with_buffer(1);
        let _rx = hub.register("D1").await;

        assert!(hub.push("D1", &update(JobStatus::Accepted)).await);
        assert!(!hub.push("D1", &update(JobStatus::PickedUp)).await);
        assert!(hub.is_connected("D1").await);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let hub = NotificationHub::new();
        let mut rx = hub.register("D1").await;

        hub.shutdown().await;
        assert_eq!(rx.recv().await, None);
        assert!(!hub.push("D1", &update(JobStatus::Accepted)).await);
    }
}
