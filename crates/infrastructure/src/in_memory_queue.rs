use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use dispatch_core::{
    models::{Delivery, DeliveryHandle},
    traits::MessageQueue,
    DispatchError, Result,
};
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tracing::{debug, info, warn};

/// 内存消息队列实现
///
/// 语义与 broker 一致：消费者最多持有 `prefetch` 条未确认消息，
/// `nack(requeue = true)` 的消息回到队首，`nack(requeue = false)` 的消息进入死信列表。
/// 每个队列同一时刻只支持一个消费者。
#[derive(Debug, Default, Clone)]
pub struct InMemoryMessageQueue {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<PendingMessage>,
    unacked: HashMap<u64, PendingMessage>,
    dead_lettered: Vec<Vec<u8>>,
    acked: u64,
    next_tag: u64,
    notify: Arc<Notify>,
    /// 当前消费者的 prefetch 信号量
    credits: Option<Arc<Semaphore>>,
}

#[derive(Debug, Clone)]
struct PendingMessage {
    data: Vec<u8>,
    redelivered: bool,
}

/// 队列统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub unacked: usize,
    pub acked: u64,
    pub dead_lettered: usize,
}

impl InMemoryMessageQueue {
    /// 创建新的内存消息队列实例
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取队列统计信息
    pub async fn stats(&self, queue: &str) -> QueueStats {
        let queues = self.queues.lock().await;
        queues
            .get(queue)
            .map(|state| QueueStats {
                ready: state.ready.len(),
                unacked: state.unacked.len(),
                acked: state.acked,
                dead_lettered: state.dead_lettered.len(),
            })
            .unwrap_or_default()
    }

    /// 死信消息内容
    pub async fn dead_letters(&self, queue: &str) -> Vec<Vec<u8>> {
        let queues = self.queues.lock().await;
        queues
            .get(queue)
            .map(|state| state.dead_lettered.clone())
            .unwrap_or_default()
    }

    async fn settle(&self, handle: &DeliveryHandle, requeue: Option<bool>) -> Result<()> {
        let mut queues = self.queues.lock().await;
        let state = queues.get_mut(&handle.queue).ok_or_else(|| {
            DispatchError::MessageQueue(format!("队列不存在: {}", handle.queue))
        })?;

        let mut message = state.unacked.remove(&handle.delivery_tag).ok_or_else(|| {
            DispatchError::MessageQueue(format!(
                "未知的delivery tag: {} (队列 {})",
                handle.delivery_tag, handle.queue
            ))
        })?;

        match requeue {
            None => state.acked += 1,
            Some(true) => {
                message.redelivered = true;
                state.ready.push_front(message);
                state.notify.notify_one();
            }
            Some(false) => state.dead_lettered.push(message.data),
        }

        if let Some(credits) = &state.credits {
            credits.add_permits(1);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        state.ready.push_back(PendingMessage {
            data: payload.to_vec(),
            redelivered: false,
        });
        state.notify.notify_one();
        debug!("消息已发布到内存队列: {}", queue);
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<mpsc::Receiver<Delivery>> {
        let credits = Arc::new(Semaphore::new(prefetch as usize));
        let notify = {
            let mut queues = self.queues.lock().await;
            let state = queues.entry(queue.to_string()).or_default();
            if state.credits.is_some() {
                warn!(queue, "Replacing existing in-memory consumer");
            }
            state.credits = Some(credits.clone());
            state.notify.clone()
        };

        let (tx, rx) = mpsc::channel(prefetch.max(1) as usize);
        let queues = self.queues.clone();
        let queue_name = queue.to_string();

        tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    permit = credits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = tx.closed() => break,
                };

                let notified = notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let next = {
                    let mut queues = queues.lock().await;
                    let Some(state) = queues.get_mut(&queue_name) else {
                        break;
                    };
                    state.ready.pop_front().map(|message| {
                        state.next_tag += 1;
                        let tag = state.next_tag;
                        state.unacked.insert(tag, message.clone());
                        (tag, message)
                    })
                };

                match next {
                    Some((tag, message)) => {
                        // 信用在 ack/nack 时归还
                        permit.forget();
                        let delivery = Delivery {
                            handle: DeliveryHandle {
                                queue: queue_name.clone(),
                                delivery_tag: tag,
                            },
                            data: message.data,
                            redelivered: message.redelivered,
                        };
                        if tx.send(delivery).await.is_err() {
                            // 消费者已关闭，消息放回队首
                            let mut queues = queues.lock().await;
                            if let Some(state) = queues.get_mut(&queue_name) {
                                if let Some(message) = state.unacked.remove(&tag) {
                                    state.ready.push_front(message);
                                }
                            }
                            break;
                        }
                    }
                    None => {
                        drop(permit);
                        tokio::select! {
                            _ = &mut notified => {}
                            _ = tx.closed() => break,
                        }
                    }
                }
            }
            debug!(queue = %queue_name, "In-memory consumer stopped");
        });

        info!(queue, prefetch, "Started in-memory consumer");
        Ok(rx)
    }

    async fn ack(&self, handle: &DeliveryHandle) -> Result<()> {
        self.settle(handle, None).await
    }

    async fn nack(&self, handle: &DeliveryHandle, requeue: bool) -> Result<()> {
        self.settle(handle, Some(requeue)).await
    }
}
