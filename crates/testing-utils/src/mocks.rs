//! Mock implementations for repository and notification traits
//!
//! In-memory doubles used by the engine and worker tests in place of
//! PostgreSQL and the driver connection registry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dispatch_core::{
    models::{DriverEvent, Job, JobStatus, NewOrder, Order, StoreType},
    traits::{BulkInsertSummary, JobRepository, NotificationChannel, OrderRepository},
    DispatchError, DispatchResult,
};
use tokio::sync::mpsc;

/// Mock implementation of JobRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockJobRepository {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl MockJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.jobs.lock().unwrap();
            for job in jobs {
                map.insert(job.job_id.clone(), job);
            }
        }
        repo
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.lock().unwrap().get(job_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl JobRepository for MockJobRepository {
    async fn insert_if_absent(&self, job: &Job) -> DispatchResult<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.job_id) {
            return Ok(false);
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(true)
    }

    async fn find_by_id(&self, job_id: &str) -> DispatchResult<Option<Job>> {
        Ok(self.get(job_id))
    }

    async fn find_for_driver(&self, job_id: &str, driver_id: &str) -> DispatchResult<Option<Job>> {
        Ok(self
            .get(job_id)
            .filter(|job| job.driver_id.as_deref() == Some(driver_id)))
    }

    async fn list_for_driver(
        &self,
        driver_id: &str,
        statuses: &[JobStatus],
    ) -> DispatchResult<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|job| job.driver_id.as_deref() == Some(driver_id))
            .filter(|job| statuses.contains(&job.status))
            .cloned()
            .collect())
    }

    async fn save(&self, job: &Job) -> DispatchResult<()> {
        self.jobs
            .lock()
            .unwrap()
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }
}

/// Mock implementation of OrderRepository with failure injection
///
/// - `fail_next_bulk(n)`: the next `n` bulk writes fail as a whole with a transient error
/// - `reject_order(id)`: that order is reported as a per-record failure
/// - `panic_next_bulk(n)`: the next `n` bulk writes panic
/// - `set_write_delay(d)`: every bulk write takes `d` before touching the store
#[derive(Debug, Clone, Default)]
pub struct MockOrderRepository {
    orders: Arc<Mutex<HashMap<(String, StoreType), Order>>>,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
    fail_next: Arc<Mutex<u32>>,
    panic_next: Arc<Mutex<u32>>,
    rejected: Arc<Mutex<HashSet<String>>>,
    write_delay: Arc<Mutex<Option<Duration>>>,
    active_writes: Arc<AtomicUsize>,
    max_active_writes: Arc<AtomicUsize>,
}

impl MockOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_bulk(&self, times: u32) {
        *self.fail_next.lock().unwrap() = times;
    }

    pub fn panic_next_bulk(&self, times: u32) {
        *self.panic_next.lock().unwrap() = times;
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    /// 同时进行中的批量写入数的峰值
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_active_writes.load(Ordering::SeqCst)
    }

    pub fn reject_order(&self, order_id: &str) {
        self.rejected.lock().unwrap().insert(order_id.to_string());
    }

    /// 每次批量写入调用收到的记录数（包括失败的调用）
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn get(&self, order_id: &str, store_type: StoreType) -> Option<Order> {
        self.orders
            .lock()
            .unwrap()
            .get(&(order_id.to_string(), store_type))
            .cloned()
    }

    fn insert(&self, order: &NewOrder) -> bool {
        let mut orders = self.orders.lock().unwrap();
        let key = (order.order_id.clone(), order.store_type);
        if orders.contains_key(&key) {
            return false;
        }
        orders.insert(
            key,
            Order {
                data: order.clone(),
                created_at: Utc::now(),
            },
        );
        true
    }
}

#[async_trait]
impl OrderRepository for MockOrderRepository {
    async fn find(&self, order_id: &str, store_type: StoreType) -> DispatchResult<Option<Order>> {
        Ok(self.get(order_id, store_type))
    }

    async fn insert_if_absent(&self, order: &NewOrder) -> DispatchResult<bool> {
        Ok(self.insert(order))
    }

    async fn bulk_insert_if_absent(&self, orders: &[NewOrder]) -> DispatchResult<BulkInsertSummary> {
        self.batch_sizes.lock().unwrap().push(orders.len());

        let panic_now = {
            let mut panic_next = self.panic_next.lock().unwrap();
            let hit = *panic_next > 0;
            if hit {
                *panic_next -= 1;
            }
            hit
        };
        if panic_now {
            panic!("injected bulk write panic");
        }

        let active = self.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_writes.fetch_max(active, Ordering::SeqCst);
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.active_writes.fetch_sub(1, Ordering::SeqCst);

        {
            let mut fail_next = self.fail_next.lock().unwrap();
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(DispatchError::Internal("injected bulk write failure".to_string()));
            }
        }

        let rejected = self.rejected.lock().unwrap().clone();
        let mut summary = BulkInsertSummary::default();
        for (index, order) in orders.iter().enumerate() {
            if rejected.contains(&order.order_id) {
                summary
                    .failed
                    .push((index, format!("rejected order {}", order.order_id)));
            } else if self.insert(order) {
                summary.inserted.push(index);
            } else {
                summary.duplicates.push(index);
            }
        }
        Ok(summary)
    }
}

/// Notification channel that records every push
///
/// Drivers are online once registered or marked with `connect`.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotificationChannel {
    online: Arc<Mutex<HashSet<String>>>,
    pushed: Arc<Mutex<Vec<(String, DriverEvent)>>>,
}

impl RecordingNotificationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, driver_id: &str) {
        self.online.lock().unwrap().insert(driver_id.to_string());
    }

    pub fn pushed(&self) -> Vec<(String, DriverEvent)> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn pushed_to(&self, driver_id: &str) -> Vec<DriverEvent> {
        self.pushed
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == driver_id)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for RecordingNotificationChannel {
    async fn register(&self, driver_id: &str) -> mpsc::Receiver<DriverEvent> {
        self.connect(driver_id);
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    async fn unregister(&self, driver_id: &str) {
        self.online.lock().unwrap().remove(driver_id);
    }

    async fn push(&self, driver_id: &str, event: &DriverEvent) -> bool {
        if !self.online.lock().unwrap().contains(driver_id) {
            return false;
        }
        self.pushed
            .lock()
            .unwrap()
            .push((driver_id.to_string(), event.clone()));
        true
    }

    async fn is_connected(&self, driver_id: &str) -> bool {
        self.online.lock().unwrap().contains(driver_id)
    }
}
