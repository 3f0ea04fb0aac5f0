use std::sync::Arc;

use async_trait::async_trait;
use dispatch_core::{
    models::{DriverEvent, Job, JobStatus},
    traits::{EphemeralStore, JobRepository, NotificationChannel},
    DispatchError, DispatchResult,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::keys;

/// 司机应答结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RespondOutcome {
    pub accepted: bool,
}

/// 运单生命周期服务接口
#[async_trait]
pub trait JobLifecycleService: Send + Sync {
    /// insert-only 写入，已存在的运单保持首次写入的字段
    async fn ensure_job_exists(&self, job: &Job) -> DispatchResult<()>;

    /// 查询司机名下运单，未指定状态时返回进行中的运单
    async fn get_driver_jobs(
        &self,
        driver_id: &str,
        status: Option<JobStatus>,
    ) -> DispatchResult<Vec<Job>>;

    /// 司机接受或拒绝 ASSIGNED 状态的运单
    async fn respond_to_job(
        &self,
        driver_id: &str,
        job_id: &str,
        accept: bool,
    ) -> DispatchResult<RespondOutcome>;

    /// 按状态机推进司机名下的运单
    async fn update_driver_job_status(
        &self,
        driver_id: &str,
        job_id: &str,
        next: JobStatus,
    ) -> DispatchResult<Job>;
}

/// 运单生命周期管理器
///
/// 每次状态转换只依赖数据库单条记录的原子性，并发重复提交时后写者生效。
pub struct JobLifecycleManager {
    jobs: Arc<dyn JobRepository>,
    store: Arc<dyn EphemeralStore>,
    notifier: Arc<dyn NotificationChannel>,
}

impl JobLifecycleManager {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        store: Arc<dyn EphemeralStore>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            jobs,
            store,
            notifier,
        }
    }

    async fn notify_update(&self, driver_id: &str, job: &Job) {
        let event = DriverEvent::JobUpdate {
            job_id: job.job_id.clone(),
            status: job.status,
        };
        if !self.notifier.push(driver_id, &event).await {
            debug!(driver_id, job_id = %job.job_id, "司机不在线，状态通知未送达");
        }
    }

    fn record_transition(status: JobStatus) {
        metrics::counter!("job_transitions_total", "to" => status.as_str()).increment(1);
    }
}

#[async_trait]
impl JobLifecycleService for JobLifecycleManager {
    #[instrument(skip(self, job), fields(job_id = %job.job_id, order_id = %job.order_id))]
    async fn ensure_job_exists(&self, job: &Job) -> DispatchResult<()> {
        let inserted = self.jobs.insert_if_absent(job).await?;
        if inserted {
            info!("运单已创建");
        } else {
            debug!("运单已存在，保持原有字段");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_driver_jobs(
        &self,
        driver_id: &str,
        status: Option<JobStatus>,
    ) -> DispatchResult<Vec<Job>> {
        match status {
            Some(status) => self.jobs.list_for_driver(driver_id, &[status]).await,
            None => self.jobs.list_for_driver(driver_id, &JobStatus::ACTIVE).await,
        }
    }

    #[instrument(skip(self))]
    async fn respond_to_job(
        &self,
        driver_id: &str,
        job_id: &str,
        accept: bool,
    ) -> DispatchResult<RespondOutcome> {
        let mut job = self
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| DispatchError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

        if job.status != JobStatus::Assigned {
            return Err(DispatchError::JobNotAssignable {
                job_id: job_id.to_string(),
                current: job.status,
            });
        }

        let next = if accept {
            JobStatus::Accepted
        } else {
            JobStatus::Declined
        };
        job.set_status(next);
        job.driver_id = Some(driver_id.to_string());
        self.jobs.save(&job).await?;
        Self::record_transition(next);

        if accept {
            self.store.del(&keys::availability(driver_id)).await?;
            self.store
                .clear_signal(&keys::acceptance(driver_id, &job.order_id))
                .await?;
            self.store.del(&keys::lease(driver_id)).await?;
            info!("司机已接单");
        } else {
            self.store.del(&keys::lease(driver_id)).await?;
            self.store
                .set(&keys::availability(driver_id), keys::AVAILABLE, None)
                .await?;
            info!("司机已拒单");
        }

        self.notify_update(driver_id, &job).await;
        Ok(RespondOutcome { accepted: accept })
    }

    #[instrument(skip(self))]
    async fn update_driver_job_status(
        &self,
        driver_id: &str,
        job_id: &str,
        next: JobStatus,
    ) -> DispatchResult<Job> {
        let mut job = self
            .jobs
            .find_for_driver(job_id, driver_id)
            .await?
            .ok_or_else(|| DispatchError::DriverJobNotFound {
                job_id: job_id.to_string(),
                driver_id: driver_id.to_string(),
            })?;

        if !job.status.can_transition_to(next) {
            warn!(from = %job.status, to = %next, "拒绝无效的状态转换");
            return Err(DispatchError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status,
                to: next,
            });
        }

        job.set_status(next);
        self.jobs.save(&job).await?;
        Self::record_transition(next);

        if next == JobStatus::Delivered {
            self.store
                .set(&keys::availability(driver_id), keys::AVAILABLE, None)
                .await?;
            self.store.del(&keys::assigned_job(driver_id)).await?;
            info!("运单已送达，司机恢复可接单");
        }

        self.notify_update(driver_id, &job).await;
        Ok(job)
    }
}
