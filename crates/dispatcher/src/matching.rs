use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dispatch_core::{
    config::DispatchConfig,
    models::{
        AcceptanceSignal, AssignmentOutcome, DriverEvent, GeoMember, Job, JobOffer, MatchRequest,
        UnassignedReason,
    },
    traits::{EphemeralStore, NotificationChannel},
    DispatchError, DispatchResult,
};
use tracing::{debug, info, instrument, warn};

use crate::keys;

/// 派单服务接口
#[async_trait]
pub trait AssignmentService: Send + Sync {
    /// 为订单寻找附近可接单的司机并等待其应答
    ///
    /// "无可用司机" 以 `AssignmentOutcome::Unassigned` 返回，不作为错误。
    async fn match_and_assign(&self, request: &MatchRequest) -> DispatchResult<AssignmentOutcome>;
}

/// 单个候选司机的派单结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Accepted,
    Declined,
    Timeout,
    LeaseContended,
    PushFailed,
    Unavailable,
}

impl OfferOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferOutcome::Accepted => "accepted",
            OfferOutcome::Declined => "declined",
            OfferOutcome::Timeout => "timeout",
            OfferOutcome::LeaseContended => "lease_contended",
            OfferOutcome::PushFailed => "push_failed",
            OfferOutcome::Unavailable => "unavailable",
        }
    }
}

/// 派单匹配引擎
///
/// 每个司机一把带 TTL 的租约，保证同一司机同时最多只有一个在途派单；
/// 不同订单之间没有全局锁，可以并发匹配。
pub struct MatchingEngine {
    store: Arc<dyn EphemeralStore>,
    notifier: Arc<dyn NotificationChannel>,
    config: DispatchConfig,
}

impl MatchingEngine {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        notifier: Arc<dyn NotificationChannel>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    async fn find_candidates(&self, request: &MatchRequest) -> DispatchResult<Vec<GeoMember>> {
        let radius = request
            .radius_meters
            .filter(|r| *r > 0.0)
            .unwrap_or(self.config.default_radius_meters);

        self.store
            .geo_radius(
                keys::DRIVER_LOCATIONS,
                request.pickup_lng,
                request.pickup_lat,
                radius,
                self.config.max_candidates,
            )
            .await
    }

    /// 向单个候选司机派单，返回后该司机的租约已释放或已转为正式分配
    #[instrument(skip(self, request, candidate), fields(driver_id = %candidate.member))]
    async fn offer_to(
        &self,
        request: &MatchRequest,
        candidate: &GeoMember,
    ) -> DispatchResult<OfferOutcome> {
        let driver_id = candidate.member.as_str();

        if self.store.get(&keys::availability(driver_id)).await?.is_none() {
            return Ok(OfferOutcome::Unavailable);
        }

        let lease_key = keys::lease(driver_id);
        let acquired = self
            .store
            .set_if_absent(&lease_key, &request.order_id, self.config.lease_ttl())
            .await?;
        if !acquired {
            return Ok(OfferOutcome::LeaseContended);
        }

        let offer = JobOffer {
            job_id: Job::job_id_for(&request.order_id),
            order_id: request.order_id.clone(),
            pickup: request.pickup(),
            distance_meters: candidate.distance_meters,
            assigned_at: Utc::now(),
        };

        if !self
            .notifier
            .push(driver_id, &DriverEvent::JobAssigned(offer))
            .await
        {
            self.store.del(&lease_key).await?;
            return Ok(OfferOutcome::PushFailed);
        }

        let signal_key = keys::acceptance(driver_id, &request.order_id);
        let signal = match self
            .store
            .await_signal(
                &signal_key,
                self.config.accept_timeout(),
                self.config.poll_interval(),
            )
            .await
        {
            Ok(signal) => signal,
            Err(e) => {
                warn!("等待司机应答失败，按超时处理: {}", e);
                None
            }
        };

        match signal.as_deref().map(AcceptanceSignal::parse) {
            Some(Some(AcceptanceSignal::Accepted)) => {
                self.store
                    .set(&keys::assigned_job(driver_id), &request.order_id, None)
                    .await?;
                self.store.del(&keys::availability(driver_id)).await?;
                self.store.del(&lease_key).await?;
                Ok(OfferOutcome::Accepted)
            }
            other => {
                if let Some(None) = other {
                    warn!(signal = ?signal, "无法识别的应答信号，按超时处理");
                }
                self.store.del(&lease_key).await?;
                self.store.clear_signal(&signal_key).await?;
                Ok(match other {
                    Some(Some(AcceptanceSignal::Declined)) => OfferOutcome::Declined,
                    _ => OfferOutcome::Timeout,
                })
            }
        }
    }
}

#[async_trait]
impl AssignmentService for MatchingEngine {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn match_and_assign(&self, request: &MatchRequest) -> DispatchResult<AssignmentOutcome> {
        if request.order_id.trim().is_empty() {
            return Err(DispatchError::InvalidArgument("orderId不能为空".to_string()));
        }
        request.pickup().validate()?;

        let candidates = self.find_candidates(request).await?;
        if candidates.is_empty() {
            info!("半径内没有司机");
            metrics::counter!("dispatch_match_attempts_total", "result" => "no_drivers_in_radius")
                .increment(1);
            return Ok(AssignmentOutcome::unassigned(
                UnassignedReason::NoDriversInRadius,
            ));
        }

        debug!(candidates = candidates.len(), "开始依次派单");

        for candidate in &candidates {
            let outcome = self.offer_to(request, candidate).await?;
            metrics::counter!("dispatch_offers_total", "outcome" => outcome.as_str()).increment(1);
            debug!(
                driver_id = %candidate.member,
                distance_meters = candidate.distance_meters,
                outcome = outcome.as_str(),
                "候选司机处理完成"
            );

            if outcome == OfferOutcome::Accepted {
                info!(driver_id = %candidate.member, "订单已分配");
                metrics::counter!("dispatch_match_attempts_total", "result" => "assigned")
                    .increment(1);
                return Ok(AssignmentOutcome::assigned(candidate.member.clone()));
            }
        }

        info!(candidates = candidates.len(), "没有可认领的司机");
        metrics::counter!("dispatch_match_attempts_total", "result" => "no_claimable_drivers")
            .increment(1);
        Ok(AssignmentOutcome::unassigned(
            UnassignedReason::NoClaimableDrivers,
        ))
    }
}
