use std::sync::{Arc, Mutex};
use std::time::Duration;

use dispatch_core::{
    config::DispatchConfig,
    models::{AssignmentOutcome, DriverEvent, JobOffer, MatchRequest, UnassignedReason},
    traits::{EphemeralStore, NotificationChannel},
    DispatchError,
};
use dispatch_engine::{keys, AssignmentService, DriverPresenceService, MatchingEngine};
use dispatch_infrastructure::{InMemoryEphemeralStore, NotificationHub};
use tokio::time::Instant;

const PICKUP_LAT: f64 = 43.6500;
const PICKUP_LNG: f64 = -79.3800;

/// 约 1 米对应的纬度差
const DEG_PER_METER: f64 = 1.0 / 111_226.0;

#[derive(Clone, Copy)]
enum Reply {
    Accept,
    Decline,
    Ignore,
}

struct Harness {
    store: Arc<InMemoryEphemeralStore>,
    hub: Arc<NotificationHub>,
    presence: Arc<DriverPresenceService>,
    engine: Arc<MatchingEngine>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryEphemeralStore::new());
        let hub = Arc::new(NotificationHub::new());
        let config = DispatchConfig::default();
        let presence = Arc::new(DriverPresenceService::new(store.clone(), config.clone()));
        let engine = Arc::new(MatchingEngine::new(store.clone(), hub.clone(), config));
        Self {
            store,
            hub,
            presence,
            engine,
        }
    }

    /// 在取货点正北 `meters` 米处放置司机
    async fn place_driver(&self, driver_id: &str, meters: f64, available: bool) {
        self.presence
            .update_location(driver_id, PICKUP_LAT + meters * DEG_PER_METER, PICKUP_LNG)
            .await
            .unwrap();
        self.presence
            .set_availability(driver_id, available)
            .await
            .unwrap();
    }

    /// 连接司机并按 `reply` 在 `delay` 后应答每一个派单
    async fn connect_driver(
        &self,
        driver_id: &str,
        reply: Reply,
        delay: Duration,
    ) -> Arc<Mutex<Vec<JobOffer>>> {
        let offers = Arc::new(Mutex::new(Vec::new()));
        let mut rx = self.hub.register(driver_id).await;
        let presence = self.presence.clone();
        let driver_id = driver_id.to_string();
        let received = offers.clone();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let DriverEvent::JobAssigned(offer) = event else {
                    continue;
                };
                received.lock().unwrap().push(offer.clone());
                tokio::time::sleep(delay).await;
                match reply {
                    Reply::Accept => presence
                        .record_response(&driver_id, &offer.order_id, true)
                        .await
                        .unwrap(),
                    Reply::Decline => presence
                        .record_response(&driver_id, &offer.order_id, false)
                        .await
                        .unwrap(),
                    Reply::Ignore => {}
                }
            }
        });

        offers
    }

    async fn value(&self, key: &str) -> Option<String> {
        self.store.get(key).await.unwrap()
    }
}

fn request(order_id: &str) -> MatchRequest {
    MatchRequest::new(order_id, PICKUP_LAT, PICKUP_LNG)
}

#[tokio::test(start_paused = true)]
async fn test_no_drivers_in_radius() {
    let h = Harness::new();

    let outcome = h.engine.match_and_assign(&request("O1")).await.unwrap();
    assert_eq!(
        outcome,
        AssignmentOutcome::unassigned(UnassignedReason::NoDriversInRadius)
    );
}

#[tokio::test(start_paused = true)]
async fn test_explicit_radius_limits_candidates() {
    let h = Harness::new();
    h.place_driver("D1", 300.0, true).await;
    h.connect_driver("D1", Reply::Accept, Duration::from_secs(1))
        .await;

    let outcome = h
        .engine
        .match_and_assign(&request("O1").with_radius(200.0))
        .await
        .unwrap();
    assert_eq!(outcome.reason(), Some(UnassignedReason::NoDriversInRadius));

    let outcome = h.engine.match_and_assign(&request("O1")).await.unwrap();
    assert_eq!(outcome.driver_id(), Some("D1"));
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_driver_is_never_leased_or_pushed() {
    let h = Harness::new();
    h.place_driver("D1", 100.0, false).await;
    let offers = h
        .connect_driver("D1", Reply::Accept, Duration::from_secs(1))
        .await;

    let outcome = h.engine.match_and_assign(&request("O1")).await.unwrap();

    assert_eq!(
        outcome,
        AssignmentOutcome::unassigned(UnassignedReason::NoClaimableDrivers)
    );
    assert!(offers.lock().unwrap().is_empty());
    assert_eq!(h.value(&keys::lease("D1")).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_nearest_unavailable_driver_is_skipped() {
    let h = Harness::new();
    h.place_driver("D2", 50.0, false).await;
    h.place_driver("D1", 100.0, true).await;
    let d2_offers = h
        .connect_driver("D2", Reply::Accept, Duration::from_secs(1))
        .await;
    let d1_offers = h
        .connect_driver("D1", Reply::Accept, Duration::from_secs(5))
        .await;

    let outcome = h.engine.match_and_assign(&request("O1")).await.unwrap();

    assert_eq!(outcome, AssignmentOutcome::assigned("D1"));
    assert!(d2_offers.lock().unwrap().is_empty());

    let d1_offers = d1_offers.lock().unwrap().clone();
    assert_eq!(d1_offers.len(), 1);
    assert_eq!(d1_offers[0].job_id, "job:O1");
    assert_eq!(d1_offers[0].order_id, "O1");
    assert!((d1_offers[0].distance_meters - 100.0).abs() < 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_acceptance_finalizes_assignment() {
    let h = Harness::new();
    h.place_driver("D1", 100.0, true).await;
    h.connect_driver("D1", Reply::Accept, Duration::from_secs(2))
        .await;

    let outcome = h.engine.match_and_assign(&request("O1")).await.unwrap();

    assert_eq!(outcome.driver_id(), Some("D1"));
    assert_eq!(h.value(&keys::availability("D1")).await, None);
    assert_eq!(h.value(&keys::lease("D1")).await, None);
    assert_eq!(
        h.value(&keys::assigned_job("D1")).await.as_deref(),
        Some("O1")
    );
}

#[tokio::test(start_paused = true)]
async fn test_decline_moves_to_next_candidate() {
    let h = Harness::new();
    h.place_driver("D1", 100.0, true).await;
    h.place_driver("D2", 300.0, true).await;
    let d1_offers = h
        .connect_driver("D1", Reply::Decline, Duration::from_secs(1))
        .await;
    h.connect_driver("D2", Reply::Accept, Duration::from_secs(1))
        .await;

    let outcome = h.engine.match_and_assign(&request("O1")).await.unwrap();

    assert_eq!(outcome, AssignmentOutcome::assigned("D2"));
    assert_eq!(d1_offers.lock().unwrap().len(), 1);
    assert_eq!(h.value(&keys::lease("D1")).await, None);
    assert_eq!(h.value(&keys::acceptance("D1", "O1")).await, None);
    // 拒单后的可接单状态由运单生命周期负责恢复
    assert_eq!(h.value(&keys::availability("D1")).await.as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn test_silent_driver_times_out_and_releases_lease() {
    let h = Harness::new();
    h.place_driver("D1", 100.0, true).await;
    let offers = h
        .connect_driver("D1", Reply::Ignore, Duration::ZERO)
        .await;

    let started = Instant::now();
    let outcome = h.engine.match_and_assign(&request("O1")).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(
        outcome,
        AssignmentOutcome::unassigned(UnassignedReason::NoClaimableDrivers)
    );
    assert_eq!(offers.lock().unwrap().len(), 1);
    assert!(elapsed >= Duration::from_secs(20), "waited {elapsed:?}");
    assert!(elapsed < Duration::from_secs(21), "waited {elapsed:?}");
    assert_eq!(h.value(&keys::lease("D1")).await, None);
    assert_eq!(h.value(&keys::availability("D1")).await.as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn test_push_failure_releases_lease() {
    let h = Harness::new();
    h.place_driver("D1", 100.0, true).await;

    let started = Instant::now();
    let outcome = h.engine.match_and_assign(&request("O1")).await.unwrap();

    assert_eq!(outcome.reason(), Some(UnassignedReason::NoClaimableDrivers));
    assert_eq!(h.value(&keys::lease("D1")).await, None);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_leased_driver_is_skipped() {
    let h = Harness::new();
    h.place_driver("D1", 100.0, true).await;
    let offers = h
        .connect_driver("D1", Reply::Accept, Duration::from_secs(1))
        .await;
    h.store
        .set_if_absent(&keys::lease("D1"), "O-other", Duration::from_secs(30))
        .await
        .unwrap();

    let outcome = h.engine.match_and_assign(&request("O1")).await.unwrap();

    assert_eq!(outcome.reason(), Some(UnassignedReason::NoClaimableDrivers));
    assert!(offers.lock().unwrap().is_empty());
    assert_eq!(
        h.value(&keys::lease("D1")).await.as_deref(),
        Some("O-other")
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_matches_race_for_single_driver() {
    let h = Harness::new();
    h.place_driver("D1", 100.0, true).await;
    let offers = h
        .connect_driver("D1", Reply::Accept, Duration::from_secs(1))
        .await;

    let first_engine = h.engine.clone();
    let second_engine = h.engine.clone();
    let first = tokio::spawn(async move { first_engine.match_and_assign(&request("O1")).await });
    let second = tokio::spawn(async move { second_engine.match_and_assign(&request("O2")).await });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    let winners: Vec<_> = [&first, &second]
        .into_iter()
        .filter(|outcome| outcome.driver_id() == Some("D1"))
        .collect();
    assert_eq!(winners.len(), 1);

    let loser = if first.driver_id().is_some() {
        &second
    } else {
        &first
    };
    assert_eq!(loser.reason(), Some(UnassignedReason::NoClaimableDrivers));
    assert_eq!(offers.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_pickup_is_rejected() {
    let h = Harness::new();

    let result = h
        .engine
        .match_and_assign(&MatchRequest::new("O1", 123.0, PICKUP_LNG))
        .await;
    assert!(matches!(result, Err(DispatchError::InvalidArgument(_))));
}
