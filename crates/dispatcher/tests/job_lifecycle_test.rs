use std::sync::Arc;

use async_trait::async_trait;
use dispatch_core::{
    models::{DriverEvent, JobStatus},
    traits::{EphemeralStore, JobRepository, NotificationChannel},
    DispatchError,
};
use dispatch_engine::{keys, JobLifecycleManager, JobLifecycleService, RespondOutcome};
use dispatch_infrastructure::InMemoryEphemeralStore;
use dispatch_testing_utils::{
    builders::JobBuilder,
    mocks::{MockJobRepository, RecordingNotificationChannel},
};
use mockall::mock;
use serde_json::json;
use tokio::sync::mpsc;

struct Fixture {
    jobs: MockJobRepository,
    store: Arc<InMemoryEphemeralStore>,
    notifier: RecordingNotificationChannel,
    manager: JobLifecycleManager,
}

fn fixture(jobs: MockJobRepository) -> Fixture {
    let store = Arc::new(InMemoryEphemeralStore::new());
    let notifier = RecordingNotificationChannel::new();
    notifier.connect("D1");
    let manager = JobLifecycleManager::new(
        Arc::new(jobs.clone()),
        store.clone(),
        Arc::new(notifier.clone()),
    );
    Fixture {
        jobs,
        store,
        notifier,
        manager,
    }
}

impl Fixture {
    async fn value(&self, key: &str) -> Option<String> {
        self.store.get(key).await.unwrap()
    }
}

#[tokio::test]
async fn test_respond_to_missing_job_fails_not_found() {
    let f = fixture(MockJobRepository::new());

    let err = f
        .manager
        .respond_to_job("D1", "job:missing", true)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(matches!(err, DispatchError::JobNotFound { .. }));
}

#[tokio::test]
async fn test_respond_to_non_assigned_job_fails() {
    let job = JobBuilder::new("O1")
        .with_driver("D1")
        .with_status(JobStatus::Accepted)
        .build();
    let f = fixture(MockJobRepository::with_jobs(vec![job]));

    let err = f
        .manager
        .respond_to_job("D1", "job:O1", false)
        .await
        .unwrap_err();

    assert!(err.is_invalid_state());
    assert_eq!(f.jobs.get("job:O1").unwrap().status, JobStatus::Accepted);
    assert!(f.notifier.pushed().is_empty());
}

#[tokio::test]
async fn test_accept_clears_availability_and_lease() {
    let f = fixture(MockJobRepository::with_jobs(vec![JobBuilder::new("O1").build()]));
    f.store
        .set(&keys::availability("D1"), keys::AVAILABLE, None)
        .await
        .unwrap();
    f.store
        .set(&keys::lease("D1"), "O1", Some(std::time::Duration::from_secs(30)))
        .await
        .unwrap();
    f.store
        .set(&keys::acceptance("D1", "O1"), "accepted", None)
        .await
        .unwrap();

    let outcome = f.manager.respond_to_job("D1", "job:O1", true).await.unwrap();

    assert_eq!(outcome, RespondOutcome { accepted: true });
    let job = f.jobs.get("job:O1").unwrap();
    assert_eq!(job.status, JobStatus::Accepted);
    assert_eq!(job.driver_id.as_deref(), Some("D1"));
    assert_eq!(f.value(&keys::availability("D1")).await, None);
    assert_eq!(f.value(&keys::lease("D1")).await, None);
    assert_eq!(f.value(&keys::acceptance("D1", "O1")).await, None);

    let pushed = f.notifier.pushed_to("D1");
    assert_eq!(
        pushed,
        vec![DriverEvent::JobUpdate {
            job_id: "job:O1".to_string(),
            status: JobStatus::Accepted,
        }]
    );
}

#[tokio::test]
async fn test_decline_restores_availability() {
    let f = fixture(MockJobRepository::with_jobs(vec![JobBuilder::new("O1").build()]));
    f.store
        .set(&keys::lease("D1"), "O1", None)
        .await
        .unwrap();

    let outcome = f
        .manager
        .respond_to_job("D1", "job:O1", false)
        .await
        .unwrap();

    assert!(!outcome.accepted);
    let job = f.jobs.get("job:O1").unwrap();
    assert_eq!(job.status, JobStatus::Declined);
    assert_eq!(job.driver_id.as_deref(), Some("D1"));
    assert_eq!(
        f.value(&keys::availability("D1")).await.as_deref(),
        Some(keys::AVAILABLE)
    );
    assert_eq!(f.value(&keys::lease("D1")).await, None);
}

#[tokio::test]
async fn test_declined_job_cannot_be_answered_again() {
    let f = fixture(MockJobRepository::with_jobs(vec![JobBuilder::new("O1").build()]));

    f.manager
        .respond_to_job("D1", "job:O1", false)
        .await
        .unwrap();
    let err = f
        .manager
        .respond_to_job("D1", "job:O1", true)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DispatchError::JobNotAssignable {
            current: JobStatus::Declined,
            ..
        }
    ));
}

#[tokio::test]
async fn test_update_status_requires_driver_match() {
    let job = JobBuilder::new("O1")
        .with_driver("D1")
        .with_status(JobStatus::Accepted)
        .build();
    let f = fixture(MockJobRepository::with_jobs(vec![job]));

    let err = f
        .manager
        .update_driver_job_status("D2", "job:O1", JobStatus::PickedUp)
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::DriverJobNotFound { .. }));
    assert_eq!(f.jobs.get("job:O1").unwrap().status, JobStatus::Accepted);
}

#[tokio::test]
async fn test_update_status_follows_transition_graph() {
    use JobStatus::*;

    let all = [Assigned, Accepted, PickedUp, Delivered, Declined, Canceled];
    let allowed = [
        (Assigned, Accepted),
        (Assigned, Declined),
        (Assigned, Canceled),
        (Accepted, PickedUp),
        (Accepted, Canceled),
        (PickedUp, Delivered),
        (PickedUp, Canceled),
    ];

    for from in all {
        for to in all {
            let job = JobBuilder::new("O1")
                .with_driver("D1")
                .with_status(from)
                .build();
            let f = fixture(MockJobRepository::with_jobs(vec![job]));

            let result = f
                .manager
                .update_driver_job_status("D1", "job:O1", to)
                .await;

            if allowed.contains(&(from, to)) {
                let job = result.unwrap();
                assert_eq!(job.status, to, "{from} -> {to}");
                assert_eq!(f.jobs.get("job:O1").unwrap().status, to);
            } else {
                let err = result.unwrap_err();
                assert!(err.is_invalid_state(), "{from} -> {to} should be rejected");
                assert_eq!(f.jobs.get("job:O1").unwrap().status, from);
            }
        }
    }
}

#[tokio::test]
async fn test_delivery_restores_availability_and_clears_marker() {
    let job = JobBuilder::new("O1")
        .with_driver("D1")
        .with_status(JobStatus::PickedUp)
        .build();
    let f = fixture(MockJobRepository::with_jobs(vec![job]));
    f.store
        .set(&keys::assigned_job("D1"), "O1", None)
        .await
        .unwrap();

    let job = f
        .manager
        .update_driver_job_status("D1", "job:O1", JobStatus::Delivered)
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Delivered);
    assert_eq!(
        f.value(&keys::availability("D1")).await.as_deref(),
        Some(keys::AVAILABLE)
    );
    assert_eq!(f.value(&keys::assigned_job("D1")).await, None);
    assert_eq!(f.notifier.pushed_to("D1").len(), 1);
}

#[tokio::test]
async fn test_pickup_does_not_touch_availability() {
    let job = JobBuilder::new("O1")
        .with_driver("D1")
        .with_status(JobStatus::Accepted)
        .build();
    let f = fixture(MockJobRepository::with_jobs(vec![job]));
    f.store
        .set(&keys::assigned_job("D1"), "O1", None)
        .await
        .unwrap();

    f.manager
        .update_driver_job_status("D1", "job:O1", JobStatus::PickedUp)
        .await
        .unwrap();

    assert_eq!(f.value(&keys::availability("D1")).await, None);
    assert_eq!(
        f.value(&keys::assigned_job("D1")).await.as_deref(),
        Some("O1")
    );
}

#[tokio::test]
async fn test_ensure_job_exists_keeps_first_fields() {
    let f = fixture(MockJobRepository::new());

    let first = JobBuilder::new("O1")
        .with_metadata("priority", json!("high"))
        .build();
    let second = JobBuilder::new("O1")
        .with_driver("D9")
        .with_dropoff(43.7, -79.4)
        .with_metadata("priority", json!("low"))
        .build();

    f.manager.ensure_job_exists(&first).await.unwrap();
    f.manager.ensure_job_exists(&second).await.unwrap();

    assert_eq!(f.jobs.count(), 1);
    let stored = f.jobs.get("job:O1").unwrap();
    assert_eq!(stored.driver_id, None);
    assert_eq!(stored.dropoff, None);
    assert_eq!(stored.metadata.get("priority"), Some(&json!("high")));
}

#[tokio::test]
async fn test_get_driver_jobs_defaults_to_active_set() {
    let jobs = vec![
        JobBuilder::new("O1").with_driver("D1").build(),
        JobBuilder::new("O2")
            .with_driver("D1")
            .with_status(JobStatus::Accepted)
            .build(),
        JobBuilder::new("O3")
            .with_driver("D1")
            .with_status(JobStatus::PickedUp)
            .build(),
        JobBuilder::new("O4")
            .with_driver("D1")
            .with_status(JobStatus::Delivered)
            .build(),
        JobBuilder::new("O5")
            .with_driver("D1")
            .with_status(JobStatus::Canceled)
            .build(),
        JobBuilder::new("O6")
            .with_driver("D2")
            .with_status(JobStatus::Accepted)
            .build(),
    ];
    let f = fixture(MockJobRepository::with_jobs(jobs));

    let mut active: Vec<_> = f
        .manager
        .get_driver_jobs("D1", None)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.order_id)
        .collect();
    active.sort();
    assert_eq!(active, vec!["O1", "O2", "O3"]);

    let delivered = f
        .manager
        .get_driver_jobs("D1", Some(JobStatus::Delivered))
        .await
        .unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].order_id, "O4");
}

mock! {
    pub Notifier {}

    #[async_trait]
    impl NotificationChannel for Notifier {
        async fn register(&self, driver_id: &str) -> mpsc::Receiver<DriverEvent>;
        async fn unregister(&self, driver_id: &str);
        async fn push(&self, driver_id: &str, event: &DriverEvent) -> bool;
        async fn is_connected(&self, driver_id: &str) -> bool;
    }
}

#[tokio::test]
async fn test_offline_driver_does_not_block_transition() {
    let mut notifier = MockNotifier::new();
    notifier
        .expect_push()
        .withf(|driver_id, event| {
            driver_id == "D1"
                && matches!(
                    *event,
                    DriverEvent::JobUpdate {
                        status: JobStatus::Accepted,
                        ..
                    }
                )
        })
        .times(1)
        .returning(|_, _| false);

    let jobs = MockJobRepository::with_jobs(vec![JobBuilder::new("O1").build()]);
    let manager = JobLifecycleManager::new(
        Arc::new(jobs.clone()),
        Arc::new(InMemoryEphemeralStore::new()),
        Arc::new(notifier),
    );

    let outcome = manager.respond_to_job("D1", "job:O1", true).await.unwrap();

    assert!(outcome.accepted);
    let stored = jobs.find_by_id("job:O1").await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Accepted);
}
