use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_core::{models::GeoMember, traits::EphemeralStore, Result};
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;

/// Redis 使用的地球半径（米）
const EARTH_RADIUS_METERS: f64 = 6_372_797.560_856;

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    values: HashMap<String, Entry<String>>,
    hashes: HashMap<String, Entry<HashMap<String, String>>>,
    geo: HashMap<String, HashMap<String, (f64, f64)>>,
}

/// 进程内临时存储
///
/// TTL 基于 `tokio::time::Instant`，可配合暂停时钟测试；
/// 信号等待使用 `Notify` 唤醒而非轮询。
#[derive(Debug, Default, Clone)]
pub struct InMemoryEphemeralStore {
    state: Arc<RwLock<StoreState>>,
    changed: Arc<Notify>,
}

impl InMemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 哈希字段快照，过期返回 `None`
    pub async fn get_fields(&self, key: &str) -> Option<HashMap<String, String>> {
        let state = self.state.read().await;
        state
            .hashes
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    /// 键的剩余 TTL
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let state = self.state.read().await;
        let now = Instant::now();
        state
            .values
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline - now)
    }
}

/// 两点间的大圆距离（米）
pub fn haversine_meters(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
}

#[async_trait]
impl EphemeralStore for InMemoryEphemeralStore {
    async fn geo_add(&self, index: &str, member: &str, lng: f64, lat: f64) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .geo
            .entry(index.to_string())
            .or_default()
            .insert(member.to_string(), (lng, lat));
        Ok(())
    }

    async fn geo_radius(
        &self,
        index: &str,
        lng: f64,
        lat: f64,
        radius_meters: f64,
        limit: usize,
    ) -> Result<Vec<GeoMember>> {
        let state = self.state.read().await;
        let Some(members) = state.geo.get(index) else {
            return Ok(Vec::new());
        };

        let mut found: Vec<GeoMember> = members
            .iter()
            .map(|(member, (m_lng, m_lat))| GeoMember {
                member: member.clone(),
                distance_meters: haversine_meters(lng, lat, *m_lng, *m_lat),
            })
            .filter(|m| m.distance_meters <= radius_meters)
            .collect();

        found.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        found.truncate(limit);
        Ok(found)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.read().await;
        Ok(state
            .values
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .values
            .insert(key.to_string(), Entry::new(value.to_string(), ttl));
        drop(state);
        self.changed.notify_waiters();
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state.write().await;
        let now = Instant::now();
        if state.values.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        state
            .values
            .insert(key.to_string(), Entry::new(value.to_string(), Some(ttl)));
        drop(state);
        self.changed.notify_waiters();
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.values.remove(key);
        state.hashes.remove(key);
        Ok(())
    }

    async fn set_fields(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Instant::now();
        let entry = state
            .hashes
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(HashMap::new(), None));
        if !entry.is_live(now) {
            entry.value.clear();
        }
        for (field, value) in fields {
            entry.value.insert(field.to_string(), value.clone());
        }
        entry.expires_at = ttl.map(|ttl| now + ttl);
        Ok(())
    }

    async fn await_signal(
        &self,
        key: &str,
        timeout: Duration,
        _poll_interval: Duration,
    ) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.get(key).await? {
                return Ok(Some(value));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_distance() {
        // 约 0.001 度纬度 ≈ 111 米
        let d = haversine_meters(-79.38, 43.650, -79.38, 43.651);
        assert!((d - 111.2).abs() < 1.0, "distance was {d}");
        assert_eq!(haversine_meters(1.0, 2.0, 1.0, 2.0), 0.0);
    }

    #[tokio::test]
    async fn test_geo_radius_orders_by_distance() {
        let store = InMemoryEphemeralStore::new();
        store.geo_add("drivers", "far", -79.38, 43.660).await.unwrap();
        store.geo_add("drivers", "near", -79.38, 43.6505).await.unwrap();
        store.geo_add("drivers", "out", -79.00, 43.650).await.unwrap();

        let found = store
            .geo_radius("drivers", -79.38, 43.650, 5000.0, 20)
            .await
            .unwrap();
        let names: Vec<_> = found.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(names, vec!["near", "far"]);

        let limited = store
            .geo_radius("drivers", -79.38, 43.650, 5000.0, 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].member, "near");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_respects_ttl() {
        let store = InMemoryEphemeralStore::new();
        let ttl = Duration::from_secs(30);

        assert!(store.set_if_absent("driver:D1:lock", "O1", ttl).await.unwrap());
        assert!(!store.set_if_absent("driver:D1:lock", "O2", ttl).await.unwrap());
        assert_eq!(
            store.get("driver:D1:lock").await.unwrap().as_deref(),
            Some("O1")
        );

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.get("driver:D1:lock").await.unwrap(), None);
        assert!(store.set_if_absent("driver:D1:lock", "O2", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_signal_wakes_on_publish() {
        let store = InMemoryEphemeralStore::new();
        let publisher = store.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            publisher
                .publish_signal("driver:D1:accept:O1", "accepted", Duration::from_secs(30))
                .await
                .unwrap();
        });

        let started = Instant::now();
        let value = store
            .await_signal(
                "driver:D1:accept:O1",
                Duration::from_secs(20),
                Duration::from_millis(250),
            )
            .await
            .unwrap();

        assert_eq!(value.as_deref(), Some("accepted"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_signal_times_out() {
        let store = InMemoryEphemeralStore::new();
        let started = Instant::now();

        let value = store
            .await_signal("missing", Duration::from_secs(20), Duration::from_millis(250))
            .await
            .unwrap();

        assert_eq!(value, None);
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_fields_expire() {
        let store = InMemoryEphemeralStore::new();
        store
            .set_fields(
                "driver:D1",
                &[("lat", "43.65".to_string()), ("lng", "-79.38".to_string())],
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        let fields = store.get_fields("driver:D1").await.unwrap();
        assert_eq!(fields.get("lat").map(String::as_str), Some("43.65"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.get_fields("driver:D1").await.is_none());
    }
}
