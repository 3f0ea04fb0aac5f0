use std::time::Duration;

use async_trait::async_trait;
use dispatch_core::{
    config::RedisConfig, models::GeoMember, traits::EphemeralStore, DispatchError, Result,
};
use redis::{aio::ConnectionManager, Client, RedisError};
use tracing::{debug, info, warn};

/// 信号旁路列表的后缀，`BLPOP` 在其上阻塞等待
const SIGNAL_NOTIFY_SUFFIX: &str = ":notify";

fn store_error(context: &str) -> impl Fn(RedisError) -> DispatchError + '_ {
    move |e| DispatchError::EphemeralStore(format!("{context}: {e}"))
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// 基于 Redis 的临时存储
///
/// 普通命令走共享的 `ConnectionManager`；阻塞等待信号时单独建立连接，
/// 避免 `BLPOP` 阻塞共享连接上的其他命令。
#[derive(Clone)]
pub struct RedisEphemeralStore {
    client: Client,
    manager: ConnectionManager,
}

impl RedisEphemeralStore {
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(store_error("Failed to create Redis client"))?;

        let manager = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| DispatchError::EphemeralStore("Redis connection timed out".to_string()))?
        .map_err(store_error("Failed to connect to Redis"))?;

        let store = Self { client, manager };
        store.ping().await?;
        info!("Connected to Redis");
        Ok(store)
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_error("Redis PING failed"))?;
        if response != "PONG" {
            return Err(DispatchError::EphemeralStore(format!(
                "Unexpected PING response: {response}"
            )));
        }
        Ok(())
    }

    /// 阻塞等待信号旁路列表，连接失败时返回 `Err` 由调用方降级为轮询
    async fn block_on_notify(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error("Failed to open blocking connection"))?;

        let notify_key = format!("{key}{SIGNAL_NOTIFY_SUFFIX}");
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&notify_key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await
            .map_err(store_error("BLPOP failed"))?;

        Ok(popped.map(|(_, value)| value))
    }
}

#[async_trait]
impl EphemeralStore for RedisEphemeralStore {
    async fn geo_add(&self, index: &str, member: &str, lng: f64, lat: f64) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("GEOADD")
            .arg(index)
            .arg(lng)
            .arg(lat)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error("GEOADD failed"))
    }

    async fn geo_radius(
        &self,
        index: &str,
        lng: f64,
        lat: f64,
        radius_meters: f64,
        limit: usize,
    ) -> Result<Vec<GeoMember>> {
        let mut conn = self.manager.clone();
        let members: Vec<(String, f64)> = redis::cmd("GEOSEARCH")
            .arg(index)
            .arg("FROMLONLAT")
            .arg(lng)
            .arg(lat)
            .arg("BYRADIUS")
            .arg(radius_meters)
            .arg("m")
            .arg("ASC")
            .arg("COUNT")
            .arg(limit)
            .arg("WITHDIST")
            .query_async(&mut conn)
            .await
            .map_err(store_error("GEOSEARCH failed"))?;

        Ok(members
            .into_iter()
            .map(|(member, distance_meters)| GeoMember {
                member,
                distance_meters,
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_error("GET failed"))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(store_error("SET failed"))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_error("SET NX failed"))?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error("DEL failed"))
    }

    async fn set_fields(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Option<Duration>,
    ) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("HSET").arg(key);
        for (field, value) in fields {
            pipe.arg(*field).arg(value);
        }
        pipe.ignore();
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(store_error("HSET failed"))
    }

    async fn publish_signal(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let notify_key = format!("{key}{SIGNAL_NOTIFY_SUFFIX}");
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .ignore()
            .cmd("DEL")
            .arg(&notify_key)
            .ignore()
            .cmd("RPUSH")
            .arg(&notify_key)
            .arg(value)
            .ignore()
            .cmd("PEXPIRE")
            .arg(&notify_key)
            .arg(ttl_millis(ttl))
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error("Failed to publish signal"))
    }

    async fn await_signal(
        &self,
        key: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;

        if let Some(value) = self.get(key).await? {
            return Ok(Some(value));
        }

        match self.block_on_notify(key, timeout).await {
            Ok(Some(value)) => return Ok(Some(value)),
            // 旁路列表可能在 GET 之后、BLPOP 之前被替换，以主键为准
            Ok(None) => return self.get(key).await,
            Err(e) => warn!(key, "Blocking wait unavailable, polling instead: {}", e),
        }

        loop {
            if let Some(value) = self.get(key).await? {
                return Ok(Some(value));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                debug!(key, "Signal wait timed out");
                return Ok(None);
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    async fn clear_signal(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .arg(format!("{key}{SIGNAL_NOTIFY_SUFFIX}"))
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error("Failed to clear signal"))
    }
}
