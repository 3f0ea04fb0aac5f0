use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 派单匹配配置
///
/// 租约 TTL 决定崩溃后司机自动释放的时间窗口，修改时需同步评估竞争窗口。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub enabled: bool,
    pub default_radius_meters: f64,
    pub max_candidates: usize,
    pub lease_ttl_ms: u64,
    pub accept_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub signal_ttl_seconds: u64,
    pub location_ttl_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_radius_meters: 5000.0,
            max_candidates: 20,
            lease_ttl_ms: 30_000,
            accept_timeout_ms: 20_000,
            poll_interval_ms: 250,
            signal_ttl_seconds: 30,
            location_ttl_seconds: 60,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_radius_meters.is_nan() || self.default_radius_meters <= 0.0 {
            return Err(anyhow::anyhow!("默认搜索半径必须大于0"));
        }

        if self.max_candidates == 0 {
            return Err(anyhow::anyhow!("候选司机数量必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.accept_timeout_ms == 0 {
            return Err(anyhow::anyhow!("应答超时时间必须大于0"));
        }

        if self.lease_ttl_ms <= self.accept_timeout_ms {
            return Err(anyhow::anyhow!(
                "租约TTL({}ms)必须大于应答超时时间({}ms)",
                self.lease_ttl_ms,
                self.accept_timeout_ms
            ));
        }

        if self.signal_ttl_seconds == 0 || self.location_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("信号与位置TTL必须大于0"));
        }

        Ok(())
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn signal_ttl(&self) -> Duration {
        Duration::from_secs(self.signal_ttl_seconds)
    }

    pub fn location_ttl(&self) -> Duration {
        Duration::from_secs(self.location_ttl_seconds)
    }
}
