use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 订单导入消费者配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub enabled: bool,
    pub queue_name: String,
    pub max_batch_size: usize,
    pub max_batch_time_ms: u64,
    pub prefetch: u16,
    pub max_flush_retries: u32,
    pub retry_base_delay_ms: u64,
    pub dead_letter_exchange: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_name: "orders_import_queue".to_string(),
            max_batch_size: 500,
            max_batch_time_ms: 2000,
            prefetch: 100,
            max_flush_retries: 3,
            retry_base_delay_ms: 200,
            dead_letter_exchange: "orders_import_dlx".to_string(),
        }
    }
}

impl IngestionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_name.is_empty() {
            return Err(anyhow::anyhow!("导入队列名称不能为空"));
        }

        if self.max_batch_size == 0 {
            return Err(anyhow::anyhow!("批量大小必须大于0"));
        }

        if self.max_batch_time_ms == 0 {
            return Err(anyhow::anyhow!("批量时间窗口必须大于0"));
        }

        if self.prefetch == 0 {
            return Err(anyhow::anyhow!("prefetch必须大于0"));
        }

        if self.dead_letter_exchange.is_empty() {
            return Err(anyhow::anyhow!("死信交换机名称不能为空"));
        }

        Ok(())
    }

    pub fn max_batch_time(&self) -> Duration {
        Duration::from_millis(self.max_batch_time_ms)
    }

    /// 第 `attempt` 次重试前的等待时间（指数退避）
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}
