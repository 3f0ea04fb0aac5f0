use std::sync::Arc;

use chrono::Utc;
use dispatch_core::{
    config::DispatchConfig,
    models::{AcceptanceSignal, GeoPoint},
    traits::EphemeralStore,
    DispatchError, DispatchResult,
};
use tracing::{debug, instrument};

use crate::keys;

/// 司机位置、在线状态与应答信号
pub struct DriverPresenceService {
    store: Arc<dyn EphemeralStore>,
    config: DispatchConfig,
}

impl DriverPresenceService {
    pub fn new(store: Arc<dyn EphemeralStore>, config: DispatchConfig) -> Self {
        Self { store, config }
    }

    /// 刷新司机位置，资料哈希在 `location_ttl` 后过期
    #[instrument(skip(self))]
    pub async fn update_location(&self, driver_id: &str, lat: f64, lng: f64) -> DispatchResult<()> {
        Self::require_driver(driver_id)?;
        GeoPoint::new(lat, lng).validate()?;

        self.store
            .geo_add(keys::DRIVER_LOCATIONS, driver_id, lng, lat)
            .await?;
        self.store
            .set_fields(
                &keys::profile(driver_id),
                &[("lat", lat.to_string()), ("lng", lng.to_string())],
                Some(self.config.location_ttl()),
            )
            .await?;

        debug!("司机位置已更新");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_availability(&self, driver_id: &str, available: bool) -> DispatchResult<()> {
        Self::require_driver(driver_id)?;

        let key = keys::availability(driver_id);
        if available {
            self.store.set(&key, keys::AVAILABLE, None).await?;
        } else {
            self.store.del(&key).await?;
        }

        self.store
            .set_fields(
                &keys::profile(driver_id),
                &[("availableAt", Utc::now().timestamp_millis().to_string())],
                Some(self.config.location_ttl()),
            )
            .await?;
        Ok(())
    }

    /// 写入司机对派单的应答，供匹配引擎的等待读取
    #[instrument(skip(self))]
    pub async fn record_response(
        &self,
        driver_id: &str,
        order_id: &str,
        accept: bool,
    ) -> DispatchResult<()> {
        Self::require_driver(driver_id)?;
        if order_id.trim().is_empty() {
            return Err(DispatchError::InvalidArgument("orderId不能为空".to_string()));
        }

        let signal = AcceptanceSignal::from_accept(accept);
        self.store
            .publish_signal(
                &keys::acceptance(driver_id, order_id),
                signal.as_str(),
                self.config.signal_ttl(),
            )
            .await
    }

    fn require_driver(driver_id: &str) -> DispatchResult<()> {
        if driver_id.trim().is_empty() {
            return Err(DispatchError::InvalidArgument("driverId不能为空".to_string()));
        }
        Ok(())
    }
}
