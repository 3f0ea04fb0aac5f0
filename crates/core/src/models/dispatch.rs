use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobStatus;
use crate::errors::{DispatchError, Result};

/// 经纬度坐标
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            address: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.lat) || !self.lat.is_finite() {
            return Err(DispatchError::InvalidArgument(format!(
                "纬度超出范围: {}",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lng) || !self.lng.is_finite() {
            return Err(DispatchError::InvalidArgument(format!(
                "经度超出范围: {}",
                self.lng
            )));
        }
        Ok(())
    }
}

/// 半径查询返回的候选成员
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMember {
    pub member: String,
    pub distance_meters: f64,
}

/// 调度请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    pub order_id: String,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    #[serde(default)]
    pub radius_meters: Option<f64>,
}

impl MatchRequest {
    pub fn new(order_id: impl Into<String>, pickup_lat: f64, pickup_lng: f64) -> Self {
        Self {
            order_id: order_id.into(),
            pickup_lat,
            pickup_lng,
            radius_meters: None,
        }
    }

    pub fn with_radius(mut self, radius_meters: f64) -> Self {
        self.radius_meters = Some(radius_meters);
        self
    }

    pub fn pickup(&self) -> GeoPoint {
        GeoPoint::new(self.pickup_lat, self.pickup_lng)
    }
}

/// 未能分配司机的原因
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnassignedReason {
    #[serde(rename = "no-drivers-in-radius")]
    NoDriversInRadius,
    #[serde(rename = "no-claimable-drivers")]
    NoClaimableDrivers,
}

impl UnassignedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnassignedReason::NoDriversInRadius => "no-drivers-in-radius",
            UnassignedReason::NoClaimableDrivers => "no-claimable-drivers",
        }
    }
}

/// 调度结果，序列化为 `{assigned, driverId}` 或 `{assigned, reason}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AssignmentOutcome {
    #[serde(rename_all = "camelCase")]
    Assigned { assigned: bool, driver_id: String },
    Unassigned {
        assigned: bool,
        reason: UnassignedReason,
    },
}

impl AssignmentOutcome {
    pub fn assigned(driver_id: impl Into<String>) -> Self {
        AssignmentOutcome::Assigned {
            assigned: true,
            driver_id: driver_id.into(),
        }
    }

    pub fn unassigned(reason: UnassignedReason) -> Self {
        AssignmentOutcome::Unassigned {
            assigned: false,
            reason,
        }
    }

    pub fn driver_id(&self) -> Option<&str> {
        match self {
            AssignmentOutcome::Assigned { driver_id, .. } => Some(driver_id),
            AssignmentOutcome::Unassigned { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<UnassignedReason> {
        match self {
            AssignmentOutcome::Assigned { .. } => None,
            AssignmentOutcome::Unassigned { reason, .. } => Some(*reason),
        }
    }
}

/// 推送给司机的派单
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobOffer {
    pub job_id: String,
    pub order_id: String,
    pub pickup: GeoPoint,
    pub distance_meters: f64,
    pub assigned_at: DateTime<Utc>,
}

/// 司机的应答信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptanceSignal {
    Accepted,
    Declined,
}

impl AcceptanceSignal {
    pub fn from_accept(accept: bool) -> Self {
        if accept {
            AcceptanceSignal::Accepted
        } else {
            AcceptanceSignal::Declined
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptanceSignal::Accepted => "accepted",
            AcceptanceSignal::Declined => "declined",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "accepted" => Some(AcceptanceSignal::Accepted),
            "declined" => Some(AcceptanceSignal::Declined),
            _ => None,
        }
    }
}

/// 推送到司机连接上的事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverEvent {
    JobAssigned(JobOffer),
    #[serde(rename_all = "camelCase")]
    JobUpdate { job_id: String, status: JobStatus },
}
