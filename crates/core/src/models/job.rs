use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// 运单状态
///
/// 状态机：ASSIGNED → {ACCEPTED, DECLINED, CANCELED}；ACCEPTED → {PICKED_UP, CANCELED}；
/// PICKED_UP → {DELIVERED, CANCELED}；DELIVERED/DECLINED/CANCELED 为终态。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "ACCEPTED")]
    Accepted,
    #[serde(rename = "PICKED_UP")]
    PickedUp,
    #[serde(rename = "DELIVERED")]
    Delivered,
    #[serde(rename = "DECLINED")]
    Declined,
    #[serde(rename = "CANCELED")]
    Canceled,
}

impl JobStatus {
    /// 未指定状态过滤时的默认集合
    pub const ACTIVE: [JobStatus; 3] = [JobStatus::Assigned, JobStatus::Accepted, JobStatus::PickedUp];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Assigned => "ASSIGNED",
            JobStatus::Accepted => "ACCEPTED",
            JobStatus::PickedUp => "PICKED_UP",
            JobStatus::Delivered => "DELIVERED",
            JobStatus::Declined => "DECLINED",
            JobStatus::Canceled => "CANCELED",
        }
    }

    pub fn allowed_transitions(&self) -> &'static [JobStatus] {
        use JobStatus::*;

        match self {
            Assigned => &[Accepted, Declined, Canceled],
            Accepted => &[PickedUp, Canceled],
            PickedUp => &[Delivered, Canceled],
            Delivered | Declined | Canceled => &[],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ASSIGNED" => Ok(JobStatus::Assigned),
            "ACCEPTED" => Ok(JobStatus::Accepted),
            "PICKED_UP" => Ok(JobStatus::PickedUp),
            "DELIVERED" => Ok(JobStatus::Delivered),
            "DECLINED" => Ok(JobStatus::Declined),
            "CANCELED" => Ok(JobStatus::Canceled),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for JobStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for JobStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse::<JobStatus>().map_err(Into::into)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for JobStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 配送运单
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub order_id: String,
    pub driver_id: Option<String>,
    pub status: JobStatus,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// 新建一个处于 ASSIGNED 状态的运单，jobId 由 orderId 推导
    pub fn new(order_id: impl Into<String>) -> Self {
        let order_id = order_id.into();
        let now = Utc::now();
        Self {
            job_id: Self::job_id_for(&order_id),
            order_id,
            driver_id: None,
            status: JobStatus::Assigned,
            pickup: None,
            dropoff: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn job_id_for(order_id: &str) -> String {
        format!("job:{order_id}")
    }

    pub fn with_driver(mut self, driver_id: impl Into<String>) -> Self {
        self.driver_id = Some(driver_id.into());
        self
    }

    pub fn with_pickup(mut self, pickup: GeoPoint) -> Self {
        self.pickup = Some(pickup);
        self
    }

    pub fn with_dropoff(mut self, dropoff: GeoPoint) -> Self {
        self.dropoff = Some(dropoff);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_active(&self) -> bool {
        JobStatus::ACTIVE.contains(&self.status)
    }

    /// 仅修改内存中的状态，合法性由调用方检查
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_graph() {
        use JobStatus::*;

        assert!(Assigned.can_transition_to(Accepted));
        assert!(Assigned.can_transition_to(Declined));
        assert!(Assigned.can_transition_to(Canceled));
        assert!(!Assigned.can_transition_to(PickedUp));
        assert!(!Assigned.can_transition_to(Delivered));

        assert!(Accepted.can_transition_to(PickedUp));
        assert!(Accepted.can_transition_to(Canceled));
        assert!(!Accepted.can_transition_to(Delivered));
        assert!(!Accepted.can_transition_to(Assigned));

        assert!(PickedUp.can_transition_to(Delivered));
        assert!(PickedUp.can_transition_to(Canceled));
        assert!(!PickedUp.can_transition_to(Accepted));

        for terminal in [Delivered, Declined, Canceled] {
            assert!(terminal.is_terminal());
            for next in [Assigned, Accepted, PickedUp, Delivered, Declined, Canceled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&JobStatus::PickedUp).unwrap(),
            "\"PICKED_UP\""
        );
        assert_eq!("CANCELED".parse::<JobStatus>().unwrap(), JobStatus::Canceled);
        assert!("picked-up".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_id_is_derived_from_order() {
        let job = Job::new("ORDER123").with_driver("D1");
        assert_eq!(job.job_id, "job:ORDER123");
        assert_eq!(job.status, JobStatus::Assigned);
        assert_eq!(job.driver_id.as_deref(), Some("D1"));
        assert!(job.is_active());
    }
}
