//! Test data builders with sensible defaults

use std::str::FromStr;

use dispatch_core::models::{
    GeoPoint, Job, JobStatus, NewOrder, OrderImportEnvelope, OrderItem, StoreType,
};
use rust_decimal::Decimal;

/// Builder for creating test Job entities
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new(order_id: &str) -> Self {
        Self {
            job: Job::new(order_id).with_pickup(GeoPoint::new(43.6510, -79.3470)),
        }
    }

    pub fn with_driver(mut self, driver_id: &str) -> Self {
        self.job.driver_id = Some(driver_id.to_string());
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn with_dropoff(mut self, lat: f64, lng: f64) -> Self {
        self.job.dropoff = Some(GeoPoint::new(lat, lng));
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.job.metadata.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

/// Builder for creating test NewOrder payloads
pub struct OrderBuilder {
    order: NewOrder,
}

impl OrderBuilder {
    pub fn new(order_id: &str) -> Self {
        Self {
            order: NewOrder {
                order_id: order_id.to_string(),
                store_type: StoreType::Shopify,
                customer_name: "Test Customer".to_string(),
                customer_email: "customer@example.com".to_string(),
                total_amount: Decimal::new(2500, 2),
                currency: "CAD".to_string(),
                items: vec![OrderItem {
                    sku: "SKU-1".to_string(),
                    name: "Item".to_string(),
                    quantity: 1,
                    price: Decimal::new(2500, 2),
                }],
            },
        }
    }

    pub fn with_store_type(mut self, store_type: StoreType) -> Self {
        self.order.store_type = store_type;
        self
    }

    pub fn with_total(mut self, total: &str) -> Self {
        self.order.total_amount = Decimal::from_str(total).unwrap_or_default();
        self
    }

    pub fn with_customer(mut self, name: &str, email: &str) -> Self {
        self.order.customer_name = name.to_string();
        self.order.customer_email = email.to_string();
        self
    }

    pub fn build(self) -> NewOrder {
        self.order
    }

    /// 序列化为队列消息体
    pub fn envelope_bytes(self) -> Vec<u8> {
        serde_json::to_vec(&OrderImportEnvelope::new(self.order)).unwrap()
    }
}
