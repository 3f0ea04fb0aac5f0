use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{DispatchError, Result};

/// 订单来源平台
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Shopify,
    Woocommerce,
}

impl StoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreType::Shopify => "shopify",
            StoreType::Woocommerce => "woocommerce",
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "shopify" => Ok(StoreType::Shopify),
            "woocommerce" => Ok(StoreType::Woocommerce),
            _ => Err(format!("Invalid store type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub price: Decimal,
}

/// 待导入的订单，(orderId, storeType) 唯一
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub order_id: String,
    pub store_type: StoreType,
    pub customer_name: String,
    pub customer_email: String,
    pub total_amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

impl NewOrder {
    pub fn validate(&self) -> Result<()> {
        if self.order_id.trim().is_empty() {
            return Err(DispatchError::InvalidArgument("orderId不能为空".to_string()));
        }
        if self.currency.trim().is_empty() {
            return Err(DispatchError::InvalidArgument("currency不能为空".to_string()));
        }
        if self.total_amount.is_sign_negative() {
            return Err(DispatchError::InvalidArgument(format!(
                "totalAmount不能为负数: {}",
                self.total_amount
            )));
        }
        if let Some(item) = self.items.iter().find(|item| item.sku.trim().is_empty()) {
            return Err(DispatchError::InvalidArgument(format!(
                "订单项缺少sku: {}",
                item.name
            )));
        }
        Ok(())
    }

    pub fn key(&self) -> (&str, StoreType) {
        (&self.order_id, self.store_type)
    }
}

/// 已持久化的订单
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(flatten)]
    pub data: NewOrder,
    pub created_at: DateTime<Utc>,
}

/// 队列中订单导入消息的信封
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderImportEnvelope {
    pub received_at: DateTime<Utc>,
    pub payload: NewOrder,
}

impl OrderImportEnvelope {
    pub fn new(payload: NewOrder) -> Self {
        Self {
            received_at: Utc::now(),
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 解析并校验消息体，失败即视为毒消息
    pub fn parse(data: &[u8]) -> Result<Self> {
        let envelope: OrderImportEnvelope = serde_json::from_slice(data)?;
        envelope.payload.validate()?;
        Ok(envelope)
    }
}
