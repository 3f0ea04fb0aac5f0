use std::collections::HashSet;

use async_trait::async_trait;
use dispatch_core::{
    models::{NewOrder, Order, OrderItem, StoreType},
    traits::{BulkInsertSummary, OrderRepository},
    DispatchError, Result,
};
use sqlx::{types::Json, PgPool, Row};
use tracing::{debug, instrument, warn};

use super::is_connectivity_error;

pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order> {
        let store_type: String = row.try_get("store_type")?;
        let store_type = store_type
            .parse::<StoreType>()
            .map_err(DispatchError::Internal)?;
        let items: Json<Vec<OrderItem>> = row.try_get("items")?;

        Ok(Order {
            data: NewOrder {
                order_id: row.try_get("order_id")?,
                store_type,
                customer_name: row.try_get("customer_name")?,
                customer_email: row.try_get("customer_email")?,
                total_amount: row.try_get("total_amount")?,
                currency: row.try_get("currency")?,
                items: items.0,
            },
            created_at: row.try_get("created_at")?,
        })
    }

    async fn insert_one(&self, order: &NewOrder) -> std::result::Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (order_id, store_type, customer_name, customer_email, total_amount, currency, items)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (order_id, store_type) DO NOTHING
            "#,
        )
        .bind(&order.order_id)
        .bind(order.store_type.as_str())
        .bind(&order.customer_name)
        .bind(&order.customer_email)
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(Json(&order.items))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 单条语句写入整批，返回实际插入的 (order_id, store_type)
    async fn insert_batch(
        &self,
        orders: &[NewOrder],
    ) -> std::result::Result<HashSet<(String, String)>, sqlx::Error> {
        let order_ids: Vec<&str> = orders.iter().map(|o| o.order_id.as_str()).collect();
        let store_types: Vec<&str> = orders.iter().map(|o| o.store_type.as_str()).collect();
        let names: Vec<&str> = orders.iter().map(|o| o.customer_name.as_str()).collect();
        let emails: Vec<&str> = orders.iter().map(|o| o.customer_email.as_str()).collect();
        let totals: Vec<_> = orders.iter().map(|o| o.total_amount).collect();
        let currencies: Vec<&str> = orders.iter().map(|o| o.currency.as_str()).collect();
        let items: Vec<_> = orders.iter().map(|o| Json(&o.items)).collect();

        let rows = sqlx::query(
            r#"
            INSERT INTO orders (order_id, store_type, customer_name, customer_email, total_amount, currency, items)
            SELECT * FROM UNNEST($1::varchar[], $2::varchar[], $3::varchar[], $4::varchar[], $5::numeric[], $6::varchar[], $7::jsonb[])
            ON CONFLICT (order_id, store_type) DO NOTHING
            RETURNING order_id, store_type
            "#,
        )
        .bind(&order_ids)
        .bind(&store_types)
        .bind(&names)
        .bind(&emails)
        .bind(&totals)
        .bind(&currencies)
        .bind(&items)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> std::result::Result<(String, String), sqlx::Error> {
                Ok((row.try_get("order_id")?, row.try_get("store_type")?))
            })
            .collect()
    }

    /// 整批语句失败时逐条写入，只让出错的记录失败
    async fn insert_each(&self, orders: &[NewOrder]) -> Result<BulkInsertSummary> {
        let mut summary = BulkInsertSummary::default();

        for (index, order) in orders.iter().enumerate() {
            match self.insert_one(order).await {
                Ok(true) => summary.inserted.push(index),
                Ok(false) => summary.duplicates.push(index),
                Err(e) if is_connectivity_error(&e) => return Err(e.into()),
                Err(e) => {
                    warn!(order_id = %order.order_id, "订单写入失败: {}", e);
                    summary.failed.push((index, e.to_string()));
                }
            }
        }
        Ok(summary)
    }
}

/// 按批内顺序归类，同一批中重复的键只有第一条算作插入
fn classify(orders: &[NewOrder], mut inserted: HashSet<(String, String)>) -> BulkInsertSummary {
    let mut summary = BulkInsertSummary::default();
    for (index, order) in orders.iter().enumerate() {
        let key = (order.order_id.clone(), order.store_type.as_str().to_string());
        if inserted.remove(&key) {
            summary.inserted.push(index);
        } else {
            summary.duplicates.push(index);
        }
    }
    summary
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    #[instrument(skip(self))]
    async fn find(&self, order_id: &str, store_type: StoreType) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, store_type, customer_name, customer_email, total_amount, currency, items, created_at
            FROM orders WHERE order_id = $1 AND store_type = $2
            "#,
        )
        .bind(order_id)
        .bind(store_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    #[instrument(skip(self, order), fields(order_id = %order.order_id, store_type = %order.store_type))]
    async fn insert_if_absent(&self, order: &NewOrder) -> Result<bool> {
        Ok(self.insert_one(order).await?)
    }

    #[instrument(skip(self, orders), fields(batch_size = orders.len()))]
    async fn bulk_insert_if_absent(&self, orders: &[NewOrder]) -> Result<BulkInsertSummary> {
        if orders.is_empty() {
            return Ok(BulkInsertSummary::default());
        }

        let summary = match self.insert_batch(orders).await {
            Ok(inserted) => classify(orders, inserted),
            Err(e) if is_connectivity_error(&e) => return Err(e.into()),
            Err(e) => {
                warn!("批量写入失败，改为逐条写入: {}", e);
                self.insert_each(orders).await?
            }
        };

        debug!(
            inserted = summary.inserted.len(),
            duplicates = summary.duplicates.len(),
            failed = summary.failed.len(),
            "bulk insert finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn order(order_id: &str, store_type: StoreType) -> NewOrder {
        NewOrder {
            order_id: order_id.to_string(),
            store_type,
            customer_name: "Ada".to_string(),
            customer_email: "ada@example.com".to_string(),
            total_amount: Decimal::new(1999, 2),
            currency: "CAD".to_string(),
            items: Vec::new(),
        }
    }

    #[test]
    fn test_classify_first_occurrence_wins() {
        let orders = vec![
            order("O1", StoreType::Shopify),
            order("O1", StoreType::Shopify),
            order("O1", StoreType::Woocommerce),
            order("O2", StoreType::Shopify),
        ];
        let inserted = HashSet::from([
            ("O1".to_string(), "shopify".to_string()),
            ("O1".to_string(), "woocommerce".to_string()),
        ]);

        let summary = classify(&orders, inserted);

        assert_eq!(summary.inserted, vec![0, 2]);
        assert_eq!(summary.duplicates, vec![1, 3]);
        assert!(summary.failed.is_empty());
    }
}
