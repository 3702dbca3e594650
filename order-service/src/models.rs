use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{Order, VariantStock};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::orders)]
pub struct DbOrder {
    pub id: Uuid,
    pub variant_id: String,
    pub quantity: i64,
    pub total: bigdecimal::BigDecimal,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stock)]
pub struct DbStock {
    pub variant_id: String,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for DbOrder {
    fn from(order: Order) -> Self {
        Self {
            id: order.order_id,
            variant_id: order.variant_id,
            quantity: order.quantity,
            total: order.total,
            user_id: order.user_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

impl From<DbOrder> for Order {
    fn from(row: DbOrder) -> Self {
        Self {
            order_id: row.id,
            variant_id: row.variant_id,
            quantity: row.quantity,
            total: row.total,
            user_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<DbStock> for VariantStock {
    fn from(row: DbStock) -> Self {
        Self {
            variant_id: row.variant_id,
            quantity: row.quantity,
            updated_at: row.updated_at,
        }
    }
}
