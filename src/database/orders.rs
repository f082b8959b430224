use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Connection, FromRow, PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    local_day_bounds, local_today, Order, OrderItem, OrderItemDetail, OrderStatus, OrderType,
};

use super::{to_i64, to_u64, DatabaseConnection};

#[derive(Debug, FromRow)]
struct OrderRow {
    id: i64,
    order_number: String,
    order_type: String,
    status: String,
    created_by: Option<i64>,
    customer_id: Option<i64>,
    address_id: Option<i64>,
    document_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    in_kitchen_at: Option<DateTime<Utc>>,
    packing_at: Option<DateTime<Utc>>,
    handed_at: Option<DateTime<Utc>>,
    in_transit_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = ServiceError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let order_type = OrderType::from_code(&row.order_type).ok_or_else(|| {
            ServiceError::InternalServerError(format!("Unknown order type '{}'", row.order_type))
        })?;
        let status = OrderStatus::from_code(&row.status).ok_or_else(|| {
            ServiceError::InternalServerError(format!("Unknown order status '{}'", row.status))
        })?;

        Ok(Self {
            id: to_u64(row.id),
            order_number: row.order_number,
            order_type,
            status,
            created_by: row.created_by.map(to_u64),
            customer_id: row.customer_id.map(to_u64),
            address_id: row.address_id.map(to_u64),
            document_id: row.document_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            in_kitchen_at: row.in_kitchen_at,
            packing_at: row.packing_at,
            handed_at: row.handed_at,
            in_transit_at: row.in_transit_at,
            delivered_at: row.delivered_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

fn into_orders(rows: Vec<OrderRow>) -> ServiceResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

#[derive(Debug, FromRow)]
struct OrderItemRow {
    id: i64,
    order_id: i64,
    dish_id: i64,
    category_id: i64,
    price: Decimal,
    quantity: i32,
    observation: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            id: to_u64(row.id),
            order_id: to_u64(row.order_id),
            dish_id: to_u64(row.dish_id),
            category_id: to_u64(row.category_id),
            price: row.price,
            quantity: row.quantity.max(0) as u32,
            observation: row.observation,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct OrderItemDetailRow {
    #[sqlx(flatten)]
    item: OrderItemRow,
    dish_name: String,
    category_name: String,
}

const ORDER_COLUMNS: &str = "id, order_number, order_type, status, created_by, customer_id, address_id, document_id, created_at, updated_at, in_kitchen_at, packing_at, handed_at, in_transit_at, delivered_at, cancelled_at";
const ORDER_ITEM_COLUMNS: &str =
    "id, order_id, dish_id, category_id, price, quantity, observation, created_at, updated_at";

/// Filters of the billing view. Bounds are inclusive start and exclusive end instants.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BillingFilter {
    pub status: Option<OrderStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_until: Option<DateTime<Utc>>,
}

async fn insert_order_item(
    connection: &mut PgConnection,
    item: &OrderItem,
) -> ServiceResult<OrderItem> {
    let row = sqlx::query_as::<_, OrderItemRow>(&format!(
        r#"
            INSERT INTO order_item (order_id, dish_id, category_id, price, quantity, observation)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ORDER_ITEM_COLUMNS}
        "#
    ))
    .bind(to_i64(item.order_id))
    .bind(to_i64(item.dish_id))
    .bind(to_i64(item.category_id))
    .bind(item.price)
    .bind(item.quantity as i32)
    .bind(&item.observation)
    .fetch_one(&mut *connection)
    .await?;

    Ok(row.into())
}

impl DatabaseConnection {
    /// One page of orders, newest first, together with the total number of orders.
    pub async fn get_orders_page(
        &mut self,
        limit: u64,
        offset: u64,
    ) -> ServiceResult<(u64, Vec<Order>)> {
        self.get_orders_for_billing(&BillingFilter::default(), limit, offset)
            .await
    }

    pub async fn get_order_by_id(&mut self, id: u64) -> ServiceResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(to_i64(id))
        .fetch_optional(&mut *self.connection)
        .await?;

        row.map(Order::try_from).transpose()
    }

    pub async fn get_orders_by_status(
        &mut self,
        status: OrderStatus,
        created_from: DateTime<Utc>,
        created_until: DateTime<Utc>,
    ) -> ServiceResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
                SELECT {ORDER_COLUMNS} FROM orders
                WHERE status = $1 AND created_at >= $2 AND created_at < $3
                ORDER BY created_at
            "#
        ))
        .bind(status.code())
        .bind(created_from)
        .bind(created_until)
        .fetch_all(&mut *self.connection)
        .await?;

        into_orders(rows)
    }

    pub async fn get_orders_in_kitchen(&mut self) -> ServiceResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 ORDER BY in_kitchen_at NULLS LAST, created_at"
        ))
        .bind(OrderStatus::InKitchen.code())
        .fetch_all(&mut *self.connection)
        .await?;

        into_orders(rows)
    }

    pub async fn get_orders_for_billing(
        &mut self,
        filter: &BillingFilter,
        limit: u64,
        offset: u64,
    ) -> ServiceResult<(u64, Vec<Order>)> {
        fn push_filter(builder: &mut QueryBuilder<Postgres>, filter: &BillingFilter) {
            builder.push(" WHERE TRUE");
            if let Some(status) = filter.status {
                builder.push(" AND status = ").push_bind(status.code());
            }
            if let Some(from) = filter.created_from {
                builder.push(" AND created_at >= ").push_bind(from);
            }
            if let Some(until) = filter.created_until {
                builder.push(" AND created_at < ").push_bind(until);
            }
        }

        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders");
        push_filter(&mut count_query, filter);
        let count: i64 = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self.connection)
            .await?;

        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {ORDER_COLUMNS} FROM orders"));
        push_filter(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(to_i64(limit))
            .push(" OFFSET ")
            .push_bind(to_i64(offset));
        let rows = query
            .build_query_as::<OrderRow>()
            .fetch_all(&mut *self.connection)
            .await?;

        Ok((count.max(0) as u64, into_orders(rows)?))
    }

    /// Inserts a new order and assigns the next number of the current day.
    pub async fn create_order(&mut self, order: Order) -> ServiceResult<Order> {
        let (order, _) = self.create_order_with_items(order, Vec::new()).await?;
        Ok(order)
    }

    /// Inserts an order with the next number of the day together with its items.
    /// Nothing is stored if one of the inserts fails.
    pub async fn create_order_with_items(
        &mut self,
        order: Order,
        items: Vec<OrderItem>,
    ) -> ServiceResult<(Order, Vec<OrderItem>)> {
        let today = local_today();
        let (day_start, day_end) = local_day_bounds(today);

        let mut tx = self.connection.begin().await?;

        // serializes number assignment between concurrent requests
        sqlx::query("LOCK TABLE orders IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE created_at >= $1 AND created_at < $2",
        )
        .bind(day_start)
        .bind(day_end)
        .fetch_one(&mut *tx)
        .await?;
        let order_number = Order::format_order_number(today, count.max(0) as u64 + 1);

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
                INSERT INTO orders (
                    order_number, order_type, status, created_by, customer_id, address_id, document_id,
                    in_kitchen_at, packing_at, handed_at, in_transit_at, delivered_at, cancelled_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_number)
        .bind(order.order_type.code())
        .bind(order.status.code())
        .bind(order.created_by.map(to_i64))
        .bind(order.customer_id.map(to_i64))
        .bind(order.address_id.map(to_i64))
        .bind(order.document_id)
        .bind(order.in_kitchen_at)
        .bind(order.packing_at)
        .bind(order.handed_at)
        .bind(order.in_transit_at)
        .bind(order.delivered_at)
        .bind(order.cancelled_at)
        .fetch_one(&mut *tx)
        .await?;
        let order = Order::try_from(row)?;

        let mut stored = Vec::with_capacity(items.len());
        for mut item in items {
            item.order_id = order.id;
            stored.push(insert_order_item(&mut *tx, &item).await?);
        }

        tx.commit().await?;
        Ok((order, stored))
    }

    pub async fn store_order(&mut self, order: Order) -> ServiceResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
                UPDATE orders SET
                    order_type = $2, status = $3, customer_id = $4, address_id = $5, document_id = $6,
                    in_kitchen_at = $7, packing_at = $8, handed_at = $9, in_transit_at = $10,
                    delivered_at = $11, cancelled_at = $12, updated_at = now()
                WHERE id = $1
                RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(to_i64(order.id))
        .bind(order.order_type.code())
        .bind(order.status.code())
        .bind(order.customer_id.map(to_i64))
        .bind(order.address_id.map(to_i64))
        .bind(order.document_id)
        .bind(order.in_kitchen_at)
        .bind(order.packing_at)
        .bind(order.handed_at)
        .bind(order.in_transit_at)
        .bind(order.delivered_at)
        .bind(order.cancelled_at)
        .fetch_one(&mut *self.connection)
        .await?;

        row.try_into()
    }

    /// Links an order to its electronic document. Returns `false` if the order does not exist.
    pub async fn set_order_document(&mut self, order_id: u64, document_id: Uuid) -> ServiceResult<bool> {
        let result =
            sqlx::query("UPDATE orders SET document_id = $2, updated_at = now() WHERE id = $1")
                .bind(to_i64(order_id))
                .bind(document_id)
                .execute(&mut *self.connection)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_order_by_document(&mut self, document_id: Uuid) -> ServiceResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE document_id = $1 ORDER BY id LIMIT 1"
        ))
        .bind(document_id)
        .fetch_optional(&mut *self.connection)
        .await?;

        row.map(Order::try_from).transpose()
    }

    pub async fn delete_order(&mut self, id: u64) -> ServiceResult<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(to_i64(id))
            .execute(&mut *self.connection)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_all_order_items(&mut self) -> ServiceResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_item ORDER BY id"
        ))
        .fetch_all(&mut *self.connection)
        .await?;

        Ok(rows.into_iter().map(OrderItem::from).collect())
    }

    pub async fn get_order_item_by_id(&mut self, id: u64) -> ServiceResult<Option<OrderItem>> {
        let row = sqlx::query_as::<_, OrderItemRow>(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_item WHERE id = $1"
        ))
        .bind(to_i64(id))
        .fetch_optional(&mut *self.connection)
        .await?;

        Ok(row.map(OrderItem::from))
    }

    pub async fn get_order_items_by_order(&mut self, order_id: u64) -> ServiceResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_item WHERE order_id = $1 ORDER BY id"
        ))
        .bind(to_i64(order_id))
        .fetch_all(&mut *self.connection)
        .await?;

        Ok(rows.into_iter().map(OrderItem::from).collect())
    }

    /// Items of all given orders with dish and category names, in order of insertion.
    pub async fn get_order_item_details(
        &mut self,
        order_ids: &[u64],
    ) -> ServiceResult<Vec<OrderItemDetail>> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = order_ids.iter().copied().map(to_i64).collect();

        let rows = sqlx::query_as::<_, OrderItemDetailRow>(
            r#"
                SELECT i.id, i.order_id, i.dish_id, i.category_id, i.price, i.quantity, i.observation,
                    i.created_at, i.updated_at, d.name AS dish_name, c.name AS category_name
                FROM order_item i
                JOIN dish d ON d.id = i.dish_id
                JOIN category c ON c.id = i.category_id
                WHERE i.order_id = ANY($1)
                ORDER BY i.order_id, i.id
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *self.connection)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| OrderItemDetail {
                item: row.item.into(),
                dish_name: row.dish_name,
                category_name: row.category_name,
            })
            .collect())
    }

    pub async fn store_order_item(&mut self, item: OrderItem) -> ServiceResult<OrderItem> {
        if item.id == 0 {
            return insert_order_item(&mut *self.connection, &item).await;
        }

        let row = sqlx::query_as::<_, OrderItemRow>(&format!(
            r#"
                UPDATE order_item SET order_id = $2, dish_id = $3, category_id = $4, price = $5,
                    quantity = $6, observation = $7, updated_at = now()
                WHERE id = $1
                RETURNING {ORDER_ITEM_COLUMNS}
            "#
        ))
        .bind(to_i64(item.id))
        .bind(to_i64(item.order_id))
        .bind(to_i64(item.dish_id))
        .bind(to_i64(item.category_id))
        .bind(item.price)
        .bind(item.quantity as i32)
        .bind(&item.observation)
        .fetch_one(&mut *self.connection)
        .await?;

        Ok(row.into())
    }

    pub async fn delete_order_item(&mut self, id: u64) -> ServiceResult<bool> {
        let result = sqlx::query("DELETE FROM order_item WHERE id = $1")
            .bind(to_i64(id))
            .execute(&mut *self.connection)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
