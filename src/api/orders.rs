use std::collections::HashMap;

use aide::axum::routing::get_with;
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Path, Query};
use axum::Json;
use chrono::{DateTime, Utc};
use log::info;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::{AppState, BillingFilter, DatabaseConnection};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{self, OrderAction, OrderStatus, OrderType, OrderUpdate};
use crate::request_state::RequestState;

use super::addresses::AddressDto;
use super::customers::CustomerDto;
use super::order_items::{
    default_quantity, prepare_item, OrderItemDetailDto, OrderItemDto,
};
use super::pagination::{Paginated, Pagination};
use super::utils::{parse_date, required_param, Created, NoContent, Payload, Validator};

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route(
            "/orders",
            get_with(list_orders, list_orders_docs).post_with(create_order, create_order_docs),
        )
        .api_route(
            "/orders/in_kitchen",
            get_with(list_orders_in_kitchen, list_orders_in_kitchen_docs),
        )
        .api_route(
            "/orders/by_status",
            get_with(list_orders_by_status, list_orders_by_status_docs),
        )
        .api_route(
            "/orders/for-billing",
            get_with(list_orders_for_billing, list_orders_for_billing_docs),
        )
        .api_route(
            "/orders/:id",
            get_with(get_order, get_order_docs)
                .put_with(update_order, update_order_docs)
                .patch_with(patch_order, patch_order_docs)
                .delete_with(delete_order, delete_order_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct OrderDto {
    pub id: u64,
    pub order_number: String,
    pub order_type: String,
    pub status: String,
    pub status_display: String,
    pub created_by: Option<u64>,
    pub customer: Option<u64>,
    pub address: Option<u64>,
    pub document: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub in_kitchen_at: Option<DateTime<Utc>>,
    pub packing_at: Option<DateTime<Utc>>,
    pub handed_at: Option<DateTime<Utc>>,
    pub in_transit_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Seconds spent in the current stage so far.
    pub current_stage_duration: Option<i64>,
}

impl From<&models::Order> for OrderDto {
    fn from(value: &models::Order) -> Self {
        Self {
            id: value.id,
            order_number: value.order_number.to_owned(),
            order_type: value.order_type.code().to_owned(),
            status: value.status.code().to_owned(),
            status_display: value.status.display_name().to_owned(),
            created_by: value.created_by,
            customer: value.customer_id,
            address: value.address_id,
            document: value.document_id,
            created_at: value.created_at,
            updated_at: value.updated_at,
            in_kitchen_at: value.in_kitchen_at,
            packing_at: value.packing_at,
            handed_at: value.handed_at,
            in_transit_at: value.in_transit_at,
            delivered_at: value.delivered_at,
            cancelled_at: value.cancelled_at,
            current_stage_duration: value
                .current_stage_duration(Utc::now())
                .map(|duration| duration.num_seconds()),
        }
    }
}

/// Order created together with its items.
#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct CreatedOrderDto {
    #[serde(flatten)]
    pub order: OrderDto,
    pub items: Vec<OrderItemDto>,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct OrderDocumentDto {
    pub id: Uuid,
    pub document_type: String,
    pub serie: String,
    pub numero: String,
    pub full_number: String,
    pub status: String,
    pub sunat_status: String,
    pub amount: Option<Decimal>,
}

impl From<&models::Document> for OrderDocumentDto {
    fn from(value: &models::Document) -> Self {
        Self {
            id: value.id,
            document_type: value.document_type.to_owned(),
            serie: value.serie.to_owned(),
            numero: value.numero.to_owned(),
            full_number: value.full_number(),
            status: value.status.code().to_owned(),
            sunat_status: value.sunat_status.to_owned(),
            amount: value.amount.map(models::money),
        }
    }
}

/// Order with its items, customer, address and document resolved.
#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct OrderDetailDto {
    pub id: u64,
    pub order_number: String,
    pub order_type: String,
    pub status: String,
    pub status_display: String,
    pub created_by: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_stage_duration: Option<i64>,
    pub customer: Option<CustomerDto>,
    pub address: Option<AddressDto>,
    pub document: Option<OrderDocumentDto>,
    pub items: Vec<OrderItemDetailDto>,
    pub total: Decimal,
}

fn default_order_type() -> String {
    OrderType::ToGo.code().to_owned()
}

fn default_status() -> String {
    OrderStatus::InProgress.code().to_owned()
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct NestedOrderItemDto {
    pub dish: u64,
    pub price: Option<Decimal>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub observation: String,
    pub category: Option<u64>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct SaveOrderDto {
    #[serde(default = "default_order_type")]
    pub order_type: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub customer: Option<u64>,
    pub address: Option<u64>,
    /// Only read when the order is created.
    #[serde(default)]
    pub items: Vec<NestedOrderItemDto>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct PatchOrderDto {
    pub order_type: Option<String>,
    pub status: Option<String>,
    pub customer: Option<u64>,
    pub address: Option<u64>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct OrdersByStatusQuery {
    pub status: Option<String>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct OrdersForBillingQuery {
    pub status: Option<String>,
    pub date: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn invalid_choice(value: &str) -> String {
    format!("\"{value}\" is not a valid choice.")
}

/// Parses the enum fields of a form into `order`, moving it into the requested status.
/// Applies type and status of a form. Stage timestamps are only recorded when
/// `track_stages` is set, new orders start in their stage without one.
fn apply_form(
    order: &mut models::Order,
    order_type: &str,
    status: &str,
    track_stages: bool,
    validator: &mut Validator,
) {
    match OrderType::from_code(order_type) {
        Some(order_type) => order.order_type = order_type,
        None => validator.error("order_type", invalid_choice(order_type)),
    }
    match OrderStatus::from_code(status) {
        Some(status) if !track_stages => order.status = status,
        Some(status) => order.apply_status(status, Utc::now()),
        None => validator.error("status", invalid_choice(status)),
    }
}

async fn validate_relations(
    db: &mut DatabaseConnection,
    order: &models::Order,
    validator: &mut Validator,
) -> ServiceResult<()> {
    if let Some(customer_id) = order.customer_id {
        if db.get_customer_by_id(customer_id).await?.is_none() {
            validator.error(
                "customer",
                format!("Invalid pk \"{customer_id}\" - object does not exist."),
            );
        }
    }
    if let Some(address_id) = order.address_id {
        if db.get_address_by_id(address_id).await?.is_none() {
            validator.error(
                "address",
                format!("Invalid pk \"{address_id}\" - object does not exist."),
            );
        }
    }
    Ok(())
}

/// Stores a changed order, books its income when it was just handed or delivered
/// and tells the websocket subscribers.
async fn save_order(
    state: &mut RequestState,
    order: models::Order,
    previous_status: OrderStatus,
) -> ServiceResult<models::Order> {
    let user_id = state.session_require()?.user.id;
    let order = state.db.store_order(order).await?;

    if order.status != previous_status && order.status.books_income() {
        let items = state.db.get_order_items_by_order(order.id).await?;
        let total = models::order_total(&items);
        let booked = state
            .db
            .book_order_income(&order, total, Some(user_id), models::local_today())
            .await?;
        if let Some(transaction) = booked {
            info!(
                "Booked {} as income of order {}",
                transaction.amount, order.order_number
            );
        }
    }

    state.app_state.publish_order_update(OrderUpdate {
        order_id: order.id,
        status: order.status,
        action: OrderAction::Updated,
    });
    Ok(order)
}

/// Resolves items, customers, addresses and documents of `orders` for the detail views.
async fn order_details(
    db: &mut DatabaseConnection,
    orders: &[models::Order],
) -> ServiceResult<Vec<OrderDetailDto>> {
    let ids: Vec<u64> = orders.iter().map(|o| o.id).collect();
    let mut items: HashMap<u64, Vec<models::OrderItemDetail>> = HashMap::new();
    for item in db.get_order_item_details(&ids).await? {
        items.entry(item.item.order_id).or_default().push(item);
    }

    let mut customers: HashMap<u64, Option<models::Customer>> = HashMap::new();
    let mut addresses: HashMap<u64, Option<models::Address>> = HashMap::new();
    let mut details = Vec::with_capacity(orders.len());

    for order in orders {
        let customer = match order.customer_id {
            Some(id) => {
                if !customers.contains_key(&id) {
                    let customer = db.get_customer_by_id(id).await?;
                    customers.insert(id, customer);
                }
                customers.get(&id).and_then(|c| c.as_ref()).map(CustomerDto::from)
            }
            None => None,
        };
        let address = match order.address_id {
            Some(id) => {
                if !addresses.contains_key(&id) {
                    let address = db.get_address_by_id(id).await?;
                    addresses.insert(id, address);
                }
                addresses.get(&id).and_then(|a| a.as_ref()).map(AddressDto::from)
            }
            None => None,
        };
        let document = match order.document_id {
            Some(id) => db
                .get_document_by_id(id)
                .await?
                .as_ref()
                .map(OrderDocumentDto::from),
            None => None,
        };

        let order_items = items.remove(&order.id).unwrap_or_default();
        let total = models::order_total(
            &order_items
                .iter()
                .map(|i| i.item.clone())
                .collect::<Vec<_>>(),
        );
        let summary = OrderDto::from(order);

        details.push(OrderDetailDto {
            id: summary.id,
            order_number: summary.order_number,
            order_type: summary.order_type,
            status: summary.status,
            status_display: summary.status_display,
            created_by: summary.created_by,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
            current_stage_duration: summary.current_stage_duration,
            customer,
            address,
            document,
            items: order_items.iter().map(OrderItemDetailDto::from).collect(),
            total,
        });
    }

    Ok(details)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Translates the billing query into creation time bounds. A single `date` and a
/// `start_date`..`end_date` range both narrow the result.
fn billing_filter(query: &OrdersForBillingQuery) -> ServiceResult<BillingFilter> {
    let mut filter = BillingFilter::default();

    if let Some(status) = non_empty(&query.status) {
        let Some(status) = OrderStatus::from_code(status) else {
            let options: Vec<&str> = OrderStatus::ALL.iter().map(|s| s.code()).collect();
            return Err(ServiceError::BadRequest(format!(
                "Invalid status. Valid options: {}",
                options.join(", ")
            )));
        };
        filter.status = Some(status);
    }

    let mut narrow = |from: DateTime<Utc>, until: DateTime<Utc>| {
        filter.created_from = Some(filter.created_from.map_or(from, |f| f.max(from)));
        filter.created_until = Some(filter.created_until.map_or(until, |u| u.min(until)));
    };

    if let Some(date) = non_empty(&query.date) {
        let (from, until) = models::local_day_bounds(parse_date(date)?);
        narrow(from, until);
    }

    match (non_empty(&query.start_date), non_empty(&query.end_date)) {
        (Some(start), Some(end)) => {
            let start = parse_date(start)?;
            let end = parse_date(end)?;
            if start > end {
                return Err(ServiceError::BadRequest(
                    "start_date must be before or equal to end_date".to_owned(),
                ));
            }
            narrow(
                models::local_day_bounds(start).0,
                models::local_day_bounds(end).1,
            );
        }
        (None, None) => {}
        _ => {
            return Err(ServiceError::BadRequest(
                "Both start_date and end_date are required for date range filter".to_owned(),
            ))
        }
    }

    Ok(filter)
}

async fn list_orders(
    mut state: RequestState,
    pagination: Pagination,
) -> ServiceResult<Json<Paginated<OrderDto>>> {
    state.session_require()?;

    let (count, orders) = state
        .db
        .get_orders_page(pagination.limit(), pagination.offset())
        .await?;
    let results = orders.iter().map(OrderDto::from).collect();
    Ok(Json(pagination.page(count, results)?))
}

fn list_orders_docs(op: TransformOperation) -> TransformOperation {
    op.description("List orders, newest first.")
        .tag("orders")
        .response::<200, Json<Paginated<OrderDto>>>()
        .response_with::<404, (), _>(|res| res.description("Invalid page!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn create_order(
    mut state: RequestState,
    form: Payload<SaveOrderDto>,
) -> ServiceResult<Created<CreatedOrderDto>> {
    let user_id = state.session_require()?.user.id;

    let form = form.0;
    let now = Utc::now();
    let mut order = models::Order {
        id: 0,
        order_number: String::new(),
        order_type: OrderType::ToGo,
        status: OrderStatus::InProgress,
        created_by: Some(user_id),
        customer_id: form.customer,
        address_id: form.address,
        document_id: None,
        created_at: now,
        updated_at: now,
        in_kitchen_at: None,
        packing_at: None,
        handed_at: None,
        in_transit_at: None,
        delivered_at: None,
        cancelled_at: None,
    };

    let mut validator = Validator::default();
    apply_form(&mut order, &form.order_type, &form.status, false, &mut validator);
    validate_relations(&mut state.db, &order, &mut validator).await?;

    let mut items = Vec::with_capacity(form.items.len());
    for (index, nested) in form.items.into_iter().enumerate() {
        let mut item = models::OrderItem {
            id: 0,
            order_id: 0,
            dish_id: nested.dish,
            category_id: 0,
            price: Decimal::ZERO,
            quantity: nested.quantity,
            observation: nested.observation,
            created_at: now,
            updated_at: now,
        };
        prepare_item(
            &mut state.db,
            &mut item,
            nested.price,
            nested.category,
            &mut validator,
            &format!("items[{index}]."),
        )
        .await?;
        items.push(item);
    }
    validator.finish()?;

    let (order, stored_items) = state.db.create_order_with_items(order, items).await?;
    info!("Created order {}", order.order_number);

    state.app_state.publish_order_update(OrderUpdate {
        order_id: order.id,
        status: order.status,
        action: OrderAction::Added,
    });

    Ok(Created(CreatedOrderDto {
        order: OrderDto::from(&order),
        items: stored_items.iter().map(OrderItemDto::from).collect(),
    }))
}

fn create_order_docs(op: TransformOperation) -> TransformOperation {
    op.description("Create a new order with the next number of the day, optionally with its items.")
        .tag("orders")
        .response::<201, Json<CreatedOrderDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn get_order(mut state: RequestState, Path(id): Path<u64>) -> ServiceResult<Json<OrderDto>> {
    state.session_require()?;

    let order = state.db.get_order_by_id(id).await?;

    if let Some(order) = order {
        return Ok(Json(OrderDto::from(&order)));
    }

    Err(ServiceError::NotFound)
}

fn get_order_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get an order by id.")
        .tag("orders")
        .response::<200, Json<OrderDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested order does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn update_order(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<SaveOrderDto>,
) -> ServiceResult<Json<OrderDto>> {
    state.session_require()?;

    let form = form.0;
    let order = state.db.get_order_by_id(id).await?;

    if let Some(mut order) = order {
        let previous_status = order.status;
        order.customer_id = form.customer;
        order.address_id = form.address;

        let mut validator = Validator::default();
        apply_form(&mut order, &form.order_type, &form.status, true, &mut validator);
        validate_relations(&mut state.db, &order, &mut validator).await?;
        validator.finish()?;

        let order = save_order(&mut state, order, previous_status).await?;
        return Ok(Json(OrderDto::from(&order)));
    }

    Err(ServiceError::NotFound)
}

fn update_order_docs(op: TransformOperation) -> TransformOperation {
    op.description("Replace the given order. Moving it to handed or delivered books its total as income.")
        .tag("orders")
        .response::<200, Json<OrderDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested order does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn patch_order(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<PatchOrderDto>,
) -> ServiceResult<Json<OrderDto>> {
    state.session_require()?;

    let form = form.0;
    let order = state.db.get_order_by_id(id).await?;

    if let Some(mut order) = order {
        let previous_status = order.status;
        if let Some(customer) = form.customer {
            order.customer_id = Some(customer);
        }
        if let Some(address) = form.address {
            order.address_id = Some(address);
        }

        let order_type = form
            .order_type
            .unwrap_or_else(|| order.order_type.code().to_owned());
        let status = form
            .status
            .unwrap_or_else(|| order.status.code().to_owned());

        let mut validator = Validator::default();
        apply_form(&mut order, &order_type, &status, true, &mut validator);
        validate_relations(&mut state.db, &order, &mut validator).await?;
        validator.finish()?;

        let order = save_order(&mut state, order, previous_status).await?;
        return Ok(Json(OrderDto::from(&order)));
    }

    Err(ServiceError::NotFound)
}

fn patch_order_docs(op: TransformOperation) -> TransformOperation {
    op.description("Update some fields of the given order. Moving it to handed or delivered books its total as income.")
        .tag("orders")
        .response::<200, Json<OrderDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested order does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn delete_order(mut state: RequestState, Path(id): Path<u64>) -> ServiceResult<NoContent> {
    state.session_require()?;

    let order = state.db.get_order_by_id(id).await?;

    if let Some(order) = order {
        if state.db.delete_order(order.id).await? {
            state.app_state.publish_order_update(OrderUpdate {
                order_id: order.id,
                status: order.status,
                action: OrderAction::Removed,
            });
            return Ok(NoContent);
        }
    }

    Err(ServiceError::NotFound)
}

fn delete_order_docs(op: TransformOperation) -> TransformOperation {
    op.description("Delete the given order and its items.")
        .tag("orders")
        .response::<204, ()>()
        .response_with::<404, (), _>(|res| res.description("The requested order does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn list_orders_in_kitchen(
    mut state: RequestState,
) -> ServiceResult<Json<Vec<OrderDetailDto>>> {
    state.session_require()?;

    let orders = state.db.get_orders_in_kitchen().await?;
    Ok(Json(order_details(&mut state.db, &orders).await?))
}

fn list_orders_in_kitchen_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all orders currently in the kitchen with their items.")
        .tag("orders")
        .response::<200, Json<Vec<OrderDetailDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn list_orders_by_status(
    mut state: RequestState,
    Query(query): Query<OrdersByStatusQuery>,
) -> ServiceResult<Json<Vec<OrderDetailDto>>> {
    state.session_require()?;

    let status = required_param(&query.status, "status")?;
    let Some(status) = OrderStatus::from_code(status) else {
        return Ok(Json(Vec::new()));
    };

    let (from, until) = models::local_day_bounds(models::local_today());
    let orders = state.db.get_orders_by_status(status, from, until).await?;
    Ok(Json(order_details(&mut state.db, &orders).await?))
}

fn list_orders_by_status_docs(op: TransformOperation) -> TransformOperation {
    op.description("List today's orders in the given status with customer, address and items.")
        .tag("orders")
        .response::<200, Json<Vec<OrderDetailDto>>>()
        .response_with::<400, (), _>(|res| res.description("Missing status parameter!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn list_orders_for_billing(
    mut state: RequestState,
    pagination: Pagination,
    Query(query): Query<OrdersForBillingQuery>,
) -> ServiceResult<Json<Paginated<OrderDetailDto>>> {
    state.session_require()?;

    let filter = billing_filter(&query)?;
    let (count, orders) = state
        .db
        .get_orders_for_billing(&filter, pagination.limit(), pagination.offset())
        .await?;
    let results = order_details(&mut state.db, &orders).await?;
    Ok(Json(pagination.page(count, results)?))
}

fn list_orders_for_billing_docs(op: TransformOperation) -> TransformOperation {
    op.description("List orders for billing, newest first, filtered by status, date or date range.")
        .tag("orders")
        .response::<200, Json<Paginated<OrderDetailDto>>>()
        .response_with::<400, (), _>(|res| res.description("Invalid filter!"))
        .response_with::<404, (), _>(|res| res.description("Invalid page!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(
        status: Option<&str>,
        date: Option<&str>,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> OrdersForBillingQuery {
        OrdersForBillingQuery {
            status: status.map(str::to_owned),
            date: date.map(str::to_owned),
            start_date: start_date.map(str::to_owned),
            end_date: end_date.map(str::to_owned),
        }
    }

    fn error_message(result: ServiceResult<BillingFilter>) -> String {
        match result {
            Err(ServiceError::BadRequest(message)) => message,
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[test]
    fn test_billing_filter_status() {
        let filter = billing_filter(&query(Some("HA"), None, None, None)).unwrap();
        assert_eq!(filter.status, Some(OrderStatus::Handed));
        assert_eq!(filter.created_from, None);

        assert_eq!(
            error_message(billing_filter(&query(Some("XX"), None, None, None))),
            "Invalid status. Valid options: IP, IK, PA, HA, IT, DO, CA"
        );
    }

    #[test]
    fn test_billing_filter_dates() {
        let day = parse_date("2024-03-10").unwrap();
        let filter = billing_filter(&query(None, Some("2024-03-10"), None, None)).unwrap();
        assert_eq!(
            (filter.created_from, filter.created_until),
            {
                let (from, until) = models::local_day_bounds(day);
                (Some(from), Some(until))
            }
        );

        let filter =
            billing_filter(&query(None, None, Some("2024-03-01"), Some("2024-03-31"))).unwrap();
        assert_eq!(
            filter.created_from,
            Some(models::local_day_bounds(parse_date("2024-03-01").unwrap()).0)
        );
        assert_eq!(
            filter.created_until,
            Some(models::local_day_bounds(parse_date("2024-03-31").unwrap()).1)
        );

        // a single day inside the range wins
        let filter = billing_filter(&query(
            None,
            Some("2024-03-10"),
            Some("2024-03-01"),
            Some("2024-03-31"),
        ))
        .unwrap();
        assert_eq!(filter.created_from, Some(models::local_day_bounds(day).0));
        assert_eq!(filter.created_until, Some(models::local_day_bounds(day).1));
    }

    #[test]
    fn test_billing_filter_errors() {
        assert_eq!(
            error_message(billing_filter(&query(None, Some("10/03/2024"), None, None))),
            "Invalid date format. Use YYYY-MM-DD"
        );
        assert_eq!(
            error_message(billing_filter(&query(None, None, Some("2024-03-31"), Some("2024-03-01")))),
            "start_date must be before or equal to end_date"
        );
        assert_eq!(
            error_message(billing_filter(&query(None, None, Some("2024-03-01"), None))),
            "Both start_date and end_date are required for date range filter"
        );
        assert!(billing_filter(&query(Some(""), Some(" "), None, None)).is_ok());
    }

    #[test]
    fn test_apply_form_rejects_unknown_codes() {
        let now = Utc::now();
        let mut order = models::Order {
            id: 1,
            order_number: "20240310-1".to_owned(),
            order_type: OrderType::ToGo,
            status: OrderStatus::InProgress,
            created_by: None,
            customer_id: None,
            address_id: None,
            document_id: None,
            created_at: now,
            updated_at: now,
            in_kitchen_at: None,
            packing_at: None,
            handed_at: None,
            in_transit_at: None,
            delivered_at: None,
            cancelled_at: None,
        };

        let mut created = order.clone();
        let mut validator = Validator::default();
        apply_form(&mut created, "D", "HA", false, &mut validator);
        assert!(validator.finish().is_ok());
        assert_eq!(created.status, OrderStatus::Handed);
        assert_eq!(created.handed_at, None);

        let mut validator = Validator::default();
        apply_form(&mut order, "T", "IK", true, &mut validator);
        assert!(validator.finish().is_ok());
        assert_eq!(order.order_type, OrderType::Table);
        assert!(order.in_kitchen_at.is_some());

        let mut validator = Validator::default();
        apply_form(&mut order, "X", "ZZ", true, &mut validator);
        let Err(ServiceError::InvalidFields(errors)) = validator.finish() else {
            panic!("expected field errors");
        };
        assert_eq!(errors.0["order_type"], vec!["\"X\" is not a valid choice."]);
        assert_eq!(errors.0["status"], vec!["\"ZZ\" is not a valid choice."]);
    }
}
