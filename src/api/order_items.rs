use aide::axum::routing::get_with;
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Path, Query};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::database::{AppState, DatabaseConnection};
use crate::error::{ServiceError, ServiceResult};
use crate::models;
use crate::request_state::RequestState;

use super::utils::{required_param, Created, NoContent, Payload, Validator};

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route(
            "/order-items",
            get_with(list_order_items, list_order_items_docs)
                .post_with(create_order_item, create_order_item_docs),
        )
        .api_route(
            "/order-items/by_order",
            get_with(list_order_items_by_order, list_order_items_by_order_docs),
        )
        .api_route(
            "/order-items/:id",
            get_with(get_order_item, get_order_item_docs)
                .put_with(update_order_item, update_order_item_docs)
                .patch_with(patch_order_item, patch_order_item_docs)
                .delete_with(delete_order_item, delete_order_item_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct OrderItemDto {
    pub id: u64,
    pub order: u64,
    pub dish: u64,
    pub category: u64,
    pub price: Decimal,
    pub quantity: u32,
    pub observation: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&models::OrderItem> for OrderItemDto {
    fn from(value: &models::OrderItem) -> Self {
        Self {
            id: value.id,
            order: value.order_id,
            dish: value.dish_id,
            category: value.category_id,
            price: models::money(value.price),
            quantity: value.quantity,
            observation: value.observation.to_owned(),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

/// Order item with the names of its dish and category.
#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct OrderItemDetailDto {
    pub id: u64,
    pub order: u64,
    pub dish: u64,
    pub dish_name: String,
    pub category: u64,
    pub category_name: String,
    pub price: Decimal,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub observation: String,
}

impl From<&models::OrderItemDetail> for OrderItemDetailDto {
    fn from(value: &models::OrderItemDetail) -> Self {
        Self {
            id: value.item.id,
            order: value.item.order_id,
            dish: value.item.dish_id,
            dish_name: value.dish_name.to_owned(),
            category: value.item.category_id,
            category_name: value.category_name.to_owned(),
            price: models::money(value.item.price),
            unit_price: value.unit_price(),
            quantity: value.item.quantity,
            observation: value.item.observation.to_owned(),
        }
    }
}

pub(super) fn default_quantity() -> u32 {
    1
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct SaveOrderItemDto {
    pub order: u64,
    pub dish: u64,
    /// Total of the line. Defaults to the dish price times the quantity.
    pub price: Option<Decimal>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub observation: String,
    /// Defaults to the category of the dish.
    pub category: Option<u64>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct PatchOrderItemDto {
    pub order: Option<u64>,
    pub dish: Option<u64>,
    pub price: Option<Decimal>,
    pub quantity: Option<u32>,
    pub observation: Option<String>,
    pub category: Option<u64>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct OrderItemsByOrderQuery {
    pub order_id: Option<String>,
}

fn does_not_exist(id: u64) -> String {
    format!("Invalid pk \"{id}\" - object does not exist.")
}

/// Completes `item` with the defaults of its dish and collects problems under `prefix`.
/// Nested items of an order use `items[0].` as prefix.
pub(super) async fn prepare_item(
    db: &mut DatabaseConnection,
    item: &mut models::OrderItem,
    price: Option<Decimal>,
    category: Option<u64>,
    validator: &mut Validator,
    prefix: &str,
) -> ServiceResult<()> {
    if item.quantity < 1 {
        validator.error(
            &format!("{prefix}quantity"),
            "Ensure this value is greater than or equal to 1.",
        );
    }

    match db.get_dish_by_id(item.dish_id).await? {
        Some(dish) => {
            item.price = price.unwrap_or(dish.price * Decimal::from(item.quantity));
            item.category_id = category.unwrap_or(dish.category_id);
        }
        None => {
            validator.error(&format!("{prefix}dish"), does_not_exist(item.dish_id));
            return Ok(());
        }
    }

    if let Some(category) = category {
        if db.get_category_by_id(category).await?.is_none() {
            validator.error(&format!("{prefix}category"), does_not_exist(category));
        }
    }
    validator.amount(
        &format!("{prefix}price"),
        item.price,
        10,
        Decimal::ZERO,
        true,
    );

    Ok(())
}

async fn validate(
    db: &mut DatabaseConnection,
    item: &mut models::OrderItem,
    price: Option<Decimal>,
    category: Option<u64>,
) -> ServiceResult<()> {
    let mut validator = Validator::default();
    if db.get_order_by_id(item.order_id).await?.is_none() {
        validator.error("order", does_not_exist(item.order_id));
    }
    prepare_item(db, item, price, category, &mut validator, "").await?;
    validator.finish()
}

async fn list_order_items(mut state: RequestState) -> ServiceResult<Json<Vec<OrderItemDto>>> {
    state.session_require()?;

    let items = state.db.get_all_order_items().await?;
    Ok(Json(items.iter().map(|i| i.into()).collect()))
}

fn list_order_items_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all order items.")
        .tag("orders")
        .response::<200, Json<Vec<OrderItemDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn list_order_items_by_order(
    mut state: RequestState,
    Query(query): Query<OrderItemsByOrderQuery>,
) -> ServiceResult<Json<Vec<OrderItemDetailDto>>> {
    state.session_require()?;

    let order_id = required_param(&query.order_id, "order_id")?;
    let Ok(order_id) = order_id.parse::<u64>() else {
        return Ok(Json(Vec::new()));
    };

    let items = state.db.get_order_item_details(&[order_id]).await?;
    Ok(Json(items.iter().map(|i| i.into()).collect()))
}

fn list_order_items_by_order_docs(op: TransformOperation) -> TransformOperation {
    op.description("List the items of an order with dish and category names.")
        .tag("orders")
        .response::<200, Json<Vec<OrderItemDetailDto>>>()
        .response_with::<400, (), _>(|res| res.description("Missing order_id parameter!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn create_order_item(
    mut state: RequestState,
    form: Payload<SaveOrderItemDto>,
) -> ServiceResult<Created<OrderItemDto>> {
    state.session_require()?;

    let form = form.0;
    let now = Utc::now();
    let mut item = models::OrderItem {
        id: 0,
        order_id: form.order,
        dish_id: form.dish,
        category_id: 0,
        price: Decimal::ZERO,
        quantity: form.quantity,
        observation: form.observation,
        created_at: now,
        updated_at: now,
    };
    validate(&mut state.db, &mut item, form.price, form.category).await?;

    let item = state.db.store_order_item(item).await?;
    Ok(Created(OrderItemDto::from(&item)))
}

fn create_order_item_docs(op: TransformOperation) -> TransformOperation {
    op.description("Add an item to an order.")
        .tag("orders")
        .response::<201, Json<OrderItemDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn get_order_item(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<Json<OrderItemDto>> {
    state.session_require()?;

    let item = state.db.get_order_item_by_id(id).await?;

    if let Some(item) = item {
        return Ok(Json(OrderItemDto::from(&item)));
    }

    Err(ServiceError::NotFound)
}

fn get_order_item_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get an order item by id.")
        .tag("orders")
        .response::<200, Json<OrderItemDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested order item does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn update_order_item(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<SaveOrderItemDto>,
) -> ServiceResult<Json<OrderItemDto>> {
    state.session_require()?;

    let form = form.0;
    let item = state.db.get_order_item_by_id(id).await?;

    if let Some(mut item) = item {
        item.order_id = form.order;
        item.dish_id = form.dish;
        item.quantity = form.quantity;
        item.observation = form.observation;
        validate(&mut state.db, &mut item, form.price, form.category).await?;

        let item = state.db.store_order_item(item).await?;
        return Ok(Json(OrderItemDto::from(&item)));
    }

    Err(ServiceError::NotFound)
}

fn update_order_item_docs(op: TransformOperation) -> TransformOperation {
    op.description("Replace the given order item.")
        .tag("orders")
        .response::<200, Json<OrderItemDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested order item does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn patch_order_item(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<PatchOrderItemDto>,
) -> ServiceResult<Json<OrderItemDto>> {
    state.session_require()?;

    let form = form.0;
    let item = state.db.get_order_item_by_id(id).await?;

    if let Some(mut item) = item {
        let dish_changed = form.dish.is_some_and(|dish| dish != item.dish_id);
        let quantity_changed = form.quantity.is_some_and(|quantity| quantity != item.quantity);

        if let Some(order) = form.order {
            item.order_id = order;
        }
        if let Some(dish) = form.dish {
            item.dish_id = dish;
        }
        if let Some(quantity) = form.quantity {
            item.quantity = quantity;
        }
        if let Some(observation) = form.observation {
            item.observation = observation;
        }

        // a new dish or quantity recomputes the defaults unless given explicitly
        let price = form
            .price
            .or((!dish_changed && !quantity_changed).then_some(item.price));
        let category = form
            .category
            .or((!dish_changed).then_some(item.category_id));
        validate(&mut state.db, &mut item, price, category).await?;

        let item = state.db.store_order_item(item).await?;
        return Ok(Json(OrderItemDto::from(&item)));
    }

    Err(ServiceError::NotFound)
}

fn patch_order_item_docs(op: TransformOperation) -> TransformOperation {
    op.description("Update some fields of the given order item.")
        .tag("orders")
        .response::<200, Json<OrderItemDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested order item does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn delete_order_item(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<NoContent> {
    state.session_require()?;

    if state.db.delete_order_item(id).await? {
        return Ok(NoContent);
    }

    Err(ServiceError::NotFound)
}

fn delete_order_item_docs(op: TransformOperation) -> TransformOperation {
    op.description("Remove the given item from its order.")
        .tag("orders")
        .response::<204, ()>()
        .response_with::<404, (), _>(|res| res.description("The requested order item does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}
