use aide::axum::routing::get_with;
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Multipart, Path, Query};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::database::{AppState, DatabaseConnection};
use crate::error::{ServiceError, ServiceResult};
use crate::models;
use crate::request_state::RequestState;

use super::categories::default_true;
use super::utils::{required_param, Created, FileResponse, NoContent, Payload, Validator};

const SUPPORTED_IMAGE_TYPES: [&str; 6] = [
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "image/svg",
    "image/svg+xml",
];

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route(
            "/dishes",
            get_with(list_dishes, list_dishes_docs).post_with(create_dish, create_dish_docs),
        )
        .api_route(
            "/dishes/by_category",
            get_with(list_dishes_by_category, list_dishes_by_category_docs),
        )
        .api_route(
            "/dishes/:id",
            get_with(get_dish, get_dish_docs)
                .put_with(update_dish, update_dish_docs)
                .patch_with(patch_dish, patch_dish_docs)
                .delete_with(delete_dish, delete_dish_docs),
        )
        .api_route(
            "/dishes/:id/image",
            get_with(get_dish_image, get_dish_image_docs)
                .put_with(upload_dish_image, upload_dish_image_docs)
                .delete_with(delete_dish_image, delete_dish_image_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct DishDto {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub category: u64,
    pub is_active: bool,
    pub has_image: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&models::Dish> for DishDto {
    fn from(value: &models::Dish) -> Self {
        Self {
            id: value.id,
            name: value.name.to_owned(),
            description: value.description.to_owned(),
            price: models::money(value.price),
            category: value.category_id,
            is_active: value.is_active,
            has_image: value.has_image,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct SaveDishDto {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    pub category: u64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct PatchDishDto {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<u64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct DishesByCategoryQuery {
    pub category_id: Option<String>,
}

async fn validate(db: &mut DatabaseConnection, dish: &models::Dish) -> ServiceResult<()> {
    let mut validator = Validator::default();
    validator.required_text("name", &dish.name, 255);
    validator.amount("price", dish.price, 10, Decimal::ZERO, true);
    if db.get_category_by_id(dish.category_id).await?.is_none() {
        validator.error(
            "category",
            format!(
                "Invalid pk \"{}\" - object does not exist.",
                dish.category_id
            ),
        );
    }
    validator.finish()
}

async fn list_dishes(mut state: RequestState) -> ServiceResult<Json<Vec<DishDto>>> {
    state.session_require()?;

    let dishes = state.db.get_all_dishes().await?;
    Ok(Json(dishes.iter().map(|d| d.into()).collect()))
}

fn list_dishes_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all dishes.")
        .tag("dishes")
        .response::<200, Json<Vec<DishDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn list_dishes_by_category(
    mut state: RequestState,
    Query(query): Query<DishesByCategoryQuery>,
) -> ServiceResult<Json<Vec<DishDto>>> {
    state.session_require()?;

    let category_id = required_param(&query.category_id, "category_id")?;
    let Ok(category_id) = category_id.parse::<u64>() else {
        return Ok(Json(Vec::new()));
    };

    let dishes = state.db.get_dishes_by_category(category_id).await?;
    Ok(Json(dishes.iter().map(|d| d.into()).collect()))
}

fn list_dishes_by_category_docs(op: TransformOperation) -> TransformOperation {
    op.description("List the dishes of a category.")
        .tag("dishes")
        .response::<200, Json<Vec<DishDto>>>()
        .response_with::<400, (), _>(|res| res.description("Missing category_id parameter!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn create_dish(
    mut state: RequestState,
    form: Payload<SaveDishDto>,
) -> ServiceResult<Created<DishDto>> {
    state.session_require()?;

    let form = form.0;
    let now = Utc::now();
    let dish = models::Dish {
        id: 0,
        name: form.name,
        description: form.description,
        price: form.price,
        category_id: form.category,
        is_active: form.is_active,
        has_image: false,
        created_at: now,
        updated_at: now,
    };
    validate(&mut state.db, &dish).await?;

    let dish = state.db.store_dish(dish).await?;
    Ok(Created(DishDto::from(&dish)))
}

fn create_dish_docs(op: TransformOperation) -> TransformOperation {
    op.description("Create a new dish.")
        .tag("dishes")
        .response::<201, Json<DishDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn get_dish(mut state: RequestState, Path(id): Path<u64>) -> ServiceResult<Json<DishDto>> {
    state.session_require()?;

    let dish = state.db.get_dish_by_id(id).await?;

    if let Some(dish) = dish {
        return Ok(Json(DishDto::from(&dish)));
    }

    Err(ServiceError::NotFound)
}

fn get_dish_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get a dish by id.")
        .tag("dishes")
        .response::<200, Json<DishDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested dish does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn update_dish(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<SaveDishDto>,
) -> ServiceResult<Json<DishDto>> {
    state.session_require()?;

    let form = form.0;
    let dish = state.db.get_dish_by_id(id).await?;

    if let Some(mut dish) = dish {
        dish.name = form.name;
        dish.description = form.description;
        dish.price = form.price;
        dish.category_id = form.category;
        dish.is_active = form.is_active;
        validate(&mut state.db, &dish).await?;

        let dish = state.db.store_dish(dish).await?;
        return Ok(Json(DishDto::from(&dish)));
    }

    Err(ServiceError::NotFound)
}

fn update_dish_docs(op: TransformOperation) -> TransformOperation {
    op.description("Replace the given dish.")
        .tag("dishes")
        .response::<200, Json<DishDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested dish does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn patch_dish(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<PatchDishDto>,
) -> ServiceResult<Json<DishDto>> {
    state.session_require()?;

    let form = form.0;
    let dish = state.db.get_dish_by_id(id).await?;

    if let Some(mut dish) = dish {
        if let Some(name) = form.name {
            dish.name = name;
        }
        if let Some(description) = form.description {
            dish.description = description;
        }
        if let Some(price) = form.price {
            dish.price = price;
        }
        if let Some(category) = form.category {
            dish.category_id = category;
        }
        if let Some(is_active) = form.is_active {
            dish.is_active = is_active;
        }
        validate(&mut state.db, &dish).await?;

        let dish = state.db.store_dish(dish).await?;
        return Ok(Json(DishDto::from(&dish)));
    }

    Err(ServiceError::NotFound)
}

fn patch_dish_docs(op: TransformOperation) -> TransformOperation {
    op.description("Update some fields of the given dish.")
        .tag("dishes")
        .response::<200, Json<DishDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested dish does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn delete_dish(mut state: RequestState, Path(id): Path<u64>) -> ServiceResult<NoContent> {
    state.session_require()?;

    if state.db.delete_dish(id).await? {
        return Ok(NoContent);
    }

    Err(ServiceError::NotFound)
}

fn delete_dish_docs(op: TransformOperation) -> TransformOperation {
    op.description("Delete the given dish.")
        .tag("dishes")
        .response::<204, ()>()
        .response_with::<404, (), _>(|res| res.description("The requested dish does not exist!"))
        .response_with::<409, (), _>(|res| res.description("The dish is still used by orders!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn get_dish_image(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<FileResponse> {
    state.session_require()?;

    let image = state.db.get_dish_image(id).await?;

    if let Some(image) = image {
        return Ok(FileResponse {
            content_type: image.mimetype,
            disposition: None,
            data: image.data,
        });
    }

    Err(ServiceError::NotFound)
}

fn get_dish_image_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get the image of the given dish.")
        .tag("dishes")
        .response_with::<200, Vec<u8>, _>(|res| res.description("The image file."))
        .response_with::<404, (), _>(|res| {
            res.description("The requested dish does not exist or has no image!")
        })
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn upload_dish_image(
    mut state: RequestState,
    Path(id): Path<u64>,
    mut multipart: Multipart,
) -> ServiceResult<NoContent> {
    state.session_require()?;

    while let Ok(Some(field)) = multipart.next_field().await {
        let content_type = field.content_type().unwrap_or("").to_lowercase();
        if SUPPORTED_IMAGE_TYPES.iter().any(|t| *t == content_type) {
            if let Ok(data) = field.bytes().await {
                let image = models::Image {
                    data: data.to_vec(),
                    mimetype: content_type,
                };
                if state.db.store_dish_image(id, image).await? {
                    return Ok(NoContent);
                }
                return Err(ServiceError::NotFound);
            }
        }
    }

    Err(ServiceError::BadRequest(format!(
        "No image found. Supported types: {}",
        SUPPORTED_IMAGE_TYPES.join(", ")
    )))
}

fn upload_dish_image_docs(op: TransformOperation) -> TransformOperation {
    op.description("Upload an image for the given dish.")
        .tag("dishes")
        .response::<204, ()>()
        .response_with::<400, (), _>(|res| res.description("No supported image in the upload!"))
        .response_with::<404, (), _>(|res| res.description("The requested dish does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn delete_dish_image(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<NoContent> {
    state.session_require()?;

    if state.db.delete_dish_image(id).await? {
        return Ok(NoContent);
    }

    Err(ServiceError::NotFound)
}

fn delete_dish_image_docs(op: TransformOperation) -> TransformOperation {
    op.description("Remove the image of the given dish.")
        .tag("dishes")
        .response::<204, ()>()
        .response_with::<404, (), _>(|res| res.description("The requested dish does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}
