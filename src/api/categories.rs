use aide::axum::routing::get_with;
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::Path;
use axum::Json;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::database::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::models;
use crate::request_state::RequestState;

use super::utils::{Created, NoContent, Payload, Validator};

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route(
            "/categories",
            get_with(list_categories, list_categories_docs)
                .post_with(create_category, create_category_docs),
        )
        .api_route(
            "/categories/:id",
            get_with(get_category, get_category_docs)
                .put_with(update_category, update_category_docs)
                .patch_with(patch_category, patch_category_docs)
                .delete_with(delete_category, delete_category_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct CategoryDto {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&models::Category> for CategoryDto {
    fn from(value: &models::Category) -> Self {
        Self {
            id: value.id,
            name: value.name.to_owned(),
            description: value.description.to_owned(),
            is_active: value.is_active,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

pub(super) fn default_true() -> bool {
    true
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct SaveCategoryDto {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct PatchCategoryDto {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

fn validate(category: &models::Category) -> ServiceResult<()> {
    let mut validator = Validator::default();
    validator.required_text("name", &category.name, 255);
    validator.finish()
}

async fn list_categories(mut state: RequestState) -> ServiceResult<Json<Vec<CategoryDto>>> {
    state.session_require()?;

    let categories = state.db.get_all_categories().await?;
    Ok(Json(categories.iter().map(|c| c.into()).collect()))
}

fn list_categories_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all categories.")
        .tag("categories")
        .response::<200, Json<Vec<CategoryDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn create_category(
    mut state: RequestState,
    form: Payload<SaveCategoryDto>,
) -> ServiceResult<Created<CategoryDto>> {
    state.session_require()?;

    let form = form.0;
    let now = Utc::now();
    let category = models::Category {
        id: 0,
        name: form.name,
        description: form.description,
        is_active: form.is_active,
        created_at: now,
        updated_at: now,
    };
    validate(&category)?;

    let category = state.db.store_category(category).await?;
    Ok(Created(CategoryDto::from(&category)))
}

fn create_category_docs(op: TransformOperation) -> TransformOperation {
    op.description("Create a new category.")
        .tag("categories")
        .response::<201, Json<CategoryDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn get_category(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<Json<CategoryDto>> {
    state.session_require()?;

    let category = state.db.get_category_by_id(id).await?;

    if let Some(category) = category {
        return Ok(Json(CategoryDto::from(&category)));
    }

    Err(ServiceError::NotFound)
}

fn get_category_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get a category by id.")
        .tag("categories")
        .response::<200, Json<CategoryDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested category does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn update_category(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<SaveCategoryDto>,
) -> ServiceResult<Json<CategoryDto>> {
    state.session_require()?;

    let form = form.0;
    let category = state.db.get_category_by_id(id).await?;

    if let Some(mut category) = category {
        category.name = form.name;
        category.description = form.description;
        category.is_active = form.is_active;
        validate(&category)?;

        let category = state.db.store_category(category).await?;
        return Ok(Json(CategoryDto::from(&category)));
    }

    Err(ServiceError::NotFound)
}

fn update_category_docs(op: TransformOperation) -> TransformOperation {
    op.description("Replace the given category.")
        .tag("categories")
        .response::<200, Json<CategoryDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested category does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn patch_category(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<PatchCategoryDto>,
) -> ServiceResult<Json<CategoryDto>> {
    state.session_require()?;

    let form = form.0;
    let category = state.db.get_category_by_id(id).await?;

    if let Some(mut category) = category {
        if let Some(name) = form.name {
            category.name = name;
        }
        if let Some(description) = form.description {
            category.description = description;
        }
        if let Some(is_active) = form.is_active {
            category.is_active = is_active;
        }
        validate(&category)?;

        let category = state.db.store_category(category).await?;
        return Ok(Json(CategoryDto::from(&category)));
    }

    Err(ServiceError::NotFound)
}

fn patch_category_docs(op: TransformOperation) -> TransformOperation {
    op.description("Update some fields of the given category.")
        .tag("categories")
        .response::<200, Json<CategoryDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested category does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn delete_category(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<NoContent> {
    state.session_require()?;

    if state.db.delete_category(id).await? {
        return Ok(NoContent);
    }

    Err(ServiceError::NotFound)
}

fn delete_category_docs(op: TransformOperation) -> TransformOperation {
    op.description("Delete the given category.")
        .tag("categories")
        .response::<204, ()>()
        .response_with::<404, (), _>(|res| res.description("The requested category does not exist!"))
        .response_with::<409, (), _>(|res| {
            res.description("The category is still used by dishes or order items!")
        })
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}
