use aide::axum::routing::get_with;
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Path, Query};
use axum::Json;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::database::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::models;
use crate::request_state::RequestState;

use super::utils::{required_param, Created, NoContent, Payload, Validator};

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route(
            "/customers",
            get_with(list_customers, list_customers_docs)
                .post_with(create_customer, create_customer_docs),
        )
        .api_route(
            "/customers/by_name",
            get_with(list_customers_by_name, list_customers_by_name_docs),
        )
        .api_route(
            "/customers/:id",
            get_with(get_customer, get_customer_docs)
                .put_with(update_customer, update_customer_docs)
                .patch_with(patch_customer, patch_customer_docs)
                .delete_with(delete_customer, delete_customer_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct CustomerDto {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&models::Customer> for CustomerDto {
    fn from(value: &models::Customer) -> Self {
        Self {
            id: value.id,
            first_name: value.first_name.to_owned(),
            last_name: value.last_name.to_owned(),
            phone_number: value.phone_number.to_owned(),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct SaveCustomerDto {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone_number: String,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct PatchCustomerDto {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct CustomersByNameQuery {
    pub name: Option<String>,
}

fn validate(customer: &models::Customer) -> ServiceResult<()> {
    let mut validator = Validator::default();
    validator.required_text("first_name", &customer.first_name, 255);
    validator.required_text("last_name", &customer.last_name, 255);
    validator.required_text("phone_number", &customer.phone_number, 255);
    validator.finish()
}

async fn list_customers(mut state: RequestState) -> ServiceResult<Json<Vec<CustomerDto>>> {
    state.session_require()?;

    let customers = state.db.get_all_customers().await?;
    Ok(Json(customers.iter().map(|c| c.into()).collect()))
}

fn list_customers_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all customers.")
        .tag("customers")
        .response::<200, Json<Vec<CustomerDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn list_customers_by_name(
    mut state: RequestState,
    Query(query): Query<CustomersByNameQuery>,
) -> ServiceResult<Json<Vec<CustomerDto>>> {
    state.session_require()?;

    let name = required_param(&query.name, "name")?;
    let customers = state.db.get_customers_by_name(name).await?;
    Ok(Json(customers.iter().map(|c| c.into()).collect()))
}

fn list_customers_by_name_docs(op: TransformOperation) -> TransformOperation {
    op.description("Search customers by first or last name, ignoring case.")
        .tag("customers")
        .response::<200, Json<Vec<CustomerDto>>>()
        .response_with::<400, (), _>(|res| res.description("Missing name parameter!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn create_customer(
    mut state: RequestState,
    form: Payload<SaveCustomerDto>,
) -> ServiceResult<Created<CustomerDto>> {
    state.session_require()?;

    let form = form.0;
    let now = Utc::now();
    let customer = models::Customer {
        id: 0,
        first_name: form.first_name,
        last_name: form.last_name,
        phone_number: form.phone_number,
        created_at: now,
        updated_at: now,
    };
    validate(&customer)?;

    let customer = state.db.store_customer(customer).await?;
    Ok(Created(CustomerDto::from(&customer)))
}

fn create_customer_docs(op: TransformOperation) -> TransformOperation {
    op.description("Create a new customer.")
        .tag("customers")
        .response::<201, Json<CustomerDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn get_customer(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<Json<CustomerDto>> {
    state.session_require()?;

    let customer = state.db.get_customer_by_id(id).await?;

    if let Some(customer) = customer {
        return Ok(Json(CustomerDto::from(&customer)));
    }

    Err(ServiceError::NotFound)
}

fn get_customer_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get a customer by id.")
        .tag("customers")
        .response::<200, Json<CustomerDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested customer does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn update_customer(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<SaveCustomerDto>,
) -> ServiceResult<Json<CustomerDto>> {
    state.session_require()?;

    let form = form.0;
    let customer = state.db.get_customer_by_id(id).await?;

    if let Some(mut customer) = customer {
        customer.first_name = form.first_name;
        customer.last_name = form.last_name;
        customer.phone_number = form.phone_number;
        validate(&customer)?;

        let customer = state.db.store_customer(customer).await?;
        return Ok(Json(CustomerDto::from(&customer)));
    }

    Err(ServiceError::NotFound)
}

fn update_customer_docs(op: TransformOperation) -> TransformOperation {
    op.description("Replace the given customer.")
        .tag("customers")
        .response::<200, Json<CustomerDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested customer does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn patch_customer(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<PatchCustomerDto>,
) -> ServiceResult<Json<CustomerDto>> {
    state.session_require()?;

    let form = form.0;
    let customer = state.db.get_customer_by_id(id).await?;

    if let Some(mut customer) = customer {
        if let Some(first_name) = form.first_name {
            customer.first_name = first_name;
        }
        if let Some(last_name) = form.last_name {
            customer.last_name = last_name;
        }
        if let Some(phone_number) = form.phone_number {
            customer.phone_number = phone_number;
        }
        validate(&customer)?;

        let customer = state.db.store_customer(customer).await?;
        return Ok(Json(CustomerDto::from(&customer)));
    }

    Err(ServiceError::NotFound)
}

fn patch_customer_docs(op: TransformOperation) -> TransformOperation {
    op.description("Update some fields of the given customer.")
        .tag("customers")
        .response::<200, Json<CustomerDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested customer does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn delete_customer(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<NoContent> {
    state.session_require()?;

    if state.db.delete_customer(id).await? {
        return Ok(NoContent);
    }

    Err(ServiceError::NotFound)
}

fn delete_customer_docs(op: TransformOperation) -> TransformOperation {
    op.description("Delete the given customer together with their addresses.")
        .tag("customers")
        .response::<204, ()>()
        .response_with::<404, (), _>(|res| res.description("The requested customer does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}
