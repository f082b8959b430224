use aide::axum::routing::get_with;
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Path, Query};
use axum::Json;
use chrono::{DateTime, Utc};
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
            "/addresses",
            get_with(list_addresses, list_addresses_docs)
                .post_with(create_address, create_address_docs),
        )
        .api_route(
            "/addresses/by_customer",
            get_with(list_addresses_by_customer, list_addresses_by_customer_docs),
        )
        .api_route(
            "/addresses/:id",
            get_with(get_address, get_address_docs)
                .put_with(update_address, update_address_docs)
                .patch_with(patch_address, patch_address_docs)
                .delete_with(delete_address, delete_address_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct AddressDto {
    pub id: u64,
    pub customer: u64,
    pub street: String,
    pub reference: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&models::Address> for AddressDto {
    fn from(value: &models::Address) -> Self {
        Self {
            id: value.id,
            customer: value.customer_id,
            street: value.street.to_owned(),
            reference: value.reference.to_owned(),
            is_primary: value.is_primary,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct SaveAddressDto {
    pub customer: u64,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct PatchAddressDto {
    pub customer: Option<u64>,
    pub street: Option<String>,
    pub reference: Option<String>,
    pub is_primary: Option<bool>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct AddressesByCustomerQuery {
    pub customer_id: Option<String>,
}

async fn validate(db: &mut DatabaseConnection, address: &models::Address) -> ServiceResult<()> {
    let mut validator = Validator::default();
    validator.required_text("street", &address.street, 255);
    if db.get_customer_by_id(address.customer_id).await?.is_none() {
        validator.error(
            "customer",
            format!(
                "Invalid pk \"{}\" - object does not exist.",
                address.customer_id
            ),
        );
    }
    validator.finish()
}

async fn list_addresses(mut state: RequestState) -> ServiceResult<Json<Vec<AddressDto>>> {
    state.session_require()?;

    let addresses = state.db.get_all_addresses().await?;
    Ok(Json(addresses.iter().map(|a| a.into()).collect()))
}

fn list_addresses_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all addresses.")
        .tag("addresses")
        .response::<200, Json<Vec<AddressDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn list_addresses_by_customer(
    mut state: RequestState,
    Query(query): Query<AddressesByCustomerQuery>,
) -> ServiceResult<Json<Vec<AddressDto>>> {
    state.session_require()?;

    let customer_id = required_param(&query.customer_id, "customer_id")?;
    let Ok(customer_id) = customer_id.parse::<u64>() else {
        return Ok(Json(Vec::new()));
    };

    let addresses = state.db.get_addresses_by_customer(customer_id).await?;
    Ok(Json(addresses.iter().map(|a| a.into()).collect()))
}

fn list_addresses_by_customer_docs(op: TransformOperation) -> TransformOperation {
    op.description("List the addresses of a customer, primary address first.")
        .tag("addresses")
        .response::<200, Json<Vec<AddressDto>>>()
        .response_with::<400, (), _>(|res| res.description("Missing customer_id parameter!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn create_address(
    mut state: RequestState,
    form: Payload<SaveAddressDto>,
) -> ServiceResult<Created<AddressDto>> {
    state.session_require()?;

    let form = form.0;
    let now = Utc::now();
    let address = models::Address {
        id: 0,
        customer_id: form.customer,
        street: form.street,
        reference: form.reference,
        is_primary: form.is_primary,
        created_at: now,
        updated_at: now,
    };
    validate(&mut state.db, &address).await?;

    let address = state.db.store_address(address).await?;
    Ok(Created(AddressDto::from(&address)))
}

fn create_address_docs(op: TransformOperation) -> TransformOperation {
    op.description("Create a new address for a customer.")
        .tag("addresses")
        .response::<201, Json<AddressDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn get_address(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<Json<AddressDto>> {
    state.session_require()?;

    let address = state.db.get_address_by_id(id).await?;

    if let Some(address) = address {
        return Ok(Json(AddressDto::from(&address)));
    }

    Err(ServiceError::NotFound)
}

fn get_address_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get an address by id.")
        .tag("addresses")
        .response::<200, Json<AddressDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested address does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn update_address(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<SaveAddressDto>,
) -> ServiceResult<Json<AddressDto>> {
    state.session_require()?;

    let form = form.0;
    let address = state.db.get_address_by_id(id).await?;

    if let Some(mut address) = address {
        address.customer_id = form.customer;
        address.street = form.street;
        address.reference = form.reference;
        address.is_primary = form.is_primary;
        validate(&mut state.db, &address).await?;

        let address = state.db.store_address(address).await?;
        return Ok(Json(AddressDto::from(&address)));
    }

    Err(ServiceError::NotFound)
}

fn update_address_docs(op: TransformOperation) -> TransformOperation {
    op.description("Replace the given address.")
        .tag("addresses")
        .response::<200, Json<AddressDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested address does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn patch_address(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<PatchAddressDto>,
) -> ServiceResult<Json<AddressDto>> {
    state.session_require()?;

    let form = form.0;
    let address = state.db.get_address_by_id(id).await?;

    if let Some(mut address) = address {
        if let Some(customer) = form.customer {
            address.customer_id = customer;
        }
        if let Some(street) = form.street {
            address.street = street;
        }
        if let Some(reference) = form.reference {
            address.reference = reference;
        }
        if let Some(is_primary) = form.is_primary {
            address.is_primary = is_primary;
        }
        validate(&mut state.db, &address).await?;

        let address = state.db.store_address(address).await?;
        return Ok(Json(AddressDto::from(&address)));
    }

    Err(ServiceError::NotFound)
}

fn patch_address_docs(op: TransformOperation) -> TransformOperation {
    op.description("Update some fields of the given address.")
        .tag("addresses")
        .response::<200, Json<AddressDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested address does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn delete_address(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<NoContent> {
    state.session_require()?;

    if state.db.delete_address(id).await? {
        return Ok(NoContent);
    }

    Err(ServiceError::NotFound)
}

fn delete_address_docs(op: TransformOperation) -> TransformOperation {
    op.description("Delete the given address.")
        .tag("addresses")
        .response::<204, ()>()
        .response_with::<404, (), _>(|res| res.description("The requested address does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}
