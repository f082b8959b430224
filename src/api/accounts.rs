use aide::axum::routing::get_with;
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::Path;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::database::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{self, AccountType};
use crate::request_state::RequestState;

use super::categories::default_true;
use super::utils::{Created, NoContent, Payload, Validator};

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route(
            "/accounts",
            get_with(list_accounts, list_accounts_docs)
                .post_with(create_account, create_account_docs),
        )
        .api_route(
            "/accounts/:id",
            get_with(get_account, get_account_docs)
                .put_with(update_account, update_account_docs)
                .patch_with(patch_account, patch_account_docs)
                .delete_with(delete_account, delete_account_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct AccountDto {
    pub id: u64,
    pub name: String,
    pub balance: Decimal,
    pub account_type: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&models::Account> for AccountDto {
    fn from(value: &models::Account) -> Self {
        Self {
            id: value.id,
            name: value.name.to_owned(),
            balance: models::money(value.balance),
            account_type: value.account_type.code().to_owned(),
            is_active: value.is_active,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

fn default_account_type() -> String {
    AccountType::Cash.code().to_owned()
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct SaveAccountDto {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub balance: Decimal,
    #[serde(default = "default_account_type")]
    pub account_type: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct PatchAccountDto {
    pub name: Option<String>,
    pub balance: Option<Decimal>,
    pub account_type: Option<String>,
    pub is_active: Option<bool>,
}

fn apply_account_type(account: &mut models::Account, code: &str, validator: &mut Validator) {
    match AccountType::from_code(code) {
        Some(account_type) => account.account_type = account_type,
        None => validator.error("account_type", format!("\"{code}\" is not a valid choice.")),
    }
}

fn validate(account: &models::Account, validator: &mut Validator) {
    validator.required_text("name", &account.name, 255);
    validator.amount("balance", account.balance, 12, Decimal::MIN, true);
}

async fn list_accounts(mut state: RequestState) -> ServiceResult<Json<Vec<AccountDto>>> {
    state.session_require()?;

    let accounts = state.db.get_all_accounts().await?;
    Ok(Json(accounts.iter().map(|a| a.into()).collect()))
}

fn list_accounts_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all accounts with their current balance.")
        .tag("accounting")
        .response::<200, Json<Vec<AccountDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn create_account(
    mut state: RequestState,
    form: Payload<SaveAccountDto>,
) -> ServiceResult<Created<AccountDto>> {
    state.session_require()?;

    let form = form.0;
    let now = Utc::now();
    let mut account = models::Account {
        id: 0,
        name: form.name,
        balance: form.balance,
        account_type: AccountType::Cash,
        is_active: form.is_active,
        created_at: now,
        updated_at: now,
    };

    let mut validator = Validator::default();
    apply_account_type(&mut account, &form.account_type, &mut validator);
    validate(&account, &mut validator);
    validator.finish()?;

    let account = state.db.store_account(account).await?;
    Ok(Created(AccountDto::from(&account)))
}

fn create_account_docs(op: TransformOperation) -> TransformOperation {
    op.description("Create a new account.")
        .tag("accounting")
        .response::<201, Json<AccountDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn get_account(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<Json<AccountDto>> {
    state.session_require()?;

    let account = state.db.get_account_by_id(id).await?;

    if let Some(account) = account {
        return Ok(Json(AccountDto::from(&account)));
    }

    Err(ServiceError::NotFound)
}

fn get_account_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get an account by id.")
        .tag("accounting")
        .response::<200, Json<AccountDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested account does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn update_account(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<SaveAccountDto>,
) -> ServiceResult<Json<AccountDto>> {
    state.session_require()?;

    let form = form.0;
    let account = state.db.get_account_by_id(id).await?;

    if let Some(mut account) = account {
        account.name = form.name;
        account.balance = form.balance;
        account.is_active = form.is_active;

        let mut validator = Validator::default();
        apply_account_type(&mut account, &form.account_type, &mut validator);
        validate(&account, &mut validator);
        validator.finish()?;

        let account = state.db.store_account(account).await?;
        return Ok(Json(AccountDto::from(&account)));
    }

    Err(ServiceError::NotFound)
}

fn update_account_docs(op: TransformOperation) -> TransformOperation {
    op.description("Replace the given account.")
        .tag("accounting")
        .response::<200, Json<AccountDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested account does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn patch_account(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<PatchAccountDto>,
) -> ServiceResult<Json<AccountDto>> {
    state.session_require()?;

    let form = form.0;
    let account = state.db.get_account_by_id(id).await?;

    if let Some(mut account) = account {
        if let Some(name) = form.name {
            account.name = name;
        }
        if let Some(balance) = form.balance {
            account.balance = balance;
        }
        if let Some(is_active) = form.is_active {
            account.is_active = is_active;
        }

        let mut validator = Validator::default();
        if let Some(account_type) = form.account_type {
            apply_account_type(&mut account, &account_type, &mut validator);
        }
        validate(&account, &mut validator);
        validator.finish()?;

        let account = state.db.store_account(account).await?;
        return Ok(Json(AccountDto::from(&account)));
    }

    Err(ServiceError::NotFound)
}

fn patch_account_docs(op: TransformOperation) -> TransformOperation {
    op.description("Update some fields of the given account.")
        .tag("accounting")
        .response::<200, Json<AccountDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested account does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn delete_account(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<NoContent> {
    state.session_require()?;

    if state.db.delete_account(id).await? {
        return Ok(NoContent);
    }

    Err(ServiceError::NotFound)
}

fn delete_account_docs(op: TransformOperation) -> TransformOperation {
    op.description("Delete the given account together with its transactions.")
        .tag("accounting")
        .response::<204, ()>()
        .response_with::<404, (), _>(|res| res.description("The requested account does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}
