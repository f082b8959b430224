use aide::axum::routing::get_with;
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Path, Query};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::database::{AppState, DatabaseConnection};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{self, DateFilter, TransactionFilter, TransactionOrder, TransactionType};
use crate::request_state::RequestState;

use super::pagination::{Paginated, Pagination};
use super::utils::{parse_date, Created, NoContent, Payload, Validator};

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route(
            "/transactions",
            get_with(list_transactions, list_transactions_docs)
                .post_with(create_transaction, create_transaction_docs),
        )
        .api_route(
            "/transactions/:id",
            get_with(get_transaction, get_transaction_docs)
                .put_with(update_transaction, update_transaction_docs)
                .patch_with(patch_transaction, patch_transaction_docs)
                .delete_with(delete_transaction, delete_transaction_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct TransactionDto {
    pub id: u64,
    pub transaction_type: String,
    pub account: u64,
    pub amount: Decimal,
    pub category: Option<u64>,
    pub description: String,
    pub transaction_date: NaiveDate,
    pub created_by: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&models::Transaction> for TransactionDto {
    fn from(value: &models::Transaction) -> Self {
        Self {
            id: value.id,
            transaction_type: value.transaction_type.code().to_owned(),
            account: value.account_id,
            amount: models::money(value.amount),
            category: value.category_id,
            description: value.description.to_owned(),
            transaction_date: value.transaction_date,
            created_by: value.created_by,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct SaveTransactionDto {
    pub transaction_type: String,
    pub account: u64,
    pub amount: Decimal,
    pub category: Option<u64>,
    #[serde(default)]
    pub description: String,
    /// Defaults to today.
    pub transaction_date: Option<NaiveDate>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct PatchTransactionDto {
    pub transaction_type: Option<String>,
    pub account: Option<u64>,
    pub amount: Option<Decimal>,
    pub category: Option<u64>,
    pub description: Option<String>,
    pub transaction_date: Option<NaiveDate>,
}

#[derive(Debug, Default, PartialEq, Deserialize, JsonSchema)]
pub struct TransactionListQuery {
    /// `I`, `E` or `all` (default).
    pub transaction_type: Option<String>,
    /// `today` (default), `last7days`, `thisWeek`, `thisMonth`, `custom` or `all`.
    pub date_filter: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// `date` (default) or `amount`, both descending.
    pub sort_by: Option<String>,
}

fn transaction_filter(query: &TransactionListQuery) -> ServiceResult<TransactionFilter> {
    let transaction_type = match query.transaction_type.as_deref().unwrap_or("all") {
        "all" => None,
        code => match TransactionType::from_code(code) {
            Some(transaction_type) => Some(transaction_type),
            None => {
                return Err(ServiceError::BadRequest(
                    "invalid transaction_type parameter. Use I, E, or all".to_owned(),
                ))
            }
        },
    };

    let date = match query.date_filter.as_deref().unwrap_or("today") {
        "today" => DateFilter::Today,
        "last7days" => DateFilter::Last7Days,
        "thisWeek" => DateFilter::ThisWeek,
        "thisMonth" => DateFilter::ThisMonth,
        "all" => DateFilter::All,
        "custom" => {
            let start = query.start_date.as_deref().filter(|d| !d.is_empty());
            let end = query.end_date.as_deref().filter(|d| !d.is_empty());
            let (Some(start), Some(end)) = (start, end) else {
                return Err(ServiceError::BadRequest(
                    "start_date and end_date parameters are required for custom filter"
                        .to_owned(),
                ));
            };
            DateFilter::Custom(parse_date(start)?, parse_date(end)?)
        }
        _ => {
            return Err(ServiceError::BadRequest(
                "invalid date_filter parameter".to_owned(),
            ))
        }
    };

    let order = match query.sort_by.as_deref() {
        Some("amount") => TransactionOrder::Amount,
        _ => TransactionOrder::Date,
    };

    Ok(TransactionFilter {
        transaction_type,
        date,
        order,
    })
}

async fn validate(
    db: &mut DatabaseConnection,
    transaction: &mut models::Transaction,
    transaction_type: &str,
) -> ServiceResult<()> {
    let mut validator = Validator::default();
    match TransactionType::from_code(transaction_type) {
        Some(transaction_type) => transaction.transaction_type = transaction_type,
        None => validator.error(
            "transaction_type",
            format!("\"{transaction_type}\" is not a valid choice."),
        ),
    }
    validator.amount("amount", transaction.amount, 10, Decimal::ZERO, false);

    if db.get_account_by_id(transaction.account_id).await?.is_none() {
        validator.error(
            "account",
            format!(
                "Invalid pk \"{}\" - object does not exist.",
                transaction.account_id
            ),
        );
    }
    if let Some(category_id) = transaction.category_id {
        if db.get_category_by_id(category_id).await?.is_none() {
            validator.error(
                "category",
                format!("Invalid pk \"{category_id}\" - object does not exist."),
            );
        }
    }
    validator.finish()
}

async fn list_transactions(
    mut state: RequestState,
    pagination: Pagination,
    Query(query): Query<TransactionListQuery>,
) -> ServiceResult<Json<Paginated<TransactionDto>>> {
    state.session_require()?;

    let filter = transaction_filter(&query)?;
    let (count, transactions) = state
        .db
        .get_transactions_page(
            &filter,
            models::local_today(),
            pagination.limit(),
            pagination.offset(),
        )
        .await?;
    let results = transactions.iter().map(TransactionDto::from).collect();
    Ok(Json(pagination.page(count, results)?))
}

fn list_transactions_docs(op: TransformOperation) -> TransformOperation {
    op.description("List transactions filtered by type and date window, newest or largest first.")
        .tag("accounting")
        .response::<200, Json<Paginated<TransactionDto>>>()
        .response_with::<400, (), _>(|res| res.description("Invalid filter!"))
        .response_with::<404, (), _>(|res| res.description("Invalid page!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn create_transaction(
    mut state: RequestState,
    form: Payload<SaveTransactionDto>,
) -> ServiceResult<Created<TransactionDto>> {
    let user_id = state.session_require()?.user.id;

    let form = form.0;
    let now = Utc::now();
    let mut transaction = models::Transaction {
        id: 0,
        transaction_type: TransactionType::Income,
        account_id: form.account,
        amount: form.amount,
        category_id: form.category,
        description: form.description,
        transaction_date: form.transaction_date.unwrap_or_else(models::local_today),
        created_by: Some(user_id),
        created_at: now,
        updated_at: now,
    };
    validate(&mut state.db, &mut transaction, &form.transaction_type).await?;

    let transaction = state.db.create_transaction(transaction).await?;
    Ok(Created(TransactionDto::from(&transaction)))
}

fn create_transaction_docs(op: TransformOperation) -> TransformOperation {
    op.description("Record a transaction and apply it to the account balance.")
        .tag("accounting")
        .response::<201, Json<TransactionDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn get_transaction(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<Json<TransactionDto>> {
    state.session_require()?;

    let transaction = state.db.get_transaction_by_id(id).await?;

    if let Some(transaction) = transaction {
        return Ok(Json(TransactionDto::from(&transaction)));
    }

    Err(ServiceError::NotFound)
}

fn get_transaction_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get a transaction by id.")
        .tag("accounting")
        .response::<200, Json<TransactionDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested transaction does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn update_transaction(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<SaveTransactionDto>,
) -> ServiceResult<Json<TransactionDto>> {
    state.session_require()?;

    let form = form.0;
    let transaction = state.db.get_transaction_by_id(id).await?;

    if let Some(mut transaction) = transaction {
        transaction.account_id = form.account;
        transaction.amount = form.amount;
        transaction.category_id = form.category;
        transaction.description = form.description;
        if let Some(transaction_date) = form.transaction_date {
            transaction.transaction_date = transaction_date;
        }
        validate(&mut state.db, &mut transaction, &form.transaction_type).await?;

        let transaction = state.db.update_transaction(transaction).await?;
        return Ok(Json(TransactionDto::from(&transaction)));
    }

    Err(ServiceError::NotFound)
}

fn update_transaction_docs(op: TransformOperation) -> TransformOperation {
    op.description("Replace the given transaction, moving its effect between balances as needed.")
        .tag("accounting")
        .response::<200, Json<TransactionDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested transaction does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn patch_transaction(
    mut state: RequestState,
    Path(id): Path<u64>,
    form: Payload<PatchTransactionDto>,
) -> ServiceResult<Json<TransactionDto>> {
    state.session_require()?;

    let form = form.0;
    let transaction = state.db.get_transaction_by_id(id).await?;

    if let Some(mut transaction) = transaction {
        if let Some(account) = form.account {
            transaction.account_id = account;
        }
        if let Some(amount) = form.amount {
            transaction.amount = amount;
        }
        if let Some(category) = form.category {
            transaction.category_id = Some(category);
        }
        if let Some(description) = form.description {
            transaction.description = description;
        }
        if let Some(transaction_date) = form.transaction_date {
            transaction.transaction_date = transaction_date;
        }
        let transaction_type = form
            .transaction_type
            .unwrap_or_else(|| transaction.transaction_type.code().to_owned());
        validate(&mut state.db, &mut transaction, &transaction_type).await?;

        let transaction = state.db.update_transaction(transaction).await?;
        return Ok(Json(TransactionDto::from(&transaction)));
    }

    Err(ServiceError::NotFound)
}

fn patch_transaction_docs(op: TransformOperation) -> TransformOperation {
    op.description("Update some fields of the given transaction, moving its effect between balances as needed.")
        .tag("accounting")
        .response::<200, Json<TransactionDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<404, (), _>(|res| res.description("The requested transaction does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn delete_transaction(
    mut state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<NoContent> {
    state.session_require()?;

    if state.db.delete_transaction(id).await? {
        return Ok(NoContent);
    }

    Err(ServiceError::NotFound)
}

fn delete_transaction_docs(op: TransformOperation) -> TransformOperation {
    op.description("Delete the given transaction and reverse its effect on the balance.")
        .tag("accounting")
        .response::<204, ()>()
        .response_with::<404, (), _>(|res| res.description("The requested transaction does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}
