use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Connection, FromRow, PgConnection, Postgres, QueryBuilder};

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    Account, AccountType, Order, Transaction, TransactionFilter, TransactionOrder, TransactionType,
};

use super::{to_i64, to_u64, DatabaseConnection};

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i64,
    name: String,
    balance: Decimal,
    account_type: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = ServiceError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let account_type = AccountType::from_code(&row.account_type).ok_or_else(|| {
            ServiceError::InternalServerError(format!(
                "Unknown account type '{}'",
                row.account_type
            ))
        })?;

        Ok(Self {
            id: to_u64(row.id),
            name: row.name,
            balance: row.balance,
            account_type,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: i64,
    transaction_type: String,
    account_id: i64,
    amount: Decimal,
    category_id: Option<i64>,
    description: String,
    transaction_date: NaiveDate,
    created_by: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = ServiceError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let transaction_type =
            TransactionType::from_code(&row.transaction_type).ok_or_else(|| {
                ServiceError::InternalServerError(format!(
                    "Unknown transaction type '{}'",
                    row.transaction_type
                ))
            })?;

        Ok(Self {
            id: to_u64(row.id),
            transaction_type,
            account_id: to_u64(row.account_id),
            amount: row.amount,
            category_id: row.category_id.map(to_u64),
            description: row.description,
            transaction_date: row.transaction_date,
            created_by: row.created_by.map(to_u64),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ACCOUNT_COLUMNS: &str = "id, name, balance, account_type, is_active, created_at, updated_at";
const TRANSACTION_COLUMNS: &str = "id, transaction_type, account_id, amount, category_id, description, transaction_date, created_by, created_at, updated_at";

async fn adjust_balance(
    connection: &mut PgConnection,
    account_id: u64,
    delta: Decimal,
) -> ServiceResult<()> {
    let result = sqlx::query(
        "UPDATE account SET balance = balance + $2, updated_at = now() WHERE id = $1",
    )
    .bind(to_i64(account_id))
    .bind(delta)
    .execute(connection)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ServiceError::NotFound);
    }
    Ok(())
}

async fn insert_transaction(
    connection: &mut PgConnection,
    transaction: &Transaction,
) -> ServiceResult<Transaction> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
            INSERT INTO account_transaction (
                transaction_type, account_id, amount, category_id, description, transaction_date, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {TRANSACTION_COLUMNS}
        "#
    ))
    .bind(transaction.transaction_type.code())
    .bind(to_i64(transaction.account_id))
    .bind(transaction.amount)
    .bind(transaction.category_id.map(to_i64))
    .bind(&transaction.description)
    .bind(transaction.transaction_date)
    .bind(transaction.created_by.map(to_i64))
    .fetch_one(&mut *connection)
    .await?;

    let transaction = Transaction::try_from(row)?;
    adjust_balance(connection, transaction.account_id, transaction.balance_effect()).await?;
    Ok(transaction)
}

async fn select_transaction(
    connection: &mut PgConnection,
    id: u64,
    for_update: bool,
) -> ServiceResult<Option<Transaction>> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM account_transaction WHERE id = $1{lock}"
    ))
    .bind(to_i64(id))
    .fetch_optional(connection)
    .await?;

    row.map(Transaction::try_from).transpose()
}

impl DatabaseConnection {
    pub async fn get_all_accounts(&mut self) -> ServiceResult<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account ORDER BY id"
        ))
        .fetch_all(&mut *self.connection)
        .await?;

        rows.into_iter().map(Account::try_from).collect()
    }

    pub async fn get_account_by_id(&mut self, id: u64) -> ServiceResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE id = $1"
        ))
        .bind(to_i64(id))
        .fetch_optional(&mut *self.connection)
        .await?;

        row.map(Account::try_from).transpose()
    }

    /// Inserts the account if its id is `0`, updates it otherwise.
    pub async fn store_account(&mut self, account: Account) -> ServiceResult<Account> {
        let row = if account.id == 0 {
            sqlx::query_as::<_, AccountRow>(&format!(
                r#"
                    INSERT INTO account (name, balance, account_type, is_active)
                    VALUES ($1, $2, $3, $4)
                    RETURNING {ACCOUNT_COLUMNS}
                "#
            ))
            .bind(&account.name)
            .bind(account.balance)
            .bind(account.account_type.code())
            .bind(account.is_active)
            .fetch_one(&mut *self.connection)
            .await?
        } else {
            sqlx::query_as::<_, AccountRow>(&format!(
                r#"
                    UPDATE account SET name = $2, balance = $3, account_type = $4, is_active = $5,
                        updated_at = now()
                    WHERE id = $1
                    RETURNING {ACCOUNT_COLUMNS}
                "#
            ))
            .bind(to_i64(account.id))
            .bind(&account.name)
            .bind(account.balance)
            .bind(account.account_type.code())
            .bind(account.is_active)
            .fetch_one(&mut *self.connection)
            .await?
        };

        row.try_into()
    }

    pub async fn delete_account(&mut self, id: u64) -> ServiceResult<bool> {
        let result = sqlx::query("DELETE FROM account WHERE id = $1")
            .bind(to_i64(id))
            .execute(&mut *self.connection)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// One page of transactions matching `filter`, with the number of all matches.
    pub async fn get_transactions_page(
        &mut self,
        filter: &TransactionFilter,
        today: NaiveDate,
        limit: u64,
        offset: u64,
    ) -> ServiceResult<(u64, Vec<Transaction>)> {
        fn push_filter(
            builder: &mut QueryBuilder<Postgres>,
            filter: &TransactionFilter,
            from: Option<NaiveDate>,
            until: Option<NaiveDate>,
        ) {
            builder.push(" WHERE TRUE");
            if let Some(transaction_type) = filter.transaction_type {
                builder
                    .push(" AND transaction_type = ")
                    .push_bind(transaction_type.code());
            }
            if let Some(from) = from {
                builder.push(" AND transaction_date >= ").push_bind(from);
            }
            if let Some(until) = until {
                builder.push(" AND transaction_date <= ").push_bind(until);
            }
        }

        let (from, until) = filter.date.bounds(today);

        let mut count_query =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM account_transaction");
        push_filter(&mut count_query, filter, from, until);
        let count = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self.connection)
            .await?;

        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {TRANSACTION_COLUMNS} FROM account_transaction"
        ));
        push_filter(&mut query, filter, from, until);
        query.push(match filter.order {
            TransactionOrder::Date => " ORDER BY transaction_date DESC, id DESC",
            TransactionOrder::Amount => " ORDER BY amount DESC, id DESC",
        });
        query
            .push(" LIMIT ")
            .push_bind(to_i64(limit))
            .push(" OFFSET ")
            .push_bind(to_i64(offset));

        let rows = query
            .build_query_as::<TransactionRow>()
            .fetch_all(&mut *self.connection)
            .await?;
        let transactions = rows
            .into_iter()
            .map(Transaction::try_from)
            .collect::<ServiceResult<Vec<_>>>()?;

        Ok((count.max(0) as u64, transactions))
    }

    pub async fn get_transaction_by_id(&mut self, id: u64) -> ServiceResult<Option<Transaction>> {
        select_transaction(&mut *self.connection, id, false).await
    }

    /// Records the transaction and applies it to the balance of its account.
    pub async fn create_transaction(
        &mut self,
        transaction: Transaction,
    ) -> ServiceResult<Transaction> {
        let mut tx = self.connection.begin().await?;
        let transaction = insert_transaction(&mut *tx, &transaction).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    /// Replaces a transaction. The effect of the stored version is reversed on its account
    /// before the new version is applied, so moving between accounts keeps both balances right.
    pub async fn update_transaction(
        &mut self,
        transaction: Transaction,
    ) -> ServiceResult<Transaction> {
        let mut tx = self.connection.begin().await?;

        let Some(previous) = select_transaction(&mut *tx, transaction.id, true).await? else {
            return Err(ServiceError::NotFound);
        };
        adjust_balance(&mut *tx, previous.account_id, -previous.balance_effect()).await?;

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
                UPDATE account_transaction SET
                    transaction_type = $2, account_id = $3, amount = $4, category_id = $5,
                    description = $6, transaction_date = $7, updated_at = now()
                WHERE id = $1
                RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(to_i64(transaction.id))
        .bind(transaction.transaction_type.code())
        .bind(to_i64(transaction.account_id))
        .bind(transaction.amount)
        .bind(transaction.category_id.map(to_i64))
        .bind(&transaction.description)
        .bind(transaction.transaction_date)
        .fetch_one(&mut *tx)
        .await?;
        let updated = Transaction::try_from(row)?;

        adjust_balance(&mut *tx, updated.account_id, updated.balance_effect()).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Deletes the transaction and reverses its effect on the account balance.
    pub async fn delete_transaction(&mut self, id: u64) -> ServiceResult<bool> {
        let mut tx = self.connection.begin().await?;

        let Some(previous) = select_transaction(&mut *tx, id, true).await? else {
            return Ok(false);
        };
        sqlx::query("DELETE FROM account_transaction WHERE id = $1")
            .bind(to_i64(id))
            .execute(&mut *tx)
            .await?;
        adjust_balance(&mut *tx, previous.account_id, -previous.balance_effect()).await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Books the total of a handed or delivered order as income on the first active account,
    /// creating a cash account if there is none. Orders are booked at most once.
    pub async fn book_order_income(
        &mut self,
        order: &Order,
        amount: Decimal,
        user_id: Option<u64>,
        today: NaiveDate,
    ) -> ServiceResult<Option<Transaction>> {
        let mut tx = self.connection.begin().await?;

        let already_booked: bool = sqlx::query_scalar(
            r#"
                SELECT EXISTS (
                    SELECT 1 FROM account_transaction
                    WHERE transaction_type = $1 AND (description = $2 OR description LIKE $3)
                )
            "#,
        )
        .bind(TransactionType::Income.code())
        .bind(order.income_description_prefix())
        .bind(format!("{} - %", order.income_description_prefix()))
        .fetch_one(&mut *tx)
        .await?;
        if already_booked {
            return Ok(None);
        }

        let account_id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM account WHERE is_active ORDER BY id LIMIT 1 FOR UPDATE",
        )
        .fetch_optional(&mut *tx)
        .await?;
        let account_id = match account_id {
            Some(id) => id,
            None => {
                sqlx::query_scalar(
                    r#"
                        INSERT INTO account (name, balance, account_type, is_active)
                        VALUES ('Default Account', 0, $1, TRUE)
                        RETURNING id
                    "#,
                )
                .bind(AccountType::Cash.code())
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let now = Utc::now();
        let transaction = Transaction {
            id: 0,
            transaction_type: TransactionType::Income,
            account_id: to_u64(account_id),
            amount,
            category_id: None,
            description: order.income_description(),
            transaction_date: today,
            created_by: user_id,
            created_at: now,
            updated_at: now,
        };
        let transaction = insert_transaction(&mut *tx, &transaction).await?;

        tx.commit().await?;
        Ok(Some(transaction))
    }
}
