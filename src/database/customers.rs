use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::error::ServiceResult;
use crate::models::{Address, Customer};

use super::{to_i64, to_u64, DatabaseConnection};

#[derive(Debug, FromRow)]
struct CustomerRow {
    id: i64,
    first_name: String,
    last_name: String,
    phone_number: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Self {
            id: to_u64(row.id),
            first_name: row.first_name,
            last_name: row.last_name,
            phone_number: row.phone_number,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AddressRow {
    id: i64,
    customer_id: i64,
    street: String,
    reference: String,
    is_primary: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Self {
            id: to_u64(row.id),
            customer_id: to_u64(row.customer_id),
            street: row.street,
            reference: row.reference,
            is_primary: row.is_primary,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const CUSTOMER_COLUMNS: &str = "id, first_name, last_name, phone_number, created_at, updated_at";
const ADDRESS_COLUMNS: &str =
    "id, customer_id, street, reference, is_primary, created_at, updated_at";

impl DatabaseConnection {
    pub async fn get_all_customers(&mut self) -> ServiceResult<Vec<Customer>> {
        let rows = sqlx::query_as::<_, CustomerRow>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customer ORDER BY id"
        ))
        .fetch_all(&mut *self.connection)
        .await?;

        Ok(rows.into_iter().map(Customer::from).collect())
    }

    /// Customers whose first or last name contains `name`, ignoring case.
    pub async fn get_customers_by_name(&mut self, name: &str) -> ServiceResult<Vec<Customer>> {
        let pattern = format!("%{}%", name);
        let rows = sqlx::query_as::<_, CustomerRow>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customer WHERE first_name ILIKE $1 OR last_name ILIKE $1 ORDER BY id"
        ))
        .bind(pattern)
        .fetch_all(&mut *self.connection)
        .await?;

        Ok(rows.into_iter().map(Customer::from).collect())
    }

    pub async fn get_customer_by_id(&mut self, id: u64) -> ServiceResult<Option<Customer>> {
        let row = sqlx::query_as::<_, CustomerRow>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customer WHERE id = $1"
        ))
        .bind(to_i64(id))
        .fetch_optional(&mut *self.connection)
        .await?;

        Ok(row.map(Customer::from))
    }

    pub async fn store_customer(&mut self, customer: Customer) -> ServiceResult<Customer> {
        let row = if customer.id == 0 {
            sqlx::query_as::<_, CustomerRow>(&format!(
                r#"
                    INSERT INTO customer (first_name, last_name, phone_number)
                    VALUES ($1, $2, $3)
                    RETURNING {CUSTOMER_COLUMNS}
                "#
            ))
            .bind(&customer.first_name)
            .bind(&customer.last_name)
            .bind(&customer.phone_number)
            .fetch_one(&mut *self.connection)
            .await?
        } else {
            sqlx::query_as::<_, CustomerRow>(&format!(
                r#"
                    UPDATE customer SET first_name = $2, last_name = $3, phone_number = $4, updated_at = now()
                    WHERE id = $1
                    RETURNING {CUSTOMER_COLUMNS}
                "#
            ))
            .bind(to_i64(customer.id))
            .bind(&customer.first_name)
            .bind(&customer.last_name)
            .bind(&customer.phone_number)
            .fetch_one(&mut *self.connection)
            .await?
        };

        Ok(row.into())
    }

    /// Deletes the customer together with its addresses and orders.
    pub async fn delete_customer(&mut self, id: u64) -> ServiceResult<bool> {
        let result = sqlx::query("DELETE FROM customer WHERE id = $1")
            .bind(to_i64(id))
            .execute(&mut *self.connection)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_all_addresses(&mut self) -> ServiceResult<Vec<Address>> {
        let rows = sqlx::query_as::<_, AddressRow>(&format!(
            "SELECT {ADDRESS_COLUMNS} FROM address ORDER BY id"
        ))
        .fetch_all(&mut *self.connection)
        .await?;

        Ok(rows.into_iter().map(Address::from).collect())
    }

    pub async fn get_addresses_by_customer(
        &mut self,
        customer_id: u64,
    ) -> ServiceResult<Vec<Address>> {
        let rows = sqlx::query_as::<_, AddressRow>(&format!(
            "SELECT {ADDRESS_COLUMNS} FROM address WHERE customer_id = $1 ORDER BY is_primary DESC, id"
        ))
        .bind(to_i64(customer_id))
        .fetch_all(&mut *self.connection)
        .await?;

        Ok(rows.into_iter().map(Address::from).collect())
    }

    pub async fn get_address_by_id(&mut self, id: u64) -> ServiceResult<Option<Address>> {
        let row = sqlx::query_as::<_, AddressRow>(&format!(
            "SELECT {ADDRESS_COLUMNS} FROM address WHERE id = $1"
        ))
        .bind(to_i64(id))
        .fetch_optional(&mut *self.connection)
        .await?;

        Ok(row.map(Address::from))
    }

    pub async fn store_address(&mut self, address: Address) -> ServiceResult<Address> {
        let row = if address.id == 0 {
            sqlx::query_as::<_, AddressRow>(&format!(
                r#"
                    INSERT INTO address (customer_id, street, reference, is_primary)
                    VALUES ($1, $2, $3, $4)
                    RETURNING {ADDRESS_COLUMNS}
                "#
            ))
            .bind(to_i64(address.customer_id))
            .bind(&address.street)
            .bind(&address.reference)
            .bind(address.is_primary)
            .fetch_one(&mut *self.connection)
            .await?
        } else {
            sqlx::query_as::<_, AddressRow>(&format!(
                r#"
                    UPDATE address SET customer_id = $2, street = $3, reference = $4, is_primary = $5,
                        updated_at = now()
                    WHERE id = $1
                    RETURNING {ADDRESS_COLUMNS}
                "#
            ))
            .bind(to_i64(address.id))
            .bind(to_i64(address.customer_id))
            .bind(&address.street)
            .bind(&address.reference)
            .bind(address.is_primary)
            .fetch_one(&mut *self.connection)
            .await?
        };

        Ok(row.into())
    }

    pub async fn delete_address(&mut self, id: u64) -> ServiceResult<bool> {
        let result = sqlx::query("DELETE FROM address WHERE id = $1")
            .bind(to_i64(id))
            .execute(&mut *self.connection)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
