use std::sync::Arc;

use log::info;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tokio::sync::broadcast;

use crate::error::{ServiceError, ServiceResult};
use crate::models::OrderUpdate;
use crate::sunat::SunatClient;

mod accounting;
mod catalog;
mod customers;
mod documents;
mod orders;
mod users;

pub use orders::BillingFilter;

#[cfg(test)]
mod tests;

/// Number of order updates buffered for slow websocket subscribers.
const ORDER_UPDATE_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool<Postgres>,
    pub sunat: Arc<SunatClient>,
    pub order_updates: broadcast::Sender<OrderUpdate>,
}

impl AppState {
    pub async fn connect(url: &str, sunat: SunatClient) -> ServiceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| ServiceError::InternalServerError(e.to_string()))?;
        info!("Database migrations applied");

        Ok(Self::from_pool(pool, sunat))
    }

    pub fn from_pool(pool: Pool<Postgres>, sunat: SunatClient) -> Self {
        let (order_updates, _) = broadcast::channel(ORDER_UPDATE_CAPACITY);
        Self {
            pool,
            sunat: Arc::new(sunat),
            order_updates,
        }
    }

    pub async fn connection(&self) -> ServiceResult<DatabaseConnection> {
        let connection = self.pool.acquire().await?;
        Ok(DatabaseConnection { connection })
    }

    /// Publishes an order change. Having no subscribers is not an error.
    pub fn publish_order_update(&self, update: OrderUpdate) {
        let _ = self.order_updates.send(update);
    }
}

pub struct DatabaseConnection {
    pub connection: PoolConnection<Postgres>,
}

/// Converts a database id into the unsigned id used by the models.
fn to_u64(id: i64) -> u64 {
    id as u64
}

fn to_i64(id: u64) -> i64 {
    id as i64
}
