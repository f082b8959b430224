use aide::axum::ApiRouter;
use axum::Router;

use crate::database::AppState;

mod accounts;
mod addresses;
mod categories;
mod customers;
mod dishes;
mod documents;
mod order_items;
mod orders;
mod transactions;
mod ws;

pub mod pagination;
pub mod utils;

/// Restaurant endpoints under `/api`, invoicing endpoints under `/taxes`.
pub fn router(app_state: AppState) -> ApiRouter {
    let api = ApiRouter::new()
        .merge(categories::router(app_state.clone()))
        .merge(dishes::router(app_state.clone()))
        .merge(customers::router(app_state.clone()))
        .merge(addresses::router(app_state.clone()))
        .merge(orders::router(app_state.clone()))
        .merge(order_items::router(app_state.clone()))
        .merge(accounts::router(app_state.clone()))
        .merge(transactions::router(app_state.clone()));

    ApiRouter::new()
        .nest_api_service("/api", api)
        .nest_api_service("/taxes", documents::router(app_state))
}

pub fn ws_router(app_state: AppState) -> Router {
    ws::router(app_state)
}
