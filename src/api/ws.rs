use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use axum_extra::TypedHeader;
use futures::{SinkExt, StreamExt};
use headers::authorization::Bearer;
use headers::Authorization;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::database::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::models::OrderUpdate;

/// Websocket routes are not part of the openapi document.
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/ws/orders", get(subscribe_order_updates))
        .with_state(app_state)
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscribeQuery {
    /// Browsers cannot set headers on websocket requests.
    pub token: Option<String>,
}

pub fn order_update_message(update: &OrderUpdate) -> Value {
    json!({
        "type": "order_update",
        "order_id": update.order_id,
        "status": update.status.code(),
        "action": update.action.code(),
    })
}

async fn subscribe_order_updates(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    authorization: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<SubscribeQuery>,
) -> ServiceResult<Response> {
    let token = match authorization {
        Some(TypedHeader(Authorization(bearer))) => Some(bearer.token().to_owned()),
        None => query.token,
    };
    let Some(token) = token else {
        return Err(ServiceError::Unauthorized(
            "Authentication credentials were not provided.",
        ));
    };

    let session = {
        let mut db = app_state.connection().await?;
        db.get_session_by_token(&token).await?
    };
    let Some(session) = session else {
        return Err(ServiceError::Unauthorized("Invalid token."));
    };

    let updates = app_state.order_updates.subscribe();
    info!("{} subscribed to order updates", session.user.username);

    Ok(ws.on_upgrade(move |socket| forward_order_updates(socket, updates)))
}

async fn forward_order_updates(socket: WebSocket, mut updates: broadcast::Receiver<OrderUpdate>) {
    let (mut sender, mut incoming) = socket.split();

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => {
                    let message = order_update_message(&update).to_string();
                    if let Err(e) = sender.send(Message::Text(message)).await {
                        warn!("Dropping order update subscriber: {}", e);
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Order update subscriber lagged behind, skipped {} updates", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            message = incoming.next() => match message {
                // client messages carry no meaning
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{OrderAction, OrderStatus};

    use super::*;

    #[test]
    fn test_order_update_message() {
        let message = order_update_message(&OrderUpdate {
            order_id: 42,
            status: OrderStatus::InKitchen,
            action: OrderAction::Updated,
        });

        assert_eq!(
            message,
            json!({
                "type": "order_update",
                "order_id": 42,
                "status": "IK",
                "action": "updated",
            })
        );
    }
}
