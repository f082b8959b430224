use std::sync::Arc;

use aide::{
    axum::{
        routing::{get, get_with},
        ApiRouter, IntoApiResponse,
    },
    openapi::{OpenApi, Tag},
    redoc::Redoc,
    transform::TransformOpenApi,
};
use axum::{response::IntoResponse, Extension, Json};

fn tag(name: &str, description: &str) -> Tag {
    Tag {
        name: name.into(),
        description: Some(description.into()),
        ..Default::default()
    }
}

pub fn api_docs(api: TransformOpenApi) -> TransformOpenApi {
    api.title("Taypa POS")
        .summary("Point of sale backend with electronic invoicing")
        .description(include_str!("../README.md"))
        .tag(tag("categories", "Dish categories"))
        .tag(tag("dishes", "Dishes and their images"))
        .tag(tag("customers", "Customer management"))
        .tag(tag("addresses", "Delivery addresses of customers"))
        .tag(tag("orders", "Orders, their items and their lifecycle"))
        .tag(tag("accounting", "Accounts and transactions"))
        .tag(tag("documents", "Electronic invoices and tickets"))
        .security_scheme(
            "Token",
            aide::openapi::SecurityScheme::Http {
                scheme: "bearer".into(),
                bearer_format: None,
                description: Some("Token printed by `taypa-pos create-user`.".into()),
                extensions: Default::default(),
            },
        )
}

pub fn docs_routes() -> ApiRouter {
    // The redoc route gets its `text/html` response inferred, other routes
    // document their responses explicitly.
    aide::gen::infer_responses(true);

    let router = ApiRouter::new()
        .api_route_with(
            "/",
            get_with(
                Redoc::new("/docs/api.json")
                    .with_title("Taypa POS")
                    .axum_handler(),
                |op| op.description("This documentation page."),
            ),
            |p| p.security_requirement("Token"),
        )
        .route("/api.json", get(serve_docs));

    aide::gen::infer_responses(false);

    router
}

async fn serve_docs(Extension(api): Extension<Arc<OpenApi>>) -> impl IntoApiResponse {
    Json(api).into_response()
}
