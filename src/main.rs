use std::sync::Arc;

use aide::openapi::OpenApi;
use axum::Extension;
use base64::engine::general_purpose;
use base64::Engine;
use clap::{Parser, Subcommand};
use log::{error, info};
use rand::RngCore;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::database::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::sunat::{SunatClient, SunatConfig};

mod api;
mod database;
mod docs;
mod env;
mod error;
mod models;
mod pdf;
mod request_state;
mod sunat;

#[derive(Debug, Parser)]
#[command(version, about = "Point of sale backend with electronic invoicing")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the web server
    Run,
    /// Create a user, or replace its token, and print the new token
    CreateUser { username: String },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run().await,
        Command::CreateUser { username } => create_user(&username).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn connect() -> ServiceResult<AppState> {
    let sunat = SunatClient::new(SunatConfig::from_env())?;
    AppState::connect(env::DATABASE_URL.as_str(), sunat).await
}

async fn run() -> ServiceResult<()> {
    let app_state = connect().await?;

    aide::gen::on_error(|error| {
        error!("{error}");
    });
    aide::gen::extract_schemas(true);

    let mut api = OpenApi::default();

    let app = api::router(app_state.clone())
        .nest_api_service("/docs", docs::docs_routes())
        .finish_api_with(&mut api, docs::api_docs)
        .layer(Extension(Arc::new(api)))
        .merge(api::ws_router(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let address = format!("{}:{}", env::API_HOST.as_str(), env::API_PORT.as_str());
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::InternalServerError(e.to_string()))?;
    info!("Listening on http://{}", address);

    axum::serve(listener, app)
        .await
        .map_err(|e| ServiceError::InternalServerError(e.to_string()))
}

async fn create_user(username: &str) -> ServiceResult<()> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ServiceError::BadRequest("username must not be empty".to_owned()));
    }

    let mut data = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut data);
    let token = general_purpose::URL_SAFE_NO_PAD.encode(data);

    let app_state = connect().await?;
    let mut db = app_state.connection().await?;
    let user = db.create_user(username, &token).await?;

    info!("Created user {} (id {})", user.username, user.id);
    println!("{}", token);
    Ok(())
}
