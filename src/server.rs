use std::sync::Arc;

use aide::axum::ApiRouter;
use aide::openapi::OpenApi;
use axum::{Extension, Router};
use log::info;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::database::AppState;
use crate::docs::{api_docs, docs_routes};
use crate::env;
use crate::error::{ServiceError, ServiceResult};

/// Assemble the api under `/api/v1` and its documentation under `/docs`
pub fn app(app_state: AppState) -> Router {
    let mut api = OpenApi::default();

    ApiRouter::new()
        .nest_api_service("/api/v1", crate::api::router(app_state))
        .nest_api_service("/docs", docs_routes())
        .finish_api_with(&mut api, api_docs)
        .layer(Extension(Arc::new(api)))
        .layer(CorsLayer::permissive())
}

pub async fn start_server(app_state: AppState) -> ServiceResult<()> {
    let address = format!("{}:{}", env::API_HOST.as_str(), env::API_PORT.as_str());
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::InternalServerError(format!("Could not bind {address}: {e}")))?;

    info!("Start http server at http://{}", address);
    info!("Api documentation at http://{}/docs/", address);

    axum::serve(listener, app(app_state))
        .await
        .map_err(|e| ServiceError::InternalServerError(format!("Server error: {e}")))
}
