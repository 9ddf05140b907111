use std::sync::Arc;

use aide::{
    axum::{
        routing::{get, get_with},
        ApiRouter, IntoApiResponse,
    },
    openapi::{ApiKeyLocation, OpenApi, SecurityScheme, Tag},
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
    api.title("smart-cart-server")
        .summary("QR login handshake and NFC payments for smart carts")
        .description(include_str!("../README.md"))
        .tag(tag("qr-auth", "Phone authorizes a cart tablet"))
        .tag(tag("auth", "Current user and NFC card linking"))
        .tag(tag("nfc", "Reader taps, payments and the display feed"))
        .tag(tag("checkout", "Interactive checkout and transaction history"))
        .security_scheme(
            "SessionToken",
            SecurityScheme::Http {
                scheme: "bearer".into(),
                bearer_format: None,
                description: Some("Bearer token from a QR login.".into()),
                extensions: Default::default(),
            },
        )
        .security_scheme(
            "QrSecret",
            SecurityScheme::ApiKey {
                location: ApiKeyLocation::Header,
                name: "X-QR-Secret".into(),
                description: Some("Secret returned when the QR session was created.".into()),
                extensions: Default::default(),
            },
        )
}

pub fn docs_routes() -> ApiRouter {
    // The redoc page is plain html, let aide infer that
    aide::gen::infer_responses(true);

    let router = ApiRouter::new()
        .api_route(
            "/",
            get_with(
                Redoc::new("/docs/api.json")
                    .with_title("smart-cart-server")
                    .axum_handler(),
                |op| op.description("This documentation page."),
            ),
        )
        .route("/api.json", get(serve_docs));

    aide::gen::infer_responses(false);

    router
}

async fn serve_docs(Extension(api): Extension<Arc<OpenApi>>) -> impl IntoApiResponse {
    Json(api.as_ref()).into_response()
}
