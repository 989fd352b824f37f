use axum::{
    extract::FromRef,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use api_state::ApiState;
use routes::{chat::chat, health::health};

pub mod api_state;
pub mod error;
mod routes;

/// Router for the chat API
pub fn api_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .layer(cors_layer(app_state))
}

/// Allow the configured frontend origins plus any host under the
/// deployment-domain suffix (preview deploys get fresh hostnames).
fn cors_layer(app_state: &ApiState) -> CorsLayer {
    let allowed = app_state.config.allowed_origins();
    let suffix = app_state.config.deployment_domain_suffix.clone();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin) = origin.to_str() else {
                return false;
            };
            if allowed.iter().any(|candidate| candidate == origin) {
                return true;
            }
            origin
                .strip_prefix("https://")
                .or_else(|| origin.strip_prefix("http://"))
                .map(|host| host.trim_end_matches('/'))
                .is_some_and(|host| host.ends_with(&suffix))
        }))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
