use std::sync::Arc;

use api_router::{api_routes, api_state::ApiState};
use axum::Router;
use chat_pipeline::{memory::InMemoryConversationStore, Chatbot};
use common::{
    storage::qdrant::QdrantStore,
    utils::config::get_config,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let store = Arc::new(QdrantStore::new(
        &config.qdrant_api_url,
        config.qdrant_api_key.clone(),
        &config.qdrant_collection,
    ));
    let memory = Arc::new(InMemoryConversationStore::new(
        config.session_timeout_minutes,
    ));

    // The server still comes up when engine construction fails (bad
    // provider config, for instance) so health can report what went wrong.
    let api_state = match Chatbot::new(config.clone(), store, memory) {
        Ok(chatbot) => {
            info!(
                retrieval_mode = %config.retrieval_mode,
                conversational = config.conversational_mode,
                "Chatbot initialized"
            );
            ApiState::new(config.clone(), Some(Arc::new(chatbot)))
        }
        Err(err) => {
            error!(error = %err, "Chatbot initialization failed");
            ApiState::with_init_error(config.clone(), err.to_string())
        }
    };

    // Create Axum router
    let app = Router::new()
        .nest("/api", api_routes(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
