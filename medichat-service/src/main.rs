use medichat_service::service::{CHAT_ROUTE, EXTRACT_ROUTE};
use medichat_service::telemetry::init_tracing;
use medichat_service::{ServiceConfig, create_app};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let app = create_app(&config);
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("MediChat service starting on {}", addr);
    info!(
        index = %config.scope.collection,
        namespace = %config.scope.namespace,
        top_k = config.scope.top_k,
        model = %config.gemini_model,
        "Retrieval and generation configured"
    );
    info!("Health check endpoint: http://{}/health", addr);
    info!("Extraction endpoint: POST http://{}{}", addr, EXTRACT_ROUTE);
    info!("Chat endpoint: POST http://{}{}", addr, CHAT_ROUTE);

    axum::serve(listener, app).await?;

    Ok(())
}
