use admissions_gateway::{config, observability, server};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load()?;
    observability::init(&config.observability)?;

    tracing::info!(
        name = %config.app.name,
        version = %config.app.version,
        environment = %config.app.environment,
        "Starting gateway"
    );

    server::run(config).await
}
