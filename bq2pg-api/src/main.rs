use bq2pg_api::{config::ApiConfig, startup::Application};
use bq2pg_config::{Environment, load_config};
use bq2pg_telemetry::init_tracing;
use bq2pg_telemetry::metrics::init_metrics_handle;
use std::sync::Arc;
use tracing::info;

fn main() -> anyhow::Result<()> {
    // Initialize tracing from the binary name
    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    // Initialize Sentry before the async runtime starts
    let _sentry_guard = init_sentry()?;

    actix_web::rt::System::new().block_on(async_main())?;

    Ok(())
}

async fn async_main() -> anyhow::Result<()> {
    let config = load_config::<ApiConfig>()?;
    config.validate()?;
    log_config(&config);

    let metrics_handle = init_metrics_handle()?;
    let application = Application::build(config, metrics_handle).await?;
    info!(port = application.port(), "replication service listening");
    application.run_until_stopped().await?;

    Ok(())
}

fn init_sentry() -> anyhow::Result<Option<sentry::ClientInitGuard>> {
    if let Ok(config) = load_config::<ApiConfig>()
        && let Some(sentry_config) = &config.sentry
    {
        info!("initializing sentry with supplied dsn");

        let environment = Environment::load()?;
        let guard = sentry::init(sentry::ClientOptions {
            dsn: Some(sentry_config.dsn.parse()?),
            environment: Some(environment.to_string().into()),
            traces_sample_rate: 1.0,
            integrations: vec![Arc::new(
                sentry::integrations::panic::PanicIntegration::new(),
            )],
            ..Default::default()
        });

        sentry::configure_scope(|scope| {
            scope.set_tag("service", "bq2pg-api");
        });

        return Ok(Some(guard));
    }

    info!("sentry not configured, skipping initialization");

    Ok(None)
}

fn log_config(config: &ApiConfig) {
    info!(
        host = config.application.host,
        port = config.application.port,
        admin_database = config.destination.admin_database,
        max_connections = config.destination.max_connections,
        tls_enabled = config.destination.tls.enabled,
        "replication service options",
    );
}
