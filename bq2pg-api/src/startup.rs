use std::net::TcpListener;

use actix_web::{App, HttpServer, dev::Server, web};
use bq2pg::clients::bigquery::install_crypto_provider_once;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing_actix_web::TracingLogger;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ApiConfig;
use crate::routes::ErrorMessage;
use crate::routes::health_check::health_check;
use crate::routes::metrics::metrics;
use crate::routes::replicate::{JobResultResponse, ReplicateRequest, replicate};

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub async fn build(
        config: ApiConfig,
        metrics_handle: PrometheusHandle,
    ) -> Result<Self, anyhow::Error> {
        let address = format!("{}:{}", config.application.host, config.application.port);
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();

        let server = run(config, listener, metrics_handle).await?;

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

pub async fn run(
    config: ApiConfig,
    listener: TcpListener,
    metrics_handle: PrometheusHandle,
) -> Result<Server, anyhow::Error> {
    install_crypto_provider_once();

    let config = web::Data::new(config);

    #[derive(OpenApi)]
    #[openapi(
        paths(
            crate::routes::health_check::health_check,
            crate::routes::metrics::metrics,
            crate::routes::replicate::replicate,
        ),
        components(schemas(ReplicateRequest, JobResultResponse, ErrorMessage))
    )]
    struct ApiDoc;

    let openapi = ApiDoc::openapi();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(
                sentry::integrations::actix::Sentry::builder()
                    .capture_server_errors(true)
                    .start_transaction(true)
                    .finish(),
            )
            .wrap(TracingLogger::default())
            .service(health_check)
            .service(metrics)
            .service(replicate)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi.clone()),
            )
            .app_data(config.clone())
            .app_data(web::ThinData(metrics_handle.clone()))
    })
    .listen(listener)?
    .run();

    Ok(server)
}
