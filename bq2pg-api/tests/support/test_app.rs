#![allow(dead_code)]

use bq2pg_api::{config::ApiConfig, startup::run};
use bq2pg_config::{Environment, load_config};
use bq2pg_telemetry::metrics::init_metrics_handle;
use serde_json::Value;
use std::io;
use std::net::TcpListener;

pub struct TestApp {
    pub address: String,
    pub api_client: reqwest::Client,
    server_handle: tokio::task::JoinHandle<io::Result<()>>,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

impl TestApp {
    pub async fn replicate(&self, body: &Value) -> reqwest::Response {
        self.api_client
            .post(format!("{}/replicate", &self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn replicate_raw(&self, body: &'static str) -> reqwest::Response {
        self.api_client
            .post(format!("{}/replicate", &self.address))
            .header("content-type", "text/plain")
            .body(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.api_client
            .get(format!("{}{path}", &self.address))
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

pub async fn spawn_test_app() -> TestApp {
    // We set the environment to dev.
    Environment::Dev.set();

    let base_address = "127.0.0.1";
    let listener =
        TcpListener::bind(format!("{base_address}:0")).expect("failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let config = load_config::<ApiConfig>().expect("Failed to read configuration");
    let metrics_handle = init_metrics_handle().expect("failed to install metrics recorder");

    let server = run(config, listener, metrics_handle)
        .await
        .expect("failed to bind address");

    let server_handle = tokio::spawn(server);

    TestApp {
        address: format!("http://{base_address}:{port}"),
        api_client: reqwest::Client::new(),
        server_handle,
    }
}
