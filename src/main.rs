use crate::cluster::KubeCluster;
use crate::defaults::DefaultsSource;
use crate::state::ControllerContext;
use crate::templates::TemplateSet;
use std::env;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod cluster;
mod config;
mod console;
mod containers;
mod controller;
mod converge;
mod crd;
mod defaults;
mod environment;
mod error;
mod extension;
mod logging;
mod resources;
mod state;
mod status;
mod templates;
#[cfg(test)]
mod testing;
mod webserver;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = env::var("KAPPNAV_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = config::load_config(&config_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    info!("Starting kappnav-operator {}", env!("CARGO_PKG_VERSION"));

    let templates = TemplateSet::load(&config.templates)?;
    info!("Loaded {} config map templates", templates.len());

    let client = controller::create_client().await?;
    let ctx = Arc::new(ControllerContext {
        cluster: KubeCluster::new(client.clone()),
        defaults: DefaultsSource::File(config.defaults.clone()),
        kam_defaults: config.kam_defaults.clone().map(DefaultsSource::File),
        templates,
        extension: None,
    });

    let ready = Arc::new(AtomicBool::new(false));
    let shutdown = CancellationToken::new();
    let app = webserver::create_app(ready.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
    });

    let result = controller::run(client, ctx, config.watch_namespace.as_deref(), ready).await;
    shutdown.cancel();
    if let Err(e) = server.await? {
        error!("Webserver failed: {}", e);
    }
    result
}
