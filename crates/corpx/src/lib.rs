//! 🏢 corpx: batch ingestion of company records into a document store.
//!
//! The layers, bottom to top:
//! - [`backends`]: a [`backends::CompanyStore`] per store, behind one enum.
//! - [`engine`]: the four operations, each under its own deadline, each with
//!   its own error kind.
//! - [`transport`]: axum routes that translate HTTP into engine calls and
//!   engine results into the JSON envelope.
//!
//! [`run`] wires them together and owns the process lifecycle: open the
//! store, serve until a signal, drain, close the store exactly once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

pub mod app_config;
pub mod backends;
pub mod common;
pub mod engine;
pub mod errors;
pub mod transport;

use crate::app_config::AppConfig;
use crate::engine::{CompanyEngine, Deadlines};
use crate::transport::AppState;

/// 🚀 Open the store, serve HTTP until SIGINT/SIGTERM, then shut down cleanly.
///
/// Fails fast (before binding) if the store can't be reached. Once serving,
/// the store handle is closed exactly once no matter how the server ends.
pub async fn run(config: AppConfig) -> Result<()> {
    let store = backends::open(&config.store, &config.runtime)
        .await
        .context("💀 Could not open the document store. Nothing to serve without it.")?;
    let engine = Arc::new(CompanyEngine::new(
        store,
        Deadlines::from(&config.deadlines),
    ));

    let listener = match TcpListener::bind(&config.server.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            if let Err(close_err) = engine.close().await {
                warn!("⚠️ Store close after failed bind also failed: {:#}", close_err);
            }
            return Err(err).context(format!(
                "💀 Could not bind '{}'. Is something else already camping on that port?",
                config.server.bind_addr
            ));
        }
    };

    let served = serve(
        listener,
        Arc::clone(&engine),
        config.server.shutdown_grace(),
        shutdown_signal(),
    )
    .await;
    let closed = engine.close().await;

    served?;
    closed.context("💀 The store refused to let go of its connections")?;
    info!("👋 corpx stopped");
    Ok(())
}

/// 🌐 Serve the router on `listener` until `shutdown` resolves, then wait up
/// to `grace` for in-flight requests to finish.
///
/// Returns once the server drained or the grace period ran out, whichever
/// comes first. Requests still running at that point are not cancelled; the
/// caller's shutdown proceeds around them. Does not close the engine; that
/// stays with whoever opened it.
pub async fn serve<F>(
    listener: TcpListener,
    engine: Arc<CompanyEngine>,
    grace: Duration,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .context("💀 The listener forgot its own address")?;
    let app = transport::router(AppState::new(engine));

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                // a dropped sender means stop too
                let _ = stop_rx.await;
            })
            .await
    });
    info!("🚀 corpx listening on http://{}", addr);

    tokio::select! {
        joined = &mut server => {
            // -- the server ended without being asked to
            return match joined {
                Ok(result) => result.context("💀 HTTP server stopped on its own"),
                Err(join_err) => Err(join_err).context("💀 HTTP server task panicked"),
            };
        }
        () = shutdown => {
            info!("🛑 Shutdown requested. Draining in-flight requests for up to {:?}", grace);
        }
    }

    let _ = stop_tx.send(());
    match tokio::time::timeout(grace, &mut server).await {
        Ok(Ok(result)) => result.context("💀 HTTP server failed while draining")?,
        Ok(Err(join_err)) => {
            return Err(join_err).context("💀 HTTP server task panicked while draining");
        }
        Err(_) => {
            // -- aborting stops the accept loop only; connection tasks finish on their own
            warn!(
                "⏱️ Grace period of {:?} ran out with requests still in flight. No longer waiting on them.",
                grace
            );
            server.abort();
        }
    }
    Ok(())
}

/// 🛑 Resolves on the first SIGINT (Ctrl-C) or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("💀 Could not listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("💀 Could not listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryStore, StoreBackend};
    use crate::common::Company;
    use serde_json::Value;

    #[tokio::test]
    async fn the_one_where_the_server_answers_then_leaves_politely() -> Result<()> {
        let store = InMemoryStore::new();
        let engine = Arc::new(CompanyEngine::new(
            StoreBackend::InMemory(store.clone()),
            Deadlines::default(),
        ));
        engine
            .process_batch(&[Company::new("Acme", "1 Road", false)])
            .await?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (trigger, stop) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            listener,
            Arc::clone(&engine),
            Duration::from_secs(5),
            async move {
                let _ = stop.await;
            },
        ));

        let client = reqwest::Client::new();
        let health = client.get(format!("http://{addr}/health")).send().await?;
        assert_eq!(health.status().as_u16(), 200);

        let listing = client
            .get(format!("http://{addr}/api/v1/companies"))
            .send()
            .await?;
        let body: Value = serde_json::from_str(&listing.text().await?)?;
        assert_eq!(body["data"][0]["name"], "Acme");

        let _ = trigger.send(());
        server.await??;

        engine.close().await?;
        assert_eq!(store.close_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_stuck_request_does_not_hold_shutdown_hostage() -> Result<()> {
        use crate::app_config::RuntimeConfig;
        use crate::backends::{ElasticsearchStore, ElasticsearchStoreConfig};
        use serde_json::json;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let cluster = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "green" })))
            .mount(&cluster)
            .await;
        Mock::given(method("PUT"))
            .and(path("/companies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
            .mount(&cluster)
            .await;
        Mock::given(method("POST"))
            .and(path("/companies/_search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "hits": { "hits": [] } }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&cluster)
            .await;

        let store = ElasticsearchStore::open(
            ElasticsearchStoreConfig {
                url: cluster.uri(),
                index: "companies".into(),
                index_prefix: None,
                username: None,
                password: None,
                api_key: None,
                refresh: "wait_for".into(),
            },
            &RuntimeConfig::default(),
        )
        .await?;
        let engine = Arc::new(CompanyEngine::new(
            StoreBackend::Elasticsearch(store),
            Deadlines::default(),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (trigger, stop) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            listener,
            Arc::clone(&engine),
            Duration::from_millis(200),
            async move {
                let _ = stop.await;
            },
        ));

        let _stuck = tokio::spawn(async move {
            reqwest::Client::new()
                .get(format!("http://{addr}/api/v1/companies"))
                .send()
                .await
        });

        // -- wait until the read is actually parked at the store
        let mut parked = false;
        for _ in 0..40 {
            let searches = cluster
                .received_requests()
                .await
                .unwrap_or_default()
                .iter()
                .filter(|request| request.url.path() == "/companies/_search")
                .count();
            if searches > 0 {
                parked = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(parked, "the read should have reached the store");

        let _ = trigger.send(());
        let finished = tokio::time::timeout(Duration::from_secs(2), server).await;
        assert!(
            matches!(finished, Ok(Ok(Ok(())))),
            "serve gives up waiting once the grace period runs out"
        );
        engine.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_taken_port_fails_the_run() {
        let squatter = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("💀 ephemeral port");
        let taken = squatter.local_addr().expect("💀 local addr").to_string();

        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "store": { "InMemory": {} },
            "server": { "bind_addr": taken },
        }))
        .expect("💀 config should deserialize");

        let err = run(config).await.expect_err("port is taken");
        assert!(format!("{err:#}").contains("Could not bind"));
    }
}
