//! S3-compatible object storage server entry point: loads configuration,
//! opens the metadata store and object store, runs the startup orphan
//! sweep, then serves the S3 wire protocol until asked to stop.

use std::sync::Arc;

use axum::middleware;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use s3_core::api::auth::sigv4_auth_middleware;
use s3_core::api::handlers::{self, AppState};
use s3_core::config::Config;
use s3_core::db::Repo;
use s3_core::storage::ObjectStore;
use s3_core::sweep;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        error!(error = %e, "failed to load configuration");
        std::process::exit(1);
    });

    let repo = Repo::open(&config.db_path).unwrap_or_else(|e| {
        error!(error = %e, path = %config.db_path.display(), "failed to open metadata store");
        std::process::exit(1);
    });

    let store = ObjectStore::open(config.storage_root.clone())
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, root = %config.storage_root.display(), "failed to open storage root");
            std::process::exit(1);
        });

    repo.insert_user_if_absent(&config.seed_access_key, &config.seed_secret_key)
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to seed bootstrap credentials");
            std::process::exit(1);
        });

    match sweep::run(&repo, &store).await {
        Ok(report) if report.orphan_tmp_dirs > 0 || report.orphan_object_files > 0 => {
            warn!(
                orphan_tmp_dirs = report.orphan_tmp_dirs,
                orphan_object_files = report.orphan_object_files,
                "startup sweep reconciled orphaned state"
            );
        }
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "startup sweep failed");
            std::process::exit(1);
        }
    }

    let repo = Arc::new(repo);
    let store = Arc::new(store);
    let state = AppState {
        repo: repo.clone(),
        store,
    };

    let app = handlers::router(state)
        .layer(middleware::from_fn_with_state(repo, sigv4_auth_middleware))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(config.listen_addr).await.unwrap_or_else(|e| {
        error!(error = %e, addr = %config.listen_addr, "failed to bind listen address");
        std::process::exit(1);
    });

    info!(
        addr = %config.listen_addr,
        storage_root = %config.storage_root.display(),
        db_path = %config.db_path.display(),
        "s3_core ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| error!(error = %e, "server exited with error"));
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { warn!("received Ctrl+C, initiating graceful shutdown"); }
        _ = terminate => { warn!("received SIGTERM, initiating graceful shutdown"); }
    }
}
