use std::fs;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::api::routes::create_router;
use crate::api::state::AppState;

const PID_FILE: &str = "/tmp/tsbx-controller.pid";

/// Binds and serves the REST API, mirroring the PID-file + Ctrl-C cleanup
/// convention the rest of this codebase's long-running processes use.
pub async fn serve(state: Arc<AppState>, bind_addr: &str) -> Result<()> {
    let pid = process::id();
    if let Err(e) = fs::write(PID_FILE, pid.to_string()) {
        warn!("could not write PID file: {e}");
    }

    ctrlc::set_handler(move || {
        info!("shutting down tsbx-controller...");
        let _ = fs::remove_file(PID_FILE);
        std::process::exit(0);
    })?;

    info!(pid, "starting tsbx-controller REST API");

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(bind_addr, "listening, endpoint http://{}/api/v0", bind_addr);

    let result = axum::serve(listener, app).await;
    let _ = fs::remove_file(PID_FILE);
    result?;
    Ok(())
}
