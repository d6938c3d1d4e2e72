use salvo::prelude::*;
use serde_json::json;
use tracing::warn;

use crate::web::{metrics::Metrics, web_state};

#[handler]
pub async fn health_check(depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let database = match state.services.db().ping().await {
        Ok(()) => "ok",
        Err(err) => {
            warn!("health check could not reach the database: {}", err);
            "error"
        }
    };

    res.render(Json(json!({
        "status": "ok",
        "database": database,
    })));
}

#[handler]
pub async fn get_status(depot: &mut Depot, res: &mut Response) {
    let state = web_state(depot);
    let queue = match state.services.messaging.queue_counts().await {
        Ok(counts) => json!(counts),
        Err(err) => {
            warn!("status could not count the outbound queue: {}", err);
            json!(null)
        }
    };
    let last_tick = state.forwarder.as_ref().and_then(|f| f.last_tick());

    res.render(Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "process_uptime_seconds": Metrics::uptime_seconds(),
        "database": state.services.db().db_type().as_str(),
        "queue": queue,
        "forwarder": {
            "enabled": state.forwarder.is_some(),
            "last_tick": last_tick,
        },
    })));
}
