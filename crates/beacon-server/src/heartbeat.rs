//! `POST /api/v1/heartbeats`: liveness reports pushed by monitoring agents.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::metrics::CLIENT_HEARTBEATS_TOTAL;

/// Route agents post heartbeats to.
pub const HEARTBEAT_PATH: &str = "/api/v1/heartbeats";

/// Host details reported by an agent, for its primary and secondary hosts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostInfo {
    /// Host address.
    pub ip: String,
    /// Host name.
    pub hostname: String,
    /// Operating system description.
    pub os_info: String,
    /// CPU utilisation, percent.
    pub cpu_usage: f64,
    /// Memory in use, bytes.
    pub memory_usage: i64,
    /// Free disk space with unit, e.g. `"120GB"`.
    pub disk_usage: String,
    /// Network round trip, milliseconds.
    pub network_delay: i64,
    /// Interface name.
    pub network_interface: String,
    /// Host state (`up`, `down`, ...).
    pub status: String,
}

/// One heartbeat document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientHeartbeat {
    /// Agent identifier.
    pub client_id: String,
    /// When the heartbeat was produced, epoch milliseconds.
    pub heartbeat_time: i64,
    /// Agent build.
    pub client_version: String,
    /// Agent process id.
    pub process_id: i64,
    /// Agent state.
    pub status: String,
    /// Agent address.
    pub local_ip: String,
    /// Business module the agent serves.
    pub business_module: String,
    /// Tasks assigned.
    pub task_count: i64,
    /// Tasks outstanding.
    pub task_left: i64,
    /// Last task completion, epoch milliseconds.
    pub last_task_time: i64,
    /// Host the agent runs on.
    pub primary_host: HostInfo,
    /// Other hosts the agent reports for.
    pub secondary_hosts: Vec<HostInfo>,
}

/// Accept a heartbeat. Malformed bodies get `400 {"error": ...}`.
pub async fn heartbeat_handler(payload: Result<Json<ClientHeartbeat>, JsonRejection>) -> Response {
    match payload {
        Ok(Json(heartbeat)) => {
            counter!(CLIENT_HEARTBEATS_TOTAL).increment(1);
            debug!(
                client_id = %heartbeat.client_id,
                status = %heartbeat.status,
                version = %heartbeat.client_version,
                task_count = heartbeat.task_count,
                task_left = heartbeat.task_left,
                secondary_hosts = heartbeat.secondary_hosts.len(),
                "client heartbeat"
            );
            (StatusCode::OK, Json(json!({"message": "pong"}))).into_response()
        }
        Err(rejection) => {
            let error = rejection.body_text();
            warn!(%error, "invalid heartbeat body");
            (StatusCode::BAD_REQUEST, Json(json!({"error": error}))).into_response()
        }
    }
}
