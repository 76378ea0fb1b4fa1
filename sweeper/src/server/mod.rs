// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::with_metrics;
use crate::{
    error::{SweeperError, SweeperResult},
    metrics::SweeperMetrics,
    server::handler::{SweeperRequestHandler, SweeperRequestHandlerTrait},
    types::{now_timestamp, CycleReport, StatusReport, SweepStatus},
};
use axum::{
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use axum::{http::StatusCode, routing::get, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

pub mod handler;

#[cfg(test)]
pub(crate) mod mock_handler;

pub const PING_PATH: &str = "/ping";
pub const METRICS_PATH: &str = "/metrics";
pub const CHECK_TRANSFERS_PATH: &str = "/api/cron/check-transfers";
pub const MANUAL_TRIGGER_PATH: &str = "/api/manual/trigger";

pub const TRANSFER_ACTION: &str = "transfer";

/// Server-wide settings shared by every route.
pub struct ServerContext {
    pub version: &'static str,
    // Requests to trigger endpoints are refused when unset
    pub cron_secret: Option<String>,
    pub registry: Registry,
}

impl ServerContext {
    pub fn new(cron_secret: Option<String>, registry: Registry) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            cron_secret,
            registry,
        }
    }

    fn authorize(&self, headers: &HeaderMap) -> SweeperResult<()> {
        let Some(secret) = self.cron_secret.as_deref() else {
            warn!("[Server] Rejecting trigger request, no cron secret configured");
            return Err(SweeperError::Unauthorized);
        };
        let provided = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        match provided {
            Some(token) if token == secret => Ok(()),
            _ => Err(SweeperError::Unauthorized),
        }
    }
}

// Public metadata returned by `/ping`.
#[derive(Serialize)]
pub struct SweeperNodePublicMetadata {
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct CheckTransfersResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: CycleReport,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: StatusReport,
}

#[derive(Serialize)]
pub struct ForwardResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub report: handler::ForwardReport,
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerQuery {
    pub action: Option<String>,
}

type ServerState<H> = (Arc<H>, Arc<SweeperMetrics>, Arc<ServerContext>);

/// Binds `socket_address` and serves until `cancel` fires.
pub async fn run_server(
    socket_address: &SocketAddr,
    handler: SweeperRequestHandler,
    metrics: Arc<SweeperMetrics>,
    context: Arc<ServerContext>,
    cancel: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(socket_address).await?;
    info!("[Server] Listening on {}", listener.local_addr()?);
    Ok(tokio::spawn(async move {
        let result = axum::serve(
            listener,
            make_router(Arc::new(handler), metrics, context).into_make_service(),
        )
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;
        if let Err(e) = result {
            error!("[Server] Server stopped with error: {:?}", e);
        }
    }))
}

pub(crate) fn make_router(
    handler: Arc<impl SweeperRequestHandlerTrait + Sync + Send + 'static>,
    metrics: Arc<SweeperMetrics>,
    context: Arc<ServerContext>,
) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route(PING_PATH, get(ping))
        .route(METRICS_PATH, get(metrics_scrape))
        .route(CHECK_TRANSFERS_PATH, get(handle_check_transfers))
        .route(MANUAL_TRIGGER_PATH, get(handle_manual_trigger))
        .with_state((handler, metrics, context))
}

impl IntoResponse for SweeperError {
    fn into_response(self) -> Response {
        match self {
            SweeperError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "Unauthorized" })),
            )
                .into_response(),
            e => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                    "timestamp": now_timestamp(),
                })),
            )
                .into_response(),
        }
    }
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn ping(
    State((_, _, context)): State<ServerState<impl SweeperRequestHandlerTrait + Sync + Send>>,
) -> Json<SweeperNodePublicMetadata> {
    Json(SweeperNodePublicMetadata {
        version: context.version,
    })
}

async fn metrics_scrape(
    State((_, _, context)): State<ServerState<impl SweeperRequestHandlerTrait + Sync + Send>>,
) -> Result<String, SweeperError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&context.registry.gather(), &mut buffer)
        .map_err(|e| SweeperError::Generic(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| SweeperError::Generic(e.to_string()))
}

#[instrument(level = "error", skip_all)]
async fn handle_check_transfers(
    headers: HeaderMap,
    State((handler, metrics, context)): State<
        ServerState<impl SweeperRequestHandlerTrait + Sync + Send>,
    >,
) -> Result<Json<CheckTransfersResponse>, SweeperError> {
    let future = async {
        context.authorize(&headers)?;
        let report = handler.handle_check_transfers().await?;
        Ok::<_, SweeperError>(Json(CheckTransfersResponse {
            success: true,
            report,
        }))
    };
    with_metrics!(metrics.clone(), "check_transfers", future).await
}

#[instrument(level = "error", skip_all)]
async fn handle_manual_trigger(
    headers: HeaderMap,
    Query(query): Query<TriggerQuery>,
    State((handler, metrics, context)): State<
        ServerState<impl SweeperRequestHandlerTrait + Sync + Send>,
    >,
) -> Result<Response, SweeperError> {
    if query.action.as_deref() != Some(TRANSFER_ACTION) {
        let future = async {
            let status = handler.handle_status().await?;
            Ok::<_, SweeperError>(Json(StatusResponse {
                success: true,
                status,
            })
            .into_response())
        };
        return with_metrics!(metrics.clone(), "status", future).await;
    }

    let future = async {
        context.authorize(&headers)?;
        let report = handler.handle_manual_forward().await?;
        let (code, message) = match report.status() {
            SweepStatus::Processed => (StatusCode::OK, "Transfer completed".to_string()),
            SweepStatus::Ambiguous => (
                StatusCode::OK,
                "Transfer submitted but not yet confirmed".to_string(),
            ),
            SweepStatus::Failed => (
                StatusCode::BAD_REQUEST,
                report
                    .outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "Transfer failed".to_string()),
            ),
        };
        let success = code == StatusCode::OK;
        Ok::<_, SweeperError>((
            code,
            Json(ForwardResponse {
                success,
                message,
                report,
            }),
        )
            .into_response())
    };
    with_metrics!(metrics.clone(), "manual_forward", future).await
}

#[macro_export]
macro_rules! with_metrics {
    ($metrics:expr, $type_:expr, $func:expr) => {
        async move {
            info!("Received {} request", $type_);
            $metrics
                .requests_received
                .with_label_values(&[$type_])
                .inc();
            $metrics
                .requests_inflight
                .with_label_values(&[$type_])
                .inc();

            let result = $func.await;

            match &result {
                Ok(_) => {
                    info!("{} request succeeded", $type_);
                    $metrics.requests_ok.with_label_values(&[$type_]).inc();
                }
                Err(e) => {
                    info!("{} request failed: {}", $type_, e);
                    $metrics.err_requests.with_label_values(&[$type_]).inc();
                }
            }

            $metrics
                .requests_inflight
                .with_label_values(&[$type_])
                .dec();
            result
        }
    };
}

#[cfg(test)]
mod tests {
    use super::mock_handler::{run_mock_server, SweeperRequestMockHandler};
    use super::*;
    use crate::test_utils::{destination_account, monitored_account};
    use crate::types::{
        BalanceSnapshot, BlockRange, CycleResults, EventDetail, Statistics,
    };
    use ethers::types::TxHash;
    use serde_json::Value;

    const SECRET: &str = "s3cret";

    fn sample_report() -> CycleReport {
        CycleReport {
            results: CycleResults {
                blocks_scanned: BlockRange { from: 101, to: 110 },
                window_reset: false,
                transfers_found: 1,
                transfers_processed: 1,
                transfers_skipped: 0,
                details: vec![EventDetail {
                    tx_hash: Some(TxHash::from_low_u64_be(0xabc)),
                    transfer_tx: Some(TxHash::from_low_u64_be(0xf000)),
                    amount: Some("0.99788".into()),
                    error: None,
                    status: SweepStatus::Processed,
                }],
            },
            statistics: Statistics {
                total_checks: 1,
                transfers_found: 1,
                transfers_processed: 1,
                last_check: None,
            },
            timestamp: now_timestamp(),
        }
    }

    fn sample_status() -> StatusReport {
        StatusReport {
            balance: BalanceSnapshot {
                native: "0.5".into(),
                token: None,
                address: monitored_account(),
            },
            statistics: Statistics::default(),
            last_checked_block: 42,
            monitor_address: monitored_account(),
            destination_address: destination_account(),
        }
    }

    fn sample_forward(status: SweepStatus) -> handler::ForwardReport {
        handler::ForwardReport {
            outcome: EventDetail {
                tx_hash: None,
                transfer_tx: Some(TxHash::from_low_u64_be(0xf000)),
                amount: None,
                error: (status == SweepStatus::Failed)
                    .then(|| "Forward transaction reverted".into()),
                status,
            },
            balance: None,
        }
    }

    async fn get(url: String, bearer: Option<&str>) -> (StatusCode, Value) {
        let mut request = reqwest::Client::new().get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_public_routes() {
        let handler = SweeperRequestMockHandler::new();
        let (addr, metrics, _) = run_mock_server(handler, Some(SECRET.into())).await;

        for path in ["/", "/health"] {
            let response = reqwest::get(format!("http://{}{}", addr, path)).await.unwrap();
            assert_eq!(response.status().as_u16(), 200);
        }
        let (code, body) = get(format!("http://{}{}", addr, PING_PATH), None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

        // a request has to be observed before the counter shows up
        get(format!("http://{}{}", addr, CHECK_TRANSFERS_PATH), None).await;
        let text = reqwest::get(format!("http://{}{}", addr, METRICS_PATH))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(text.contains("sweeper_requests_received"));
        assert_eq!(
            metrics
                .err_requests
                .with_label_values(&["check_transfers"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_check_transfers_requires_bearer() {
        let handler = SweeperRequestMockHandler::new();
        handler.set_check_response(Ok(sample_report()));
        let (addr, _, handler) = run_mock_server(handler, Some(SECRET.into())).await;
        let url = format!("http://{}{}", addr, CHECK_TRANSFERS_PATH);

        let (code, body) = get(url.clone(), None).await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");
        let (code, _) = get(url.clone(), Some("wrong")).await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
        assert_eq!(handler.check_requests(), 0);

        let (code, body) = get(url, Some(SECRET)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["results"]["blocksScanned"]["from"], 101);
        assert_eq!(body["results"]["transfersProcessed"], 1);
        assert_eq!(body["results"]["details"][0]["status"], "processed");
        assert_eq!(body["statistics"]["totalChecks"], 1);
        assert!(body["timestamp"].is_string());
        assert_eq!(handler.check_requests(), 1);
    }

    #[tokio::test]
    async fn test_check_transfers_failure_is_500() {
        let handler = SweeperRequestMockHandler::new();
        handler.set_check_response(Err(SweeperError::TransientProviderError(
            "connection refused".into(),
        )));
        let (addr, _, _) = run_mock_server(handler, Some(SECRET.into())).await;

        let (code, body) = get(
            format!("http://{}{}", addr, CHECK_TRANSFERS_PATH),
            Some(SECRET),
        )
        .await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("connection refused"));
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_no_secret_locks_triggers() {
        let handler = SweeperRequestMockHandler::new();
        handler.set_check_response(Ok(sample_report()));
        let (addr, _, handler) = run_mock_server(handler, None).await;

        let (code, _) = get(format!("http://{}{}", addr, CHECK_TRANSFERS_PATH), Some("")).await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
        let (code, _) = get(
            format!("http://{}{}?action=transfer", addr, MANUAL_TRIGGER_PATH),
            Some("anything"),
        )
        .await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
        assert_eq!(handler.check_requests(), 0);
        assert_eq!(handler.forward_requests(), 0);
    }

    #[tokio::test]
    async fn test_manual_trigger_status_and_forward() {
        let handler = SweeperRequestMockHandler::new();
        handler.set_status_response(Ok(sample_status()));
        handler.set_forward_response(Ok(sample_forward(SweepStatus::Processed)));
        let (addr, _, handler) = run_mock_server(handler, Some(SECRET.into())).await;
        let url = format!("http://{}{}", addr, MANUAL_TRIGGER_PATH);

        // status needs no token
        let (code, body) = get(url.clone(), None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["lastCheckedBlock"], 42);
        assert_eq!(body["balance"]["native"], "0.5");
        assert_eq!(
            body["monitorAddress"],
            serde_json::to_value(monitored_account()).unwrap()
        );

        let forward_url = format!("{}?action=transfer", url);
        let (code, _) = get(forward_url.clone(), None).await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
        assert_eq!(handler.forward_requests(), 0);

        let (code, body) = get(forward_url.clone(), Some(SECRET)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["outcome"]["status"], "processed");
        assert_eq!(handler.forward_requests(), 1);

        handler.set_forward_response(Ok(sample_forward(SweepStatus::Failed)));
        let (code, body) = get(forward_url, Some(SECRET)).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Forward transaction reverted");
    }
}
