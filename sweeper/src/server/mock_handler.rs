// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A mock implementation for `SweeperRequestHandlerTrait`
//! that answers with preset results and counts requests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{SweeperError, SweeperResult};
use crate::metrics::SweeperMetrics;
use crate::types::{CycleReport, StatusReport};
use async_trait::async_trait;
use prometheus::Registry;

use super::handler::{ForwardReport, SweeperRequestHandlerTrait};
use super::{make_router, ServerContext};

#[derive(Clone)]
pub struct SweeperRequestMockHandler {
    check_response: Arc<Mutex<SweeperResult<CycleReport>>>,
    status_response: Arc<Mutex<SweeperResult<StatusReport>>>,
    forward_response: Arc<Mutex<SweeperResult<ForwardReport>>>,
    check_requests: Arc<AtomicU64>,
    forward_requests: Arc<AtomicU64>,
}

fn not_preset() -> SweeperError {
    SweeperError::Generic("no preset response".into())
}

impl SweeperRequestMockHandler {
    pub fn new() -> Self {
        Self {
            check_response: Arc::new(Mutex::new(Err(not_preset()))),
            status_response: Arc::new(Mutex::new(Err(not_preset()))),
            forward_response: Arc::new(Mutex::new(Err(not_preset()))),
            check_requests: Arc::new(AtomicU64::new(0)),
            forward_requests: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_check_response(&self, response: SweeperResult<CycleReport>) {
        *self.check_response.lock().unwrap() = response;
    }

    pub fn set_status_response(&self, response: SweeperResult<StatusReport>) {
        *self.status_response.lock().unwrap() = response;
    }

    pub fn set_forward_response(&self, response: SweeperResult<ForwardReport>) {
        *self.forward_response.lock().unwrap() = response;
    }

    pub fn check_requests(&self) -> u64 {
        self.check_requests.load(Ordering::SeqCst)
    }

    pub fn forward_requests(&self) -> u64 {
        self.forward_requests.load(Ordering::SeqCst)
    }
}

impl Default for SweeperRequestMockHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SweeperRequestHandlerTrait for SweeperRequestMockHandler {
    async fn handle_check_transfers(&self) -> SweeperResult<CycleReport> {
        self.check_requests.fetch_add(1, Ordering::SeqCst);
        self.check_response.lock().unwrap().clone()
    }

    async fn handle_status(&self) -> SweeperResult<StatusReport> {
        self.status_response.lock().unwrap().clone()
    }

    async fn handle_manual_forward(&self) -> SweeperResult<ForwardReport> {
        self.forward_requests.fetch_add(1, Ordering::SeqCst);
        self.forward_response.lock().unwrap().clone()
    }
}

/// Serves `handler` on an ephemeral local port.
pub async fn run_mock_server(
    handler: SweeperRequestMockHandler,
    cron_secret: Option<String>,
) -> (SocketAddr, Arc<SweeperMetrics>, SweeperRequestMockHandler) {
    let registry = Registry::new();
    let metrics = Arc::new(SweeperMetrics::new(&registry));
    let context = Arc::new(ServerContext::new(cron_secret, registry));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = make_router(Arc::new(handler.clone()), metrics.clone(), context);
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .unwrap();
    });
    (addr, metrics, handler)
}
