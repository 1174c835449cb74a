//! # HTTP Gateway
//!
//! Exposes research tasks over HTTP. `POST /research` starts a task and
//! streams its events as server-sent events; closing the stream cancels the
//! task. `GET /health` and `GET /research/status` report liveness and the
//! active configuration.

mod server;

pub use server::{
    GatewayState, ResearchRequest, SharedGateway, router as gateway_router, run as run_gateway,
};
