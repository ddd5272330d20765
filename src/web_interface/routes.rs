use log::error;
use serde::Serialize;
use std::convert::Infallible;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::reply::{self, Response};
use warp::{Filter, Rejection, Reply};

use super::ApiError;
use crate::configuration::types::TunnelSpec;
use crate::error_handling::types::ForwardError;
use crate::session_management::ForwardManager;

/// Largest accepted `POST /forwards` body.
const MAX_BODY: u64 = 16 * 1024;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PortStatus {
    pub port: u16,
    pub available: bool,
    pub next_available: Option<u16>,
}

/// HTTP status for an operation error.
pub fn error_status(err: &ForwardError) -> StatusCode {
    match err {
        ForwardError::InvalidConfig(_) | ForwardError::InvalidRange(_) => StatusCode::BAD_REQUEST,
        ForwardError::PortInUse { .. } | ForwardError::NoPortAvailable { .. } => {
            StatusCode::CONFLICT
        }
        ForwardError::NotFound(_) => StatusCode::NOT_FOUND,
        ForwardError::SpawnFailed { .. } | ForwardError::Tunnel(_) => StatusCode::BAD_GATEWAY,
        ForwardError::ConnectionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ForwardError::ManagerClosed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn error_reply(err: &ForwardError) -> Response {
    reply::with_status(reply::json(&ApiError::from(err)), error_status(err)).into_response()
}

fn not_found(message: &str) -> Response {
    reply::with_status(
        reply::json(&ApiError::message(message)),
        StatusCode::NOT_FOUND,
    )
    .into_response()
}

fn with_manager(
    manager: ForwardManager,
) -> impl Filter<Extract = (ForwardManager,), Error = Infallible> + Clone {
    warp::any().map(move || manager.clone())
}

/// All routes of the status API.
pub fn api_routes(
    manager: ForwardManager,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    list_forwards_route(manager.clone())
        .or(get_forward_route(manager.clone()))
        .or(start_forward_route(manager.clone()))
        .or(stop_forward_route(manager.clone()))
        .or(port_status_route(manager))
}

/// GET /forwards
pub fn list_forwards_route(
    manager: ForwardManager,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("forwards")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_manager(manager))
        .and_then(list_forwards)
}

/// GET /forwards/:id
pub fn get_forward_route(
    manager: ForwardManager,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("forwards" / String)
        .and(warp::get())
        .and(with_manager(manager))
        .and_then(get_forward)
}

/// POST /forwards
pub fn start_forward_route(
    manager: ForwardManager,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("forwards")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY))
        .and(warp::body::json())
        .and(with_manager(manager))
        .and_then(start_forward)
}

/// DELETE /forwards/:id
pub fn stop_forward_route(
    manager: ForwardManager,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("forwards" / String)
        .and(warp::delete())
        .and(with_manager(manager))
        .and_then(stop_forward)
}

/// GET /ports/:port
pub fn port_status_route(
    manager: ForwardManager,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("ports" / u16)
        .and(warp::get())
        .and(with_manager(manager))
        .and_then(check_port)
}

pub async fn list_forwards(manager: ForwardManager) -> Result<Response, Infallible> {
    Ok(reply::json(&manager.get_all_forwards()).into_response())
}

pub async fn get_forward(id: String, manager: ForwardManager) -> Result<Response, Infallible> {
    let Ok(id) = Uuid::parse_str(&id) else {
        return Ok(not_found("Invalid forward id"));
    };
    match manager.get_forward(&id) {
        Some(view) => Ok(reply::json(&view).into_response()),
        None => Ok(not_found("Forward not found")),
    }
}

pub async fn start_forward(
    spec: TunnelSpec,
    manager: ForwardManager,
) -> Result<Response, Infallible> {
    match manager.start_forward(spec).await {
        Ok(view) => Ok(reply::with_status(reply::json(&view), StatusCode::CREATED).into_response()),
        Err(e) => Ok(error_reply(&e)),
    }
}

pub async fn stop_forward(id: String, manager: ForwardManager) -> Result<Response, Infallible> {
    let Ok(id) = Uuid::parse_str(&id) else {
        return Ok(not_found("Invalid forward id"));
    };
    match manager.stop_forward(id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Ok(error_reply(&e)),
    }
}

/// Runs the availability scan on the blocking pool.
pub async fn check_port(port: u16, manager: ForwardManager) -> Result<Response, Infallible> {
    match tokio::task::spawn_blocking(move || port_status(&manager, port)).await {
        Ok(status) => Ok(reply::json(&status).into_response()),
        Err(e) => {
            error!("Port check for {} failed: {}", port, e);
            Ok(reply::with_status(
                reply::json(&ApiError::message("Port check failed")),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response())
        }
    }
}

pub fn port_status(manager: &ForwardManager, port: u16) -> PortStatus {
    let available = manager.is_port_available(port);
    let next_available = if available {
        Some(port)
    } else {
        manager.suggest_alternative_port(port)
    };
    PortStatus {
        port,
        available,
        next_available,
    }
}
