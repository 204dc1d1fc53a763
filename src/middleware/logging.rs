//! One log line per finished request. Per-tick traffic (frame pulls and audio
//! pushes) logs at debug so a pulling client does not flood the info stream.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    Error,
};
use crate::middleware::metrics::session_id_in;
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{debug, error, info, warn};

pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let session_id = session_id_in(&path).unwrap_or("-").to_string();

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            match &result {
                Ok(response) => {
                    let status = response.status();
                    match LogLevel::for_response(&path, status) {
                        LogLevel::Debug => debug!(%method, %path, %session_id, status = status.as_u16(), duration_ms, "Request completed"),
                        LogLevel::Info => info!(%method, %path, %session_id, status = status.as_u16(), duration_ms, "Request completed"),
                        LogLevel::Warn => warn!(%method, %path, %session_id, status = status.as_u16(), duration_ms, "Request rejected"),
                        LogLevel::Error => error!(%method, %path, %session_id, status = status.as_u16(), duration_ms, "Request failed"),
                    }
                }
                Err(err) => {
                    error!(%method, %path, %session_id, duration_ms, error = %err, "Request failed");
                }
            }

            result
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn for_response(path: &str, status: StatusCode) -> Self {
        if status.is_server_error() {
            LogLevel::Error
        } else if status.is_client_error() {
            LogLevel::Warn
        } else if is_per_tick(path) {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

fn is_per_tick(path: &str) -> bool {
    session_id_in(path).is_some() && (path.ends_with("/frame") || path.ends_with("/audio"))
}
