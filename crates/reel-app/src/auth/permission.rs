use std::task::{Context, Poll};

use axum::{
    extract::Request,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::debug;

use super::AuthenticatedUser;
use crate::error::ApiError;

/// Rejects requests whose user lacks the permission `code`.
///
/// Needs [`super::authenticate`] to run first. Answers 401 when no user was
/// resolved and 403 when the user does not hold the permission.
#[derive(Debug, Clone)]
pub struct RequiredPermissionLayer {
    code: &'static str,
}

impl RequiredPermissionLayer {
    pub fn new(code: &'static str) -> Self {
        Self { code }
    }
}

impl<S> Layer<S> for RequiredPermissionLayer {
    type Service = RequiredPermission<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequiredPermission {
            inner,
            code: self.code,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequiredPermission<S> {
    inner: S,
    code: &'static str,
}

impl<S> RequiredPermission<S> {
    fn check(&self, request: &Request) -> Result<(), ApiError> {
        match request.extensions().get::<AuthenticatedUser>() {
            None => Err(ApiError::Unauthorized),
            Some(user) if !user.permissions.include(self.code) => {
                debug!("User {} lacks permission {}", user.id, self.code);
                Err(ApiError::Forbidden)
            }
            Some(_) => Ok(()),
        }
    }
}

impl<S> Service<Request> for RequiredPermission<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        match self.check(&request) {
            Ok(()) => Box::pin(self.inner.call(request)),
            Err(e) => Box::pin(futures::future::ready(Ok(e.into_response()))),
        }
    }
}
