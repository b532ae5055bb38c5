use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderName};
use reel_dal::permission::Permissions;
use tracing::debug;

use crate::{error::ApiError, state::AppState};

pub mod permission;

pub use permission::RequiredPermissionLayer;

/// User resolved from the trusted header, with the permissions held at request time.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub permissions: Permissions,
}

fn user_id(headers: &HeaderMap, header: &HeaderName) -> Result<Option<i64>, ApiError> {
    let Some(value) = headers.get(header) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .map(Some)
        .ok_or_else(|| {
            debug!("Malformed user header {header}: {value:?}");
            ApiError::Unauthorized
        })
}

/// Middleware that resolves the user named by the configured header and loads
/// their permissions into request extensions.
///
/// Requests without the header pass through anonymous, a malformed header is rejected.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let id = match user_id(request.headers(), &state.get_app_config().user_header) {
        Ok(Some(id)) => id,
        Ok(None) => return next.run(request).await,
        Err(e) => return e.into_response(),
    };

    match state.permissions().get_all_for_user(id).await {
        Ok(permissions) => {
            request
                .extensions_mut()
                .insert(AuthenticatedUser { id, permissions });
            next.run(request).await
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_user_id_header() {
        let header = HeaderName::from_static("x-user");
        let mut headers = HeaderMap::new();
        assert!(matches!(user_id(&headers, &header), Ok(None)));

        headers.insert(&header, HeaderValue::from_static("42"));
        assert!(matches!(user_id(&headers, &header), Ok(Some(42))));

        for bad in ["abc", "-1", "0", ""] {
            headers.insert(&header, HeaderValue::from_static(bad));
            assert!(matches!(
                user_id(&headers, &header),
                Err(ApiError::Unauthorized)
            ));
        }
    }
}
