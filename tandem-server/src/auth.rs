use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Query},
    http::{header, request::Parts, StatusCode},
};
use serde::Deserialize;
use tandem_collab::{AuthError, UserData};

use crate::ServerContext;

/// The authenticated user of a request
pub struct Session {
    pub user: UserData,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[async_trait]
impl FromRequestParts<ServerContext> for Session {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        let context = ServerContext::from_ref(state);
        let token = token_from_parts(parts)?;

        let user = context
            .collab
            .auth
            .user(&token)
            .await
            .map_err(|err| match err {
                AuthError::InvalidSession => (StatusCode::UNAUTHORIZED, "Session does not exist"),
                AuthError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Could not verify session"),
            })?;

        Ok(Self { user })
    }
}

/// Reads the token from the Authorization header.
/// Browsers can't set headers on a websocket upgrade, so `?token=` works too.
fn token_from_parts(parts: &Parts) -> Result<String, (StatusCode, &'static str)> {
    if let Some(header) = parts.headers.get(header::AUTHORIZATION) {
        let header = header
            .to_str()
            .map_err(|_| (StatusCode::BAD_REQUEST, "Authorization must be Bearer"))?;

        let parts: Vec<_> = header.split_ascii_whitespace().collect();

        return match parts.as_slice() {
            ["Bearer", token] => Ok(token.to_string()),
            _ => Err((StatusCode::BAD_REQUEST, "Authorization must be Bearer")),
        };
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|token| !token.is_empty())
        .ok_or((StatusCode::UNAUTHORIZED, "Missing authorization"))
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn test_token_from_header() {
        let parts = parts(
            Request::get("/v1/rooms/abc")
                .header(header::AUTHORIZATION, "Bearer secret")
                .body(())
                .unwrap(),
        );

        assert_eq!(token_from_parts(&parts).unwrap(), "secret");
    }

    #[test]
    fn test_token_from_query() {
        let parts = parts(
            Request::get("/v1/gateway/abc?mode=listen&token=secret")
                .body(())
                .unwrap(),
        );

        assert_eq!(token_from_parts(&parts).unwrap(), "secret");
    }

    #[test]
    fn test_rejects_other_schemes() {
        let parts = parts(
            Request::get("/v1/rooms/abc")
                .header(header::AUTHORIZATION, "Basic abc")
                .body(())
                .unwrap(),
        );

        let (status, _) = token_from_parts(&parts).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_missing_token() {
        let parts = parts(Request::get("/v1/rooms/abc").body(()).unwrap());

        let (status, _) = token_from_parts(&parts).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
