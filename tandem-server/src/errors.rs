use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tandem_collab::{AuthError, DatabaseError, RoomError};
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{resource}:{identifier} not found")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Room is full")]
    RoomFull,
    #[error("{0}")]
    BadRequest(String),
    #[error("Invalid or expired session")]
    Unauthorized,
    #[error("Unknown internal error: {0}")]
    Unknown(String),
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) | Self::RoomFull => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.as_status_code(), self.to_string()).into_response()
    }
}

impl From<AuthError> for ServerError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidSession => Self::Unauthorized,
            AuthError::Db(e) => e.into(),
        }
    }
}

impl From<DatabaseError> for ServerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => Self::NotFound {
                resource,
                identifier,
            },
            e @ DatabaseError::Conflict { .. } => Self::Conflict(e.to_string()),
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<RoomError> for ServerError {
    fn from(value: RoomError) -> Self {
        match value {
            RoomError::RoomNotFound => Self::NotFound {
                resource: "room",
                identifier: "id",
            },
            RoomError::MemberNotFound => Self::NotFound {
                resource: "room member",
                identifier: "user_id",
            },
            RoomError::Forbidden(reason) => Self::Forbidden(reason.to_string()),
            RoomError::Capacity => Self::RoomFull,
            e @ RoomError::Conflict { .. } => Self::Conflict(e.to_string()),
            RoomError::BadRequest(reason) => Self::BadRequest(reason),
            RoomError::Database(e) => e.into(),
            e @ RoomError::Cache(_) => Self::Unknown(e.to_string()),
        }
    }
}
