use std::sync::Arc;

use thiserror::Error;

use crate::{Database, DatabaseError, UserData};

/// Resolves session tokens issued by the account service.
pub struct Auth<Db: ?Sized> {
    db: Arc<Db>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// The token is unknown or expired
    #[error("Invalid or expired session")]
    InvalidSession,
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(DatabaseError),
}

impl<Db> Auth<Db>
where
    Db: Database + ?Sized,
{
    pub fn new(db: &Arc<Db>) -> Self {
        Self { db: db.clone() }
    }

    /// Returns the user a session token belongs to
    pub async fn user(&self, token: &str) -> Result<UserData, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidSession);
        }

        self.db.user_by_token(token).await.map_err(|e| match e {
            DatabaseError::NotFound { .. } => AuthError::InvalidSession,
            err => AuthError::Db(err),
        })
    }
}
