use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use tandem_collab::Mode;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewRoomSchema {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Defaults to the server's configured room size
    #[validate(range(min = 2, max = 50))]
    pub max_members: Option<u32>,
}

#[derive(Debug, IntoParams, Deserialize)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// How many messages to return
    pub limit: Option<u32>,
    /// How many of the newest messages to skip
    pub offset: Option<u32>,
}

#[derive(Debug, IntoParams, Deserialize)]
#[into_params(parameter_in = Query)]
pub struct GatewayQuery {
    /// `chat` or `listen`, defaults to `chat`
    #[param(value_type = Option<String>)]
    pub mode: Option<Mode>,
    /// The session token, for clients that can't set headers
    pub token: Option<String>,
}

pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let extracted_json: Json<T> = Json::from_request(req, state)
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "JSON parse failed"))?;

        extracted_json
            .0
            .validate()
            .map_err(|_| (StatusCode::BAD_REQUEST, "Request body is invalid"))?;

        Ok(Self(extracted_json.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_room_validation() {
        let valid: NewRoomSchema =
            serde_json::from_str(r#"{ "name": "Friday", "maxMembers": 4 }"#).unwrap();
        assert!(valid.validate().is_ok());

        let too_small: NewRoomSchema =
            serde_json::from_str(r#"{ "name": "Friday", "maxMembers": 1 }"#).unwrap();
        assert!(too_small.validate().is_err());

        let unnamed: NewRoomSchema = serde_json::from_str(r#"{ "name": "" }"#).unwrap();
        assert!(unnamed.validate().is_err());

        let unknown = serde_json::from_str::<NewRoomSchema>(r#"{ "name": "a", "extra": 1 }"#);
        assert!(unknown.is_err());
    }
}
