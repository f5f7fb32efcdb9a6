use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::api::v1::request::RequestStatus;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("collector_id must reference a collector account")]
    NotACollector,

    #[error("No resource found")]
    NoResource,

    #[error("{0}")]
    Unauthorized(UnauthorizedType),

    #[error("You have no permission to access this resource")]
    Forbidden,

    #[error("{0} must unique")]
    MustUniqueError(String),

    #[error("request cannot move from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("{0}")]
    Conflict(&'static str),

    #[error("{0}")]
    InvalidState(&'static str),

    #[error("{0}")]
    PasswordHashError(#[from] password_hash::Error),

    #[error("{0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("{0}")]
    JWTError(#[from] jsonwebtoken::errors::Error),

    #[error("{0}")]
    BSONSerError(#[from] bson::ser::Error),

    #[error("{0}")]
    BSONDeError(#[from] bson::de::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UnauthorizedType {
    #[error("Wrong Username or Password")]
    WrongUsernameOrPassword,

    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("This account is disabled")]
    AccountDisabled,
}

impl Error {
    /// Single-field validation failure built outside of a `derive(Validate)`
    /// body, e.g. a missing `status` in a PATCH.
    pub fn validation(field: &'static str, code: &'static str) -> Self {
        let mut errors = validator::ValidationErrors::new();
        errors.add(field, validator::ValidationError::new(code));
        Self::ValidationError(errors)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<serde_json::Value>,
    r#type: String,
    message: String,
}

impl From<Error> for ErrorJson {
    fn from(err: Error) -> Self {
        let message = err.to_string();

        let r#type = err.to_string_variant();

        let errors = match err {
            Error::ValidationError(err) => serde_json::to_value(err).ok(),
            Error::NotACollector
            | Error::NoResource
            | Error::Unauthorized(..)
            | Error::Forbidden
            | Error::MustUniqueError(..)
            | Error::InvalidTransition { .. }
            | Error::Conflict(..)
            | Error::InvalidState(..)
            | Error::PasswordHashError(..)
            | Error::DatabaseError(..)
            | Error::JWTError(..)
            | Error::BSONSerError(..)
            | Error::BSONDeError(..) => None,
        };

        Self {
            errors,
            message,
            r#type,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("error: {:?}", self);
        let status = match self {
            Self::ValidationError(..) | Self::NotACollector => StatusCode::BAD_REQUEST,
            Self::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NoResource => StatusCode::NOT_FOUND,
            Self::MustUniqueError(..)
            | Self::InvalidTransition { .. }
            | Self::Conflict(..)
            | Self::InvalidState(..) => StatusCode::CONFLICT,
            Self::PasswordHashError(..)
            | Self::DatabaseError(..)
            | Self::JWTError(..)
            | Self::BSONSerError(..)
            | Self::BSONDeError(..) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error = ErrorJson::from(self);

        (status, Json(error)).into_response()
    }
}

impl Error {
    pub fn to_string_variant(&self) -> String {
        macro_rules! match_var {
            ($id:ident !) => {
                Self::$id
            };
            ($id:ident (..)) => {
                Self::$id(..)
            };
            ($id:ident {..}) => {
                Self::$id { .. }
            };
        }

        macro_rules! variant {
            ($($name:ident $tt:tt),+) => {
                match self {
                    $(
                        match_var!($name $tt) => {
                            stringify!($name)
                       }
                    )+
                }
            };
        }

        variant! {
            ValidationError(..),
            NotACollector!,
            NoResource!,
            Unauthorized(..),
            Forbidden!,
            MustUniqueError(..),
            InvalidTransition {..},
            Conflict(..),
            InvalidState(..),
            PasswordHashError(..),
            DatabaseError(..),
            JWTError(..),
            BSONSerError(..),
            BSONDeError(..)
        }
        .to_string()
    }
}

impl From<axum::extract::rejection::PathRejection> for Error {
    fn from(_value: axum::extract::rejection::PathRejection) -> Self {
        Self::NoResource
    }
}

impl From<axum::extract::rejection::JsonRejection> for Error {
    fn from(_value: axum::extract::rejection::JsonRejection) -> Self {
        Self::validation("body", "invalid")
    }
}
