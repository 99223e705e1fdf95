use std::sync::{Arc, OnceLock};

use crate::{db, error_responses, storage};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::PathRejection,
        Request,
    },
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;

pub use response::ErrorResponse;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not_found")]
    NotFound(String),

    // auth
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,

    // validation
    #[error("validation: {0}")]
    Validation(String),
    #[error("validation")]
    MultipartRejection(#[from] MultipartRejection),
    #[error("validation")]
    Multipart(#[from] MultipartError),
    #[error("validation")]
    PathValidation(#[from] PathRejection),

    #[error(transparent)]
    Storage(#[from] storage::Error),
    #[error(transparent)]
    DB(db::Error),

    #[error("unexpected")]
    Unexpected(String),
}

impl From<db::Error> for Error {
    fn from(error: db::Error) -> Self {
        match error {
            db::Error::NotFound(msg) => Self::NotFound(msg),
            error => Self::DB(error),
        }
    }
}

impl From<db::tokio_rusqlite::Error> for Error {
    fn from(error: db::tokio_rusqlite::Error) -> Self {
        db::Error::from(error).into()
    }
}

// Response

error_responses! {
    not_found: 404,
    path_validation: 400,
    form_validation: 400,
    unauthorized: 401,
    forbidden: 403,
    storage: 500,
    unexpected: 500
}

impl From<&Error> for ErrorResponse {
    fn from(error: &Error) -> Self {
        let errors = errors();
        match error {
            Error::NotFound(message) => errors.not_found.with_message(message),
            Error::Unauthorized => errors.unauthorized.with_message("Unauthorized"),
            Error::Forbidden => errors.forbidden.with_message("Forbidden"),
            Error::Validation(message) => errors.form_validation.with_message(message),
            Error::MultipartRejection(error) => errors.form_validation.with_message(error.body_text()),
            Error::Multipart(error) => errors.form_validation.with_message(error.body_text()),
            Error::PathValidation(error) => errors.path_validation.with_message(error.body_text()),
            Error::Storage(_) => errors.storage.with_message("Failed to access stored content"),
            Error::Unexpected(message) => errors.unexpected.with_message(message),
            Error::DB(_) => errors.unexpected.with_message("Unexpected"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let error = Arc::new(self);

        let error_res = ErrorResponse::from(error.as_ref());
        let status = error_res.status;

        let mut res = axum::Json(error_res).into_response();
        res.extensions_mut().insert(error);

        *res.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        res
    }
}

pub async fn on_error(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let error = response.extensions().get::<Arc<Error>>().map(Arc::as_ref);
    if let Some(error) = error {
        match error {
            Error::NotFound(_) | Error::Unauthorized | Error::Forbidden => tracing::debug!("{:?}", error),
            Error::DB(_) | Error::Storage(_) | Error::Unexpected(_) => tracing::error!("{:?}", error),
            _ => tracing::warn!("{:?}", error),
        }
    }

    response
}

mod response {
    use super::*;

    #[derive(Debug, Serialize, Clone, Default)]
    pub struct ErrorResponse {
        pub error: String,
        pub message: Option<String>,
        pub status: u16,
    }

    impl ErrorResponse {
        pub fn new(error: impl Into<String>, status: u16) -> Self {
            Self {
                error: error.into(),
                status,
                ..Default::default()
            }
        }

        pub fn with_message(&self, message: impl Into<String>) -> Self {
            let mut res = self.clone();
            res.message = Some(message.into());
            res
        }
    }

    /// Static table of error responses, one per name.
    /// ```rust,ignore
    /// error_responses! {
    ///     not_found: 404,
    ///     unexpected: 500
    /// }
    ///
    /// impl From<&Error> for ErrorResponse {
    ///     fn from(error: &Error) -> Self {
    ///     let errors = errors(); // <- from macro
    ///     match error {
    ///         Error::NotFound(message) => errors.not_found.with_message(message),
    ///         Error::Unexpected(message) => errors.unexpected.with_message(message),
    ///     }
    /// }
    /// ```
    #[macro_export]
    macro_rules! error_responses {
        (
            $($name:ident: $code:expr),* $(,)?
        ) => {
            #[derive(Debug, Clone, Serialize)]
            struct Responses {
                $(
                    $name: ErrorResponse,
                )*
            }

            static ERRORS: OnceLock<Responses> = OnceLock::new();

            fn errors() -> &'static Responses {
                ERRORS.get_or_init(|| Responses {
                    $(
                        $name: ErrorResponse::new(stringify!($name), $code),
                    )*
                })
            }
        };
    }
}
