//! Responses for requests that never reach a typed handler error.

use crate::error::{AppError, AppResult};
use actix_web::body::EitherBody;
use actix_web::dev::ServiceResponse;
use actix_web::middleware::ErrorHandlerResponse;
use actix_web::{HttpResponse, ResponseError};
use tracing::error;

/// Default service: unknown routes.
pub async fn not_found() -> AppResult<HttpResponse> {
    Err(AppError::NotFound("Not Found".to_string()))
}

/// Rewrite framework-level 500s into the `{"detail": ...}` shape.
///
/// Responses produced by [`AppError`] already carry that shape and pass
/// through untouched.
pub fn internal_error<B>(res: ServiceResponse<B>) -> actix_web::Result<ErrorHandlerResponse<B>> {
    let untyped = res
        .response()
        .error()
        .filter(|err| err.as_error::<AppError>().is_none())
        .map(|err| (err.to_string(), format!("{:?}", err)));

    let Some((message, detail)) = untyped else {
        return Ok(ErrorHandlerResponse::Response(res.map_into_left_body()));
    };

    error!(
        method = %res.request().method(),
        path = %res.request().path(),
        error = %detail,
        "Unhandled internal error"
    );

    let (req, _) = res.into_parts();
    let response = AppError::Internal(message).error_response();
    let res: ServiceResponse<EitherBody<B>> = ServiceResponse::new(req, response).map_into_right_body();
    Ok(ErrorHandlerResponse::Response(res))
}
