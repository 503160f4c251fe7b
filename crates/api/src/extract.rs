//! Extractors whose rejections use the `{error, code}` error body.

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::AppError;

/// [`axum::Json`] with malformed bodies reported as `BAD_REQUEST`.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// [`axum::extract::Query`] with unparsable query strings reported as
/// `BAD_REQUEST`.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);
