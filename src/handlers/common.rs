use crate::{errors::ServiceError, models::Actor, AppState};
use async_trait::async_trait;
use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    Json,
};
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use validator::Validate;

/// Header staff clients use to prove who they are
pub const STAFF_TOKEN_HEADER: &str = "x-staff-token";
/// Header a customer-facing client sets to identify itself
pub const ACTOR_HEADER: &str = "x-actor";
/// Optional staff identifier recorded in the status history
pub const STAFF_ID_HEADER: &str = "x-staff-id";

const MAX_STAFF_ID_LEN: usize = 64;

/// JSON body that has been deserialized and validated.
///
/// Malformed bodies and failed field rules both become a `validation_error`
/// response with the usual error body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + Send,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(ValidatedJson(value))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn tokens_match(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len()
        && presented
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Decides who is calling from the request headers.
///
/// With a configured staff token only callers presenting it are staff. Without one,
/// every caller is staff unless it sends `x-actor: customer`.
pub fn actor_from_headers(headers: &HeaderMap, staff_token: Option<&str>) -> Actor {
    let is_staff = match staff_token {
        Some(expected) => header_str(headers, STAFF_TOKEN_HEADER)
            .map(|presented| tokens_match(presented, expected))
            .unwrap_or(false),
        None => !header_str(headers, ACTOR_HEADER)
            .map(|actor| actor.eq_ignore_ascii_case("customer"))
            .unwrap_or(false),
    };

    if !is_staff {
        return Actor::Customer;
    }

    let staff_id = header_str(headers, STAFF_ID_HEADER)
        .filter(|id| id.len() <= MAX_STAFF_ID_LEN)
        .map(str::to_string);
    Actor::Staff { staff_id }
}

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(actor_from_headers(&parts.headers, state.config.staff_token()))
    }
}
