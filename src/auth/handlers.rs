use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{instrument, warn};

use crate::{
    auth::{
        error::{AuthError, INVALID_BODY_MESSAGE},
        jwt::AuthPrincipal,
        principal::{PrincipalKind, PublicPrincipal},
        services::{LoginInput, RegisterInput},
    },
    state::AppState,
};

/// Registration body. The identifier key differs per kind (`roll_no` /
/// `emp_id`), so it is picked out of the remaining fields.
#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub confirm_password: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct RegisteredResponse {
    pub user: PublicPrincipal,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: &'static str,
    pub token: String,
}

pub fn auth_routes() -> Router<AppState> {
    PrincipalKind::ALL
        .into_iter()
        .fold(Router::new(), |router, kind| router.merge(principal_routes(kind)))
        .route("/auth/me", get(me))
}

fn principal_routes(kind: PrincipalKind) -> Router<AppState> {
    Router::new()
        .route(
            &format!("/auth/{kind}/register"),
            post(
                move |state: State<AppState>,
                      body: Result<Json<RegisterRequest>, JsonRejection>| {
                    register(kind, state, body)
                },
            ),
        )
        .route(
            &format!("/auth/{kind}/login"),
            post(
                move |state: State<AppState>, body: Result<Json<LoginRequest>, JsonRejection>| {
                    login(kind, state, body)
                },
            ),
        )
}

/// Strings, or integers as their decimal text. Floats and other types count as missing.
fn identifier_from(rest: &mut Map<String, Value>, kind: PrincipalKind) -> Option<String> {
    match rest.remove(kind.id_field()) {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| n.as_u64().map(|u| u.to_string())),
        _ => None,
    }
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    body.map(|Json(inner)| inner).map_err(|rejection| {
        warn!(error = %rejection, "rejected request body");
        AuthError::validation(INVALID_BODY_MESSAGE)
    })
}

#[instrument(skip(state, body), fields(role = %kind))]
pub async fn register(
    kind: PrincipalKind,
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisteredResponse>), AuthError> {
    let mut payload = parse_body(body)?;
    let input = RegisterInput {
        identifier: identifier_from(&mut payload.rest, kind),
        name: payload.name,
        email: payload.email,
        password: payload.password,
        confirm_password: payload.confirm_password,
    };

    let user = state.credentials.register(kind, input).await?;
    Ok((StatusCode::CREATED, Json(RegisteredResponse { user })))
}

#[instrument(skip(state, body), fields(role = %kind))]
pub async fn login(
    kind: PrincipalKind,
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AuthError> {
    let mut payload = parse_body(body)?;
    let input = LoginInput {
        identifier: identifier_from(&mut payload.rest, kind),
        password: payload.password,
    };

    let token = state.credentials.login(kind, input).await?;
    Ok(Json(LoginResponse {
        message: "Login successful",
        token,
    }))
}

/// Echoes the identity asserted by a bearer token. No store access.
#[instrument(skip_all)]
pub async fn me(AuthPrincipal(claims): AuthPrincipal) -> Result<Json<Value>, AuthError> {
    let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp as i64)
        .map_err(AuthError::unexpected)?
        .format(&Rfc3339)
        .map_err(AuthError::unexpected)?;

    let mut body = Map::new();
    body.insert(claims.role.id_field().into(), Value::String(claims.sub));
    body.insert("name".into(), Value::String(claims.name));
    body.insert("role".into(), Value::String(claims.role.as_str().into()));
    body.insert("expires_at".into(), Value::String(expires_at));
    Ok(Json(Value::Object(body)))
}
