//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Redirect,
    },
    Form, Json,
};
use axum_extra::extract::cookie::CookieJar;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::deploy::request::{DeployForm, DeploymentRequest};
use crate::errors::DeployerError;
use crate::server::guard::{
    take_flash, with_flash, with_session, without_session, CurrentUser, Flash,
};
use crate::server::state::ServerState;
use crate::server::views;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub git_hash: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "nessus-deployer".to_string(),
        version: version.version,
        git_hash: version.git_hash,
    })
}

/// Login form
#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login_page_handler(jar: CookieJar) -> impl IntoResponse {
    let (jar, flash) = take_flash(jar);
    (jar, Html(views::login_page(flash)))
}

pub async fn login_handler(
    State(state): State<Arc<ServerState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<impl IntoResponse, DeployerError> {
    let username = form.username.trim();

    if !state.authenticator.authenticate(username, &form.password).await {
        warn!("Failed login for '{}'", username);
        let jar = with_flash(jar, Flash::LoginFailed, state.secure_cookie);
        return Ok((jar, Redirect::to("/login")));
    }

    let token = state.session_keys.issue(username)?;
    info!("User '{}' logged in", username);

    let jar = with_session(jar, token, state.secure_cookie);
    let jar = with_flash(jar, Flash::LoginOk, state.secure_cookie);
    Ok((jar, Redirect::to("/")))
}

pub async fn logout_handler(
    State(state): State<Arc<ServerState>>,
    jar: CookieJar,
) -> impl IntoResponse {
    let jar = without_session(jar);
    let jar = with_flash(jar, Flash::LoggedOut, state.secure_cookie);
    (jar, Redirect::to("/login"))
}

/// The deployment form
pub async fn index_handler(
    user: CurrentUser,
    State(state): State<Arc<ServerState>>,
    jar: CookieJar,
) -> impl IntoResponse {
    let (jar, flash) = take_flash(jar);
    let accounts = state.store.account_names();
    (jar, Html(views::index_page(&user.username, &accounts, flash)))
}

/// Start a deployment and stream its output as server-sent events.
///
/// Validation, credential and launch errors are returned before the stream
/// opens. The last event is always `PLAYBOOK_EXIT=<code>`.
pub async fn deploy_handler(
    user: CurrentUser,
    State(state): State<Arc<ServerState>>,
    Form(form): Form<DeployForm>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, DeployerError> {
    let request = DeploymentRequest::from_form(&user.username, form, &state.store)?;
    let job = state.jobs.start(request).await?;

    let events = ReceiverStream::new(job.output)
        .map(|line| Ok(Event::default().data(line.to_event_data())));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub async fn history_handler(
    user: CurrentUser,
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, DeployerError> {
    let runs = state.recorder.list_runs().await?;
    Ok(Html(views::history_page(&user.username, &runs)))
}

pub async fn run_handler(
    user: CurrentUser,
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DeployerError> {
    let run = state.recorder.get_run(id).await?;
    Ok(Html(views::run_page(&user.username, &run)))
}

pub async fn run_csv_handler(
    _user: CurrentUser,
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DeployerError> {
    let csv = state.recorder.export_csv(id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"run-{}.csv\"", id),
            ),
        ],
        csv,
    ))
}
