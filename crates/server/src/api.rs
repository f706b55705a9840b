//! HTTP surface the chat platform calls into.
//!
//! - `GET  /`                                   info banner
//! - `GET  /logo_dark.png`                      dialog icon
//! - `POST /api/v1/command`                     slash command
//! - `POST /api/v1/polls/create`                create-poll dialog submission
//! - `POST /api/v1/polls/{id}/vote/{option}`    vote button
//! - `POST /api/v1/polls/{id}/votes/reset`      reset button
//! - `POST /api/v1/polls/{id}/option/add/request` add-option button, opens the dialog
//! - `POST /api/v1/polls/{id}/option/add`       add-option dialog submission
//! - `POST /api/v1/polls/{id}/end`              end button
//! - `POST /api/v1/polls/{id}/delete`           delete button
//! - `GET  /api/v1/polls/{id}/metadata`         per-user poll metadata
//! - `GET  /api/v1/configuration`               client-facing settings
//!
//! Every `/api/v1` route requires the configured user header.

use std::collections::BTreeMap;
use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tallyho_chat::attachments::Post;
use tallyho_chat::{
    ActionOutcome, ActionRequest, ChatServices, CommandRequest, DialogSubmission, OutcomeStatus,
};
use tallyho_core::config::ConfigHandle;
use tallyho_core::errors::ApplicationError;
use tallyho_core::i18n::{messages, Translations};
use tallyho_core::poll::{Metadata, PollId};
use tower_http::services::ServeFile;
use tracing::{info, warn};
use uuid::Uuid;

const LOGO_CACHE_CONTROL: &str = "public, max-age=604800";

#[derive(Clone)]
pub struct ApiState {
    services: ChatServices,
    config: ConfigHandle,
    translations: Arc<Translations>,
}

impl ApiState {
    pub fn new(
        services: ChatServices,
        config: ConfigHandle,
        translations: Arc<Translations>,
    ) -> Self {
        Self { services, config, translations }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PostActionBody {
    pub user_id: String,
    pub channel_id: String,
    pub post_id: String,
    pub team_id: Option<String>,
    pub trigger_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DialogBody {
    pub user_id: String,
    pub channel_id: String,
    pub team_id: Option<String>,
    pub callback_id: String,
    pub submission: Map<String, Value>,
    pub cancelled: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CommandBody {
    pub text: String,
    pub user_id: String,
    pub channel_id: String,
    pub team_id: Option<String>,
    pub root_id: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ActionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Post>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_text: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct DialogResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub response_type: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
}

/// Settings the chat client needs to render poll affordances.
#[derive(Debug, Serialize)]
pub struct ClientConfiguration {
    pub trigger: String,
}

/// The user the platform forwarded the request for, plus a fresh correlation id.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub correlation_id: String,
}

impl FromRequestParts<ApiState> for AuthenticatedUser {
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        let config = state.config.snapshot();
        let user_id = parts
            .headers
            .get(config.platform.user_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ApiError { error: "not authorized".to_owned() }),
                )
            })?;

        Ok(Self { user_id: user_id.to_owned(), correlation_id: Uuid::new_v4().to_string() })
    }
}

pub fn router(state: ApiState, assets_dir: &FsPath) -> Router {
    let api = Router::new()
        .route("/configuration", get(client_configuration))
        .route("/command", post(execute_command))
        .route("/polls/create", post(create_poll))
        .route("/polls/{poll_id}/vote/{option}", post(vote))
        .route("/polls/{poll_id}/votes/reset", post(reset_votes))
        .route("/polls/{poll_id}/option/add/request", post(request_add_option))
        .route("/polls/{poll_id}/option/add", post(add_option))
        .route("/polls/{poll_id}/end", post(end_poll))
        .route("/polls/{poll_id}/delete", post(delete_poll))
        .route("/polls/{poll_id}/metadata", get(metadata));

    let logo = Router::new()
        .route_service("/logo_dark.png", ServeFile::new(assets_dir.join("logo_dark.png")))
        .layer(middleware::map_response(cache_for_a_week));

    Router::new()
        .route("/", get(info_banner))
        .nest("/api/v1", api)
        .with_state(state)
        .merge(logo)
}

async fn cache_for_a_week(mut response: Response) -> Response {
    if response.status().is_success() {
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static(LOGO_CACHE_CONTROL));
    }
    response
}

async fn info_banner(State(state): State<ApiState>) -> String {
    state.translations.server_localizer().localize(
        &messages::INFO_BANNER,
        None,
        &json!({ "version": env!("CARGO_PKG_VERSION") }),
    )
}

async fn client_configuration(
    State(state): State<ApiState>,
    _user: AuthenticatedUser,
) -> Json<ClientConfiguration> {
    let config = state.config.snapshot();
    Json(ClientConfiguration { trigger: config.poll.trigger.clone() })
}

fn bad_body(rejection: JsonRejection) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: rejection.body_text() })).into_response()
}

fn status_of(outcome: &ActionOutcome) -> StatusCode {
    match outcome.status {
        OutcomeStatus::Ok => StatusCode::OK,
        OutcomeStatus::BadRequest => StatusCode::BAD_REQUEST,
    }
}

fn action_response(outcome: ActionOutcome) -> Response {
    let status = status_of(&outcome);
    let body = ActionResponse { update: outcome.update, ephemeral_text: outcome.ephemeral_text };
    (status, Json(body)).into_response()
}

fn action_request(poll_id: String, user: AuthenticatedUser, body: PostActionBody) -> ActionRequest {
    ActionRequest {
        poll_id: PollId(poll_id),
        user_id: user.user_id,
        channel_id: body.channel_id,
        post_id: body.post_id,
        team_id: body.team_id,
        trigger_id: body.trigger_id,
        correlation_id: user.correlation_id,
    }
}

fn dialog_submission(user: AuthenticatedUser, body: DialogBody) -> DialogSubmission {
    DialogSubmission {
        user_id: user.user_id,
        channel_id: body.channel_id,
        team_id: body.team_id,
        callback_id: body.callback_id,
        submission: body.submission,
        correlation_id: user.correlation_id,
    }
}

/// Dialog answers carry no message slot, so confirmations go out as ephemeral posts.
async fn dialog_response(
    state: &ApiState,
    submission: &DialogSubmission,
    outcome: ActionOutcome,
) -> Response {
    if let Some(text) = outcome.ephemeral_text.as_deref() {
        if let Err(error) = state
            .services
            .platform
            .ephemeral
            .send_ephemeral(&submission.channel_id, &submission.user_id, None, text)
            .await
        {
            warn!(
                event_name = "api.dialog.ephemeral_failed",
                correlation_id = %submission.correlation_id,
                error = %error,
                "could not deliver dialog confirmation"
            );
        }
    }
    let body = DialogResponse { error: outcome.dialog_error, errors: outcome.dialog_errors };
    (StatusCode::OK, Json(body)).into_response()
}

async fn execute_command(
    State(state): State<ApiState>,
    user: AuthenticatedUser,
    body: Result<Json<CommandBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let request = CommandRequest {
        text: body.text,
        user_id: user.user_id,
        channel_id: body.channel_id,
        team_id: body.team_id,
        root_id: body.root_id.filter(|root_id| !root_id.is_empty()),
        correlation_id: user.correlation_id,
    };
    let outcome = state.services.commands.execute(&request).await;
    let status = status_of(&outcome);
    let body = CommandResponse {
        response_type: "ephemeral",
        text: outcome.ephemeral_text.unwrap_or_default(),
    };
    (status, Json(body)).into_response()
}

async fn create_poll(
    State(state): State<ApiState>,
    user: AuthenticatedUser,
    body: Result<Json<DialogBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    if body.cancelled {
        return StatusCode::OK.into_response();
    }
    let submission = dialog_submission(user, body);
    let outcome = state.services.commands.create_from_dialog(&submission).await;
    dialog_response(&state, &submission, outcome).await
}

async fn vote(
    State(state): State<ApiState>,
    Path((poll_id, option)): Path<(String, i64)>,
    user: AuthenticatedUser,
    body: Result<Json<PostActionBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let request = action_request(poll_id, user, body);
    action_response(state.services.actions.vote(&request, option).await)
}

async fn reset_votes(
    State(state): State<ApiState>,
    Path(poll_id): Path<String>,
    user: AuthenticatedUser,
    body: Result<Json<PostActionBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let request = action_request(poll_id, user, body);
    action_response(state.services.actions.reset_votes(&request).await)
}

async fn request_add_option(
    State(state): State<ApiState>,
    Path(poll_id): Path<String>,
    user: AuthenticatedUser,
    body: Result<Json<PostActionBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let request = action_request(poll_id, user, body);
    action_response(state.services.actions.request_add_option(&request).await)
}

async fn add_option(
    State(state): State<ApiState>,
    Path(poll_id): Path<String>,
    user: AuthenticatedUser,
    body: Result<Json<DialogBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    if body.cancelled {
        return StatusCode::OK.into_response();
    }
    let submission = dialog_submission(user, body);
    let request = ActionRequest {
        poll_id: PollId(poll_id),
        user_id: submission.user_id.clone(),
        channel_id: submission.channel_id.clone(),
        post_id: submission.callback_id.clone(),
        team_id: submission.team_id.clone(),
        trigger_id: None,
        correlation_id: submission.correlation_id.clone(),
    };
    let answer = submission.text(tallyho_chat::actions::ADD_OPTION_KEY);
    let outcome = state.services.actions.submit_add_option(&request, answer).await;
    dialog_response(&state, &submission, outcome).await
}

async fn end_poll(
    State(state): State<ApiState>,
    Path(poll_id): Path<String>,
    user: AuthenticatedUser,
    body: Result<Json<PostActionBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let request = action_request(poll_id, user, body);
    action_response(state.services.actions.end_poll(&request).await)
}

async fn delete_poll(
    State(state): State<ApiState>,
    Path(poll_id): Path<String>,
    user: AuthenticatedUser,
    body: Result<Json<PostActionBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let request = action_request(poll_id, user, body);
    action_response(state.services.actions.delete_poll(&request).await)
}

async fn metadata(
    State(state): State<ApiState>,
    Path(poll_id): Path<String>,
    user: AuthenticatedUser,
) -> Result<Json<Metadata>, (StatusCode, Json<ApiError>)> {
    let poll_id = PollId(poll_id);
    state
        .services
        .actions
        .metadata(&poll_id, &user.user_id, &user.correlation_id)
        .await
        .map(Json)
        .map_err(|error| {
            let status = match &error {
                ApplicationError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            info!(
                event_name = "api.metadata.failed",
                correlation_id = %user.correlation_id,
                poll_id = %poll_id,
                error = %error,
                "metadata lookup failed"
            );
            (status, Json(ApiError { error: error.to_string() }))
        })
}
