use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tallyho_core::errors::{ApplicationError, DeniedAction, InterfaceError};
use tallyho_core::i18n::{messages, Localizer, Translations};
use tallyho_core::poll::{Metadata, Poll, PollId};
use tallyho_db::{Store, StoreError};
use tracing::{info, warn};

use crate::attachments::{Dialog, DialogElement, OpenDialogRequest, Post};
use crate::platform::{PlatformError, PlatformHandles, UserProfile};
use crate::render::PollRenderer;
use crate::scheduler::PollEnder;
use crate::ChatSettings;

/// Dialog field carrying the answer of an add-option submission.
pub const ADD_OPTION_KEY: &str = "answerOption";

impl From<PlatformError> for ApplicationError {
    fn from(value: PlatformError) -> Self {
        Self::Integration(value.to_string())
    }
}

/// A button press on a poll post.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionRequest {
    pub poll_id: PollId,
    pub user_id: String,
    pub channel_id: String,
    /// The poll post the action originated from.
    pub post_id: String,
    pub team_id: Option<String>,
    pub trigger_id: Option<String>,
    pub correlation_id: String,
}

/// An interactive dialog submission.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DialogSubmission {
    pub user_id: String,
    pub channel_id: String,
    pub team_id: Option<String>,
    pub callback_id: String,
    pub submission: Map<String, Value>,
    pub correlation_id: String,
}

impl DialogSubmission {
    pub fn text(&self, key: &str) -> Option<&str> {
        self.submission.get(key).and_then(Value::as_str)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutcomeStatus {
    #[default]
    Ok,
    BadRequest,
}

/// What a handler hands back to the transport: an optional replacement post, an ephemeral note
/// for the acting user and, for dialogs, validation errors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionOutcome {
    pub status: OutcomeStatus,
    pub ephemeral_text: Option<String>,
    pub update: Option<Post>,
    pub dialog_error: Option<String>,
    pub dialog_errors: BTreeMap<String, String>,
}

impl ActionOutcome {
    pub fn ephemeral(text: impl Into<String>) -> Self {
        Self { ephemeral_text: Some(text.into()), ..Self::default() }
    }

    pub fn bad_request(text: impl Into<String>) -> Self {
        Self { status: OutcomeStatus::BadRequest, ..Self::ephemeral(text) }
    }

    pub fn with_update(mut self, post: Post) -> Self {
        self.update = Some(post);
        self
    }

    pub fn dialog_field_error(field: impl Into<String>, text: impl Into<String>) -> Self {
        let mut outcome = Self::default();
        outcome.dialog_errors.insert(field.into(), text.into());
        outcome
    }
}

/// The acting user as far as it could be looked up.
pub(crate) struct Actor {
    pub profile: Option<UserProfile>,
    pub localizer: Arc<dyn Localizer>,
}

impl Actor {
    pub(crate) async fn lookup(
        platform: &PlatformHandles,
        translations: &Translations,
        user_id: &str,
        correlation_id: &str,
    ) -> Self {
        match platform.users.get_user(user_id).await {
            Ok(profile) => {
                let locale = Some(profile.locale.as_str()).filter(|locale| !locale.is_empty());
                Self { localizer: translations.localizer(locale), profile: Some(profile) }
            }
            Err(error) => {
                warn!(
                    event_name = "poll.user.lookup_failed",
                    correlation_id = %correlation_id,
                    user_id = %user_id,
                    error = %error,
                    "falling back to the server locale"
                );
                Self { profile: None, localizer: translations.server_localizer() }
            }
        }
    }

    /// Admins pass every check; otherwise `allowed` decides.
    fn authorize(&self, allowed: bool, denied: DeniedAction) -> Result<(), ApplicationError> {
        if allowed {
            return Ok(());
        }
        match &self.profile {
            Some(profile) if profile.is_system_admin() => Ok(()),
            Some(_) => Err(ApplicationError::Permission(denied)),
            None => Err(ApplicationError::Integration(
                "user lookup failed; cannot check admin permission".to_owned(),
            )),
        }
    }

    fn text(&self, message: &tallyho_core::i18n::Message) -> String {
        self.localizer.text(message)
    }
}

/// Maps a failed handler to the outcome the user sees and logs infrastructure failures.
pub(crate) fn settle(
    operation: &'static str,
    poll_id: Option<&PollId>,
    correlation_id: &str,
    localizer: &dyn Localizer,
    result: Result<ActionOutcome, ApplicationError>,
) -> ActionOutcome {
    let error = match result {
        Ok(outcome) => return outcome,
        Err(error) => error,
    };
    let poll_id = poll_id.map(PollId::as_str).unwrap_or_default();
    let interface = error.into_interface(correlation_id);
    match &interface {
        InterfaceError::Internal { message, .. } => warn!(
            event_name = "poll.action.failed",
            correlation_id = %correlation_id,
            poll_id = %poll_id,
            operation,
            error = %message,
            "poll action failed"
        ),
        other => info!(
            event_name = "poll.action.rejected",
            correlation_id = %correlation_id,
            poll_id = %poll_id,
            operation,
            reason = %other,
            "poll action rejected"
        ),
    }

    let text = interface.user_message(localizer);
    if interface.is_bad_request() {
        ActionOutcome::bad_request(text)
    } else {
        ActionOutcome::ephemeral(text)
    }
}

/// Handles button presses and dialog submissions against stored polls.
///
/// Every mutation loads the poll, changes a copy and writes it back with compare-and-set; a lost
/// race surfaces as the generic error without a retry.
pub struct ActionDispatcher {
    store: Store,
    platform: PlatformHandles,
    renderer: Arc<PollRenderer>,
    translations: Arc<Translations>,
    settings: ChatSettings,
}

impl ActionDispatcher {
    pub fn new(
        store: Store,
        platform: PlatformHandles,
        renderer: Arc<PollRenderer>,
        translations: Arc<Translations>,
        settings: ChatSettings,
    ) -> Self {
        Self { store, platform, renderer, translations, settings }
    }

    async fn actor(&self, user_id: &str, correlation_id: &str) -> Actor {
        Actor::lookup(&self.platform, &self.translations, user_id, correlation_id).await
    }

    pub async fn vote(&self, request: &ActionRequest, index: i64) -> ActionOutcome {
        let actor = self.actor(&request.user_id, &request.correlation_id).await;
        let result = self.try_vote(request, index, &actor).await;
        settle("vote", Some(&request.poll_id), &request.correlation_id, &*actor.localizer, result)
    }

    async fn try_vote(
        &self,
        request: &ActionRequest,
        index: i64,
        actor: &Actor,
    ) -> Result<ActionOutcome, ApplicationError> {
        let polls = self.store.polls();
        let previous = polls.get(&request.poll_id).await?;
        let mut next = previous.clone();
        let had_voted = next.has_voted(&request.user_id);

        if let Some(notice) = next.update_vote(&request.user_id, index)? {
            return Ok(ActionOutcome::ephemeral(actor.text(notice.message())));
        }
        polls.update(&previous, &next).await?;

        let update = self.renderer.active_post(&next, &*self.translations.server_localizer()).await?;
        let confirmation =
            if had_voted { &messages::VOTE_UPDATED } else { &messages::VOTE_COUNTED };
        Ok(ActionOutcome::ephemeral(actor.text(confirmation)).with_update(update))
    }

    pub async fn reset_votes(&self, request: &ActionRequest) -> ActionOutcome {
        let actor = self.actor(&request.user_id, &request.correlation_id).await;
        let result = self.try_reset_votes(request, &actor).await;
        settle("reset_votes", Some(&request.poll_id), &request.correlation_id, &*actor.localizer, result)
    }

    async fn try_reset_votes(
        &self,
        request: &ActionRequest,
        actor: &Actor,
    ) -> Result<ActionOutcome, ApplicationError> {
        let polls = self.store.polls();
        let previous = polls.get(&request.poll_id).await?;
        if !previous.has_voted(&request.user_id) {
            return Ok(ActionOutcome::ephemeral(actor.text(&messages::RESET_NO_VOTES)));
        }

        let mut next = previous.clone();
        next.reset_votes(&request.user_id)?;
        polls.update(&previous, &next).await?;

        let update = self.renderer.active_post(&next, &*self.translations.server_localizer()).await?;
        Ok(ActionOutcome::ephemeral(actor.text(&messages::RESET_SUCCESS)).with_update(update))
    }

    /// Opens the dialog asking for the new answer option.
    pub async fn request_add_option(&self, request: &ActionRequest) -> ActionOutcome {
        let actor = self.actor(&request.user_id, &request.correlation_id).await;
        let result = self.try_request_add_option(request, &actor).await;
        settle(
            "request_add_option",
            Some(&request.poll_id),
            &request.correlation_id,
            &*actor.localizer,
            result,
        )
    }

    async fn try_request_add_option(
        &self,
        request: &ActionRequest,
        actor: &Actor,
    ) -> Result<ActionOutcome, ApplicationError> {
        let poll = self.store.polls().get(&request.poll_id).await?;
        actor.authorize(poll.can_add_option(&request.user_id, false), DeniedAction::AddOption)?;

        let trigger_id = request
            .trigger_id
            .clone()
            .filter(|trigger_id| !trigger_id.is_empty())
            .ok_or_else(|| ApplicationError::Integration("request carries no trigger id".to_owned()))?;
        let dialog = OpenDialogRequest {
            trigger_id,
            url: self.renderer.poll_url(&poll, "option/add"),
            dialog: Dialog {
                callback_id: request.post_id.clone(),
                title: actor.text(&messages::DIALOG_ADD_OPTION_TITLE),
                icon_url: self.settings.icon_url(),
                submit_label: actor.text(&messages::DIALOG_ADD_OPTION_SUBMIT),
                elements: vec![DialogElement::text(
                    ADD_OPTION_KEY,
                    actor.text(&messages::DIALOG_ADD_OPTION_ELEMENT),
                )],
            },
        };
        self.platform.dialogs.open_dialog(dialog).await?;
        Ok(ActionOutcome::default())
    }

    /// Adds the submitted answer option and refreshes the poll post.
    pub async fn submit_add_option(
        &self,
        request: &ActionRequest,
        answer: Option<&str>,
    ) -> ActionOutcome {
        let actor = self.actor(&request.user_id, &request.correlation_id).await;
        let result = self.try_submit_add_option(request, answer, &actor).await;
        settle(
            "submit_add_option",
            Some(&request.poll_id),
            &request.correlation_id,
            &*actor.localizer,
            result,
        )
    }

    async fn try_submit_add_option(
        &self,
        request: &ActionRequest,
        answer: Option<&str>,
        actor: &Actor,
    ) -> Result<ActionOutcome, ApplicationError> {
        let polls = self.store.polls();
        let previous = polls.get(&request.poll_id).await?;
        actor.authorize(previous.can_add_option(&request.user_id, false), DeniedAction::AddOption)?;

        let mut next = previous.clone();
        if let Err(error) = next.add_answer_option(answer.unwrap_or_default()) {
            return Ok(ActionOutcome::dialog_field_error(
                ADD_OPTION_KEY,
                error.localize(&*actor.localizer),
            ));
        }
        polls.update(&previous, &next).await?;

        let rendered =
            self.renderer.active_post(&next, &*self.translations.server_localizer()).await?;
        let mut origin = self.platform.posts.get_post(&origin_post_id(request, &next)?).await?;
        origin.replace_content(rendered);
        self.platform.posts.update_post(origin).await?;

        Ok(ActionOutcome::ephemeral(actor.text(&messages::ADD_OPTION_SUCCESS)))
    }

    pub async fn end_poll(&self, request: &ActionRequest) -> ActionOutcome {
        let actor = self.actor(&request.user_id, &request.correlation_id).await;
        let result = self.try_end_poll(request, &actor).await;
        settle("end_poll", Some(&request.poll_id), &request.correlation_id, &*actor.localizer, result)
    }

    async fn try_end_poll(
        &self,
        request: &ActionRequest,
        actor: &Actor,
    ) -> Result<ActionOutcome, ApplicationError> {
        let poll = self.store.polls().get(&request.poll_id).await?;
        actor.authorize(poll.can_manage(&request.user_id, false), DeniedAction::EndPoll)?;

        let origin = self.platform.posts.get_post(&origin_post_id(request, &poll)?).await?;
        self.finish(&poll, origin, &request.correlation_id).await?;
        Ok(ActionOutcome::default())
    }

    /// Replaces the poll post with the results, forgets the poll and announces the end.
    ///
    /// The key is only deleted once the post shows the results, so a failed update leaves the
    /// poll live and endable again.
    async fn finish(
        &self,
        poll: &Poll,
        mut origin: Post,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let public = self.translations.server_localizer();
        let rendered = self.renderer.end_post(poll, &*public).await?;

        let origin_id = origin.id.clone();
        let channel_id = origin.channel_id.clone();
        origin.replace_content(rendered);
        self.platform.posts.update_post(origin).await?;
        self.store.polls().delete(&poll.id).await?;

        let link = format!("{}/_redirect/pl/{origin_id}", self.settings.site_url.trim_end_matches('/'));
        let announcement = Post {
            user_id: self.settings.bot_user_id.clone(),
            channel_id,
            root_id: origin_id,
            message: public.localize(
                &messages::END_POLL_SUCCESS,
                None,
                &json!({ "question": poll.question, "link": link }),
            ),
            ..Post::default()
        };
        if let Err(error) = self.platform.posts.create_post(announcement).await {
            warn!(
                event_name = "poll.end.announcement_failed",
                correlation_id = %correlation_id,
                poll_id = %poll.id,
                error = %error,
                "failed to post the end of poll announcement"
            );
        }

        info!(event_name = "poll.ended", correlation_id = %correlation_id, poll_id = %poll.id);
        Ok(())
    }

    pub async fn delete_poll(&self, request: &ActionRequest) -> ActionOutcome {
        let actor = self.actor(&request.user_id, &request.correlation_id).await;
        let result = self.try_delete_poll(request, &actor).await;
        settle("delete_poll", Some(&request.poll_id), &request.correlation_id, &*actor.localizer, result)
    }

    async fn try_delete_poll(
        &self,
        request: &ActionRequest,
        actor: &Actor,
    ) -> Result<ActionOutcome, ApplicationError> {
        let poll = self.store.polls().get(&request.poll_id).await?;
        actor.authorize(poll.can_manage(&request.user_id, false), DeniedAction::DeletePoll)?;

        let origin_id = origin_post_id(request, &poll)?;
        self.store.polls().delete(&poll.id).await?;
        self.platform.posts.delete_post(&origin_id).await?;

        info!(
            event_name = "poll.deleted",
            correlation_id = %request.correlation_id,
            poll_id = %poll.id
        );
        Ok(ActionOutcome::ephemeral(actor.text(&messages::DELETE_POLL_SUCCESS)))
    }

    /// Personalized view of a poll for `user_id`.
    pub async fn metadata(
        &self,
        poll_id: &PollId,
        user_id: &str,
        correlation_id: &str,
    ) -> Result<Metadata, ApplicationError> {
        let poll = self.store.polls().get(poll_id).await?;
        let actor = self.actor(user_id, correlation_id).await;
        let is_admin = actor.profile.as_ref().is_some_and(UserProfile::is_system_admin);
        Ok(poll.metadata(user_id, is_admin))
    }
}

#[async_trait]
impl PollEnder for ActionDispatcher {
    /// Ends the poll on behalf of its creator. Any failure is reported to the creator in the
    /// poll's channel.
    async fn end_scheduled(&self, poll_id: &PollId) -> Result<(), ApplicationError> {
        let correlation_id = format!("schedule-{poll_id}");
        let poll = match self.store.polls().get(poll_id).await {
            Ok(poll) => poll,
            Err(StoreError::NotFound(_)) => {
                info!(
                    event_name = "poll.schedule.poll_missing",
                    correlation_id = %correlation_id,
                    poll_id = %poll_id,
                    "poll was already ended or deleted"
                );
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        let Err(error) = self.end_stored(&poll, &correlation_id).await else {
            return Ok(());
        };
        self.notify_scheduled_failure(&poll, &correlation_id).await;
        Err(error)
    }
}

impl ActionDispatcher {
    async fn end_stored(&self, poll: &Poll, correlation_id: &str) -> Result<(), ApplicationError> {
        let origin_id = poll.post_id.clone().ok_or_else(|| {
            ApplicationError::Integration(format!("poll {} has no post to update", poll.id))
        })?;
        let origin = self.platform.posts.get_post(&origin_id).await?;
        self.finish(poll, origin, correlation_id).await
    }

    async fn notify_scheduled_failure(&self, poll: &Poll, correlation_id: &str) {
        let Some(channel_id) = poll.channel_id.as_deref() else {
            warn!(
                event_name = "poll.schedule.channel_unknown",
                correlation_id = %correlation_id,
                poll_id = %poll.id,
                "no channel to tell the creator about the failed end"
            );
            return;
        };

        let creator = self.actor(&poll.creator, correlation_id).await;
        let notice = creator.text(&messages::SCHEDULED_END_FAILED);
        if let Err(error) = self
            .platform
            .ephemeral
            .send_ephemeral(channel_id, &poll.creator, poll.post_id.as_deref(), &notice)
            .await
        {
            warn!(
                event_name = "poll.schedule.notify_failed",
                correlation_id = %correlation_id,
                poll_id = %poll.id,
                error = %error,
                "could not tell the creator about the failed end"
            );
        }
    }
}

fn origin_post_id(request: &ActionRequest, poll: &Poll) -> Result<String, ApplicationError> {
    Some(request.post_id.clone())
        .filter(|post_id| !post_id.is_empty())
        .or_else(|| poll.post_id.clone())
        .ok_or_else(|| ApplicationError::Integration(format!("poll {} has no post", poll.id)))
}
