use std::sync::Arc;

use serde_json::json;
use tallyho_core::errors::{ApplicationError, PollError};
use tallyho_core::i18n::{messages, Localizer, Translations};
use tallyho_core::poll::{parse_input, Poll, Settings};
use tallyho_core::time::Clock;
use tallyho_db::Store;
use tracing::{info, warn};

use crate::actions::{settle, ActionOutcome, Actor, DialogSubmission};
use crate::platform::PlatformHandles;
use crate::render::PollRenderer;
use crate::scheduler::SchedulerService;
use crate::ChatSettings;

/// Dialog fields of the create-poll form.
pub const QUESTION_KEY: &str = "question";
pub const OPTION_KEYS: [&str; 3] = ["option1", "option2", "option3"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandRequest {
    pub text: String,
    pub user_id: String,
    pub channel_id: String,
    pub team_id: Option<String>,
    pub root_id: Option<String>,
    pub correlation_id: String,
}

/// Creates polls from the slash command and the create-poll dialog.
pub struct CommandService {
    store: Store,
    platform: PlatformHandles,
    renderer: Arc<PollRenderer>,
    translations: Arc<Translations>,
    scheduler: Arc<SchedulerService>,
    clock: Arc<dyn Clock>,
    settings: ChatSettings,
}

impl CommandService {
    pub fn new(
        store: Store,
        platform: PlatformHandles,
        renderer: Arc<PollRenderer>,
        translations: Arc<Translations>,
        scheduler: Arc<SchedulerService>,
        clock: Arc<dyn Clock>,
        settings: ChatSettings,
    ) -> Self {
        Self { store, platform, renderer, translations, scheduler, clock, settings }
    }

    pub async fn execute(&self, request: &CommandRequest) -> ActionOutcome {
        let actor = Actor::lookup(
            &self.platform,
            &self.translations,
            &request.user_id,
            &request.correlation_id,
        )
        .await;
        let localizer = &*actor.localizer;

        let parsed = match parse_input(&request.text, &self.settings.trigger) {
            Ok(parsed) if !is_help(&parsed.question, &parsed.options) => parsed,
            Ok(_) | Err(PollError::EmptyQuestion) => {
                return ActionOutcome::ephemeral(help_text(localizer, &self.settings.trigger));
            }
            Err(error) => return invalid_input(localizer, &error),
        };

        let options = match parsed.options.len() {
            0 => vec![
                localizer.text(&messages::DEFAULT_YES),
                localizer.text(&messages::DEFAULT_NO),
            ],
            1 => {
                return ActionOutcome::bad_request(
                    localizer.text(&messages::INVALID_NUMBER_OF_OPTIONS),
                )
            }
            _ => parsed.options,
        };

        let created = Settings::from_strings(parsed.settings.as_slice(), &*self.clock).and_then(
            |settings| {
                let creator = request.user_id.as_str();
                Poll::new(creator, &parsed.question, options.as_slice(), settings, &*self.clock)
            },
        );
        let poll = match created {
            Ok(poll) => poll,
            Err(error) => return invalid_input(localizer, &error),
        };

        let poll_id = poll.id.clone();
        let result = self
            .publish(poll, &request.channel_id, request.root_id.as_deref(), &request.correlation_id)
            .await
            .map(|_| ActionOutcome::default());
        settle("create_poll", Some(&poll_id), &request.correlation_id, localizer, result)
    }

    /// Handles the create-poll dialog. Validation failures come back as a dialog error.
    pub async fn create_from_dialog(&self, submission: &DialogSubmission) -> ActionOutcome {
        let actor = Actor::lookup(
            &self.platform,
            &self.translations,
            &submission.user_id,
            &submission.correlation_id,
        )
        .await;
        let localizer = &*actor.localizer;

        let question = submission.text(QUESTION_KEY).unwrap_or_default();
        let options: Vec<&str> = OPTION_KEYS
            .iter()
            .filter_map(|key| submission.text(key))
            .filter(|option| !option.trim().is_empty())
            .collect();

        let created = Settings::from_submission(&submission.submission, &*self.clock).and_then(
            |settings| {
                let creator = submission.user_id.as_str();
                Poll::new(creator, question, options.as_slice(), settings, &*self.clock)
            },
        );
        let poll = match created {
            Ok(poll) => poll,
            Err(error) => {
                return ActionOutcome {
                    dialog_error: Some(error.localize(localizer)),
                    ..ActionOutcome::default()
                }
            }
        };

        let poll_id = poll.id.clone();
        let result = self
            .publish(poll, &submission.channel_id, None, &submission.correlation_id)
            .await
            .map(|_| ActionOutcome::default());
        let outcome =
            settle("create_poll", Some(&poll_id), &submission.correlation_id, localizer, result);
        ActionOutcome { dialog_error: outcome.ephemeral_text, ..ActionOutcome::default() }
    }

    /// Stores the poll, posts it as the bot and arms its end timer.
    async fn publish(
        &self,
        mut poll: Poll,
        channel_id: &str,
        root_id: Option<&str>,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let polls = self.store.polls();
        polls.insert(&poll).await?;

        let mut post =
            self.renderer.active_post(&poll, &*self.translations.server_localizer()).await?;
        post.user_id = self.settings.bot_user_id.clone();
        post.channel_id = channel_id.to_owned();
        post.root_id = root_id.unwrap_or_default().to_owned();

        let created = match self.platform.posts.create_post(post).await {
            Ok(created) => created,
            Err(error) => {
                if let Err(cleanup) = polls.delete(&poll.id).await {
                    warn!(
                        event_name = "poll.create.cleanup_failed",
                        correlation_id = %correlation_id,
                        poll_id = %poll.id,
                        error = %cleanup,
                        "could not remove poll after failed post"
                    );
                }
                return Err(error.into());
            }
        };

        poll.post_id = Some(created.id);
        poll.channel_id = Some(channel_id.to_owned()).filter(|channel| !channel.is_empty());
        polls.save(&poll).await?;
        if let Some(end) = poll.settings.end {
            self.scheduler.arm(poll.id.clone(), end);
        }

        info!(
            event_name = "poll.created",
            correlation_id = %correlation_id,
            poll_id = %poll.id,
            options = poll.answer_options.len(),
            "poll created"
        );
        Ok(())
    }
}

fn is_help(question: &str, options: &[String]) -> bool {
    options.is_empty() && question.eq_ignore_ascii_case("help")
}

fn invalid_input(localizer: &dyn Localizer, error: &PollError) -> ActionOutcome {
    ActionOutcome::bad_request(localizer.localize(
        &messages::INVALID_INPUT,
        None,
        &json!({ "error": error.localize(localizer) }),
    ))
}

/// Usage of the slash command with every available setting.
pub fn help_text(localizer: &dyn Localizer, trigger: &str) -> String {
    let data = json!({
        "trigger": trigger,
        "yes": localizer.text(&messages::DEFAULT_YES),
        "no": localizer.text(&messages::DEFAULT_NO),
    });
    let settings = [
        ("--anonymous", &messages::HELP_SETTING_ANONYMOUS),
        ("--anonymous-creator", &messages::HELP_SETTING_ANONYMOUS_CREATOR),
        ("--progress", &messages::HELP_SETTING_PROGRESS),
        ("--public-add-option", &messages::HELP_SETTING_PUBLIC_ADD_OPTION),
        ("--votes=X", &messages::HELP_SETTING_VOTES),
        ("--end=X", &messages::HELP_SETTING_END),
    ];

    let mut text = format!(
        "{}\n{}\n{}",
        localizer.localize(&messages::HELP_SIMPLE, None, &data),
        localizer.localize(&messages::HELP_OPTIONS, None, &data),
        localizer.localize(&messages::HELP_SETTINGS_INTRO, None, &data),
    );
    for (flag, description) in settings {
        text.push_str(&format!("\n- `{flag}`: {}", localizer.text(description)));
    }
    text
}
