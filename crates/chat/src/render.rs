use std::sync::Arc;

use serde_json::json;
use tallyho_core::errors::ApplicationError;
use tallyho_core::i18n::{messages, Localizer};
use tallyho_core::poll::{AnswerOption, Poll};
use thiserror::Error;

use crate::attachments::{ActionStyle, Post, PostAction, PostBuilder};
use crate::platform::{NameResolver, PlatformError};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("could not resolve the name of `{user_id}`: {source}")]
    Name { user_id: String, source: PlatformError },
}

impl From<RenderError> for ApplicationError {
    fn from(value: RenderError) -> Self {
        Self::Render(value.to_string())
    }
}

/// Projects polls into chat posts. Button URLs are rooted at `route_prefix`.
pub struct PollRenderer {
    route_prefix: String,
    creators: Arc<dyn NameResolver>,
    voters: Arc<dyn NameResolver>,
}

impl PollRenderer {
    pub fn new(
        route_prefix: impl Into<String>,
        creators: Arc<dyn NameResolver>,
        voters: Arc<dyn NameResolver>,
    ) -> Self {
        Self { route_prefix: route_prefix.into(), creators, voters }
    }

    pub fn poll_url(&self, poll: &Poll, action: &str) -> String {
        format!("{}/api/v1/polls/{}/{action}", self.route_prefix, poll.id)
    }

    pub async fn active_post(
        &self,
        poll: &Poll,
        localizer: &dyn Localizer,
    ) -> Result<Post, RenderError> {
        let author = self.author_name(poll).await?;
        let card = self.card(poll, localizer).await;
        let text = self.summary_text(poll, localizer);

        let mut buttons: Vec<PostAction> = poll
            .answer_options
            .iter()
            .enumerate()
            .map(|(index, option)| {
                let name = if poll.settings.progress {
                    format!("{} ({})", option.answer, option.voters.len())
                } else {
                    option.answer.clone()
                };
                PostAction::button(
                    format!("vote{index}"),
                    name,
                    self.poll_url(poll, &format!("vote/{index}")),
                )
            })
            .collect();

        let reset_label = localizer.localize(
            &messages::BUTTON_RESET_VOTES,
            Some(poll.effective_max_votes() as u64),
            &json!({}),
        );
        buttons.extend([
            PostAction::button("resetVote", reset_label, self.poll_url(poll, "votes/reset"))
                .style(ActionStyle::Primary),
            PostAction::button(
                "addOption",
                localizer.text(&messages::BUTTON_ADD_OPTION),
                self.poll_url(poll, "option/add/request"),
            )
            .style(ActionStyle::Primary),
            PostAction::button(
                "endPoll",
                localizer.text(&messages::BUTTON_END_POLL),
                self.poll_url(poll, "end"),
            )
            .style(ActionStyle::Primary),
            PostAction::button(
                "deletePoll",
                localizer.text(&messages::BUTTON_DELETE_POLL),
                self.poll_url(poll, "delete"),
            )
            .style(ActionStyle::Danger),
        ]);

        Ok(PostBuilder::new()
            .poll(poll.id.as_str())
            .card(card)
            .attachment(|attachment| {
                attachment.author(author).title(poll.question.as_str()).text(text);
                for button in buttons {
                    attachment.button(button);
                }
            })
            .build())
    }

    pub async fn end_post(&self, poll: &Poll, localizer: &dyn Localizer) -> Result<Post, RenderError> {
        let author = self.author_name(poll).await?;
        let mut fields = Vec::with_capacity(poll.answer_options.len());
        for option in &poll.answer_options {
            fields.push((
                result_title(option, localizer),
                self.voter_list(poll, option, localizer).await?,
            ));
        }

        Ok(PostBuilder::new()
            .poll(poll.id.as_str())
            .attachment(|attachment| {
                attachment
                    .author(author)
                    .title(poll.question.as_str())
                    .text(localizer.text(&messages::POLL_ENDED));
                for (title, value) in fields {
                    attachment.short_field(title, value);
                }
            })
            .build())
    }

    /// Markdown summary attached to the post. Name lookups that fail yield an empty card.
    pub async fn card(&self, poll: &Poll, localizer: &dyn Localizer) -> String {
        match self.try_card(poll, localizer).await {
            Ok(card) => card,
            Err(error) => {
                tracing::warn!(
                    event_name = "poll.render.card_failed",
                    poll_id = %poll.id,
                    error = %error,
                    "could not render poll card"
                );
                String::new()
            }
        }
    }

    async fn try_card(&self, poll: &Poll, localizer: &dyn Localizer) -> Result<String, RenderError> {
        let mut sections = vec![format!("# {}", poll.question)];
        if !poll.settings.anonymous_creator {
            let creator = self.resolve(&*self.creators, &poll.creator).await?;
            sections.push(localizer.localize(
                &messages::CARD_CREATED_BY,
                None,
                &json!({ "creator": creator }),
            ));
        }
        for option in &poll.answer_options {
            let mut section = format!("### {}", result_title(option, localizer));
            let voters = self.voter_list(poll, option, localizer).await?;
            if !voters.is_empty() {
                section.push('\n');
                section.push_str(&voters);
            }
            sections.push(section);
        }
        Ok(sections.join("\n\n"))
    }

    fn summary_text(&self, poll: &Poll, localizer: &dyn Localizer) -> String {
        let mut settings = poll.settings.tokens();
        if let Some(end) = poll.settings.end {
            settings.push(localizer.localize(
                &messages::SETTINGS_ENDS_AT,
                None,
                &json!({ "end": end.format("%Y-%m-%d %H:%M:%S UTC").to_string() }),
            ));
        }

        let mut lines = vec!["---".to_owned()];
        if !settings.is_empty() {
            lines.push(localizer.localize(
                &messages::SETTINGS_LINE,
                None,
                &json!({ "settings": settings.join(", ") }),
            ));
        }
        lines.push(if poll.is_multi_vote() {
            localizer.localize(
                &messages::TOTAL_VOTES_MULTI,
                None,
                &json!({ "total_votes": poll.total_votes(), "voters": poll.distinct_voters() }),
            )
        } else {
            localizer.localize(
                &messages::TOTAL_VOTES,
                None,
                &json!({ "total_votes": poll.total_votes() }),
            )
        });
        lines.join("\n")
    }

    async fn author_name(&self, poll: &Poll) -> Result<String, RenderError> {
        if poll.settings.anonymous_creator {
            return Ok(String::new());
        }
        self.resolve(&*self.creators, &poll.creator).await
    }

    async fn voter_list(
        &self,
        poll: &Poll,
        option: &AnswerOption,
        localizer: &dyn Localizer,
    ) -> Result<String, RenderError> {
        if poll.settings.anonymous {
            return Ok(String::new());
        }
        let mut names = Vec::with_capacity(option.voters.len());
        for voter in &option.voters {
            names.push(self.resolve(&*self.voters, voter).await?);
        }
        Ok(join_names(&names, &localizer.text(&messages::VOTER_LIST_AND)))
    }

    async fn resolve(&self, names: &dyn NameResolver, user_id: &str) -> Result<String, RenderError> {
        names
            .display_name(user_id)
            .await
            .map_err(|source| RenderError::Name { user_id: user_id.to_owned(), source })
    }
}

fn result_title(option: &AnswerOption, localizer: &dyn Localizer) -> String {
    let count = option.voters.len();
    localizer.localize(
        &messages::RESULT_FIELD_TITLE,
        Some(count as u64),
        &json!({ "answer": option.answer, "count": count }),
    )
}

/// `a`, `a and b`, `a, b and c`.
pub fn join_names(names: &[String], and: &str) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} {and} {last}", init.join(", ")),
    }
}
