//! Message catalog and localization.
//!
//! Every user-visible string is a [`Message`] with a stable id, an optional singular form and a
//! plural/default form. Templates use tera syntax (`{{ question }}`) and are rendered against a
//! JSON object. A [`Catalog`] holds the translations for one locale; ids missing from a catalog
//! fall back to the built-in English text.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_LOCALE: &str = "en";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: &'static str,
    pub one: Option<&'static str>,
    pub other: &'static str,
}

impl Message {
    pub const fn new(id: &'static str, other: &'static str) -> Self {
        Self { id, one: None, other }
    }

    pub const fn plural(id: &'static str, one: &'static str, other: &'static str) -> Self {
        Self { id, one: Some(one), other }
    }
}

pub trait Localizer: Send + Sync {
    fn locale(&self) -> &str;

    /// Renders `message`; `plural_count` selects the `one` form when it equals 1.
    fn localize(&self, message: &Message, plural_count: Option<u64>, data: &Value) -> String;

    fn text(&self, message: &Message) -> String {
        self.localize(message, None, &Value::Null)
    }
}

#[derive(Debug, Error)]
pub enum I18nError {
    #[error("could not read translations `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not parse translations `{path}`: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
enum Translation {
    Plain(String),
    Plural { one: Option<String>, other: String },
}

#[derive(Clone, Debug)]
pub struct Catalog {
    locale: String,
    translations: HashMap<String, Translation>,
}

impl Catalog {
    pub fn english() -> Self {
        Self { locale: DEFAULT_LOCALE.to_owned(), translations: HashMap::new() }
    }

    /// Parses a JSON object of `id -> "text"` or `id -> {"one": .., "other": ..}`.
    pub fn from_json(locale: impl Into<String>, raw: &str) -> Result<Self, serde_json::Error> {
        let translations = serde_json::from_str::<HashMap<String, Translation>>(raw)?;
        Ok(Self { locale: locale.into(), translations })
    }

    fn template<'a>(&'a self, message: &'a Message, plural_count: Option<u64>) -> &'a str {
        let singular = plural_count == Some(1);
        match self.translations.get(message.id) {
            Some(Translation::Plain(text)) => text.as_str(),
            Some(Translation::Plural { one: Some(one), .. }) if singular => one.as_str(),
            Some(Translation::Plural { other, .. }) => other.as_str(),
            None => match message.one {
                Some(one) if singular => one,
                _ => message.other,
            },
        }
    }
}

impl Localizer for Catalog {
    fn locale(&self) -> &str {
        &self.locale
    }

    fn localize(&self, message: &Message, plural_count: Option<u64>, data: &Value) -> String {
        let template = self.template(message, plural_count);
        if !template.contains("{{") && !template.contains("{%") {
            return template.to_owned();
        }

        let context = match data {
            Value::Object(_) => Context::from_value(data.clone()),
            _ => Ok(Context::new()),
        };
        let rendered = context.and_then(|context| Tera::one_off(template, &context, false));
        match rendered {
            Ok(text) => text,
            Err(error) => {
                warn!(
                    event_name = "system.i18n.render_failed",
                    correlation_id = "i18n",
                    message_id = message.id,
                    locale = %self.locale,
                    error = %error,
                    "failed to render localized message"
                );
                template.to_owned()
            }
        }
    }
}

/// All catalogs known to the service, keyed by locale.
#[derive(Clone, Debug)]
pub struct Translations {
    default_locale: String,
    catalogs: HashMap<String, Arc<Catalog>>,
}

impl Default for Translations {
    fn default() -> Self {
        Self::english_only()
    }
}

impl Translations {
    pub fn english_only() -> Self {
        let mut catalogs = HashMap::new();
        catalogs.insert(DEFAULT_LOCALE.to_owned(), Arc::new(Catalog::english()));
        Self { default_locale: DEFAULT_LOCALE.to_owned(), catalogs }
    }

    /// Loads every `<locale>.json` file in `dir` on top of the built-in English catalog.
    pub fn load_dir(dir: &Path, default_locale: &str) -> Result<Self, I18nError> {
        let mut translations = Self::english_only();
        translations.default_locale = default_locale.to_owned();

        let entries = fs::read_dir(dir)
            .map_err(|source| I18nError::Read { path: dir.to_path_buf(), source })?;
        for entry in entries {
            let path =
                entry.map_err(|source| I18nError::Read { path: dir.to_path_buf(), source })?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(locale) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let raw = fs::read_to_string(&path)
                .map_err(|source| I18nError::Read { path: path.clone(), source })?;
            let catalog = Catalog::from_json(locale, &raw)
                .map_err(|source| I18nError::Parse { path: path.clone(), source })?;
            translations.catalogs.insert(locale.to_owned(), Arc::new(catalog));
        }

        Ok(translations)
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    pub fn locales(&self) -> Vec<&str> {
        let mut locales = self.catalogs.keys().map(String::as_str).collect::<Vec<_>>();
        locales.sort_unstable();
        locales
    }

    /// Returns the catalog for `locale`, then its language prefix, then the default locale.
    pub fn localizer(&self, locale: Option<&str>) -> Arc<dyn Localizer> {
        let requested = locale.map(str::trim).filter(|locale| !locale.is_empty());
        let language = requested.and_then(|locale| locale.split(['-', '_']).next());

        requested
            .and_then(|locale| self.catalogs.get(locale))
            .or_else(|| language.and_then(|language| self.catalogs.get(language)))
            .or_else(|| self.catalogs.get(&self.default_locale))
            .cloned()
            .unwrap_or_else(|| Arc::new(Catalog::english()))
    }

    pub fn server_localizer(&self) -> Arc<dyn Localizer> {
        self.localizer(None)
    }
}

pub mod messages {
    use super::Message;

    pub const GENERIC_ERROR: Message =
        Message::new("command.error.generic", "Something went wrong. Please try again later.");
    pub const INVALID_NUMBER_OF_OPTIONS: Message = Message::new(
        "command.error.invalidNumberOfOptions",
        "You must provide either no answer or at least two answers.",
    );
    pub const INVALID_INPUT: Message =
        Message::new("command.error.invalidInput", "Invalid input: {{ error }}");
    pub const SCHEDULED_END_FAILED: Message = Message::new(
        "command.error.scheduleEnd",
        "Something went wrong during automatically end of poll.",
    );

    pub const DEFAULT_YES: Message = Message::new("command.default.yes", "Yes");
    pub const DEFAULT_NO: Message = Message::new("command.default.no", "No");
    pub const HELP_SIMPLE: Message = Message::new(
        "command.help.text.simple",
        "To create a poll with the answer options \"{{ yes }}\" and \"{{ no }}\" type `/{{ trigger }} \"Question\"`.",
    );
    pub const HELP_OPTIONS: Message = Message::new(
        "command.help.text.options",
        "You can customize the options by typing `/{{ trigger }} \"Question\" \"Answer 1\" \"Answer 2\" \"Answer 3\"`",
    );
    pub const HELP_SETTINGS_INTRO: Message = Message::new(
        "command.help.text.pollSetting.introduction",
        "Poll Settings provide further customization, e.g. `/{{ trigger }} \"Question\" \"Answer 1\" \"Answer 2\" \"Answer 3\" --progress --anonymous`. The available Poll Settings are:",
    );
    pub const HELP_SETTING_ANONYMOUS: Message =
        Message::new("command.help.text.pollSetting.anonymous", "Don't show who voted for what");
    pub const HELP_SETTING_ANONYMOUS_CREATOR: Message = Message::new(
        "command.help.text.pollSetting.anonymous-creator",
        "Don't show who created the poll",
    );
    pub const HELP_SETTING_PROGRESS: Message = Message::new(
        "command.help.text.pollSetting.progress",
        "During the poll, show how many votes each answer option got",
    );
    pub const HELP_SETTING_PUBLIC_ADD_OPTION: Message = Message::new(
        "command.help.text.pollSetting.public-add-option",
        "Allow all users to add additional options",
    );
    pub const HELP_SETTING_VOTES: Message = Message::new(
        "command.help.text.pollSetting.multi-vote",
        "Allow users to vote for X options (0 allows every option)",
    );
    pub const HELP_SETTING_END: Message = Message::new(
        "command.help.text.pollSetting.end",
        "End the poll automatically, e.g. `end=30m`, `end=tomorrow` or `end=2026-01-31 18:00`",
    );

    pub const UNRECOGNIZED_SETTING: Message =
        Message::new("poll.newPoll.unrecognizedSetting", "Unrecognized poll setting: {{ setting }}");
    pub const INVALID_VOTES_SETTING: Message = Message::new(
        "poll.newPoll.votesettings.invalidSetting",
        "In votes=X, X must be a non-negative whole number. {{ setting }}",
    );
    pub const VOTES_EXCEED_OPTIONS: Message = Message::new(
        "poll.newPoll.votesettings.tooMany",
        "In votes=X, X must not be greater than the number of answer options ({{ options }}).",
    );
    pub const INVALID_END_SETTING: Message = Message::new(
        "poll.newPoll.endSetting.invalid",
        "Could not understand the end time {{ value }}",
    );
    pub const END_IN_PAST: Message = Message::new(
        "poll.newPoll.endSetting.past",
        "The end time {{ date }} cannot be set to a time before the current time",
    );
    pub const EMPTY_QUESTION: Message =
        Message::new("poll.newPoll.emptyQuestion", "Empty question not allowed");
    pub const EMPTY_OPTION: Message =
        Message::new("poll.addAnswerOption.empty", "Empty option not allowed");
    pub const DUPLICATE_OPTION: Message =
        Message::new("poll.addAnswerOption.duplicate", "Duplicate option: {{ option }}");
    pub const TOO_FEW_OPTIONS: Message = Message::new(
        "poll.newPoll.tooFewOptions",
        "A poll needs at least two answer options.",
    );
    pub const INVALID_OPTION_INDEX: Message =
        Message::new("poll.updateVote.invalidIndex", "This answer option does not exist.");
    pub const INVALID_USER: Message =
        Message::new("poll.updateVote.invalidUser", "Votes require a valid user.");
    pub const ALREADY_VOTED: Message =
        Message::new("poll.updateVote.alreadyVoted", "You've already voted for this option.");
    pub const VOTE_LIMIT_REACHED: Message = Message::new(
        "poll.updateVote.maxVotes",
        "You couldn't vote for this option, because you don't have any votes left. Use the reset button to reset your votes.",
    );

    pub const SETTINGS_LINE: Message =
        Message::new("poll.message.pollSettings", "**Poll Settings**: {{ settings }}");
    pub const SETTINGS_ENDS_AT: Message =
        Message::new("poll.message.pollSettings.endsAt", "ends at {{ end }}");
    pub const TOTAL_VOTES: Message =
        Message::new("poll.message.totalVotes", "**Total votes**: {{ total_votes }}");
    pub const TOTAL_VOTES_MULTI: Message = Message::new(
        "poll.message.totalVotes.multiVote",
        "**Total votes**: {{ total_votes }} ({{ voters }} users)",
    );
    pub const POLL_ENDED: Message =
        Message::new("poll.message.pollEnded", "This poll has ended. The results are:");
    pub const VOTER_LIST_AND: Message = Message::new("poll.message.and", "and");
    pub const RESULT_FIELD_TITLE: Message = Message::plural(
        "poll.message.fieldTitle",
        "{{ answer }} ({{ count }} vote)",
        "{{ answer }} ({{ count }} votes)",
    );
    pub const CARD_CREATED_BY: Message =
        Message::new("poll.card.createdBy", "Created by {{ creator }}");
    pub const BUTTON_RESET_VOTES: Message =
        Message::plural("poll.button.resetVotes", "Reset your vote", "Reset your votes");
    pub const BUTTON_ADD_OPTION: Message = Message::new("poll.button.addOption", "Add Option");
    pub const BUTTON_END_POLL: Message = Message::new("poll.button.endPoll", "End Poll");
    pub const BUTTON_DELETE_POLL: Message = Message::new("poll.button.deletePoll", "Delete Poll");

    pub const VOTE_COUNTED: Message =
        Message::new("response.vote.counted", "Your vote has been counted.");
    pub const VOTE_UPDATED: Message =
        Message::new("response.vote.updated", "Your vote has been updated.");
    pub const RESET_SUCCESS: Message =
        Message::new("response.resetVotes.success", "All your votes have been reset.");
    pub const RESET_NO_VOTES: Message =
        Message::new("response.resetVotes.noVotes", "There are no votes to reset.");
    pub const ADD_OPTION_SUCCESS: Message =
        Message::new("response.addOption.success", "Successfully added the option.");
    pub const ADD_OPTION_PERMISSION: Message = Message::new(
        "response.addOption.invalidPermission",
        "Only the creator of a poll and System Admins are allowed to add options.",
    );
    pub const END_POLL_SUCCESS: Message = Message::new(
        "response.endPoll.successfully",
        "The poll **{{ question }}** has ended and the original post has been updated. You can jump to it by pressing [here]({{ link }}).",
    );
    pub const END_POLL_PERMISSION: Message = Message::new(
        "response.endPoll.invalidPermission",
        "Only the creator of a poll and System Admins are allowed to end it.",
    );
    pub const DELETE_POLL_SUCCESS: Message =
        Message::new("response.deletePoll.success", "Successfully deleted the poll.");
    pub const DELETE_POLL_PERMISSION: Message = Message::new(
        "response.deletePoll.invalidPermission",
        "Only the creator of a poll and System Admins are allowed to delete it.",
    );

    pub const DIALOG_ADD_OPTION_TITLE: Message = Message::new("dialog.addOption.title", "Add Option");
    pub const DIALOG_ADD_OPTION_SUBMIT: Message = Message::new("dialog.addOption.submitLabel", "Add");
    pub const DIALOG_ADD_OPTION_ELEMENT: Message =
        Message::new("dialog.addOption.element.displayName", "Option");
    pub const DIALOG_CREATE_TITLE: Message = Message::new("dialog.createPoll.title", "Create Poll");
    pub const DIALOG_CREATE_SUBMIT: Message = Message::new("dialog.createPoll.submitLabel", "Create");

    pub const INFO_BANNER: Message =
        Message::new("server.info.banner", "Thanks for using Tallyho v{{ version }}");
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::TempDir;

    use super::{messages, Catalog, Localizer, Message, Translations};

    #[test]
    fn english_catalog_renders_template_data() {
        let catalog = Catalog::english();
        let text = catalog.localize(
            &messages::DUPLICATE_OPTION,
            None,
            &json!({ "option": "Pizza" }),
        );

        assert_eq!(text, "Duplicate option: Pizza");
    }

    #[test]
    fn plural_count_selects_singular_form_only_for_one() {
        let catalog = Catalog::english();
        let data = |count: u64| json!({ "answer": "Sushi", "count": count });

        assert_eq!(
            catalog.localize(&messages::RESULT_FIELD_TITLE, Some(1), &data(1)),
            "Sushi (1 vote)"
        );
        assert_eq!(
            catalog.localize(&messages::RESULT_FIELD_TITLE, Some(0), &data(0)),
            "Sushi (0 votes)"
        );
        assert_eq!(
            catalog.localize(&messages::RESULT_FIELD_TITLE, Some(2), &data(2)),
            "Sushi (2 votes)"
        );
    }

    #[test]
    fn message_without_placeholders_is_returned_verbatim() {
        let catalog = Catalog::english();
        assert_eq!(catalog.text(&messages::VOTE_COUNTED), "Your vote has been counted.");
    }

    #[test]
    fn broken_template_falls_back_to_raw_text() {
        let catalog = Catalog::english();
        let broken = Message::new("test.broken", "Hello {{ name ");

        assert_eq!(catalog.localize(&broken, None, &json!({})), "Hello {{ name ");
    }

    #[test]
    fn translations_prefer_locale_then_language_then_default() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(
            dir.path().join("de.json"),
            r#"{
  "response.vote.counted": "Deine Stimme wurde gezählt.",
  "poll.button.resetVotes": { "one": "Stimme zurücksetzen", "other": "Stimmen zurücksetzen" }
}"#,
        )
        .expect("write de.json");
        fs::write(dir.path().join("README.md"), "not a catalog").expect("write readme");

        let translations = Translations::load_dir(dir.path(), "en").expect("load translations");
        assert_eq!(translations.locales(), vec!["de", "en"]);

        let german = translations.localizer(Some("de-AT"));
        assert_eq!(german.locale(), "de");
        assert_eq!(german.text(&messages::VOTE_COUNTED), "Deine Stimme wurde gezählt.");
        assert_eq!(
            german.localize(&messages::BUTTON_RESET_VOTES, Some(1), &json!({})),
            "Stimme zurücksetzen"
        );
        assert_eq!(german.text(&messages::VOTE_UPDATED), "Your vote has been updated.");

        let fallback = translations.localizer(Some("fr"));
        assert_eq!(fallback.locale(), "en");
        assert_eq!(translations.localizer(None).locale(), "en");
    }

    #[test]
    fn malformed_catalog_is_reported_with_path() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join("es.json"), "{ not json").expect("write es.json");

        let error = Translations::load_dir(dir.path(), "en").expect_err("parse should fail");
        assert!(error.to_string().contains("es.json"));
    }
}
