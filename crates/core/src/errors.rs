use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use crate::i18n::{messages, Localizer, Message};

/// Rejections raised while building or mutating a poll from user input.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("empty question")]
    EmptyQuestion,
    #[error("empty answer option")]
    EmptyOption,
    #[error("duplicate answer option `{option}`")]
    DuplicateOption { option: String },
    #[error("a poll needs at least two answer options, got {count}")]
    TooFewOptions { count: usize },
    #[error("votes={max_votes} exceeds the {options} answer options")]
    MaxVotesExceedsOptions { max_votes: u32, options: usize },
    #[error("answer option index {index} is out of range for {options} options")]
    InvalidOptionIndex { index: i64, options: usize },
    #[error("missing user id")]
    InvalidUser,
    #[error("unrecognized poll setting `{setting}`")]
    UnrecognizedSetting { setting: String },
    #[error("invalid votes setting `{setting}`")]
    InvalidVotesSetting { setting: String },
    #[error("invalid end setting `{value}`")]
    InvalidEndSetting { value: String },
    #[error("end time {end} is not in the future")]
    EndInPast { end: DateTime<Utc> },
}

impl PollError {
    pub fn message(&self) -> (&'static Message, Value) {
        match self {
            Self::EmptyQuestion => (&messages::EMPTY_QUESTION, Value::Null),
            Self::EmptyOption => (&messages::EMPTY_OPTION, Value::Null),
            Self::DuplicateOption { option } => {
                (&messages::DUPLICATE_OPTION, json!({ "option": option }))
            }
            Self::TooFewOptions { .. } => (&messages::TOO_FEW_OPTIONS, Value::Null),
            Self::MaxVotesExceedsOptions { options, .. } => {
                (&messages::VOTES_EXCEED_OPTIONS, json!({ "options": options }))
            }
            Self::InvalidOptionIndex { .. } => (&messages::INVALID_OPTION_INDEX, Value::Null),
            Self::InvalidUser => (&messages::INVALID_USER, Value::Null),
            Self::UnrecognizedSetting { setting } => {
                (&messages::UNRECOGNIZED_SETTING, json!({ "setting": setting }))
            }
            Self::InvalidVotesSetting { setting } => {
                (&messages::INVALID_VOTES_SETTING, json!({ "setting": setting }))
            }
            Self::InvalidEndSetting { value } => {
                (&messages::INVALID_END_SETTING, json!({ "value": value }))
            }
            Self::EndInPast { end } => (
                &messages::END_IN_PAST,
                json!({ "date": end.format("%Y-%m-%d %H:%M:%S UTC").to_string() }),
            ),
        }
    }

    pub fn localize(&self, localizer: &dyn Localizer) -> String {
        let (message, data) = self.message();
        localizer.localize(message, None, &data)
    }
}

/// Which management operation a user was not allowed to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeniedAction {
    AddOption,
    EndPoll,
    DeletePoll,
}

impl DeniedAction {
    pub fn message(self) -> &'static Message {
        match self {
            Self::AddOption => &messages::ADD_OPTION_PERMISSION,
            Self::EndPoll => &messages::END_POLL_PERMISSION,
            Self::DeletePoll => &messages::DELETE_POLL_PERMISSION,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Input(#[from] PollError),
    #[error("permission denied: {0:?}")]
    Permission(DeniedAction),
    #[error("poll not found: {0}")]
    NotFound(String),
    #[error("concurrent update detected: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("render failure: {0}")]
    Render(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {error}")]
    BadRequest { error: PollError, correlation_id: String },
    #[error("forbidden: {action:?}")]
    Forbidden { action: DeniedAction, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self, localizer: &dyn Localizer) -> String {
        match self {
            Self::BadRequest { error, .. } => error.localize(localizer),
            Self::Forbidden { action, .. } => localizer.text(action.message()),
            Self::Internal { .. } => localizer.text(&messages::GENERIC_ERROR),
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest { .. })
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Input(error) => Self::BadRequest { error, correlation_id },
            ApplicationError::Permission(action) => Self::Forbidden { action, correlation_id },
            ApplicationError::NotFound(message)
            | ApplicationError::Conflict(message)
            | ApplicationError::Persistence(message)
            | ApplicationError::Integration(message)
            | ApplicationError::Render(message)
            | ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DeniedAction, InterfaceError, PollError};
    use crate::i18n::Catalog;

    #[test]
    fn input_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(PollError::EmptyOption).into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert!(interface.is_bad_request());
    }

    #[test]
    fn bad_request_carries_localized_detail() {
        let interface = ApplicationError::from(PollError::DuplicateOption {
            option: "Pizza".to_owned(),
        })
        .into_interface("req-2");

        assert_eq!(interface.user_message(&Catalog::english()), "Duplicate option: Pizza");
    }

    #[test]
    fn permission_error_names_the_denied_action() {
        let interface =
            ApplicationError::Permission(DeniedAction::EndPoll).into_interface("req-3");

        assert_eq!(
            interface.user_message(&Catalog::english()),
            "Only the creator of a poll and System Admins are allowed to end it."
        );
    }

    #[test]
    fn infrastructure_errors_collapse_to_generic_message() {
        for error in [
            ApplicationError::NotFound("poll:abc".to_owned()),
            ApplicationError::Conflict("poll:abc".to_owned()),
            ApplicationError::Persistence("disk full".to_owned()),
            ApplicationError::Render("user lookup failed".to_owned()),
        ] {
            let interface = error.into_interface("req-4");
            assert!(matches!(interface, InterfaceError::Internal { .. }));
            assert_eq!(interface.correlation_id(), "req-4");
            assert_eq!(
                interface.user_message(&Catalog::english()),
                "Something went wrong. Please try again later."
            );
        }
    }
}
