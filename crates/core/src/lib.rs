//! Poll domain for Tallyho: command parsing, the settings grammar, the poll state machine and the
//! ambient pieces (configuration, localization, clock) shared by the other crates.

pub mod config;
pub mod errors;
pub mod i18n;
pub mod poll;
pub mod time;

pub use errors::{ApplicationError, DeniedAction, InterfaceError, PollError};
pub use i18n::{Catalog, Localizer, Message, Translations};
pub use poll::input::{parse_input, ParsedInput};
pub use poll::settings::{Setting, Settings};
pub use poll::{AnswerOption, Metadata, Poll, PollCodecError, PollId, VoteNotice};
pub use time::{Clock, FixedClock, SystemClock};
