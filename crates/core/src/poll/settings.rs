use std::fmt;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::PollError;
use crate::time::Clock;

const SUBMISSION_PREFIX: &str = "setting-";
const LOCAL_LAYOUTS: [&str; 2] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"];
const ZONED_LAYOUT: &str = "%Y-%m-%d %H:%M %z";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Setting {
    Anonymous,
    AnonymousCreator,
    Progress,
    PublicAddOption,
    End(DateTime<Utc>),
    MaxVotes(u32),
}

impl Setting {
    /// Parses one `--` flag with its prefix already removed, e.g. `votes=2` or `end=30m`.
    pub fn parse(token: &str, clock: &dyn Clock) -> Result<Self, PollError> {
        let token = token.trim();
        match token {
            "anonymous" => Ok(Self::Anonymous),
            "anonymous-creator" => Ok(Self::AnonymousCreator),
            "progress" => Ok(Self::Progress),
            "public-add-option" => Ok(Self::PublicAddOption),
            _ => {
                if let Some(value) = token.strip_prefix("votes=") {
                    parse_max_votes(value)
                        .map(Self::MaxVotes)
                        .ok_or_else(|| PollError::InvalidVotesSetting { setting: token.to_owned() })
                } else if let Some(value) = token.strip_prefix("end=") {
                    parse_end(value, clock).map(Self::End)
                } else {
                    Err(PollError::UnrecognizedSetting { setting: token.to_owned() })
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub anonymous: bool,
    pub anonymous_creator: bool,
    pub progress: bool,
    pub public_add_option: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// `1` is single choice, `0` lets a user vote for every option.
    pub max_votes: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            anonymous: false,
            anonymous_creator: false,
            progress: false,
            public_add_option: false,
            end: None,
            max_votes: 1,
        }
    }
}

impl Settings {
    pub fn fold(settings: impl IntoIterator<Item = Setting>) -> Self {
        settings.into_iter().fold(Self::default(), |mut folded, setting| {
            match setting {
                Setting::Anonymous => folded.anonymous = true,
                Setting::AnonymousCreator => folded.anonymous_creator = true,
                Setting::Progress => folded.progress = true,
                Setting::PublicAddOption => folded.public_add_option = true,
                Setting::End(end) => folded.end = Some(end),
                Setting::MaxVotes(max_votes) => folded.max_votes = max_votes,
            }
            folded
        })
    }

    pub fn from_strings<S: AsRef<str>>(tokens: &[S], clock: &dyn Clock) -> Result<Self, PollError> {
        let parsed = tokens
            .iter()
            .map(|token| Setting::parse(token.as_ref(), clock))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::fold(parsed))
    }

    /// Reads the `setting-*` keys of a dialog submission. Unknown keys are ignored.
    pub fn from_submission(
        submission: &Map<String, Value>,
        clock: &dyn Clock,
    ) -> Result<Self, PollError> {
        let mut parsed = Vec::new();
        for (key, value) in submission {
            let Some(name) = key.strip_prefix(SUBMISSION_PREFIX) else {
                continue;
            };

            match name {
                "multi" => {
                    let max_votes = submitted_max_votes(value).ok_or_else(|| {
                        PollError::InvalidVotesSetting { setting: format!("votes={value}") }
                    })?;
                    parsed.push(Setting::MaxVotes(max_votes));
                }
                "end" => {
                    if let Some(raw) = value.as_str().filter(|raw| !raw.trim().is_empty()) {
                        parsed.push(Setting::End(parse_end(raw, clock)?));
                    }
                }
                flag if value.as_bool() == Some(true) => match flag {
                    "anonymous" => parsed.push(Setting::Anonymous),
                    "anonymous-creator" => parsed.push(Setting::AnonymousCreator),
                    "progress" => parsed.push(Setting::Progress),
                    "public-add-option" => parsed.push(Setting::PublicAddOption),
                    _ => {}
                },
                _ => {}
            }
        }
        Ok(Self::fold(parsed))
    }

    /// Canonical, re-parseable flags. The end time is reported separately by the renderer.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        if self.anonymous {
            tokens.push("anonymous".to_owned());
        }
        if self.anonymous_creator {
            tokens.push("anonymous-creator".to_owned());
        }
        if self.progress {
            tokens.push("progress".to_owned());
        }
        if self.public_add_option {
            tokens.push("public-add-option".to_owned());
        }
        if self.max_votes != 1 {
            tokens.push(format!("votes={}", self.max_votes));
        }
        tokens
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens().join(", "))
    }
}

fn parse_max_votes(value: &str) -> Option<u32> {
    if value.is_empty() || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    value.parse::<u32>().ok()
}

fn submitted_max_votes(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => match number.as_u64() {
            Some(whole) => u32::try_from(whole).ok(),
            None => number
                .as_f64()
                .filter(|float| float.is_finite() && *float >= 0.0 && *float <= f64::from(u32::MAX))
                .map(|float| float.trunc() as u32),
        },
        Value::String(raw) => parse_max_votes(raw.trim()),
        _ => None,
    }
}

/// Resolves an end specification to a whole-second UTC instant strictly after `clock.now()`.
pub fn parse_end(value: &str, clock: &dyn Clock) -> Result<DateTime<Utc>, PollError> {
    let value = value.trim();
    let now = clock.now();
    let invalid = || PollError::InvalidEndSetting { value: value.to_owned() };

    let end = if value.eq_ignore_ascii_case("tomorrow") {
        now.checked_add_signed(Duration::hours(24)).ok_or_else(invalid)?
    } else if let Some(offset) = parse_duration(value) {
        now.checked_add_signed(offset).ok_or_else(invalid)?
    } else {
        parse_timestamp(value, clock.local_offset()).ok_or_else(invalid)?
    };

    let end = end.trunc_subsecs(0);
    if end <= now.trunc_subsecs(0) {
        return Err(PollError::EndInPast { end });
    }
    Ok(end)
}

/// Duration literal: an optional sign followed by `<number><unit>` pairs such as `1h30m` or `1.5h`.
fn parse_duration(value: &str) -> Option<Duration> {
    let (negative, mut rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    if rest == "0" {
        return Some(Duration::zero());
    }
    if rest.is_empty() {
        return None;
    }

    let mut total_nanos = 0f64;
    while !rest.is_empty() {
        let number_len =
            rest.find(|ch: char| !(ch.is_ascii_digit() || ch == '.')).unwrap_or(rest.len());
        let number = rest[..number_len].parse::<f64>().ok()?;
        rest = &rest[number_len..];

        let unit_len =
            rest.find(|ch: char| ch.is_ascii_digit() || ch == '.').unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3_600e9,
            _ => return None,
        };
        total_nanos += number * scale;
        rest = &rest[unit_len..];
    }

    if !total_nanos.is_finite() || total_nanos >= i64::MAX as f64 {
        return None;
    }
    let nanos = total_nanos.round() as i64;
    Some(Duration::nanoseconds(if negative { -nanos } else { nanos }))
}

fn parse_timestamp(value: &str, local_offset: FixedOffset) -> Option<DateTime<Utc>> {
    for layout in LOCAL_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, layout) {
            return local_offset
                .from_local_datetime(&naive)
                .single()
                .map(|local| local.with_timezone(&Utc));
        }
    }

    DateTime::parse_from_str(value, ZONED_LAYOUT)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|zoned| zoned.with_timezone(&Utc))
}
