//! Poll state and voting rules.
//!
//! A [`Poll`] is mutated only through its methods; callers clone the loaded value, apply the
//! change to the clone and hand both encodings to the store's compare-and-set. Voter sets are
//! ordered so that equal polls always encode to equal bytes.

pub mod input;
pub mod settings;

use std::collections::BTreeSet;
use std::fmt;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::PollError;
use crate::i18n::{messages, Message};
use crate::time::Clock;

pub use input::{parse_input, ParsedInput};
pub use settings::{Setting, Settings};

const POLL_ID_LEN: usize = 26;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollId(pub String);

impl PollId {
    pub fn generate() -> Self {
        let id = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(POLL_ID_LEN)
            .map(|byte| char::from(byte).to_ascii_lowercase())
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PollId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub answer: String,
    #[serde(default)]
    pub voters: BTreeSet<String>,
}

impl AnswerOption {
    pub fn new(answer: impl Into<String>) -> Self {
        Self { answer: answer.into(), voters: BTreeSet::new() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub creator: String,
    pub question: String,
    pub answer_options: Vec<AnswerOption>,
    pub settings: Settings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    /// Channel the poll was posted in; creator notices go here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

/// Outcome of a vote that was refused without being an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteNotice {
    AlreadyVoted,
    VoteLimitReached,
}

impl VoteNotice {
    pub fn message(self) -> &'static Message {
        match self {
            Self::AlreadyVoted => &messages::ALREADY_VOTED,
            Self::VoteLimitReached => &messages::VOTE_LIMIT_REACHED,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub poll_id: PollId,
    pub user_id: String,
    pub admin_permission: bool,
    pub voted_answers: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PollCodecError {
    #[error("could not encode poll: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("could not decode poll: {0}")]
    Decode(#[source] serde_json::Error),
}

impl Poll {
    pub fn new<S: AsRef<str>>(
        creator: impl Into<String>,
        question: &str,
        answer_options: &[S],
        settings: Settings,
        clock: &dyn Clock,
    ) -> Result<Self, PollError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PollError::EmptyQuestion);
        }

        let now = clock.now();
        let mut poll = Self {
            id: PollId::generate(),
            created_at: now.timestamp_millis(),
            creator: creator.into(),
            question: question.to_owned(),
            answer_options: Vec::with_capacity(answer_options.len()),
            settings,
            post_id: None,
            channel_id: None,
        };
        for answer in answer_options {
            poll.add_answer_option(answer.as_ref())?;
        }

        let count = poll.answer_options.len();
        if count < 2 {
            return Err(PollError::TooFewOptions { count });
        }
        let max_votes = poll.settings.max_votes;
        if usize::try_from(max_votes).map_or(true, |max_votes| max_votes > count) {
            return Err(PollError::MaxVotesExceedsOptions { max_votes, options: count });
        }
        if let Some(end) = poll.settings.end {
            if end <= now {
                return Err(PollError::EndInPast { end });
            }
        }

        Ok(poll)
    }

    pub fn add_answer_option(&mut self, answer: &str) -> Result<(), PollError> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(PollError::EmptyOption);
        }

        let folded = answer.to_lowercase();
        if self.answer_options.iter().any(|option| option.answer.trim().to_lowercase() == folded) {
            return Err(PollError::DuplicateOption { option: answer.to_owned() });
        }

        self.answer_options.push(AnswerOption::new(answer));
        Ok(())
    }

    /// Records a vote of `user_id` for the option at `index`.
    ///
    /// Single-choice polls move an existing vote. Multi-vote polls return a [`VoteNotice`]
    /// instead of changing state when the option was already chosen or no votes are left.
    pub fn update_vote(
        &mut self,
        user_id: &str,
        index: i64,
    ) -> Result<Option<VoteNotice>, PollError> {
        let options = self.answer_options.len();
        let position = usize::try_from(index)
            .ok()
            .filter(|position| *position < options)
            .ok_or(PollError::InvalidOptionIndex { index, options })?;
        if user_id.is_empty() {
            return Err(PollError::InvalidUser);
        }

        if self.is_multi_vote() {
            if self.answer_options[position].voters.contains(user_id) {
                return Ok(Some(VoteNotice::AlreadyVoted));
            }
            if self.votes_of(user_id) >= self.effective_max_votes() {
                return Ok(Some(VoteNotice::VoteLimitReached));
            }
        } else {
            for option in &mut self.answer_options {
                option.voters.remove(user_id);
            }
        }

        self.answer_options[position].voters.insert(user_id.to_owned());
        Ok(None)
    }

    pub fn reset_votes(&mut self, user_id: &str) -> Result<(), PollError> {
        if user_id.is_empty() {
            return Err(PollError::InvalidUser);
        }
        for option in &mut self.answer_options {
            option.voters.remove(user_id);
        }
        Ok(())
    }

    pub fn has_voted(&self, user_id: &str) -> bool {
        self.answer_options.iter().any(|option| option.voters.contains(user_id))
    }

    pub fn votes_of(&self, user_id: &str) -> usize {
        self.answer_options.iter().filter(|option| option.voters.contains(user_id)).count()
    }

    pub fn voted_answers(&self, user_id: &str) -> Vec<String> {
        self.answer_options
            .iter()
            .filter(|option| option.voters.contains(user_id))
            .map(|option| option.answer.clone())
            .collect()
    }

    pub fn is_multi_vote(&self) -> bool {
        self.settings.max_votes != 1
    }

    /// Number of options one user may vote for; `votes=0` means every option.
    pub fn effective_max_votes(&self) -> usize {
        match usize::try_from(self.settings.max_votes) {
            Ok(0) | Err(_) => self.answer_options.len(),
            Ok(max_votes) => max_votes,
        }
    }

    pub fn can_manage(&self, user_id: &str, is_admin: bool) -> bool {
        is_admin || self.creator == user_id
    }

    pub fn can_add_option(&self, user_id: &str, is_admin: bool) -> bool {
        self.settings.public_add_option || self.can_manage(user_id, is_admin)
    }

    pub fn total_votes(&self) -> usize {
        self.answer_options.iter().map(|option| option.voters.len()).sum()
    }

    pub fn distinct_voters(&self) -> usize {
        self.answer_options
            .iter()
            .flat_map(|option| option.voters.iter())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn metadata(&self, user_id: &str, is_admin: bool) -> Metadata {
        Metadata {
            poll_id: self.id.clone(),
            user_id: user_id.to_owned(),
            admin_permission: self.can_manage(user_id, is_admin),
            voted_answers: self.voted_answers(user_id),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PollCodecError> {
        serde_json::to_vec(self).map_err(PollCodecError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PollCodecError> {
        serde_json::from_slice(bytes).map_err(PollCodecError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::{AnswerOption, Poll, PollId, Settings, VoteNotice};
    use crate::errors::PollError;
    use crate::time::{Clock, FixedClock};

    fn clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).single().expect("valid date"))
    }

    fn poll_with(options: &[&str], max_votes: u32) -> Poll {
        Poll::new(
            "creator",
            "Lunch?",
            options,
            Settings { max_votes, ..Settings::default() },
            &clock(),
        )
        .expect("valid poll")
    }

    fn voters(poll: &Poll, index: usize) -> Vec<&str> {
        poll.answer_options[index].voters.iter().map(String::as_str).collect()
    }

    #[test]
    fn new_poll_has_lowercase_id_and_creation_time() {
        let poll = poll_with(&["Pizza", "Sushi"], 1);

        assert_eq!(poll.id.as_str().len(), 26);
        assert!(poll.id.as_str().chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit()));
        assert_eq!(poll.created_at, clock().now().timestamp_millis());
        assert_eq!(poll.creator, "creator");
        assert!(poll.post_id.is_none());
        assert_ne!(PollId::generate(), PollId::generate());
    }

    #[test]
    fn new_poll_validates_inputs() {
        let clock = clock();
        let new = |question: &str, options: &[&str], settings: Settings| {
            Poll::new("creator", question, options, settings, &clock)
        };

        assert_eq!(new("  ", &["A", "B"], Settings::default()), Err(PollError::EmptyQuestion));
        assert_eq!(
            new("Q", &["A"], Settings::default()),
            Err(PollError::TooFewOptions { count: 1 })
        );
        assert_eq!(new("Q", &["A", " "], Settings::default()), Err(PollError::EmptyOption));
        assert_eq!(
            new("Q", &["Pizza", " pizza "], Settings::default()),
            Err(PollError::DuplicateOption { option: "pizza".to_owned() })
        );
        assert_eq!(
            new("Q", &["A", "B"], Settings { max_votes: 3, ..Settings::default() }),
            Err(PollError::MaxVotesExceedsOptions { max_votes: 3, options: 2 })
        );

        let past = Utc.with_ymd_and_hms(2026, 5, 1, 11, 0, 0).single().expect("valid date");
        assert_eq!(
            new("Q", &["A", "B"], Settings { end: Some(past), ..Settings::default() }),
            Err(PollError::EndInPast { end: past })
        );
        assert!(new("Q", &["A", "B"], Settings { max_votes: 0, ..Settings::default() }).is_ok());
    }

    #[test]
    fn single_choice_vote_moves_and_is_idempotent() {
        let mut poll = poll_with(&["Pizza", "Sushi", "Tacos"], 1);

        assert_eq!(poll.update_vote("u1", 0), Ok(None));
        assert_eq!(poll.update_vote("u1", 2), Ok(None));
        assert_eq!(voters(&poll, 0), Vec::<&str>::new());
        assert_eq!(voters(&poll, 2), vec!["u1"]);

        let snapshot = poll.clone();
        assert_eq!(poll.update_vote("u1", 2), Ok(None));
        assert_eq!(poll, snapshot);
    }

    #[test]
    fn multi_vote_reports_duplicates_and_exhausted_votes() {
        let mut poll = poll_with(&["A", "B", "C"], 2);

        assert_eq!(poll.update_vote("u1", 0), Ok(None));
        assert_eq!(poll.update_vote("u1", 0), Ok(Some(VoteNotice::AlreadyVoted)));
        assert_eq!(poll.update_vote("u1", 1), Ok(None));

        let before = poll.clone();
        assert_eq!(poll.update_vote("u1", 2), Ok(Some(VoteNotice::VoteLimitReached)));
        assert_eq!(poll, before);
        assert_eq!(poll.voted_answers("u1"), vec!["A".to_owned(), "B".to_owned()]);
    }

    #[test]
    fn zero_max_votes_allows_every_option() {
        let mut poll = poll_with(&["A", "B", "C"], 0);
        for index in 0..3 {
            assert_eq!(poll.update_vote("u1", index), Ok(None));
        }
        assert_eq!(poll.votes_of("u1"), 3);

        poll.add_answer_option("D").expect("add option");
        assert_eq!(poll.effective_max_votes(), 4);
        assert_eq!(poll.update_vote("u1", 3), Ok(None));
    }

    #[test]
    fn invalid_votes_are_hard_errors() {
        let mut poll = poll_with(&["A", "B"], 1);

        assert_eq!(
            poll.update_vote("u1", -1),
            Err(PollError::InvalidOptionIndex { index: -1, options: 2 })
        );
        assert_eq!(
            poll.update_vote("u1", 2),
            Err(PollError::InvalidOptionIndex { index: 2, options: 2 })
        );
        assert_eq!(poll.update_vote("", 0), Err(PollError::InvalidUser));
        assert_eq!(poll.reset_votes(""), Err(PollError::InvalidUser));
        assert_eq!(poll.total_votes(), 0);
    }

    #[test]
    fn reset_removes_only_the_users_votes() {
        let mut poll = poll_with(&["A", "B", "C"], 0);
        poll.update_vote("u1", 0).expect("vote");
        poll.update_vote("u1", 2).expect("vote");
        poll.update_vote("u2", 2).expect("vote");

        poll.reset_votes("u1").expect("reset");

        assert!(!poll.has_voted("u1"));
        assert!(poll.has_voted("u2"));
        assert_eq!(poll.total_votes(), 1);
    }

    #[test]
    fn add_option_trims_and_rejects_case_insensitive_duplicates() {
        let mut poll = poll_with(&["Pizza", "Sushi"], 1);

        assert_eq!(poll.add_answer_option("  Tacos "), Ok(()));
        assert_eq!(poll.answer_options.last(), Some(&AnswerOption::new("Tacos")));
        assert_eq!(
            poll.add_answer_option("SUSHI"),
            Err(PollError::DuplicateOption { option: "SUSHI".to_owned() })
        );
        assert_eq!(poll.add_answer_option("\t"), Err(PollError::EmptyOption));
        assert_eq!(poll.answer_options.len(), 3);
    }

    #[test]
    fn permissions_follow_creator_admin_and_public_add_option() {
        let mut poll = poll_with(&["A", "B"], 1);

        assert!(poll.can_manage("creator", false));
        assert!(poll.can_manage("someone", true));
        assert!(!poll.can_manage("someone", false));
        assert!(!poll.can_add_option("someone", false));

        poll.settings.public_add_option = true;
        assert!(poll.can_add_option("someone", false));
        assert!(!poll.can_manage("someone", false));
    }

    #[test]
    fn metadata_reports_votes_and_admin_permission() {
        let mut poll = poll_with(&["A", "B", "C"], 2);
        poll.update_vote("u1", 2).expect("vote");
        poll.update_vote("u1", 0).expect("vote");

        let metadata = poll.metadata("u1", false);
        assert_eq!(metadata.voted_answers, vec!["A".to_owned(), "C".to_owned()]);
        assert!(!metadata.admin_permission);
        assert!(poll.metadata("creator", false).admin_permission);
        assert!(poll.metadata("u9", true).admin_permission);
    }

    #[test]
    fn encoding_is_canonical_and_round_trips() {
        let end = Utc.with_ymd_and_hms(2026, 5, 2, 8, 30, 0).single().expect("valid date");
        let mut first = Poll::new(
            "creator",
            "Q",
            &["A", "B"],
            Settings { progress: true, end: Some(end), max_votes: 2, ..Settings::default() },
            &clock(),
        )
        .expect("valid poll");
        let mut second = first.clone();

        first.update_vote("u2", 0).expect("vote");
        first.update_vote("u1", 0).expect("vote");
        second.update_vote("u1", 0).expect("vote");
        second.update_vote("u2", 0).expect("vote");

        let encoded = first.encode().expect("encode");
        assert_eq!(encoded, second.encode().expect("encode"));
        assert_eq!(Poll::decode(&encoded).expect("decode"), first);

        first.post_id = Some("post-1".to_owned());
        first.channel_id = Some("town-square".to_owned());
        let with_post = Poll::decode(&first.encode().expect("encode")).expect("decode");
        assert_eq!(with_post.post_id.as_deref(), Some("post-1"));
        assert_eq!(with_post.channel_id.as_deref(), Some("town-square"));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Poll::decode(b"not a poll").is_err());
    }

    #[test]
    fn random_vote_sequences_keep_invariants() {
        let mut rng = StdRng::seed_from_u64(7);
        let users = ["u1", "u2", "u3", "u4"];

        for max_votes in [0, 1, 2, 3] {
            let mut poll = poll_with(&["A", "B", "C", "D"], max_votes);

            for _ in 0..400 {
                let user = users[rng.gen_range(0..users.len())];
                if rng.gen_bool(0.1) {
                    poll.reset_votes(user).expect("reset");
                    continue;
                }

                let index = rng.gen_range(0..4);
                let before = poll.clone();
                let notice = poll.update_vote(user, index).expect("vote");
                if notice.is_some() {
                    assert_eq!(poll, before, "notices must not change state");
                }
                if max_votes == 1 {
                    assert!(poll.answer_options[index as usize].voters.contains(user));
                }

                for user in users {
                    assert!(poll.votes_of(user) <= poll.effective_max_votes());
                }
                let decoded = Poll::decode(&poll.encode().expect("encode")).expect("decode");
                assert_eq!(decoded, poll);
            }

            let all_voters = poll
                .answer_options
                .iter()
                .flat_map(|option| option.voters.iter().cloned())
                .collect::<BTreeSet<_>>();
            assert_eq!(poll.distinct_voters(), all_voters.len());
        }
    }

    #[test]
    fn single_vote_round_trip_through_clone() {
        let mut poll = poll_with(&["A", "B"], 1);
        let original = poll.clone();
        poll.update_vote("u1", 1).expect("vote");

        assert_ne!(poll, original);
        assert!(original.answer_options.iter().all(|option| option.voters.is_empty()));
    }

    #[test]
    fn reset_and_added_option_leave_the_loaded_snapshot_intact() {
        let mut loaded = poll_with(&["A", "B"], 0);
        loaded.update_vote("u1", 0).expect("vote");
        let snapshot = loaded.encode().expect("encode");

        let mut reset = loaded.clone();
        reset.reset_votes("u1").expect("reset");
        let mut extended = loaded.clone();
        extended.add_answer_option("C").expect("add option");

        assert!(!reset.has_voted("u1"));
        assert_eq!(extended.answer_options.len(), 3);
        assert_eq!(loaded.encode().expect("encode"), snapshot);
        assert!(loaded.has_voted("u1"));
        assert_eq!(loaded.answer_options.len(), 2);
    }
}
