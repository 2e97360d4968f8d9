mod score;

pub use score::{MatchOutcome, Score};

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 10;
pub const MAX_COMMENT_CHARS: usize = 280;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub creator_id: String,
    pub question: String,
    pub kind: PollKind,
    pub options: Vec<PollOption>,
    pub created_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    #[serde(default)]
    pub final_result: Option<Score>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub rating: Option<RatingStats>,
    #[serde(default)]
    pub outcome: Option<MatchOutcome>,
}

/// Running totals for one rated subject (a player, usually).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingStats {
    pub rating_sum: u64,
    pub rating_count: u64,
    #[serde(default)]
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollKind {
    Topic,
    MatchWinner,
    BestPlayer,
    PlayerRating,
    ScorePrediction,
}

impl PollKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollKind::Topic => "topic",
            PollKind::MatchWinner => "match_winner",
            PollKind::BestPlayer => "best_player",
            PollKind::PlayerRating => "player_rating",
            PollKind::ScorePrediction => "score_prediction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "topic" => Some(PollKind::Topic),
            "match_winner" => Some(PollKind::MatchWinner),
            "best_player" => Some(PollKind::BestPlayer),
            "player_rating" => Some(PollKind::PlayerRating),
            "score_prediction" => Some(PollKind::ScorePrediction),
            _ => None,
        }
    }

    /// Kinds answered with a single `UserResponse::Choice`.
    pub fn is_single_choice(&self) -> bool {
        matches!(self, PollKind::Topic | PollKind::MatchWinner | PollKind::BestPlayer)
    }

    /// Kinds that accept an authoritative final score.
    pub fn takes_final_score(&self) -> bool {
        matches!(self, PollKind::MatchWinner | PollKind::ScorePrediction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserResponse {
    Choice { option_id: String },
    Ratings { ratings: Vec<SubjectRating> },
    Prediction { score: Score },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRating {
    pub subject_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

impl Poll {
    /// Builds a poll whose options are plain labels: topics, best-player
    /// candidates or rated subjects.
    pub fn new(
        guild_id: String,
        channel_id: String,
        creator_id: String,
        question: String,
        kind: PollKind,
        labels: Vec<String>,
        closes_at: DateTime<Utc>,
    ) -> Self {
        let options = labels
            .into_iter()
            .map(|label| PollOption {
                id: Uuid::new_v4().to_string(),
                label,
                count: 0,
                rating: (kind == PollKind::PlayerRating).then(RatingStats::default),
                outcome: None,
            })
            .collect();

        Self {
            id: Uuid::new_v4().to_string(),
            guild_id,
            channel_id,
            creator_id,
            question,
            kind,
            options,
            created_at: Utc::now(),
            closes_at,
            final_result: None,
        }
    }

    /// Builds a match-winner or score-prediction poll with one option per
    /// outcome, labelled with the two team names.
    pub fn new_match(
        guild_id: String,
        channel_id: String,
        creator_id: String,
        kind: PollKind,
        home_team: &str,
        away_team: &str,
        closes_at: DateTime<Utc>,
    ) -> Self {
        let question = format!("{} vs {}", home_team, away_team);
        let mut poll = Self::new(
            guild_id,
            channel_id,
            creator_id,
            question,
            kind,
            vec![
                format!("{} win", home_team),
                "Draw".to_string(),
                format!("{} win", away_team),
            ],
            closes_at,
        );
        let outcomes = [MatchOutcome::Home, MatchOutcome::Draw, MatchOutcome::Away];
        for (option, outcome) in poll.options.iter_mut().zip(outcomes) {
            option.outcome = Some(outcome);
        }
        poll
    }

    // Closed once the clock has passed closes_at; never stored.
    pub fn is_closed_at(&self, now: DateTime<Utc>) -> bool {
        now > self.closes_at
    }

    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    /// Resolves user input against option ids first, then labels
    /// (case-insensitive).
    pub fn find_option(&self, needle: &str) -> Option<&PollOption> {
        let needle = needle.trim();
        self.option(needle).or_else(|| {
            self.options
                .iter()
                .find(|option| option.label.eq_ignore_ascii_case(needle))
        })
    }

    pub fn option_for_outcome(&self, outcome: MatchOutcome) -> Option<&PollOption> {
        self.options.iter().find(|option| option.outcome == Some(outcome))
    }

    pub fn option_label(&self, option_id: &str) -> String {
        self.option(option_id)
            .map(|option| option.label.clone())
            .unwrap_or_else(|| "Unknown Option".to_string())
    }
}

/// Rejects option sets the tally engine must never see.
pub fn validate_options(poll_id: &str, options: &[PollOption]) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    for option in options {
        if !seen.insert(option.id.as_str()) {
            return Err(StoreError::Corrupt(format!(
                "poll {} has duplicate option id {}",
                poll_id, option.id
            )));
        }
    }
    Ok(())
}
