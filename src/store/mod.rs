mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::models::{Poll, PollKind, Score, UserResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use serde::Deserialize;
use std::path::Path;

/// Persistence for polls, options and responses.
///
/// `submit_response` is the only place counts change, and it must apply the
/// response row and the increments as one atomic unit.
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn create_poll(&self, poll: &Poll) -> Result<(), StoreError>;

    async fn get_poll(&self, poll_id: &str) -> Result<Poll, StoreError>;

    async fn get_user_response(
        &self,
        poll_id: &str,
        user_id: &str,
    ) -> Result<Option<UserResponse>, StoreError>;

    async fn submit_response(
        &self,
        poll: &Poll,
        user_id: &str,
        response: &UserResponse,
    ) -> Result<(), StoreError>;

    async fn record_final_result(&self, poll_id: &str, score: Score) -> Result<(), StoreError>;

    /// Polls that have closed by `now` (`closes_at < now`) and have not yet
    /// been marked as announced.
    async fn unannounced_closed_polls(&self, now: DateTime<Utc>) -> Result<Vec<Poll>, StoreError>;

    // Delivery bookkeeping for the announcer; never touches the tally.
    async fn mark_announced(&self, poll_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// One entry of a seed file: either a fully spelled-out poll, or a compact
/// form that generates the options.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeedPoll {
    Full(Poll),
    Match {
        id: String,
        guild_id: String,
        channel_id: String,
        creator_id: String,
        kind: PollKind,
        home_team: String,
        away_team: String,
        closes_at: DateTime<Utc>,
    },
    Labels {
        id: String,
        guild_id: String,
        channel_id: String,
        creator_id: String,
        question: String,
        kind: PollKind,
        labels: Vec<String>,
        closes_at: DateTime<Utc>,
    },
}

impl SeedPoll {
    fn into_poll(self) -> Result<Poll, StoreError> {
        let (id, poll) = match self {
            SeedPoll::Full(poll) => return Ok(poll),
            SeedPoll::Match {
                id,
                guild_id,
                channel_id,
                creator_id,
                kind,
                home_team,
                away_team,
                closes_at,
            } => {
                if !kind.takes_final_score() {
                    return Err(StoreError::Seed(format!(
                        "{}: {} poll given team names",
                        id,
                        kind.as_str()
                    )));
                }
                let poll = Poll::new_match(
                    guild_id,
                    channel_id,
                    creator_id,
                    kind,
                    &home_team,
                    &away_team,
                    closes_at,
                );
                (id, poll)
            }
            SeedPoll::Labels {
                id,
                guild_id,
                channel_id,
                creator_id,
                question,
                kind,
                labels,
                closes_at,
            } => {
                // Outcome options only come from team names.
                if kind.takes_final_score() {
                    return Err(StoreError::Seed(format!(
                        "{}: {} poll needs team names",
                        id,
                        kind.as_str()
                    )));
                }
                let poll =
                    Poll::new(guild_id, channel_id, creator_id, question, kind, labels, closes_at);
                (id, poll)
            }
        };
        Ok(Poll { id, ..poll })
    }
}

/// Loads a JSON array of seed entries into the store. Polls whose id
/// already exists are left untouched. Returns how many were inserted.
pub async fn seed_from_file(store: &dyn PollStore, path: &Path) -> Result<usize, StoreError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| StoreError::Seed(format!("{}: {}", path.display(), e)))?;
    let polls = parse_seed(&raw).map_err(|e| match e {
        StoreError::Seed(msg) => StoreError::Seed(format!("{}: {}", path.display(), msg)),
        other => other,
    })?;

    let mut inserted = 0;
    for poll in &polls {
        match store.create_poll(poll).await {
            Ok(()) => inserted += 1,
            Err(StoreError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    info!("Seeded {} of {} poll(s) from {}", inserted, polls.len(), path.display());
    Ok(inserted)
}

fn parse_seed(raw: &str) -> Result<Vec<Poll>, StoreError> {
    let entries: Vec<SeedPoll> =
        serde_json::from_str(raw).map_err(|e| StoreError::Seed(e.to_string()))?;
    entries.into_iter().map(SeedPoll::into_poll).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchOutcome;
    use chrono::Duration;

    #[tokio::test]
    async fn seeding_twice_inserts_once() {
        let poll = Poll::new(
            "g".into(),
            "1".into(),
            "c".into(),
            "Kit of the season?".into(),
            PollKind::Topic,
            vec!["Home".into(), "Away".into(), "Third".into()],
            Utc::now() + Duration::days(1),
        );
        let path = std::env::temp_dir().join(format!("matchday-pulse-seed-{}.json", poll.id));
        std::fs::write(&path, serde_json::to_string(&vec![poll.clone()]).unwrap()).unwrap();

        let store = MemoryStore::new();
        assert_eq!(seed_from_file(&store, &path).await.unwrap(), 1);
        assert_eq!(seed_from_file(&store, &path).await.unwrap(), 0);
        assert_eq!(store.get_poll(&poll.id).await.unwrap().options.len(), 3);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn demo_seed_parses() {
        let polls = parse_seed(include_str!("../../demo/polls.json")).unwrap();
        assert_eq!(polls.len(), 4);
        assert!(polls.iter().any(|p| p.kind == PollKind::PlayerRating));
        for poll in &polls {
            crate::models::validate_options(&poll.id, &poll.options).unwrap();
        }
    }

    #[test]
    fn compact_entries_build_their_options() {
        let raw = r#"[
            { "id": "cup-final", "guild_id": "g", "channel_id": "1", "creator_id": "c",
              "kind": "score_prediction", "home_team": "Hearts", "away_team": "Hibs",
              "closes_at": "2026-05-20T15:00:00Z" },
            { "id": "motm", "guild_id": "g", "channel_id": "1", "creator_id": "c",
              "question": "Man of the match?", "kind": "best_player",
              "labels": ["Shankland", "Boyce"], "closes_at": "2026-05-20T17:00:00Z" }
        ]"#;
        let polls = parse_seed(raw).unwrap();
        assert_eq!(polls[0].id, "cup-final");
        assert_eq!(polls[0].question, "Hearts vs Hibs");
        assert_eq!(polls[0].option_for_outcome(MatchOutcome::Draw).unwrap().label, "Draw");
        assert_eq!(polls[1].id, "motm");
        assert_eq!(polls[1].options[1].label, "Boyce");
        assert!(polls[1].options.iter().all(|o| o.outcome.is_none()));
    }

    #[test]
    fn match_kind_without_teams_is_rejected() {
        let raw = r#"[{ "id": "x", "guild_id": "g", "channel_id": "1", "creator_id": "c",
            "question": "Who wins?", "kind": "match_winner", "labels": ["A", "B"],
            "closes_at": "2026-05-20T15:00:00Z" }]"#;
        assert!(matches!(parse_seed(raw), Err(StoreError::Seed(_))));
    }

    #[tokio::test]
    async fn missing_seed_file_is_reported() {
        let store = MemoryStore::new();
        let result = seed_from_file(&store, Path::new("/nonexistent/matchday-pulse.json")).await;
        assert!(matches!(result, Err(StoreError::Seed(_))));
    }
}
