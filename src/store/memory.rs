use crate::error::StoreError;
use crate::models::{validate_options, Poll, Score, SubjectRating, UserResponse};
use crate::store::PollStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

struct Entry {
    poll: Poll,
    responses: HashMap<String, UserResponse>,
    announced_at: Option<DateTime<Utc>>,
}

/// Process-local store for demo mode and tests. A single write lock covers
/// each submission, so the response and its increments land together.
pub struct MemoryStore {
    polls: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            polls: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn create_poll(&self, poll: &Poll) -> Result<(), StoreError> {
        validate_options(&poll.id, &poll.options)?;
        let mut polls = self.polls.write().await;
        if polls.contains_key(&poll.id) {
            return Err(StoreError::AlreadyExists(poll.id.clone()));
        }
        polls.insert(
            poll.id.clone(),
            Entry {
                poll: poll.clone(),
                responses: HashMap::new(),
                announced_at: None,
            },
        );
        Ok(())
    }

    async fn get_poll(&self, poll_id: &str) -> Result<Poll, StoreError> {
        let polls = self.polls.read().await;
        polls
            .get(poll_id)
            .map(|entry| entry.poll.clone())
            .ok_or_else(|| StoreError::PollNotFound(poll_id.to_string()))
    }

    async fn get_user_response(
        &self,
        poll_id: &str,
        user_id: &str,
    ) -> Result<Option<UserResponse>, StoreError> {
        let polls = self.polls.read().await;
        let entry = polls
            .get(poll_id)
            .ok_or_else(|| StoreError::PollNotFound(poll_id.to_string()))?;
        Ok(entry.responses.get(user_id).cloned())
    }

    async fn submit_response(
        &self,
        poll: &Poll,
        user_id: &str,
        response: &UserResponse,
    ) -> Result<(), StoreError> {
        let mut polls = self.polls.write().await;
        let entry = polls
            .get_mut(&poll.id)
            .ok_or_else(|| StoreError::PollNotFound(poll.id.clone()))?;

        match response {
            UserResponse::Choice { option_id } => {
                if entry.responses.contains_key(user_id) {
                    return Err(StoreError::AlreadyResponded);
                }
                let option = entry
                    .poll
                    .options
                    .iter_mut()
                    .find(|option| option.id == *option_id)
                    .ok_or_else(|| StoreError::UnknownOption {
                        poll_id: poll.id.clone(),
                        option_id: option_id.clone(),
                    })?;
                option.count += 1;
            }
            UserResponse::Prediction { score } => {
                if entry.responses.contains_key(user_id) {
                    return Err(StoreError::AlreadyResponded);
                }
                let outcome = score.outcome();
                let option = entry
                    .poll
                    .options
                    .iter_mut()
                    .find(|option| option.outcome == Some(outcome))
                    .ok_or_else(|| StoreError::UnknownOption {
                        poll_id: poll.id.clone(),
                        option_id: outcome.as_str().to_string(),
                    })?;
                option.count += 1;
            }
            UserResponse::Ratings { ratings } => {
                let already: Vec<&str> = match entry.responses.get(user_id) {
                    Some(UserResponse::Ratings { ratings }) => {
                        ratings.iter().map(|r| r.subject_id.as_str()).collect()
                    }
                    Some(_) => return Err(StoreError::AlreadyResponded),
                    None => Vec::new(),
                };
                // Check everything before touching any counter.
                for rating in ratings {
                    if already.contains(&rating.subject_id.as_str()) {
                        return Err(StoreError::AlreadyResponded);
                    }
                    if entry.poll.option(&rating.subject_id).is_none() {
                        return Err(StoreError::UnknownOption {
                            poll_id: poll.id.clone(),
                            option_id: rating.subject_id.clone(),
                        });
                    }
                }
                for rating in ratings {
                    apply_rating(&mut entry.poll, rating);
                }
                if let Some(UserResponse::Ratings { ratings: stored }) =
                    entry.responses.get_mut(user_id)
                {
                    stored.extend(ratings.iter().cloned());
                    return Ok(());
                }
            }
        }

        entry.responses.insert(user_id.to_string(), response.clone());
        Ok(())
    }

    async fn record_final_result(&self, poll_id: &str, score: Score) -> Result<(), StoreError> {
        let mut polls = self.polls.write().await;
        let entry = polls
            .get_mut(poll_id)
            .ok_or_else(|| StoreError::PollNotFound(poll_id.to_string()))?;
        entry.poll.final_result = Some(score);
        Ok(())
    }

    async fn unannounced_closed_polls(&self, now: DateTime<Utc>) -> Result<Vec<Poll>, StoreError> {
        let polls = self.polls.read().await;
        let mut closed: Vec<Poll> = polls
            .values()
            .filter(|entry| entry.announced_at.is_none() && entry.poll.closes_at < now)
            .map(|entry| entry.poll.clone())
            .collect();
        closed.sort_by_key(|poll| poll.closes_at);
        Ok(closed)
    }

    async fn mark_announced(&self, poll_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut polls = self.polls.write().await;
        let entry = polls
            .get_mut(poll_id)
            .ok_or_else(|| StoreError::PollNotFound(poll_id.to_string()))?;
        entry.announced_at = Some(at);
        Ok(())
    }
}

fn apply_rating(poll: &mut Poll, rating: &SubjectRating) {
    if let Some(option) = poll.options.iter_mut().find(|o| o.id == rating.subject_id) {
        option.count += 1;
        let stats = option.rating.get_or_insert_with(Default::default);
        stats.rating_sum += u64::from(rating.rating);
        stats.rating_count += 1;
        if let Some(comment) = &rating.comment {
            stats.comments.push(comment.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchOutcome, PollKind};
    use chrono::Duration;

    fn topic() -> Poll {
        Poll::new(
            "g".into(),
            "1".into(),
            "c".into(),
            "Best away end?".into(),
            PollKind::Topic,
            vec!["Anfield".into(), "Villa Park".into()],
            Utc::now() + Duration::hours(2),
        )
    }

    fn rating_poll() -> Poll {
        Poll::new(
            "g".into(),
            "1".into(),
            "c".into(),
            "Rate the players".into(),
            PollKind::PlayerRating,
            vec!["Rice".into(), "Odegaard".into()],
            Utc::now() + Duration::hours(2),
        )
    }

    #[tokio::test]
    async fn choice_increments_and_blocks_second_vote() {
        let store = MemoryStore::new();
        let poll = topic();
        store.create_poll(&poll).await.unwrap();
        let choice = UserResponse::Choice { option_id: poll.options[1].id.clone() };

        store.submit_response(&poll, "u1", &choice).await.unwrap();
        let again = store.submit_response(&poll, "u1", &choice).await;
        assert!(matches!(again, Err(StoreError::AlreadyResponded)));
        store.submit_response(&poll, "u2", &choice).await.unwrap();

        let stored = store.get_poll(&poll.id).await.unwrap();
        assert_eq!(stored.options[0].count, 0);
        assert_eq!(stored.options[1].count, 2);
        assert_eq!(store.get_user_response(&poll.id, "u1").await.unwrap(), Some(choice));
        assert_eq!(store.get_user_response(&poll.id, "u3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_option_changes_nothing() {
        let store = MemoryStore::new();
        let poll = topic();
        store.create_poll(&poll).await.unwrap();
        let bogus = UserResponse::Choice { option_id: "nope".into() };
        let result = store.submit_response(&poll, "u1", &bogus).await;
        assert!(matches!(result, Err(StoreError::UnknownOption { .. })));
        assert_eq!(store.get_user_response(&poll.id, "u1").await.unwrap(), None);
        assert!(matches!(
            store.get_user_response("nope", "u1").await,
            Err(StoreError::PollNotFound(_))
        ));
    }

    #[tokio::test]
    async fn prediction_counts_toward_outcome_option() {
        let store = MemoryStore::new();
        let poll = Poll::new_match(
            "g".into(),
            "1".into(),
            "c".into(),
            PollKind::ScorePrediction,
            "Celtic",
            "Rangers",
            Utc::now() + Duration::hours(1),
        );
        store.create_poll(&poll).await.unwrap();
        store
            .submit_response(&poll, "u1", &UserResponse::Prediction { score: Score::new(2, 0) })
            .await
            .unwrap();
        store
            .submit_response(&poll, "u2", &UserResponse::Prediction { score: Score::new(1, 1) })
            .await
            .unwrap();

        let stored = store.get_poll(&poll.id).await.unwrap();
        assert_eq!(stored.option_for_outcome(MatchOutcome::Home).unwrap().count, 1);
        assert_eq!(stored.option_for_outcome(MatchOutcome::Draw).unwrap().count, 1);
        assert_eq!(stored.option_for_outcome(MatchOutcome::Away).unwrap().count, 0);
    }

    #[tokio::test]
    async fn ratings_accumulate_per_subject() {
        let store = MemoryStore::new();
        let poll = rating_poll();
        store.create_poll(&poll).await.unwrap();
        let rice = poll.options[0].id.clone();
        let odegaard = poll.options[1].id.clone();

        let first = UserResponse::Ratings {
            ratings: vec![SubjectRating {
                subject_id: rice.clone(),
                rating: 9,
                comment: Some("Ran the midfield".into()),
            }],
        };
        store.submit_response(&poll, "u1", &first).await.unwrap();

        // same user can still rate a different subject, but not the same one twice
        let second = UserResponse::Ratings {
            ratings: vec![SubjectRating { subject_id: odegaard.clone(), rating: 6, comment: None }],
        };
        store.submit_response(&poll, "u1", &second).await.unwrap();
        let repeat = store.submit_response(&poll, "u1", &first).await;
        assert!(matches!(repeat, Err(StoreError::AlreadyResponded)));

        let stored = store.get_poll(&poll.id).await.unwrap();
        let stats = stored.option(&rice).unwrap().rating.clone().unwrap();
        assert_eq!(stats.rating_sum, 9);
        assert_eq!(stats.rating_count, 1);
        assert_eq!(stats.comments, vec!["Ran the midfield".to_string()]);

        match store.get_user_response(&poll.id, "u1").await.unwrap() {
            Some(UserResponse::Ratings { ratings }) => assert_eq!(ratings.len(), 2),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn closed_means_strictly_past_closes_at() {
        let store = MemoryStore::new();
        let mut early = topic();
        let mut late = topic();
        let now = Utc::now();
        early.closes_at = now;
        late.closes_at = now + Duration::minutes(5);
        store.create_poll(&early).await.unwrap();
        store.create_poll(&late).await.unwrap();

        // a poll closing exactly now is still open
        assert!(store.unannounced_closed_polls(now).await.unwrap().is_empty());

        let later = now + Duration::minutes(10);
        let hits = store.unannounced_closed_polls(later).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec![early.id.as_str(), late.id.as_str()]);

        store.mark_announced(&early.id, later).await.unwrap();
        let hits = store.unannounced_closed_polls(later).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, late.id);
    }

    #[tokio::test]
    async fn duplicate_poll_id_is_rejected() {
        let store = MemoryStore::new();
        let poll = topic();
        store.create_poll(&poll).await.unwrap();
        assert!(matches!(
            store.create_poll(&poll).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }
}
