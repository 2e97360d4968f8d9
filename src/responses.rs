use crate::error::StoreError;
use crate::models::{
    Poll, PollKind, Score, UserResponse, MAX_COMMENT_CHARS, MAX_RATING, MIN_RATING,
};
use crate::store::PollStore;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashSet;

/// Validates a response against its poll and hands it to the store.
pub async fn submit(
    store: &dyn PollStore,
    poll_id: &str,
    user_id: &str,
    response: &UserResponse,
    now: DateTime<Utc>,
) -> Result<Poll, StoreError> {
    let poll = store.get_poll(poll_id).await?;

    if poll.is_closed_at(now) {
        warn!("Rejected response from {} to closed poll {}", user_id, poll_id);
        return Err(StoreError::PollClosed(poll_id.to_string()));
    }
    check_response(&poll, response)?;

    store.submit_response(&poll, user_id, response).await?;
    info!("Recorded {} response from {} on poll {}", poll.kind.as_str(), user_id, poll_id);

    // Re-read so callers see the post-increment counts.
    store.get_poll(poll_id).await
}

/// Enters the authoritative score for a match poll. Only the poll creator
/// may do this.
pub async fn record_final(
    store: &dyn PollStore,
    poll_id: &str,
    user_id: &str,
    score: Score,
) -> Result<(), StoreError> {
    let poll = store.get_poll(poll_id).await?;
    if poll.creator_id != user_id {
        warn!("User {} tried to set the final score of poll {}", user_id, poll_id);
        return Err(StoreError::NotPermitted);
    }
    if !poll.kind.takes_final_score() {
        return Err(StoreError::WrongResponseKind(poll.kind.as_str()));
    }
    store.record_final_result(poll_id, score).await?;
    info!("Final score {} recorded for poll {}", score, poll_id);
    Ok(())
}

fn check_response(poll: &Poll, response: &UserResponse) -> Result<(), StoreError> {
    let unknown = |option_id: &str| StoreError::UnknownOption {
        poll_id: poll.id.clone(),
        option_id: option_id.to_string(),
    };

    match response {
        UserResponse::Choice { option_id } if poll.kind.is_single_choice() => {
            poll.option(option_id).ok_or_else(|| unknown(option_id))?;
        }
        UserResponse::Prediction { score } if poll.kind == PollKind::ScorePrediction => {
            poll.option_for_outcome(score.outcome())
                .ok_or_else(|| unknown(score.outcome().as_str()))?;
        }
        UserResponse::Ratings { ratings } if poll.kind == PollKind::PlayerRating => {
            if ratings.is_empty() {
                return Err(StoreError::WrongResponseKind(poll.kind.as_str()));
            }
            let mut seen = HashSet::new();
            for rating in ratings {
                poll.option(&rating.subject_id)
                    .ok_or_else(|| unknown(&rating.subject_id))?;
                if !(MIN_RATING..=MAX_RATING).contains(&rating.rating) {
                    return Err(StoreError::InvalidRating(i64::from(rating.rating)));
                }
                if let Some(comment) = &rating.comment {
                    if comment.chars().count() > MAX_COMMENT_CHARS {
                        return Err(StoreError::CommentTooLong(MAX_COMMENT_CHARS));
                    }
                }
                if !seen.insert(rating.subject_id.as_str()) {
                    return Err(StoreError::AlreadyResponded);
                }
            }
        }
        _ => return Err(StoreError::WrongResponseKind(poll.kind.as_str())),
    }
    Ok(())
}
