use crate::error::StoreError;
use crate::models::{Poll, PollKind, Score, UserResponse};
use crate::store::PollStore;
use crate::voting::prediction::response_correctness;
use crate::voting::rating::option_average;
use crate::voting::{compute_results, round1, TallyResult};
use chrono::{DateTime, Utc};

/// Everything a caller needs to show one poll, recomputed on every read.
#[derive(Debug, Clone)]
pub struct PollResults {
    pub poll: Poll,
    pub closed: bool,
    pub tally: TallyResult,
    pub user_response: Option<UserResponse>,
    pub respondent_was_correct: Option<bool>,
}

pub enum ResultsView<'a> {
    // An authoritative score replaces the proportional view.
    Final(&'a Score),
    Tally(&'a TallyResult),
}

impl PollResults {
    pub fn from_snapshot(
        poll: Poll,
        user_response: Option<UserResponse>,
        now: DateTime<Utc>,
    ) -> Self {
        let closed = poll.is_closed_at(now);
        let tally = compute_results(&poll.options, closed, poll.kind);
        let respondent_was_correct = user_response
            .as_ref()
            .and_then(|response| response_correctness(&poll, response));
        Self {
            poll,
            closed,
            tally,
            user_response,
            respondent_was_correct,
        }
    }

    pub fn view(&self) -> ResultsView<'_> {
        match &self.poll.final_result {
            Some(score) => ResultsView::Final(score),
            None => ResultsView::Tally(&self.tally),
        }
    }

    pub fn total_responses(&self) -> u64 {
        self.poll.options.iter().map(|option| option.count).sum()
    }
}

/// Fetches exactly one poll (and the caller's response, if a user is given)
/// and computes its tally.
pub async fn load_results(
    store: &dyn PollStore,
    poll_id: &str,
    user_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<PollResults, StoreError> {
    let poll = store.get_poll(poll_id).await?;
    let user_response = match user_id {
        Some(user_id) => store.get_user_response(poll_id, user_id).await?,
        None => None,
    };
    Ok(PollResults::from_snapshot(poll, user_response, now))
}

/// Formats results as a Discord message. The text is the same for every
/// viewer; see `render_correctness` for the caller's own verdict.
pub fn render_summary(results: &PollResults) -> String {
    let poll = &results.poll;
    let mut summary = format!("**{}**\n", poll.question);

    let tally = match results.view() {
        ResultsView::Final(score) => {
            summary.push_str(&format!("Final score: **{}**\n", score));
            summary.push_str(&format!(
                "\n{} {} were submitted.",
                results.total_responses(),
                response_noun(poll.kind)
            ));
            return summary;
        }
        ResultsView::Tally(tally) => tally,
    };

    summary.push('\n');
    for option in &poll.options {
        let share = round1(tally.percentage(&option.id));
        let marked = tally.winner.as_deref() == Some(option.id.as_str())
            || tally.highlight.as_deref() == Some(option.id.as_str());
        let name = if marked {
            format!("**{}**", option.label)
        } else {
            option.label.clone()
        };

        let line = if poll.kind == PollKind::PlayerRating {
            let ratings = option.rating.as_ref().map(|s| s.rating_count).unwrap_or(0);
            format!(
                "{}: {:.1} avg from {} rating(s) ({:.1}%)",
                name,
                round1(option_average(option)),
                ratings,
                share
            )
        } else {
            format!("{}: {} vote(s) ({:.1}%)", name, option.count, share)
        };
        summary.push_str(&line);
        summary.push('\n');
    }

    summary.push('\n');
    match (&tally.winner, &tally.highlight) {
        (Some(winner), _) => {
            summary.push_str(&format!("Winner: **{}**\n", poll.option_label(winner)));
        }
        (None, Some(best)) => {
            summary.push_str(&format!("Highest rated: **{}**\n", poll.option_label(best)));
        }
        (None, None) if results.closed && poll.kind != PollKind::PlayerRating => {
            summary.push_str(if results.total_responses() == 0 {
                "No votes were cast.\n"
            } else {
                "It's a tie, no winner.\n"
            });
        }
        _ => {}
    }

    summary.push_str(&format!(
        "{} response(s). {}",
        results.total_responses(),
        if results.closed {
            "Poll closed.".to_string()
        } else {
            format!("Closes <t:{}:R>.", poll.closes_at.timestamp())
        }
    ));
    summary
}

/// The caller's verdict once a final score is in, for private delivery.
pub fn render_correctness(results: &PollResults) -> Option<&'static str> {
    match results.respondent_was_correct? {
        true => Some("You called it!"),
        false => Some("Not this time."),
    }
}

fn response_noun(kind: PollKind) -> &'static str {
    match kind {
        PollKind::ScorePrediction => "prediction(s)",
        PollKind::PlayerRating => "rating(s)",
        _ => "vote(s)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PollKind, SubjectRating};
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn topic(counts: &[u64]) -> Poll {
        let labels = (0..counts.len()).map(|i| format!("Option {}", i)).collect();
        let mut poll = Poll::new(
            "g".into(),
            "1".into(),
            "c".into(),
            "Who wins the league?".into(),
            PollKind::Topic,
            labels,
            Utc::now() + Duration::hours(1),
        );
        for (option, count) in poll.options.iter_mut().zip(counts) {
            option.count = *count;
        }
        poll
    }

    #[test]
    fn winner_appears_only_after_closing() {
        let poll = topic(&[1200, 150, 50]);
        let open = PollResults::from_snapshot(poll.clone(), None, poll.closes_at);
        assert!(!open.closed);
        assert_eq!(open.tally.winner, None);

        let after = poll.closes_at + Duration::minutes(1);
        let closed = PollResults::from_snapshot(poll.clone(), None, after);
        assert!(closed.closed);
        assert_eq!(closed.tally.winner.as_deref(), Some(poll.options[0].id.as_str()));

        let text = render_summary(&closed);
        assert!(text.contains("**Option 0**: 1200 vote(s) (85.7%)"));
        assert!(text.contains("Option 1: 150 vote(s) (10.7%)"));
        assert!(text.contains("Option 2: 50 vote(s) (3.6%)"));
        assert!(text.contains("Winner: **Option 0**"));
        assert!(text.contains("Poll closed."));
    }

    #[test]
    fn closed_tie_is_called_out() {
        let poll = topic(&[500, 500]);
        let after = poll.closes_at + Duration::hours(1);
        let results = PollResults::from_snapshot(poll.clone(), None, after);
        assert_eq!(results.tally.winner, None);
        let text = render_summary(&results);
        assert!(text.contains("(50.0%)"));
        assert!(text.contains("It's a tie"));
    }

    #[test]
    fn final_score_suspends_the_tally() {
        let mut poll = Poll::new_match(
            "g".into(),
            "1".into(),
            "c".into(),
            PollKind::ScorePrediction,
            "Napoli",
            "Roma",
            Utc::now() - Duration::hours(2),
        );
        poll.options[0].count = 4;
        poll.final_result = Some(Score::new(3, 0));
        let response = UserResponse::Prediction { score: Score::new(3, 0) };

        let results = PollResults::from_snapshot(poll, Some(response), Utc::now());
        assert!(matches!(results.view(), ResultsView::Final(score) if *score == Score::new(3, 0)));
        assert_eq!(results.respondent_was_correct, Some(true));
        // distribution is still computed underneath
        assert_eq!(results.tally.percentage(&results.poll.options[0].id), 100.0);

        let text = render_summary(&results);
        assert!(text.contains("Final score: **3-0**"));
        assert!(text.contains("4 prediction(s) were submitted."));
        assert!(!text.contains("You called it!"));
        assert_eq!(render_correctness(&results), Some("You called it!"));
    }

    #[test]
    fn final_match_winner_counts_votes() {
        let mut poll = Poll::new_match(
            "g".into(),
            "1".into(),
            "c".into(),
            PollKind::MatchWinner,
            "Porto",
            "Benfica",
            Utc::now() - Duration::hours(2),
        );
        poll.options[2].count = 2;
        poll.final_result = Some(Score::new(1, 1));
        let response = UserResponse::Choice { option_id: poll.options[2].id.clone() };

        let results = PollResults::from_snapshot(poll, Some(response), Utc::now());
        let text = render_summary(&results);
        assert!(text.contains("2 vote(s) were submitted."));
        assert_eq!(render_correctness(&results), Some("Not this time."));

        let anonymous = PollResults::from_snapshot(results.poll.clone(), None, Utc::now());
        assert_eq!(render_correctness(&anonymous), None);
    }

    #[tokio::test]
    async fn load_results_reads_user_response() {
        let poll = Poll::new(
            "g".into(),
            "1".into(),
            "c".into(),
            "Rate the forwards".into(),
            PollKind::PlayerRating,
            vec!["Isak".into(), "Gordon".into()],
            Utc::now() + Duration::hours(1),
        );
        let store = MemoryStore::new();
        store.create_poll(&poll).await.unwrap();
        let response = UserResponse::Ratings {
            ratings: vec![SubjectRating {
                subject_id: poll.options[1].id.clone(),
                rating: 8,
                comment: None,
            }],
        };
        store.submit_response(&poll, "u1", &response).await.unwrap();

        let mine = load_results(&store, &poll.id, Some("u1"), Utc::now()).await.unwrap();
        assert_eq!(mine.user_response, Some(response));
        assert_eq!(mine.tally.highlight.as_deref(), Some(poll.options[1].id.as_str()));
        assert_eq!(mine.tally.winner, None);
        assert!(render_summary(&mine).contains("**Gordon**: 8.0 avg from 1 rating(s) (100.0%)"));

        let anonymous = load_results(&store, &poll.id, None, Utc::now()).await.unwrap();
        assert_eq!(anonymous.user_response, None);
    }

    #[tokio::test]
    async fn unknown_poll_propagates() {
        let store = MemoryStore::new();
        assert!(matches!(
            load_results(&store, "missing", None, Utc::now()).await,
            Err(StoreError::PollNotFound(_))
        ));
    }
}
