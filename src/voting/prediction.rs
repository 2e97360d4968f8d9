use crate::models::{Poll, Score, UserResponse};

/// True when the predicted scoreline matches the recorded one exactly.
pub fn respondent_was_correct(predicted: &Score, actual: &Score) -> bool {
    predicted == actual
}

/// Correctness of a stored response against the poll's final score.
///
/// Score predictions need the exact scoreline; match-winner picks only need
/// the right outcome. `None` when there is no final score yet or the
/// response cannot be judged.
pub fn response_correctness(poll: &Poll, response: &UserResponse) -> Option<bool> {
    let actual = poll.final_result.as_ref()?;
    match response {
        UserResponse::Prediction { score } => Some(respondent_was_correct(score, actual)),
        UserResponse::Choice { option_id } => {
            let picked = poll.option(option_id)?.outcome?;
            Some(picked == actual.outcome())
        }
        UserResponse::Ratings { .. } => None,
    }
}
