use crate::models::PollOption;
use crate::voting::{shares, unique_max, TallyResult};

// Averages closer than this are treated as tied.
const AVERAGE_EPSILON: f64 = 1e-9;

pub fn average_rating(rating_sum: u64, rating_count: u64) -> f64 {
    if rating_count == 0 {
        0.0
    } else {
        rating_sum as f64 / rating_count as f64
    }
}

pub fn option_average(option: &PollOption) -> f64 {
    option
        .rating
        .as_ref()
        .map(|stats| average_rating(stats.rating_sum, stats.rating_count))
        .unwrap_or(0.0)
}

// Shares are computed over average ratings; the highlight is the subject
// with the unique best average among those that have been rated.
pub fn calculate_results(options: &[PollOption]) -> TallyResult {
    let averages: Vec<(String, f64)> = options
        .iter()
        .map(|option| (option.id.clone(), option_average(option)))
        .collect();
    let percentages = shares(&averages);

    let rated: Vec<(String, f64)> = options
        .iter()
        .filter(|option| option.rating.as_ref().is_some_and(|stats| stats.rating_count > 0))
        .map(|option| (option.id.clone(), option_average(option)))
        .collect();
    let highlight = unique_max(&rated, |a, b| (a - b).abs() < AVERAGE_EPSILON).map(str::to_string);

    TallyResult {
        percentages,
        winner: None,
        highlight,
    }
}
