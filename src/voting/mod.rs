pub mod choice;
pub mod prediction;
pub mod rating;

use crate::models::{PollKind, PollOption};
use std::collections::HashMap;

// Display-ready tally for one poll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TallyResult {
    pub percentages: HashMap<String, f64>, // option id -> share in [0, 100]
    pub winner: Option<String>,            // only for closed, untied polls
    pub highlight: Option<String>,         // highest-rated subject, rating polls only
}

impl TallyResult {
    pub fn percentage(&self, option_id: &str) -> f64 {
        self.percentages.get(option_id).copied().unwrap_or(0.0)
    }
}

/// Turns a snapshot of option counts into percentage shares and a winner.
///
/// Rating polls feed each subject's average rating into the share instead
/// of its raw count, and report a `highlight` rather than a poll winner.
/// Inputs are assumed validated: unique ids, non-negative counts.
pub fn compute_results(options: &[PollOption], poll_closed: bool, kind: PollKind) -> TallyResult {
    match kind {
        PollKind::PlayerRating => rating::calculate_results(options),
        _ => choice::calculate_results(options, poll_closed),
    }
}

/// Rounds a share to one decimal place for display.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// 100 * value / total for every entry, or all zeros when total is zero.
fn shares(values: &[(String, f64)]) -> HashMap<String, f64> {
    let total: f64 = values.iter().map(|(_, value)| *value).sum();
    values
        .iter()
        .map(|(id, value)| {
            let share = if total > 0.0 { 100.0 * value / total } else { 0.0 };
            (id.clone(), share)
        })
        .collect()
}

// Id of the single entry strictly greater than all others, if any.
fn unique_max<'a, T, F>(values: &'a [(String, T)], same: F) -> Option<&'a str>
where
    T: PartialOrd + Copy,
    F: Fn(T, T) -> bool,
{
    let mut best: Option<(&str, T)> = None;
    let mut tied = false;
    for (id, value) in values {
        match best {
            None => best = Some((id.as_str(), *value)),
            Some((_, top)) if same(*value, top) => tied = true,
            Some((_, top)) if *value > top => {
                best = Some((id.as_str(), *value));
                tied = false;
            }
            Some(_) => {}
        }
    }
    match best {
        Some((id, _)) if !tied => Some(id),
        _ => None,
    }
}
