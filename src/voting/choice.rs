use crate::models::PollOption;
use crate::voting::{shares, unique_max, TallyResult};

// Count-based tally used by every kind except player ratings.
pub fn calculate_results(options: &[PollOption], poll_closed: bool) -> TallyResult {
    let counts: Vec<(String, u64)> = options
        .iter()
        .map(|option| (option.id.clone(), option.count))
        .collect();
    let total: u64 = counts.iter().map(|(_, count)| count).sum();

    let as_f64: Vec<(String, f64)> = counts
        .iter()
        .map(|(id, count)| (id.clone(), *count as f64))
        .collect();
    let percentages = shares(&as_f64);

    let winner = if poll_closed && total > 0 {
        unique_max(&counts, |a, b| a == b).map(str::to_string)
    } else {
        None
    };

    TallyResult {
        percentages,
        winner,
        highlight: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voting::round1;

    fn options(counts: &[(&str, u64)]) -> Vec<PollOption> {
        counts
            .iter()
            .map(|(id, count)| PollOption {
                id: id.to_string(),
                label: id.to_string(),
                count: *count,
                rating: None,
                outcome: None,
            })
            .collect()
    }

    #[test]
    fn no_votes_means_all_zero_and_no_winner() {
        let result = calculate_results(&options(&[("a", 0), ("b", 0), ("c", 0)]), true);
        assert!(result.percentages.values().all(|p| *p == 0.0));
        assert_eq!(result.percentages.len(), 3);
        assert_eq!(result.winner, None);
    }

    #[test]
    fn empty_option_list_is_harmless() {
        let result = calculate_results(&[], true);
        assert!(result.percentages.is_empty());
        assert_eq!(result.winner, None);
    }

    #[test]
    fn clear_leader_wins_once_closed() {
        let result = calculate_results(&options(&[("A", 1200), ("B", 150), ("C", 50)]), true);
        assert_eq!(round1(result.percentage("A")), 85.7);
        assert_eq!(round1(result.percentage("B")), 10.7);
        assert_eq!(round1(result.percentage("C")), 3.6);
        assert_eq!(result.winner.as_deref(), Some("A"));
    }

    #[test]
    fn tie_at_the_top_has_no_winner() {
        let result = calculate_results(&options(&[("X", 500), ("Y", 500)]), true);
        assert_eq!(result.percentage("X"), 50.0);
        assert_eq!(result.percentage("Y"), 50.0);
        assert_eq!(result.winner, None);
    }

    #[test]
    fn tie_below_the_top_does_not_block_the_winner() {
        let result = calculate_results(&options(&[("a", 2), ("b", 2), ("c", 9)]), true);
        assert_eq!(result.winner.as_deref(), Some("c"));
    }

    #[test]
    fn open_poll_never_has_a_winner() {
        let result = calculate_results(&options(&[("A", 1200), ("B", 150)]), false);
        assert_eq!(result.winner, None);
        assert!(result.percentage("A") > 0.0);
    }

    #[test]
    fn percentages_sum_to_one_hundred() {
        let sets: [&[(&str, u64)]; 4] = [
            &[("a", 1), ("b", 1), ("c", 1)],
            &[("a", 7)],
            &[("a", 13), ("b", 0), ("c", 29), ("d", 3)],
            &[("a", 1), ("b", 999_999)],
        ];
        for set in sets {
            let result = calculate_results(&options(set), false);
            let sum: f64 = result.percentages.values().sum();
            assert!((sum - 100.0).abs() < 1e-9, "sum was {}", sum);
        }
    }
}
