use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref SCORE_RE: Regex = Regex::new(r"^\s*(\d{1,2})\s*[-:]\s*(\d{1,2})\s*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Home,
    Draw,
    Away,
}

impl MatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOutcome::Home => "home",
            MatchOutcome::Draw => "draw",
            MatchOutcome::Away => "away",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "home" => Some(MatchOutcome::Home),
            "draw" => Some(MatchOutcome::Draw),
            "away" => Some(MatchOutcome::Away),
            _ => None,
        }
    }
}

// A scoreline, home side first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

impl Score {
    pub fn new(home: u32, away: u32) -> Self {
        Self { home, away }
    }

    pub fn outcome(&self) -> MatchOutcome {
        if self.home > self.away {
            MatchOutcome::Home
        } else if self.home < self.away {
            MatchOutcome::Away
        } else {
            MatchOutcome::Draw
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.home, self.away)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseScoreError(pub String);

impl fmt::Display for ParseScoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a score, expected something like 2-1", self.0)
    }
}

impl std::error::Error for ParseScoreError {}

impl FromStr for Score {
    type Err = ParseScoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = SCORE_RE
            .captures(s)
            .ok_or_else(|| ParseScoreError(s.to_string()))?;
        let home = caps[1].parse().map_err(|_| ParseScoreError(s.to_string()))?;
        let away = caps[2].parse().map_err(|_| ParseScoreError(s.to_string()))?;
        Ok(Score { home, away })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_separators() {
        assert_eq!("2-1".parse::<Score>().unwrap(), Score::new(2, 1));
        assert_eq!(" 0 : 0 ".parse::<Score>().unwrap(), Score::new(0, 0));
        assert_eq!("10 - 3".parse::<Score>().unwrap(), Score::new(10, 3));
    }

    #[test]
    fn rejects_garbage() {
        assert!("two-one".parse::<Score>().is_err());
        assert!("2-1-0".parse::<Score>().is_err());
        assert!("".parse::<Score>().is_err());
    }

    #[test]
    fn outcome_follows_goals() {
        assert_eq!(Score::new(3, 1).outcome(), MatchOutcome::Home);
        assert_eq!(Score::new(1, 1).outcome(), MatchOutcome::Draw);
        assert_eq!(Score::new(0, 2).outcome(), MatchOutcome::Away);
    }
}
