use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod network;

pub use error::{Error, ErrorKind};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct User {
    pub name: String,
    pub balance: u64,
    pub is_admin: bool,
}

/// Cumulative league record for one team. `points` is always `3 * wins + draws`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct TeamRecord {
    pub games: u64,
    pub wins: u64,
    pub draws: u64,
    pub losses: u64,
    pub goals_for: u64,
    pub goals_against: u64,
    pub points: u64,
}

impl TeamRecord {
    pub fn goal_difference(&self) -> i64 {
        self.goals_for as i64 - self.goals_against as i64
    }

    /// Fold one played match into the record.
    pub fn apply(&mut self, scored: u64, conceded: u64) {
        self.games += 1;
        self.goals_for += scored;
        self.goals_against += conceded;
        if scored > conceded {
            self.wins += 1;
        } else if scored < conceded {
            self.losses += 1;
        } else {
            self.draws += 1;
        }
        self.points = 3 * self.wins + self.draws;
    }

    /// Exact inverse of [`TeamRecord::apply`], used when a result is corrected.
    pub fn revert(&mut self, scored: u64, conceded: u64) {
        self.games -= 1;
        self.goals_for -= scored;
        self.goals_against -= conceded;
        if scored > conceded {
            self.wins -= 1;
        } else if scored < conceded {
            self.losses -= 1;
        } else {
            self.draws -= 1;
        }
        self.points = 3 * self.wins + self.draws;
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Team {
    pub name: String,
    pub record: TeamRecord,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub team: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum MatchStatus {
    Upcoming,
    Live,
    Played,
    Cancelled,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Match {
    pub id: String,
    pub home: String,
    pub away: String,
    pub kickoff: NaiveDateTime,
    pub status: MatchStatus,
    /// Present exactly when `status` is `Played`.
    pub score: Option<(u64, u64)>,
}

/// Realised outcome of a match from the home side's perspective. Doubles as
/// the tag an automatically resolvable proposition is pinned to.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Outcome {
    HomeWin,
    Draw,
    AwayWin,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum PropositionStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum PropResult {
    Won,
    Lost,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Proposition {
    pub id: String,
    pub match_id: Option<String>,
    pub player_id: Option<String>,
    pub description: String,
    pub odds: f64,
    pub status: PropositionStatus,
    pub outcome: Option<Outcome>,
    pub result: Option<PropResult>,
}

/// A reusable catalog entry. Admins stamp propositions out of these, so the
/// odds for one category of bet stay consistent across matches.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Template {
    pub id: String,
    pub category: String,
    pub description: String,
    pub odds: f64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A user-suggested proposition awaiting an admin ruling. Approval turns it
/// into a live proposition with the proposed odds.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Proposal {
    pub id: String,
    pub user: String,
    pub description: String,
    pub odds: f64,
    pub status: ProposalStatus,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum WagerStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum WagerResult {
    Won,
    Lost,
    Refunded,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Wager {
    pub id: String,
    pub user: String,
    pub proposition: String,
    pub stake: u64,
    /// Odds captured at placement; later catalog edits never touch this.
    pub odds: f64,
    pub status: WagerStatus,
    pub result: Option<WagerResult>,
    /// 0 until resolved. On a refund it equals the stake, for audit display.
    pub payout: u64,
}

/// Points credited for a winning wager. The stake was debited at placement,
/// so the full product comes back, stake included.
pub fn payout_for(stake: u64, odds: f64) -> u64 {
    (stake as f64 * odds).round() as u64
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct WagerSettlement {
    pub wager: String,
    pub user: String,
    pub result: WagerResult,
    pub payout: u64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct SettlementFailure {
    pub wager: String,
    pub error: Error,
}

/// Per-proposition settlement outcome. Failures on individual wagers are
/// collected here rather than aborting the batch.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct SettlementReport {
    pub proposition: String,
    pub settled: Vec<WagerSettlement>,
    pub failures: Vec<SettlementFailure>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct MatchReport {
    pub match_id: String,
    pub outcome: Outcome,
    pub reports: Vec<SettlementReport>,
    /// Tagged propositions that were already settled when the score came in
    /// (or was corrected); they are surfaced, never silently re-settled.
    pub skipped: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_points_follow_wins_and_draws() {
        let mut record = TeamRecord::default();
        record.apply(3, 1);
        record.apply(2, 2);
        record.apply(0, 1);
        assert_eq!(record.games, 3);
        assert_eq!((record.wins, record.draws, record.losses), (1, 1, 1));
        assert_eq!(record.points, 4);
        assert_eq!(record.goal_difference(), 1);
    }

    #[test]
    fn revert_is_exact_inverse_of_apply() {
        let mut record = TeamRecord::default();
        record.apply(2, 0);
        let snapshot = record;
        record.apply(1, 4);
        record.revert(1, 4);
        assert_eq!(record, snapshot);
    }

    #[test]
    fn payout_rounds_to_whole_points() {
        assert_eq!(payout_for(50, 2.5), 125);
        assert_eq!(payout_for(40, 2.0), 80);
        assert_eq!(payout_for(3, 1.15), 3);
    }
}
