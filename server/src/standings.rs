//! Pure standings arithmetic: outcome classification, record folding and the
//! league table ordering. Everything here is deterministic in the final score
//! alone, so proposition resolution and the standings table can never
//! disagree about who won a match.

use common::{Outcome, Team, TeamRecord};

/// Classify a final score from the home side's perspective.
pub fn outcome_of(home_score: u64, away_score: u64) -> Outcome {
    if home_score > away_score {
        Outcome::HomeWin
    } else if home_score < away_score {
        Outcome::AwayWin
    } else {
        Outcome::Draw
    }
}

/// Fold a final score into both teams' records. When `prior` carries the
/// previously stored score of an already-played match, its contribution is
/// reversed first, so a correction nets out to exactly one game and the new
/// goals. Callers commit both records in one transaction; the reversal is
/// never observable on its own.
pub fn fold_result(
    home: &mut TeamRecord,
    away: &mut TeamRecord,
    prior: Option<(u64, u64)>,
    score: (u64, u64),
) {
    if let Some((prior_home, prior_away)) = prior {
        home.revert(prior_home, prior_away);
        away.revert(prior_away, prior_home);
    }
    home.apply(score.0, score.1);
    away.apply(score.1, score.0);
}

/// League table order: points, then goal difference, then goals scored, all
/// descending. Remaining ties break on team name ascending, which the rest
/// of the ordering leaves unspecified.
pub fn sort_standings(teams: &mut [Team]) {
    teams.sort_by(|a, b| {
        b.record
            .points
            .cmp(&a.record.points)
            .then(b.record.goal_difference().cmp(&a.record.goal_difference()))
            .then(b.record.goals_for.cmp(&a.record.goals_for))
            .then(a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(name: &str, record: TeamRecord) -> Team {
        Team {
            name: name.to_string(),
            record,
        }
    }

    #[test]
    fn classification_covers_all_three_outcomes() {
        assert_eq!(outcome_of(3, 1), Outcome::HomeWin);
        assert_eq!(outcome_of(0, 2), Outcome::AwayWin);
        assert_eq!(outcome_of(2, 2), Outcome::Draw);
        assert_eq!(outcome_of(0, 0), Outcome::Draw);
    }

    #[test]
    fn fold_applies_win_and_loss() {
        let mut home = TeamRecord::default();
        let mut away = TeamRecord::default();
        fold_result(&mut home, &mut away, None, (3, 1));
        assert_eq!((home.points, home.wins, home.goals_for, home.goals_against), (3, 1, 3, 1));
        assert_eq!((away.points, away.losses, away.goals_for, away.goals_against), (0, 1, 1, 3));
    }

    #[test]
    fn correction_matches_a_fresh_application() {
        // Apply A then correct to B; must equal applying B from scratch.
        let mut corrected_home = TeamRecord::default();
        let mut corrected_away = TeamRecord::default();
        fold_result(&mut corrected_home, &mut corrected_away, None, (2, 2));
        fold_result(&mut corrected_home, &mut corrected_away, Some((2, 2)), (0, 4));

        let mut fresh_home = TeamRecord::default();
        let mut fresh_away = TeamRecord::default();
        fold_result(&mut fresh_home, &mut fresh_away, None, (0, 4));

        assert_eq!(corrected_home, fresh_home);
        assert_eq!(corrected_away, fresh_away);
    }

    #[test]
    fn correction_preserves_other_games() {
        let mut home = TeamRecord::default();
        let mut other = TeamRecord::default();
        fold_result(&mut home, &mut other, None, (1, 0));
        let mut away = TeamRecord::default();
        fold_result(&mut home, &mut away, None, (1, 1));
        fold_result(&mut home, &mut away, Some((1, 1)), (3, 0));
        assert_eq!(home.games, 2);
        assert_eq!(home.wins, 2);
        assert_eq!(home.points, 6);
        assert_eq!(away.games, 1);
        assert_eq!(away.losses, 1);
    }

    #[test]
    fn table_orders_on_points_goal_difference_goals_then_name() {
        let mut a = TeamRecord::default();
        a.apply(4, 0); // 3 pts, +4
        let mut b = TeamRecord::default();
        b.apply(2, 0); // 3 pts, +2
        let mut c = TeamRecord::default();
        c.apply(1, 1); // 1 pt
        let mut d = TeamRecord::default();
        d.apply(2, 0); // identical to b, name decides

        let mut table = vec![
            team("delta", d),
            team("charlie", c),
            team("bravo", b),
            team("alpha", a),
        ];
        sort_standings(&mut table);
        let names: Vec<&str> = table.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "bravo", "delta", "charlie"]);
    }
}
