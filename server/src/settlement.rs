//! Settlement: the one place wagers leave the `Active` state. A final score
//! or a manual ruling comes in, the matching propositions flip to
//! `Completed`/`Cancelled`, and every wager on them is paid out, forfeited
//! or refunded through the store worker.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::database::raw_id;
use crate::database_manager::{ask, DatabaseRequest, Responder};
use crate::standings;
use common::{
    payout_for, Error, MatchReport, MatchStatus, PropResult, PropositionStatus, SettlementFailure,
    SettlementReport, WagerResult, WagerSettlement, WagerStatus,
};

pub enum SettlementRequest {
    SettleProposition {
        id: String,
        result: PropResult,
        responder: Responder<SettlementReport>,
    },
    CancelProposition {
        id: String,
        responder: Responder<SettlementReport>,
    },
    SettleMatch {
        id: String,
        home_score: u64,
        away_score: u64,
        responder: Responder<MatchReport>,
    },
    CancelMatch {
        id: String,
        responder: Responder<Vec<SettlementReport>>,
    },
}

pub struct SettlementManager {
    work_queue: mpsc::Receiver<SettlementRequest>,
    database_requester: mpsc::Sender<DatabaseRequest>,
}

//NOTE: No functions in this impl may crash
impl SettlementManager {
    pub fn new(
        work_queue: mpsc::Receiver<SettlementRequest>,
        database_requester: mpsc::Sender<DatabaseRequest>,
    ) -> Self {
        Self {
            work_queue,
            database_requester,
        }
    }

    pub async fn manage(&mut self) {
        while let Some(request) = self.work_queue.recv().await {
            // we do not care if the receiver has already disappeared
            match request {
                SettlementRequest::SettleProposition {
                    id,
                    result,
                    responder,
                } => {
                    responder
                        .send(self.settle_proposition(&id, result).await)
                        .ok();
                }
                SettlementRequest::CancelProposition { id, responder } => {
                    responder.send(self.cancel_proposition(&id).await).ok();
                }
                SettlementRequest::SettleMatch {
                    id,
                    home_score,
                    away_score,
                    responder,
                } => {
                    responder
                        .send(self.settle_match(&id, home_score, away_score).await)
                        .ok();
                }
                SettlementRequest::CancelMatch { id, responder } => {
                    responder.send(self.cancel_match(&id).await).ok();
                }
            }
        }
    }

    /// Resolve a proposition and every wager on it. Individual wager
    /// failures go into the report; they never abort the remaining wagers.
    async fn settle_proposition(
        &self,
        id: &str,
        result: PropResult,
    ) -> Result<SettlementReport, Error> {
        let proposition = ask(&self.database_requester, |responder| {
            DatabaseRequest::GetProposition {
                id: id.to_string(),
                responder,
            }
        })
        .await?
        .ok_or(Error::not_found("proposition", id))?;

        match proposition.status {
            PropositionStatus::Active => {}
            PropositionStatus::Completed => return Err(Error::AlreadySettled { id: id.into() }),
            PropositionStatus::Cancelled => return Err(Error::AlreadyCancelled { id: id.into() }),
        }

        ask(&self.database_requester, |responder| {
            DatabaseRequest::MarkProposition {
                id: id.to_string(),
                status: PropositionStatus::Completed,
                result: Some(result),
                responder,
            }
        })
        .await?;

        let wager_result = match result {
            PropResult::Won => WagerResult::Won,
            PropResult::Lost => WagerResult::Lost,
        };
        let report = self
            .resolve_wagers(id, wager_result, |stake, odds| match result {
                PropResult::Won => payout_for(stake, odds),
                PropResult::Lost => 0,
            })
            .await?;
        info!(
            proposition = %id,
            settled = report.settled.len(),
            failures = report.failures.len(),
            ?result,
            "proposition settled"
        );
        Ok(report)
    }

    /// Void a proposition: every active wager gets its stake back, exactly.
    async fn cancel_proposition(&self, id: &str) -> Result<SettlementReport, Error> {
        let proposition = ask(&self.database_requester, |responder| {
            DatabaseRequest::GetProposition {
                id: id.to_string(),
                responder,
            }
        })
        .await?
        .ok_or(Error::not_found("proposition", id))?;

        match proposition.status {
            PropositionStatus::Active => {}
            PropositionStatus::Completed => return Err(Error::AlreadySettled { id: id.into() }),
            PropositionStatus::Cancelled => return Err(Error::AlreadyCancelled { id: id.into() }),
        }

        ask(&self.database_requester, |responder| {
            DatabaseRequest::MarkProposition {
                id: id.to_string(),
                status: PropositionStatus::Cancelled,
                result: None,
                responder,
            }
        })
        .await?;

        let report = self
            .resolve_wagers(id, WagerResult::Refunded, |stake, _odds| stake)
            .await?;
        info!(proposition = %id, refunds = report.settled.len(), "proposition cancelled");
        Ok(report)
    }

    async fn resolve_wagers(
        &self,
        proposition: &str,
        result: WagerResult,
        payout: impl Fn(u64, f64) -> u64,
    ) -> Result<SettlementReport, Error> {
        let wagers = ask(&self.database_requester, |responder| {
            DatabaseRequest::WagersForProposition {
                id: proposition.to_string(),
                responder,
            }
        })
        .await?;

        let mut report = SettlementReport {
            proposition: proposition.to_string(),
            settled: vec![],
            failures: vec![],
        };
        for wager in wagers
            .into_iter()
            .filter(|wager| wager.status == WagerStatus::Active)
        {
            let credit = payout(wager.stake, wager.odds);
            let wager_id = raw_id(&wager.id);
            let user = raw_id(&wager.user);
            let outcome = ask(&self.database_requester, |responder| {
                DatabaseRequest::SettleWager {
                    wager,
                    result,
                    payout: credit,
                    responder,
                }
            })
            .await;
            match outcome {
                Ok(()) => report.settled.push(WagerSettlement {
                    wager: wager_id,
                    user,
                    result,
                    payout: credit,
                }),
                Err(error) => {
                    warn!(wager = %wager_id, %error, "wager could not be resolved");
                    report.failures.push(SettlementFailure {
                        wager: wager_id,
                        error,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Final score entry: fold the result into the standings and resolve
    /// every tagged proposition on the match against the same score. A
    /// re-run with a corrected score reverses and reapplies the standings;
    /// propositions that already settled are only reported in `skipped`,
    /// since issued payouts are not clawed back. Entering a score also
    /// revives a cancelled match: it goes to `Played` and its refunded
    /// propositions land in `skipped`.
    async fn settle_match(
        &self,
        id: &str,
        home_score: u64,
        away_score: u64,
    ) -> Result<MatchReport, Error> {
        let match_row = ask(&self.database_requester, |responder| {
            DatabaseRequest::GetMatch {
                id: id.to_string(),
                responder,
            }
        })
        .await?
        .ok_or(Error::not_found("match", id))?;

        let home_name = raw_id(&match_row.home);
        let away_name = raw_id(&match_row.away);
        let mut home = ask(&self.database_requester, |responder| {
            DatabaseRequest::GetTeam {
                name: home_name.clone(),
                responder,
            }
        })
        .await?
        .ok_or(Error::not_found("team", home_name.clone()))?;
        let mut away = ask(&self.database_requester, |responder| {
            DatabaseRequest::GetTeam {
                name: away_name.clone(),
                responder,
            }
        })
        .await?
        .ok_or(Error::not_found("team", away_name.clone()))?;

        let prior = match match_row.status {
            MatchStatus::Played => match_row.score(),
            _ => None,
        };
        standings::fold_result(
            &mut home.record,
            &mut away.record,
            prior,
            (home_score, away_score),
        );

        let mut updated = match_row.clone();
        updated.status = MatchStatus::Played;
        updated.home_score = Some(home_score);
        updated.away_score = Some(away_score);
        ask(&self.database_requester, |responder| {
            DatabaseRequest::CommitMatchResult {
                match_row: updated,
                home,
                away,
                responder,
            }
        })
        .await?;

        let outcome = standings::outcome_of(home_score, away_score);
        let propositions = ask(&self.database_requester, |responder| {
            DatabaseRequest::PropositionsForMatch {
                match_id: id.to_string(),
                responder,
            }
        })
        .await?;

        let mut reports = vec![];
        let mut skipped = vec![];
        for proposition in propositions {
            // untagged propositions wait for a manual ruling
            let Some(tag) = proposition.outcome else {
                continue;
            };
            let proposition_id = raw_id(&proposition.id);
            if proposition.status != PropositionStatus::Active {
                skipped.push(proposition_id);
                continue;
            }
            let result = if tag == outcome {
                PropResult::Won
            } else {
                PropResult::Lost
            };
            match self.settle_proposition(&proposition_id, result).await {
                Ok(report) => reports.push(report),
                Err(error) => {
                    warn!(proposition = %proposition_id, %error, "match-linked proposition not settled");
                    skipped.push(proposition_id);
                }
            }
        }

        info!(
            match_id = %id,
            score = %format!("{home_score}-{away_score}"),
            corrected = prior.is_some(),
            propositions = reports.len(),
            "match settled"
        );
        Ok(MatchReport {
            match_id: id.to_string(),
            outcome,
            reports,
            skipped,
        })
    }

    /// Call off a match that never happened: the match row goes to
    /// `Cancelled` and every active proposition on it is voided with full
    /// refunds. Played matches stay settled.
    async fn cancel_match(&self, id: &str) -> Result<Vec<SettlementReport>, Error> {
        let match_row = ask(&self.database_requester, |responder| {
            DatabaseRequest::GetMatch {
                id: id.to_string(),
                responder,
            }
        })
        .await?
        .ok_or(Error::not_found("match", id))?;

        match match_row.status {
            MatchStatus::Upcoming | MatchStatus::Live => {}
            status => {
                return Err(Error::BadMatchState {
                    id: id.into(),
                    status: format!("{status:?}"),
                })
            }
        }

        ask(&self.database_requester, |responder| {
            DatabaseRequest::SetMatchStatus {
                id: id.to_string(),
                status: MatchStatus::Cancelled,
                responder,
            }
        })
        .await?;

        let propositions = ask(&self.database_requester, |responder| {
            DatabaseRequest::PropositionsForMatch {
                match_id: id.to_string(),
                responder,
            }
        })
        .await?;

        let mut reports = vec![];
        for proposition in propositions
            .into_iter()
            .filter(|p| p.status == PropositionStatus::Active)
        {
            let proposition_id = raw_id(&proposition.id);
            match self.cancel_proposition(&proposition_id).await {
                Ok(report) => reports.push(report),
                Err(error) => {
                    warn!(proposition = %proposition_id, %error, "proposition not voided");
                }
            }
        }
        info!(match_id = %id, voided = reports.len(), "match cancelled");
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::database::DatabaseConnection;
    use crate::database_manager::DatabaseManager;
    use chrono::NaiveDate;
    use common::Outcome;

    async fn harness() -> (mpsc::Sender<DatabaseRequest>, SettlementManager) {
        let db = DatabaseConnection::memory().await.unwrap();
        let (db_tx, db_rx) = mpsc::channel(32);
        let mut manager = DatabaseManager::new(db, db_rx, StoreConfig::default());
        tokio::spawn(async move {
            manager.manage().await;
        });
        let (_work_tx, work_rx) = mpsc::channel(1);
        let settlement = SettlementManager::new(work_rx, db_tx.clone());
        (db_tx, settlement)
    }

    async fn register(db_tx: &mpsc::Sender<DatabaseRequest>, name: &str, balance: u64) {
        ask(db_tx, |responder| DatabaseRequest::RegisterUser {
            name: name.to_string(),
            is_admin: false,
            responder,
        })
        .await
        .unwrap();
        ask(db_tx, |responder| DatabaseRequest::UpdateUser {
            name: name.to_string(),
            balance: Some(balance),
            is_admin: None,
            responder,
        })
        .await
        .unwrap();
    }

    async fn balance_of(db_tx: &mpsc::Sender<DatabaseRequest>, name: &str) -> u64 {
        ask(db_tx, |responder| DatabaseRequest::GetUser {
            name: name.to_string(),
            responder,
        })
        .await
        .unwrap()
        .unwrap()
        .balance
    }

    async fn place(
        db_tx: &mpsc::Sender<DatabaseRequest>,
        user: &str,
        proposition: &str,
        stake: u64,
    ) -> common::Wager {
        ask(db_tx, |responder| DatabaseRequest::PlaceWager {
            user: user.to_string(),
            proposition: proposition.to_string(),
            stake,
            responder,
        })
        .await
        .unwrap()
    }

    fn kickoff() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 9, 12)
            .unwrap()
            .and_hms_opt(19, 30, 0)
            .unwrap()
    }

    async fn fixture(
        db_tx: &mpsc::Sender<DatabaseRequest>,
        home: &str,
        away: &str,
    ) -> common::Match {
        for name in [home, away] {
            ask(db_tx, |responder| DatabaseRequest::CreateTeam {
                name: name.to_string(),
                responder,
            })
            .await
            .unwrap();
        }
        ask(db_tx, |responder| DatabaseRequest::CreateMatch {
            home: home.to_string(),
            away: away.to_string(),
            kickoff: kickoff(),
            responder,
        })
        .await
        .unwrap()
    }

    async fn tagged_proposition(
        db_tx: &mpsc::Sender<DatabaseRequest>,
        match_id: &str,
        description: &str,
        odds: f64,
        outcome: Outcome,
    ) -> common::Proposition {
        ask(db_tx, |responder| DatabaseRequest::CreateProposition {
            match_id: Some(match_id.to_string()),
            player_id: None,
            description: description.to_string(),
            odds,
            outcome: Some(outcome),
            responder,
        })
        .await
        .unwrap()
    }

    async fn standings(db_tx: &mpsc::Sender<DatabaseRequest>) -> Vec<common::Team> {
        ask(db_tx, |responder| DatabaseRequest::Standings { responder })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn match_settlement_cascades_to_standings_and_wagers() {
        let (db_tx, settlement) = harness().await;
        let fixture = fixture(&db_tx, "alfa", "beta").await;
        let prop = tagged_proposition(&db_tx, &fixture.id, "alfa wins", 2.0, Outcome::HomeWin).await;
        register(&db_tx, "ulisses", 100).await;
        place(&db_tx, "ulisses", &prop.id, 40).await;
        assert_eq!(balance_of(&db_tx, "ulisses").await, 60);

        let report = settlement.settle_match(&fixture.id, 3, 1).await.unwrap();
        assert_eq!(report.outcome, Outcome::HomeWin);
        assert_eq!(report.reports.len(), 1);
        assert!(report.skipped.is_empty());
        let settled = &report.reports[0].settled;
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].result, WagerResult::Won);
        assert_eq!(settled[0].payout, 80);

        // 100 - 40 + 40 * 2.0
        assert_eq!(balance_of(&db_tx, "ulisses").await, 140);

        let table = standings(&db_tx).await;
        assert_eq!(table[0].name, "alfa");
        let alfa = table[0].record;
        assert_eq!((alfa.points, alfa.wins, alfa.goals_for, alfa.goals_against), (3, 1, 3, 1));
        let beta = table[1].record;
        assert_eq!((beta.points, beta.losses, beta.goals_for, beta.goals_against), (0, 1, 1, 3));

        let wagers = ask(&db_tx, |responder| DatabaseRequest::WagersForUser {
            name: "ulisses".to_string(),
            responder,
        })
        .await
        .unwrap();
        assert_eq!(wagers[0].status, common::WagerStatus::Completed);
        assert_eq!(wagers[0].result, Some(WagerResult::Won));
    }

    #[tokio::test]
    async fn correcting_a_score_rewrites_standings_but_not_payouts() {
        let (db_tx, settlement) = harness().await;
        let fixture = fixture(&db_tx, "alfa", "beta").await;
        let prop = tagged_proposition(&db_tx, &fixture.id, "alfa wins", 2.0, Outcome::HomeWin).await;
        register(&db_tx, "ulisses", 100).await;
        place(&db_tx, "ulisses", &prop.id, 40).await;

        settlement.settle_match(&fixture.id, 3, 1).await.unwrap();
        let corrected = settlement.settle_match(&fixture.id, 1, 1).await.unwrap();

        // standings read as if 1-1 had been entered directly
        let table = standings(&db_tx).await;
        for team in &table {
            assert_eq!(team.record.games, 1);
            assert_eq!(team.record.draws, 1);
            assert_eq!(team.record.points, 1);
        }

        // the proposition stays settled; it is surfaced, not re-run
        assert_eq!(corrected.outcome, Outcome::Draw);
        assert!(corrected.reports.is_empty());
        assert_eq!(corrected.skipped, vec![prop.id.clone()]);
        assert_eq!(balance_of(&db_tx, "ulisses").await, 140);
    }

    #[tokio::test]
    async fn manual_settlement_pays_the_captured_odds() {
        let (db_tx, settlement) = harness().await;
        register(&db_tx, "ana", 200).await;
        let prop = ask(&db_tx, |responder| DatabaseRequest::CreateProposition {
            match_id: None,
            player_id: None,
            description: "golden goal before minute five".to_string(),
            odds: 2.5,
            outcome: None,
            responder,
        })
        .await
        .unwrap();
        place(&db_tx, "ana", &prop.id, 50).await;

        let report = settlement
            .settle_proposition(&prop.id, PropResult::Won)
            .await
            .unwrap();
        assert_eq!(report.settled[0].payout, 125);
        assert!(report.failures.is_empty());
        assert_eq!(balance_of(&db_tx, "ana").await, 275);

        // settling twice is a conflict, not a double payout
        assert_eq!(
            settlement
                .settle_proposition(&prop.id, PropResult::Won)
                .await
                .unwrap_err(),
            Error::AlreadySettled { id: prop.id.clone() }
        );
        assert_eq!(balance_of(&db_tx, "ana").await, 275);
    }

    #[tokio::test]
    async fn losing_wagers_forfeit_the_stake_only() {
        let (db_tx, settlement) = harness().await;
        register(&db_tx, "ana", 100).await;
        let prop = ask(&db_tx, |responder| DatabaseRequest::CreateProposition {
            match_id: None,
            player_id: None,
            description: "hat-trick tonight".to_string(),
            odds: 6.0,
            outcome: None,
            responder,
        })
        .await
        .unwrap();
        place(&db_tx, "ana", &prop.id, 25).await;

        let report = settlement
            .settle_proposition(&prop.id, PropResult::Lost)
            .await
            .unwrap();
        assert_eq!(report.settled[0].result, WagerResult::Lost);
        assert_eq!(report.settled[0].payout, 0);
        assert_eq!(balance_of(&db_tx, "ana").await, 75);
    }

    #[tokio::test]
    async fn cancellation_refunds_every_stake_exactly() {
        let (db_tx, settlement) = harness().await;
        register(&db_tx, "ana", 50).await;
        register(&db_tx, "zeca", 80).await;
        let prop = ask(&db_tx, |responder| DatabaseRequest::CreateProposition {
            match_id: None,
            player_id: None,
            description: "called off".to_string(),
            odds: 3.0,
            outcome: None,
            responder,
        })
        .await
        .unwrap();
        place(&db_tx, "ana", &prop.id, 20).await;
        place(&db_tx, "zeca", &prop.id, 30).await;
        assert_eq!(balance_of(&db_tx, "ana").await, 30);
        assert_eq!(balance_of(&db_tx, "zeca").await, 50);

        let report = settlement.cancel_proposition(&prop.id).await.unwrap();
        assert_eq!(report.settled.len(), 2);
        assert!(report
            .settled
            .iter()
            .all(|entry| entry.result == WagerResult::Refunded && entry.payout > 0));
        assert_eq!(balance_of(&db_tx, "ana").await, 50);
        assert_eq!(balance_of(&db_tx, "zeca").await, 80);

        let wagers = ask(&db_tx, |responder| DatabaseRequest::WagersForUser {
            name: "ana".to_string(),
            responder,
        })
        .await
        .unwrap();
        assert_eq!(wagers[0].status, common::WagerStatus::Cancelled);
        assert_eq!(wagers[0].result, Some(WagerResult::Refunded));
        assert_eq!(wagers[0].payout, wagers[0].stake);

        assert_eq!(
            settlement.cancel_proposition(&prop.id).await.unwrap_err(),
            Error::AlreadyCancelled { id: prop.id.clone() }
        );
    }

    #[tokio::test]
    async fn cancelling_a_match_voids_its_open_propositions() {
        let (db_tx, settlement) = harness().await;
        let fixture = fixture(&db_tx, "alfa", "beta").await;
        let prop = tagged_proposition(&db_tx, &fixture.id, "alfa wins", 2.0, Outcome::HomeWin).await;
        register(&db_tx, "ana", 100).await;
        place(&db_tx, "ana", &prop.id, 40).await;

        let reports = settlement.cancel_match(&fixture.id).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(balance_of(&db_tx, "ana").await, 100);

        // entering a score afterwards revives the match; the refunded
        // proposition is surfaced, not re-run
        let report = settlement.settle_match(&fixture.id, 1, 0).await.unwrap();
        assert_eq!(report.skipped, vec![prop.id.clone()]);
        assert!(report.reports.is_empty());
        assert_eq!(balance_of(&db_tx, "ana").await, 100);
        let table = standings(&db_tx).await;
        assert_eq!(table[0].name, "alfa");
        assert_eq!(table[0].record.points, 3);

        // but a cancelled match cannot be cancelled twice
        assert_eq!(
            settlement.cancel_match(&fixture.id).await.unwrap_err(),
            Error::BadMatchState {
                id: fixture.id.clone(),
                status: "Played".into()
            }
        );
    }

    #[tokio::test]
    async fn multi_word_names_settle_and_report_unmangled() {
        let (db_tx, settlement) = harness().await;
        let fixture = fixture(&db_tx, "alfa beta", "gama delta").await;
        assert_eq!(fixture.home, "alfa beta");
        let prop =
            tagged_proposition(&db_tx, &fixture.id, "home side wins", 2.0, Outcome::HomeWin).await;
        register(&db_tx, "ana maria", 100).await;
        place(&db_tx, "ana maria", &prop.id, 40).await;

        let report = settlement.settle_match(&fixture.id, 2, 0).await.unwrap();
        assert_eq!(report.reports.len(), 1);
        let settled = &report.reports[0].settled[0];
        assert_eq!(settled.user, "ana maria");
        assert_eq!(settled.wager, format!("ana maria:{}", prop.id));
        assert_eq!(balance_of(&db_tx, "ana maria").await, 140);

        let table = standings(&db_tx).await;
        assert_eq!(table[0].name, "alfa beta");
        assert_eq!(table[0].record.points, 3);
        assert_eq!(table[1].name, "gama delta");
    }

    #[tokio::test]
    async fn points_are_conserved_across_a_settlement_cycle() {
        let (db_tx, settlement) = harness().await;
        register(&db_tx, "ana", 100).await;
        register(&db_tx, "zeca", 100).await;
        let prop = ask(&db_tx, |responder| DatabaseRequest::CreateProposition {
            match_id: None,
            player_id: None,
            description: "split decision".to_string(),
            odds: 2.0,
            outcome: None,
            responder,
        })
        .await
        .unwrap();
        place(&db_tx, "ana", &prop.id, 60).await;
        place(&db_tx, "zeca", &prop.id, 40).await;

        // stakes are out of the balances while the proposition is open
        assert_eq!(
            balance_of(&db_tx, "ana").await + balance_of(&db_tx, "zeca").await,
            100
        );

        let report = settlement
            .settle_proposition(&prop.id, PropResult::Won)
            .await
            .unwrap();
        let paid: u64 = report.settled.iter().map(|entry| entry.payout).sum();
        assert_eq!(paid, 120 + 80);
        // balances moved by exactly the issued payouts
        assert_eq!(
            balance_of(&db_tx, "ana").await + balance_of(&db_tx, "zeca").await,
            100 + paid
        );
    }
}
