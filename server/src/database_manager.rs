//! The store worker. Every read and every mutation funnels through one
//! `DatabaseManager` task, so dependent read-then-write sequences (balance
//! check before a debit, wager scans during settlement) can never interleave
//! with another mutation.

use chrono::NaiveDateTime;
use surrealdb::Connection;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::config::StoreConfig;
use crate::database::{DatabaseConnection, DbMatch, DbProposition, DbTeam, DbUser, DbWager};
use crate::standings;
use common::{Error, MatchStatus, Outcome, PropResult, PropositionStatus, WagerResult};

pub type Responder<T> = oneshot::Sender<Result<T, Error>>;

/// Send a request built around a fresh oneshot responder and wait for the
/// answer. Worker death surfaces as a persistence error, never a panic.
pub async fn ask<R, T>(
    tx: &mpsc::Sender<R>,
    make: impl FnOnce(Responder<T>) -> R,
) -> Result<T, Error> {
    let (resp_tx, resp_rx) = oneshot::channel();
    tx.send(make(resp_tx))
        .await
        .map_err(|_| Error::persistence("store worker is gone"))?;
    resp_rx
        .await
        .map_err(|_| Error::persistence("store worker dropped the request"))?
}

pub enum DatabaseRequest {
    RegisterUser {
        name: String,
        is_admin: bool,
        responder: Responder<common::User>,
    },
    GetUser {
        name: String,
        responder: Responder<Option<DbUser>>,
    },
    UpdateUser {
        name: String,
        balance: Option<u64>,
        is_admin: Option<bool>,
        responder: Responder<common::User>,
    },
    DeleteUser {
        name: String,
        responder: Responder<()>,
    },
    CreateTeam {
        name: String,
        responder: Responder<common::Team>,
    },
    GetTeam {
        name: String,
        responder: Responder<Option<DbTeam>>,
    },
    DeleteTeam {
        name: String,
        responder: Responder<()>,
    },
    Standings {
        responder: Responder<Vec<common::Team>>,
    },
    CreatePlayer {
        name: String,
        team: String,
        responder: Responder<common::Player>,
    },
    DeletePlayer {
        id: String,
        responder: Responder<()>,
    },
    CreateMatch {
        home: String,
        away: String,
        kickoff: NaiveDateTime,
        responder: Responder<common::Match>,
    },
    GetMatch {
        id: String,
        responder: Responder<Option<DbMatch>>,
    },
    SetMatchLive {
        id: String,
        responder: Responder<common::Match>,
    },
    SetMatchStatus {
        id: String,
        status: MatchStatus,
        responder: Responder<()>,
    },
    UpcomingMatches {
        responder: Responder<Vec<common::Match>>,
    },
    CompletedMatches {
        responder: Responder<Vec<common::Match>>,
    },
    CommitMatchResult {
        match_row: DbMatch,
        home: DbTeam,
        away: DbTeam,
        responder: Responder<()>,
    },
    CreateProposition {
        match_id: Option<String>,
        player_id: Option<String>,
        description: String,
        odds: f64,
        outcome: Option<Outcome>,
        responder: Responder<common::Proposition>,
    },
    GetProposition {
        id: String,
        responder: Responder<Option<DbProposition>>,
    },
    ActivePropositions {
        match_id: Option<String>,
        responder: Responder<Vec<common::Proposition>>,
    },
    PropositionsForMatch {
        match_id: String,
        responder: Responder<Vec<DbProposition>>,
    },
    MarkProposition {
        id: String,
        status: PropositionStatus,
        result: Option<PropResult>,
        responder: Responder<()>,
    },
    CreateTemplate {
        category: String,
        description: String,
        odds: f64,
        responder: Responder<common::Template>,
    },
    Templates {
        responder: Responder<Vec<common::Template>>,
    },
    DeleteTemplate {
        id: String,
        responder: Responder<()>,
    },
    PropositionFromTemplate {
        template_id: String,
        match_id: Option<String>,
        player_id: Option<String>,
        outcome: Option<Outcome>,
        responder: Responder<common::Proposition>,
    },
    SubmitProposal {
        user: String,
        description: String,
        odds: f64,
        responder: Responder<common::Proposal>,
    },
    PendingProposals {
        responder: Responder<Vec<common::Proposal>>,
    },
    ReviewProposal {
        id: String,
        approve: bool,
        responder: Responder<Option<common::Proposition>>,
    },
    PlaceWager {
        user: String,
        proposition: String,
        stake: u64,
        responder: Responder<common::Wager>,
    },
    WagersForUser {
        name: String,
        responder: Responder<Vec<common::Wager>>,
    },
    WagersForProposition {
        id: String,
        responder: Responder<Vec<DbWager>>,
    },
    SettleWager {
        wager: DbWager,
        result: WagerResult,
        payout: u64,
        responder: Responder<()>,
    },
}

pub struct DatabaseManager<Conn: Connection> {
    db_connection: DatabaseConnection<Conn>,
    work_queue: mpsc::Receiver<DatabaseRequest>,
    store: StoreConfig,
}

impl<Conn: Connection> DatabaseManager<Conn> {
    pub fn new(
        db_connection: DatabaseConnection<Conn>,
        work_queue: mpsc::Receiver<DatabaseRequest>,
        store: StoreConfig,
    ) -> Self {
        Self {
            db_connection,
            work_queue,
            store,
        }
    }

    pub async fn manage(&mut self) {
        while let Some(request) = self.work_queue.recv().await {
            match request {
                DatabaseRequest::RegisterUser {
                    name,
                    is_admin,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .create_user(&name, is_admin, self.store.starting_balance)
                        .await
                        .map(common::User::from);
                    if resp.is_ok() {
                        info!(user = %name, "registered");
                    }
                    let _ = responder.send(resp);
                }
                DatabaseRequest::GetUser { name, responder } => {
                    let _ = responder.send(self.db_connection.get_user(&name).await);
                }
                DatabaseRequest::UpdateUser {
                    name,
                    balance,
                    is_admin,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .update_user(&name, balance, is_admin)
                        .await
                        .map(common::User::from);
                    let _ = responder.send(resp);
                }
                DatabaseRequest::DeleteUser { name, responder } => {
                    let _ = responder.send(self.db_connection.delete_user(&name).await);
                }
                DatabaseRequest::CreateTeam { name, responder } => {
                    let resp = self
                        .db_connection
                        .create_team(&name)
                        .await
                        .map(common::Team::from);
                    let _ = responder.send(resp);
                }
                DatabaseRequest::GetTeam { name, responder } => {
                    let _ = responder.send(self.db_connection.get_team(&name).await);
                }
                DatabaseRequest::DeleteTeam { name, responder } => {
                    let _ = responder.send(self.db_connection.delete_team(&name).await);
                }
                DatabaseRequest::Standings { responder } => {
                    let resp = self.db_connection.all_teams().await.map(|teams| {
                        let mut table: Vec<common::Team> =
                            teams.into_iter().map(common::Team::from).collect();
                        standings::sort_standings(&mut table);
                        table
                    });
                    let _ = responder.send(resp);
                }
                DatabaseRequest::CreatePlayer {
                    name,
                    team,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .create_player(&name, &team)
                        .await
                        .map(common::Player::from);
                    let _ = responder.send(resp);
                }
                DatabaseRequest::DeletePlayer { id, responder } => {
                    let _ = responder.send(self.db_connection.delete_player(&id).await);
                }
                DatabaseRequest::CreateMatch {
                    home,
                    away,
                    kickoff,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .create_match(&home, &away, kickoff)
                        .await
                        .map(common::Match::from);
                    let _ = responder.send(resp);
                }
                DatabaseRequest::GetMatch { id, responder } => {
                    let _ = responder.send(self.db_connection.get_match(&id).await);
                }
                DatabaseRequest::SetMatchLive { id, responder } => {
                    let resp = self
                        .db_connection
                        .set_match_live(&id)
                        .await
                        .map(common::Match::from);
                    let _ = responder.send(resp);
                }
                DatabaseRequest::SetMatchStatus {
                    id,
                    status,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .set_match_status(&id, status)
                        .await
                        .map(|_| ());
                    let _ = responder.send(resp);
                }
                DatabaseRequest::UpcomingMatches { responder } => {
                    let resp = self
                        .db_connection
                        .upcoming_matches()
                        .await
                        .map(|rows| rows.into_iter().map(common::Match::from).collect());
                    let _ = responder.send(resp);
                }
                DatabaseRequest::CompletedMatches { responder } => {
                    let resp = self
                        .db_connection
                        .completed_matches()
                        .await
                        .map(|rows| rows.into_iter().map(common::Match::from).collect());
                    let _ = responder.send(resp);
                }
                DatabaseRequest::CommitMatchResult {
                    match_row,
                    home,
                    away,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .commit_match_result(&match_row, &home, &away)
                        .await;
                    let _ = responder.send(resp);
                }
                DatabaseRequest::CreateProposition {
                    match_id,
                    player_id,
                    description,
                    odds,
                    outcome,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .create_proposition(
                            match_id.as_deref(),
                            player_id.as_deref(),
                            &description,
                            odds,
                            outcome,
                        )
                        .await
                        .map(common::Proposition::from);
                    let _ = responder.send(resp);
                }
                DatabaseRequest::GetProposition { id, responder } => {
                    let _ = responder.send(self.db_connection.get_proposition(&id).await);
                }
                DatabaseRequest::ActivePropositions {
                    match_id,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .active_propositions(match_id.as_deref())
                        .await
                        .map(|props| props.into_iter().map(common::Proposition::from).collect());
                    let _ = responder.send(resp);
                }
                DatabaseRequest::PropositionsForMatch {
                    match_id,
                    responder,
                } => {
                    let _ =
                        responder.send(self.db_connection.propositions_for_match(&match_id).await);
                }
                DatabaseRequest::MarkProposition {
                    id,
                    status,
                    result,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .mark_proposition(&id, status, result)
                        .await
                        .map(|_| ());
                    let _ = responder.send(resp);
                }
                DatabaseRequest::CreateTemplate {
                    category,
                    description,
                    odds,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .create_template(&category, &description, odds)
                        .await
                        .map(common::Template::from);
                    let _ = responder.send(resp);
                }
                DatabaseRequest::Templates { responder } => {
                    let resp = self
                        .db_connection
                        .templates()
                        .await
                        .map(|rows| rows.into_iter().map(common::Template::from).collect());
                    let _ = responder.send(resp);
                }
                DatabaseRequest::DeleteTemplate { id, responder } => {
                    let _ = responder.send(self.db_connection.delete_template(&id).await);
                }
                DatabaseRequest::PropositionFromTemplate {
                    template_id,
                    match_id,
                    player_id,
                    outcome,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .proposition_from_template(
                            &template_id,
                            match_id.as_deref(),
                            player_id.as_deref(),
                            outcome,
                        )
                        .await
                        .map(common::Proposition::from);
                    let _ = responder.send(resp);
                }
                DatabaseRequest::SubmitProposal {
                    user,
                    description,
                    odds,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .submit_proposal(&user, &description, odds)
                        .await
                        .map(common::Proposal::from);
                    if resp.is_ok() {
                        info!(user = %user, "proposal submitted");
                    }
                    let _ = responder.send(resp);
                }
                DatabaseRequest::PendingProposals { responder } => {
                    let resp = self
                        .db_connection
                        .pending_proposals()
                        .await
                        .map(|rows| rows.into_iter().map(common::Proposal::from).collect());
                    let _ = responder.send(resp);
                }
                DatabaseRequest::ReviewProposal {
                    id,
                    approve,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .review_proposal(&id, approve)
                        .await
                        .map(|prop| prop.map(common::Proposition::from));
                    let _ = responder.send(resp);
                }
                DatabaseRequest::PlaceWager {
                    user,
                    proposition,
                    stake,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .place_wager(&user, &proposition, stake, self.store.min_stake)
                        .await
                        .map(common::Wager::from);
                    if resp.is_ok() {
                        info!(user = %user, proposition = %proposition, stake, "wager placed");
                    }
                    let _ = responder.send(resp);
                }
                DatabaseRequest::WagersForUser { name, responder } => {
                    let resp = self
                        .db_connection
                        .wagers_for_user(&name)
                        .await
                        .map(|wagers| wagers.into_iter().map(common::Wager::from).collect());
                    let _ = responder.send(resp);
                }
                DatabaseRequest::WagersForProposition { id, responder } => {
                    let _ = responder.send(self.db_connection.wagers_for_proposition(&id).await);
                }
                DatabaseRequest::SettleWager {
                    wager,
                    result,
                    payout,
                    responder,
                } => {
                    let resp = self.db_connection.settle_wager(&wager, result, payout).await;
                    let _ = responder.send(resp);
                }
            }
        }
    }
}
