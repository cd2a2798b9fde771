use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use surrealdb::engine::local::{Db, Mem};
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use surrealdb::sql::statements::{BeginStatement, CommitStatement};
use surrealdb::sql::{Id, Thing};
use surrealdb::{Connection, Surreal};

use common::{
    Error, MatchStatus, Outcome, PropResult, ProposalStatus, PropositionStatus, TeamRecord,
    WagerResult, WagerStatus,
};

pub type Result<T> = std::result::Result<T, Error>;

fn db_err(error: surrealdb::Error) -> Error {
    Error::persistence(error)
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Record {
    #[allow(dead_code)]
    pub id: Thing,
}

pub fn user_key(name: &str) -> Thing {
    Thing {
        tb: "user".into(),
        id: Id::String(name.into()),
    }
}

pub fn team_key(name: &str) -> Thing {
    Thing {
        tb: "team".into(),
        id: Id::String(name.into()),
    }
}

pub fn match_key(id: &str) -> Thing {
    Thing {
        tb: "league_match".into(),
        id: Id::String(id.into()),
    }
}

pub fn proposition_key(id: &str) -> Thing {
    Thing {
        tb: "proposition".into(),
        id: Id::String(id.into()),
    }
}

/// One wager per (user, proposition): the record id IS the pair, so a second
/// placement cannot even be keyed.
pub fn wager_key(user: &str, proposition: &str) -> Thing {
    Thing {
        tb: "wager".into(),
        id: Id::String(format!("{user}:{proposition}")),
    }
}

/// The raw text of a record key. `Id`'s `Display` wraps anything that is
/// not a bare identifier in ⟨⟩ brackets, which would leak into every
/// client-facing id and never match a stored key on the way back in.
pub fn raw_id(thing: &Thing) -> String {
    match &thing.id {
        Id::String(key) => key.clone(),
        other => other.to_string(),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbUser {
    pub id: Thing,
    pub name: String,
    pub balance: u64,
    pub is_admin: bool,
}

impl DbUser {
    pub fn new(name: impl Into<String> + Clone, balance: u64, is_admin: bool) -> Self {
        Self {
            id: user_key(&name.clone().into()),
            name: name.into(),
            balance,
            is_admin,
        }
    }
}

impl From<DbUser> for common::User {
    fn from(value: DbUser) -> Self {
        common::User {
            name: value.name,
            balance: value.balance,
            is_admin: value.is_admin,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbTeam {
    pub id: Thing,
    pub name: String,
    pub record: TeamRecord,
}

impl DbTeam {
    pub fn new(name: impl Into<String> + Clone) -> Self {
        Self {
            id: team_key(&name.clone().into()),
            name: name.into(),
            record: TeamRecord::default(),
        }
    }
}

impl From<DbTeam> for common::Team {
    fn from(value: DbTeam) -> Self {
        common::Team {
            name: value.name,
            record: value.record,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbPlayer {
    pub id: Thing,
    pub name: String,
    pub team: Thing,
}

impl DbPlayer {
    pub fn new(name: impl Into<String>, team: Thing) -> Self {
        Self {
            id: Thing {
                tb: "player".into(),
                id: Id::rand(),
            },
            name: name.into(),
            team,
        }
    }
}

impl From<DbPlayer> for common::Player {
    fn from(value: DbPlayer) -> Self {
        common::Player {
            id: raw_id(&value.id),
            name: value.name,
            team: raw_id(&value.team),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbMatch {
    pub id: Thing,
    pub home: Thing,
    pub away: Thing,
    pub kickoff: NaiveDateTime,
    pub status: MatchStatus,
    pub home_score: Option<u64>,
    pub away_score: Option<u64>,
}

impl DbMatch {
    pub fn new(home: Thing, away: Thing, kickoff: NaiveDateTime) -> Self {
        Self {
            id: Thing {
                tb: "league_match".into(),
                id: Id::rand(),
            },
            home,
            away,
            kickoff,
            status: MatchStatus::Upcoming,
            home_score: None,
            away_score: None,
        }
    }

    pub fn score(&self) -> Option<(u64, u64)> {
        self.home_score.zip(self.away_score)
    }
}

impl From<DbMatch> for common::Match {
    fn from(value: DbMatch) -> Self {
        let score = value.score();
        common::Match {
            id: raw_id(&value.id),
            home: raw_id(&value.home),
            away: raw_id(&value.away),
            kickoff: value.kickoff,
            status: value.status,
            score,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbProposition {
    pub id: Thing,
    pub match_ref: Option<Thing>,
    pub player: Option<Thing>,
    pub description: String,
    pub odds: f64,
    pub status: PropositionStatus,
    pub outcome: Option<Outcome>,
    pub result: Option<PropResult>,
}

impl DbProposition {
    pub fn new(
        match_ref: Option<Thing>,
        player: Option<Thing>,
        description: impl Into<String>,
        odds: f64,
        outcome: Option<Outcome>,
    ) -> Self {
        Self {
            id: Thing {
                tb: "proposition".into(),
                id: Id::rand(),
            },
            match_ref,
            player,
            description: description.into(),
            odds,
            status: PropositionStatus::Active,
            outcome,
            result: None,
        }
    }
}

impl From<DbProposition> for common::Proposition {
    fn from(value: DbProposition) -> Self {
        common::Proposition {
            id: raw_id(&value.id),
            match_id: value.match_ref.as_ref().map(raw_id),
            player_id: value.player.as_ref().map(raw_id),
            description: value.description,
            odds: value.odds,
            status: value.status,
            outcome: value.outcome,
            result: value.result,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbTemplate {
    pub id: Thing,
    pub category: String,
    pub description: String,
    pub odds: f64,
}

impl DbTemplate {
    pub fn new(category: impl Into<String>, description: impl Into<String>, odds: f64) -> Self {
        Self {
            id: Thing {
                tb: "template".into(),
                id: Id::rand(),
            },
            category: category.into(),
            description: description.into(),
            odds,
        }
    }
}

impl From<DbTemplate> for common::Template {
    fn from(value: DbTemplate) -> Self {
        common::Template {
            id: raw_id(&value.id),
            category: value.category,
            description: value.description,
            odds: value.odds,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbProposal {
    pub id: Thing,
    pub user: Thing,
    pub description: String,
    pub odds: f64,
    pub status: ProposalStatus,
}

impl DbProposal {
    pub fn new(user: Thing, description: impl Into<String>, odds: f64) -> Self {
        Self {
            id: Thing {
                tb: "proposal".into(),
                id: Id::rand(),
            },
            user,
            description: description.into(),
            odds,
            status: ProposalStatus::Pending,
        }
    }
}

impl From<DbProposal> for common::Proposal {
    fn from(value: DbProposal) -> Self {
        common::Proposal {
            id: raw_id(&value.id),
            user: raw_id(&value.user),
            description: value.description,
            odds: value.odds,
            status: value.status,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbWager {
    pub id: Thing,
    pub user: Thing,
    pub proposition: Thing,
    pub stake: u64,
    pub odds: f64,
    pub status: WagerStatus,
    pub result: Option<WagerResult>,
    pub payout: u64,
}

impl DbWager {
    pub fn new(user: &str, proposition: &str, stake: u64, odds: f64) -> Self {
        Self {
            id: wager_key(user, proposition),
            user: user_key(user),
            proposition: proposition_key(proposition),
            stake,
            odds,
            status: WagerStatus::Active,
            result: None,
            payout: 0,
        }
    }
}

impl From<DbWager> for common::Wager {
    fn from(value: DbWager) -> Self {
        common::Wager {
            id: raw_id(&value.id),
            user: raw_id(&value.user),
            proposition: raw_id(&value.proposition),
            stake: value.stake,
            odds: value.odds,
            status: value.status,
            result: value.result,
            payout: value.payout,
        }
    }
}

/// Typed access to the league state, generic over the surrealdb engine so
/// tests run against `Mem` and the deployed server against a remote
/// instance. Every read hands back an owned snapshot; mutation happens only
/// through the operations below, and multi-row units go through
/// BEGIN/COMMIT transactions.
pub struct DatabaseConnection<C: Connection> {
    connection: Surreal<C>,
}

impl DatabaseConnection<Client> {
    pub async fn connect(address: &str) -> Option<Self> {
        let db = Surreal::new::<Ws>(address).await.ok()?;

        db.signin(Root {
            username: "root",
            password: "root",
        })
        .await
        .ok()?;

        db.use_ns("guimabet").use_db("league").await.ok()?;

        Some(Self { connection: db })
    }
}

impl DatabaseConnection<Db> {
    pub async fn memory() -> surrealdb::Result<Self> {
        let db = Surreal::new::<Mem>(()).await?;
        db.use_ns("guimabet").use_db("league").await?;
        Ok(Self { connection: db })
    }
}

impl<C: Connection> DatabaseConnection<C> {
    // ---- users ----

    pub async fn create_user(
        &mut self,
        name: &str,
        is_admin: bool,
        starting_balance: u64,
    ) -> Result<DbUser> {
        if self.get_user(name).await?.is_some() {
            return Err(Error::duplicate_key("user", name));
        }
        let user = DbUser::new(name, starting_balance, is_admin);
        let _: Option<Record> = self
            .connection
            .create(("user", name))
            .content(&user)
            .await
            .map_err(db_err)?;
        Ok(user)
    }

    pub async fn get_user(&self, name: &str) -> Result<Option<DbUser>> {
        self.connection.select(("user", name)).await.map_err(db_err)
    }

    pub async fn update_user(
        &mut self,
        name: &str,
        balance: Option<u64>,
        is_admin: Option<bool>,
    ) -> Result<DbUser> {
        let mut user = self
            .get_user(name)
            .await?
            .ok_or(Error::not_found("user", name))?;
        if let Some(balance) = balance {
            user.balance = balance;
        }
        if let Some(flag) = is_admin {
            user.is_admin = flag;
        }
        let _: Option<DbUser> = self
            .connection
            .update(&user.id)
            .content(&user)
            .await
            .map_err(db_err)?;
        Ok(user)
    }

    /// Users with wager history are kept for the audit trail; deletion is
    /// rejected while any wager references them.
    pub async fn delete_user(&mut self, name: &str) -> Result<()> {
        let user = self
            .get_user(name)
            .await?
            .ok_or(Error::not_found("user", name))?;
        if !self.wagers_for_user(name).await?.is_empty() {
            return Err(Error::InUse {
                entity: "user".into(),
                id: name.into(),
            });
        }
        let _: Option<DbUser> = self.connection.delete(&user.id).await.map_err(db_err)?;
        Ok(())
    }

    // ---- teams and players ----

    pub async fn create_team(&mut self, name: &str) -> Result<DbTeam> {
        if self.get_team(name).await?.is_some() {
            return Err(Error::duplicate_key("team", name));
        }
        let team = DbTeam::new(name);
        let _: Option<Record> = self
            .connection
            .create(("team", name))
            .content(&team)
            .await
            .map_err(db_err)?;
        Ok(team)
    }

    pub async fn get_team(&self, name: &str) -> Result<Option<DbTeam>> {
        self.connection.select(("team", name)).await.map_err(db_err)
    }

    pub async fn all_teams(&self) -> Result<Vec<DbTeam>> {
        self.connection.select("team").await.map_err(db_err)
    }

    pub async fn update_team(&mut self, team: &DbTeam) -> Result<()> {
        let _: Option<DbTeam> = self
            .connection
            .update(&team.id)
            .content(team)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Removing a team cascades to its players but is rejected while any
    /// match still references it, resolved or not.
    pub async fn delete_team(&mut self, name: &str) -> Result<()> {
        let team = self
            .get_team(name)
            .await?
            .ok_or(Error::not_found("team", name))?;
        let mut response = self
            .connection
            .query("SELECT * FROM league_match WHERE home = $team OR away = $team;")
            .bind(("team", &team.id))
            .await
            .map_err(db_err)?;
        let matches: Vec<DbMatch> = response.take(0).map_err(db_err)?;
        if !matches.is_empty() {
            return Err(Error::InUse {
                entity: "team".into(),
                id: name.into(),
            });
        }
        self.connection
            .query(BeginStatement)
            .query("DELETE player WHERE team = $team;")
            .query("DELETE $team;")
            .query(CommitStatement)
            .bind(("team", &team.id))
            .await
            .map_err(db_err)?
            .check()
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn create_player(&mut self, name: &str, team: &str) -> Result<DbPlayer> {
        let team = self
            .get_team(team)
            .await?
            .ok_or(Error::not_found("team", team))?;
        let player = DbPlayer::new(name, team.id);
        let _: Vec<Record> = self
            .connection
            .create("player")
            .content(&player)
            .await
            .map_err(db_err)?;
        Ok(player)
    }

    pub async fn get_player(&self, id: &str) -> Result<Option<DbPlayer>> {
        self.connection
            .select(("player", id))
            .await
            .map_err(db_err)
    }

    pub async fn delete_player(&mut self, id: &str) -> Result<()> {
        let player = self
            .get_player(id)
            .await?
            .ok_or(Error::not_found("player", id))?;
        let mut response = self
            .connection
            .query("SELECT * FROM proposition WHERE player = $player;")
            .bind(("player", &player.id))
            .await
            .map_err(db_err)?;
        let propositions: Vec<DbProposition> = response.take(0).map_err(db_err)?;
        if !propositions.is_empty() {
            return Err(Error::InUse {
                entity: "player".into(),
                id: id.into(),
            });
        }
        let _: Option<DbPlayer> = self.connection.delete(&player.id).await.map_err(db_err)?;
        Ok(())
    }

    // ---- matches ----

    pub async fn create_match(
        &mut self,
        home: &str,
        away: &str,
        kickoff: NaiveDateTime,
    ) -> Result<DbMatch> {
        if home == away {
            return Err(Error::TeamsMustDiffer);
        }
        let home = self
            .get_team(home)
            .await?
            .ok_or(Error::not_found("team", home))?;
        let away = self
            .get_team(away)
            .await?
            .ok_or(Error::not_found("team", away))?;
        let row = DbMatch::new(home.id, away.id, kickoff);
        let _: Vec<Record> = self
            .connection
            .create("league_match")
            .content(&row)
            .await
            .map_err(db_err)?;
        Ok(row)
    }

    pub async fn get_match(&self, id: &str) -> Result<Option<DbMatch>> {
        self.connection
            .select(("league_match", id))
            .await
            .map_err(db_err)
    }

    pub async fn set_match_live(&mut self, id: &str) -> Result<DbMatch> {
        let mut row = self
            .get_match(id)
            .await?
            .ok_or(Error::not_found("match", id))?;
        if row.status != MatchStatus::Upcoming {
            return Err(Error::BadMatchState {
                id: id.into(),
                status: format!("{:?}", row.status),
            });
        }
        row.status = MatchStatus::Live;
        let _: Option<DbMatch> = self
            .connection
            .update(&row.id)
            .content(&row)
            .await
            .map_err(db_err)?;
        Ok(row)
    }

    pub async fn set_match_status(&mut self, id: &str, status: MatchStatus) -> Result<DbMatch> {
        let mut row = self
            .get_match(id)
            .await?
            .ok_or(Error::not_found("match", id))?;
        row.status = status;
        let _: Option<DbMatch> = self
            .connection
            .update(&row.id)
            .content(&row)
            .await
            .map_err(db_err)?;
        Ok(row)
    }

    pub async fn upcoming_matches(&self) -> Result<Vec<DbMatch>> {
        let mut response = self
            .connection
            .query("SELECT * FROM league_match WHERE status = $upcoming OR status = $live;")
            .bind(("upcoming", MatchStatus::Upcoming))
            .bind(("live", MatchStatus::Live))
            .await
            .map_err(db_err)?;
        let mut rows: Vec<DbMatch> = response.take(0).map_err(db_err)?;
        rows.sort_by_key(|row| row.kickoff);
        Ok(rows)
    }

    pub async fn completed_matches(&self) -> Result<Vec<DbMatch>> {
        let mut response = self
            .connection
            .query("SELECT * FROM league_match WHERE status = $played;")
            .bind(("played", MatchStatus::Played))
            .await
            .map_err(db_err)?;
        let mut rows: Vec<DbMatch> = response.take(0).map_err(db_err)?;
        rows.sort_by_key(|row| row.kickoff);
        Ok(rows)
    }

    /// Store the corrected rows for one result entry: both team records and
    /// the match row land together or not at all, so the reversal half of a
    /// correction is never visible on its own.
    pub async fn commit_match_result(
        &mut self,
        match_row: &DbMatch,
        home: &DbTeam,
        away: &DbTeam,
    ) -> Result<()> {
        self.connection
            .query(BeginStatement)
            .query("UPDATE $match_id CONTENT $match_row;")
            .query("UPDATE $home_id CONTENT $home_row;")
            .query("UPDATE $away_id CONTENT $away_row;")
            .query(CommitStatement)
            .bind(("match_id", &match_row.id))
            .bind(("match_row", match_row))
            .bind(("home_id", &home.id))
            .bind(("home_row", home))
            .bind(("away_id", &away.id))
            .bind(("away_row", away))
            .await
            .map_err(db_err)?
            .check()
            .map_err(db_err)?;
        Ok(())
    }

    // ---- proposition catalog ----

    pub async fn create_proposition(
        &mut self,
        match_id: Option<&str>,
        player_id: Option<&str>,
        description: &str,
        odds: f64,
        outcome: Option<Outcome>,
    ) -> Result<DbProposition> {
        if odds <= 1.0 {
            return Err(Error::InvalidOdds { odds });
        }
        let match_ref = match match_id {
            Some(id) => Some(
                self.get_match(id)
                    .await?
                    .ok_or(Error::not_found("match", id))?
                    .id,
            ),
            None => None,
        };
        let player = match player_id {
            Some(id) => Some(
                self.get_player(id)
                    .await?
                    .ok_or(Error::not_found("player", id))?
                    .id,
            ),
            None => None,
        };
        let proposition = DbProposition::new(match_ref, player, description, odds, outcome);
        let _: Vec<Record> = self
            .connection
            .create("proposition")
            .content(&proposition)
            .await
            .map_err(db_err)?;
        Ok(proposition)
    }

    pub async fn get_proposition(&self, id: &str) -> Result<Option<DbProposition>> {
        self.connection
            .select(("proposition", id))
            .await
            .map_err(db_err)
    }

    pub async fn active_propositions(
        &self,
        match_filter: Option<&str>,
    ) -> Result<Vec<DbProposition>> {
        let mut response = match match_filter {
            Some(id) => self
                .connection
                .query("SELECT * FROM proposition WHERE status = $active AND match_ref = $match_id;")
                .bind(("active", PropositionStatus::Active))
                .bind(("match_id", match_key(id)))
                .await
                .map_err(db_err)?,
            None => self
                .connection
                .query("SELECT * FROM proposition WHERE status = $active;")
                .bind(("active", PropositionStatus::Active))
                .await
                .map_err(db_err)?,
        };
        response.take(0).map_err(db_err)
    }

    pub async fn propositions_for_match(&self, match_id: &str) -> Result<Vec<DbProposition>> {
        let mut response = self
            .connection
            .query("SELECT * FROM proposition WHERE match_ref = $match_id;")
            .bind(("match_id", match_key(match_id)))
            .await
            .map_err(db_err)?;
        response.take(0).map_err(db_err)
    }

    pub async fn mark_proposition(
        &mut self,
        id: &str,
        status: PropositionStatus,
        result: Option<PropResult>,
    ) -> Result<DbProposition> {
        let mut proposition = self
            .get_proposition(id)
            .await?
            .ok_or(Error::not_found("proposition", id))?;
        proposition.status = status;
        proposition.result = result;
        let _: Option<DbProposition> = self
            .connection
            .update(&proposition.id)
            .content(&proposition)
            .await
            .map_err(db_err)?;
        Ok(proposition)
    }

    // ---- templates and proposals ----

    pub async fn create_template(
        &mut self,
        category: &str,
        description: &str,
        odds: f64,
    ) -> Result<DbTemplate> {
        if odds <= 1.0 {
            return Err(Error::InvalidOdds { odds });
        }
        let template = DbTemplate::new(category, description, odds);
        let _: Vec<Record> = self
            .connection
            .create("template")
            .content(&template)
            .await
            .map_err(db_err)?;
        Ok(template)
    }

    /// The whole catalog of reusable entries, grouped by category.
    pub async fn templates(&self) -> Result<Vec<DbTemplate>> {
        let mut rows: Vec<DbTemplate> = self.connection.select("template").await.map_err(db_err)?;
        rows.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then(a.description.cmp(&b.description))
        });
        Ok(rows)
    }

    pub async fn get_template(&self, id: &str) -> Result<Option<DbTemplate>> {
        self.connection
            .select(("template", id))
            .await
            .map_err(db_err)
    }

    pub async fn delete_template(&mut self, id: &str) -> Result<()> {
        let template = self
            .get_template(id)
            .await?
            .ok_or(Error::not_found("template", id))?;
        let _: Option<DbTemplate> = self.connection.delete(&template.id).await.map_err(db_err)?;
        Ok(())
    }

    /// Stamp a proposition out of a template; description and odds come
    /// from the catalog entry, the match/player/outcome pins come from the
    /// caller.
    pub async fn proposition_from_template(
        &mut self,
        template_id: &str,
        match_id: Option<&str>,
        player_id: Option<&str>,
        outcome: Option<Outcome>,
    ) -> Result<DbProposition> {
        let template = self
            .get_template(template_id)
            .await?
            .ok_or(Error::not_found("template", template_id))?;
        self.create_proposition(
            match_id,
            player_id,
            &template.description,
            template.odds,
            outcome,
        )
        .await
    }

    pub async fn submit_proposal(
        &mut self,
        user: &str,
        description: &str,
        odds: f64,
    ) -> Result<DbProposal> {
        if odds <= 1.0 {
            return Err(Error::InvalidOdds { odds });
        }
        let user_row = self
            .get_user(user)
            .await?
            .ok_or(Error::not_found("user", user))?;
        let proposal = DbProposal::new(user_row.id, description, odds);
        let _: Vec<Record> = self
            .connection
            .create("proposal")
            .content(&proposal)
            .await
            .map_err(db_err)?;
        Ok(proposal)
    }

    pub async fn get_proposal(&self, id: &str) -> Result<Option<DbProposal>> {
        self.connection
            .select(("proposal", id))
            .await
            .map_err(db_err)
    }

    pub async fn pending_proposals(&self) -> Result<Vec<DbProposal>> {
        let mut response = self
            .connection
            .query("SELECT * FROM proposal WHERE status = $pending;")
            .bind(("pending", ProposalStatus::Pending))
            .await
            .map_err(db_err)?;
        response.take(0).map_err(db_err)
    }

    /// Rule on a proposal. Approval opens a live proposition with the
    /// proposed odds; rejection just closes the proposal. Either way it
    /// leaves `Pending` exactly once.
    pub async fn review_proposal(
        &mut self,
        id: &str,
        approve: bool,
    ) -> Result<Option<DbProposition>> {
        let mut proposal = self
            .get_proposal(id)
            .await?
            .ok_or(Error::not_found("proposal", id))?;
        if proposal.status != ProposalStatus::Pending {
            return Err(Error::AlreadyReviewed { id: id.into() });
        }
        let proposition = if approve {
            Some(
                self.create_proposition(None, None, &proposal.description, proposal.odds, None)
                    .await?,
            )
        } else {
            None
        };
        proposal.status = if approve {
            ProposalStatus::Approved
        } else {
            ProposalStatus::Rejected
        };
        let _: Option<DbProposal> = self
            .connection
            .update(&proposal.id)
            .content(&proposal)
            .await
            .map_err(db_err)?;
        Ok(proposition)
    }

    // ---- wager ledger ----

    /// Place a stake against an active proposition. The balance debit and
    /// the wager row commit as one transaction; the checks run first, under
    /// the store's single mutating worker, so nothing can interleave between
    /// a check and the write.
    pub async fn place_wager(
        &mut self,
        user: &str,
        proposition: &str,
        stake: u64,
        min_stake: u64,
    ) -> Result<DbWager> {
        let prop = self
            .get_proposition(proposition)
            .await?
            .ok_or(Error::not_found("proposition", proposition))?;
        if prop.status != PropositionStatus::Active {
            return Err(Error::PropositionNotActive {
                id: proposition.into(),
            });
        }
        if stake == 0 || stake < min_stake {
            return Err(Error::InvalidStake {
                stake,
                minimum: min_stake.max(1),
            });
        }
        let user_row = self
            .get_user(user)
            .await?
            .ok_or(Error::not_found("user", user))?;
        let existing: Option<DbWager> = self
            .connection
            .select(&wager_key(user, proposition))
            .await
            .map_err(db_err)?;
        if existing.is_some() {
            return Err(Error::DuplicateWager {
                user: user.into(),
                proposition: proposition.into(),
            });
        }
        if stake > user_row.balance {
            return Err(Error::InsufficientBalance {
                stake,
                balance: user_row.balance,
            });
        }
        let wager = DbWager::new(user, proposition, stake, prop.odds);
        self.connection
            .query(BeginStatement)
            .query("UPDATE $user SET balance -= $stake;")
            .query("CREATE $id CONTENT $wager;")
            .query(CommitStatement)
            .bind(("user", &user_row.id))
            .bind(("stake", stake))
            .bind(("id", &wager.id))
            .bind(("wager", &wager))
            .await
            .map_err(db_err)?
            .check()
            .map_err(db_err)?;
        Ok(wager)
    }

    pub async fn wagers_for_user(&self, name: &str) -> Result<Vec<DbWager>> {
        let mut response = self
            .connection
            .query("SELECT * FROM wager WHERE user = $user_id;")
            .bind(("user_id", user_key(name)))
            .await
            .map_err(db_err)?;
        response.take(0).map_err(db_err)
    }

    pub async fn wagers_for_proposition(&self, id: &str) -> Result<Vec<DbWager>> {
        let mut response = self
            .connection
            .query("SELECT * FROM wager WHERE proposition = $proposition_id;")
            .bind(("proposition_id", proposition_key(id)))
            .await
            .map_err(db_err)?;
        response.take(0).map_err(db_err)
    }

    /// Resolve one wager: the user credit (payout, or the stake refund) and
    /// the wager row update commit together.
    pub async fn settle_wager(
        &mut self,
        wager: &DbWager,
        result: WagerResult,
        payout: u64,
    ) -> Result<()> {
        let mut updated = wager.clone();
        updated.status = match result {
            WagerResult::Refunded => WagerStatus::Cancelled,
            _ => WagerStatus::Completed,
        };
        updated.result = Some(result);
        updated.payout = payout;
        self.connection
            .query(BeginStatement)
            .query("UPDATE $user SET balance += $payout;")
            .query("UPDATE $wager_id CONTENT $row;")
            .query(CommitStatement)
            .bind(("user", &wager.user))
            .bind(("payout", payout))
            .bind(("wager_id", &wager.id))
            .bind(("row", &updated))
            .await
            .map_err(db_err)?
            .check()
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    async fn store() -> DatabaseConnection<Db> {
        DatabaseConnection::memory().await.unwrap()
    }

    fn kickoff() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 9, 5)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_usernames_and_team_names_are_rejected() {
        let mut db = store().await;
        db.create_user("ana", false, 100).await.unwrap();
        assert_eq!(
            db.create_user("ana", false, 100).await.unwrap_err(),
            Error::duplicate_key("user", "ana")
        );
        db.create_team("meninos").await.unwrap();
        assert_eq!(
            db.create_team("meninos").await.unwrap_err(),
            Error::duplicate_key("team", "meninos")
        );
    }

    #[tokio::test]
    async fn match_creation_requires_two_distinct_known_teams() {
        let mut db = store().await;
        db.create_team("a").await.unwrap();
        assert_eq!(
            db.create_match("a", "a", kickoff()).await.unwrap_err(),
            Error::TeamsMustDiffer
        );
        assert_eq!(
            db.create_match("a", "ghosts", kickoff()).await.unwrap_err(),
            Error::not_found("team", "ghosts")
        );
    }

    #[tokio::test]
    async fn proposition_odds_must_exceed_one() {
        let mut db = store().await;
        assert_eq!(
            db.create_proposition(None, None, "anything", 1.0, None)
                .await
                .unwrap_err(),
            Error::InvalidOdds { odds: 1.0 }
        );
        let prop = db
            .create_proposition(None, None, "standalone", 3.5, None)
            .await
            .unwrap();
        assert_eq!(prop.status, PropositionStatus::Active);
    }

    #[tokio::test]
    async fn placing_a_wager_debits_the_balance_and_captures_odds() {
        let mut db = store().await;
        db.create_user("ana", false, 100).await.unwrap();
        let prop = db
            .create_proposition(None, None, "ana's pick", 2.5, None)
            .await
            .unwrap();
        let prop_id = prop.id.id.to_string();

        let wager = db.place_wager("ana", &prop_id, 40, 1).await.unwrap();
        assert_eq!(wager.stake, 40);
        assert_eq!(wager.odds, 2.5);
        assert_eq!(wager.status, WagerStatus::Active);
        assert_eq!(db.get_user("ana").await.unwrap().unwrap().balance, 60);
    }

    #[tokio::test]
    async fn wager_rejections_leave_the_balance_untouched() {
        let mut db = store().await;
        db.create_user("zeca", false, 5).await.unwrap();
        let prop = db
            .create_proposition(None, None, "longshot", 4.0, None)
            .await
            .unwrap();
        let prop_id = prop.id.id.to_string();

        assert_eq!(
            db.place_wager("zeca", &prop_id, 10, 1).await.unwrap_err(),
            Error::InsufficientBalance {
                stake: 10,
                balance: 5
            }
        );
        assert_eq!(
            db.place_wager("zeca", &prop_id, 0, 1).await.unwrap_err(),
            Error::InvalidStake { stake: 0, minimum: 1 }
        );
        assert_eq!(db.get_user("zeca").await.unwrap().unwrap().balance, 5);
        assert!(db.wagers_for_user("zeca").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_second_wager_on_the_same_proposition_is_rejected() {
        let mut db = store().await;
        db.create_user("ana", false, 100).await.unwrap();
        let prop = db
            .create_proposition(None, None, "one shot only", 2.0, None)
            .await
            .unwrap();
        let prop_id = prop.id.id.to_string();

        db.place_wager("ana", &prop_id, 10, 1).await.unwrap();
        assert_eq!(
            db.place_wager("ana", &prop_id, 10, 1).await.unwrap_err(),
            Error::DuplicateWager {
                user: "ana".into(),
                proposition: prop_id.clone()
            }
        );
        assert_eq!(db.get_user("ana").await.unwrap().unwrap().balance, 90);
    }

    #[tokio::test]
    async fn wagers_against_settled_propositions_are_rejected() {
        let mut db = store().await;
        db.create_user("ana", false, 100).await.unwrap();
        let prop = db
            .create_proposition(None, None, "closed", 2.0, None)
            .await
            .unwrap();
        let prop_id = prop.id.id.to_string();
        db.mark_proposition(&prop_id, PropositionStatus::Completed, Some(PropResult::Lost))
            .await
            .unwrap();

        assert_eq!(
            db.place_wager("ana", &prop_id, 10, 1).await.unwrap_err(),
            Error::PropositionNotActive { id: prop_id }
        );
    }

    #[tokio::test]
    async fn users_with_wagers_cannot_be_deleted() {
        let mut db = store().await;
        db.create_user("ana", false, 100).await.unwrap();
        let prop = db
            .create_proposition(None, None, "pending", 2.0, None)
            .await
            .unwrap();
        db.place_wager("ana", &prop.id.id.to_string(), 10, 1)
            .await
            .unwrap();

        assert_eq!(
            db.delete_user("ana").await.unwrap_err(),
            Error::InUse {
                entity: "user".into(),
                id: "ana".into()
            }
        );
        assert!(db.get_user("ana").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deleting_a_team_cascades_players_but_not_matches() {
        let mut db = store().await;
        db.create_team("furacao").await.unwrap();
        db.create_team("tormenta").await.unwrap();
        db.create_player("beto", "furacao").await.unwrap();
        db.create_match("furacao", "tormenta", kickoff()).await.unwrap();

        assert_eq!(
            db.delete_team("furacao").await.unwrap_err(),
            Error::InUse {
                entity: "team".into(),
                id: "furacao".into()
            }
        );

        // a team without matches goes away together with its players
        let mut db = store().await;
        db.create_team("furacao").await.unwrap();
        let player_id = db
            .create_player("beto", "furacao")
            .await
            .unwrap()
            .id
            .id
            .to_string();
        db.delete_team("furacao").await.unwrap();
        assert!(db.get_player(&player_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn client_facing_ids_carry_the_raw_key_text() {
        let mut db = store().await;
        db.create_user("ana maria", false, 100).await.unwrap();
        db.create_team("alfa beta").await.unwrap();
        db.create_team("gama delta").await.unwrap();
        let row = db
            .create_match("alfa beta", "gama delta", kickoff())
            .await
            .unwrap();

        let visible = common::Match::from(row);
        assert_eq!(visible.home, "alfa beta");
        assert_eq!(visible.away, "gama delta");

        let prop = db
            .create_proposition(None, None, "spaced", 2.0, None)
            .await
            .unwrap();
        let prop_id = raw_id(&prop.id);
        db.place_wager("ana maria", &prop_id, 10, 1).await.unwrap();
        let wager = common::Wager::from(db.wagers_for_user("ana maria").await.unwrap().remove(0));
        assert_eq!(wager.user, "ana maria");
        assert_eq!(wager.id, format!("ana maria:{prop_id}"));
    }

    #[tokio::test]
    async fn templates_stamp_propositions_and_group_by_category() {
        let mut db = store().await;
        assert_eq!(
            db.create_template("discipline", "card in first half", 1.0)
                .await
                .unwrap_err(),
            Error::InvalidOdds { odds: 1.0 }
        );

        db.create_template("goals", "both halves scored", 2.2)
            .await
            .unwrap();
        let template = db
            .create_template("discipline", "card in first half", 3.0)
            .await
            .unwrap();
        let catalog = db.templates().await.unwrap();
        assert_eq!(catalog[0].category, "discipline");
        assert_eq!(catalog[1].category, "goals");

        let prop = db
            .proposition_from_template(&raw_id(&template.id), None, None, None)
            .await
            .unwrap();
        assert_eq!(prop.description, "card in first half");
        assert_eq!(prop.odds, 3.0);
        assert_eq!(prop.status, PropositionStatus::Active);
    }

    #[tokio::test]
    async fn proposals_open_propositions_only_when_approved() {
        let mut db = store().await;
        db.create_user("ana", false, 100).await.unwrap();
        let approved = db
            .submit_proposal("ana", "keeper scores", 9.0)
            .await
            .unwrap();
        let rejected = db
            .submit_proposal("ana", "match abandoned", 50.0)
            .await
            .unwrap();
        assert_eq!(db.pending_proposals().await.unwrap().len(), 2);

        let prop = db
            .review_proposal(&raw_id(&approved.id), true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prop.description, "keeper scores");
        assert_eq!(prop.odds, 9.0);

        assert!(db
            .review_proposal(&raw_id(&rejected.id), false)
            .await
            .unwrap()
            .is_none());
        assert!(db.pending_proposals().await.unwrap().is_empty());
        assert_eq!(db.active_propositions(None).await.unwrap().len(), 1);

        // a ruling is final
        assert_eq!(
            db.review_proposal(&raw_id(&approved.id), false)
                .await
                .unwrap_err(),
            Error::AlreadyReviewed {
                id: raw_id(&approved.id)
            }
        );
    }

    #[tokio::test]
    async fn settle_wager_credits_and_marks_in_one_step() {
        let mut db = store().await;
        db.create_user("ana", false, 100).await.unwrap();
        let prop = db
            .create_proposition(None, None, "winner", 2.5, None)
            .await
            .unwrap();
        let prop_id = prop.id.id.to_string();
        let wager = db.place_wager("ana", &prop_id, 50, 1).await.unwrap();

        db.settle_wager(&wager, WagerResult::Won, common::payout_for(50, 2.5))
            .await
            .unwrap();

        assert_eq!(db.get_user("ana").await.unwrap().unwrap().balance, 175);
        let stored = &db.wagers_for_user("ana").await.unwrap()[0];
        assert_eq!(stored.status, WagerStatus::Completed);
        assert_eq!(stored.result, Some(WagerResult::Won));
        assert_eq!(stored.payout, 125);
    }
}
