use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use anyhow::bail;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{
    Error, Match, MatchReport, Outcome, PropResult, Proposal, Proposition, SettlementReport, Team,
    Template, Wager,
};

#[derive(Deserialize, Serialize, Debug, PartialEq)]
pub enum Request {
    Login { user: String },
    Register { user: String },
    WhoAmI,
    Standings,
    UpcomingMatches,
    CompletedMatches,
    ActivePropositions { match_id: Option<String> },
    MyWagers,
    PlaceWager { proposition_id: String, stake: u64 },
    SubmitProposal { description: String, odds: f64 },
    // administrator requests below; rejected with Failed(Forbidden) otherwise
    CreateTeam { name: String },
    DeleteTeam { name: String },
    CreatePlayer { name: String, team: String },
    DeletePlayer { id: String },
    CreateMatch { home: String, away: String, kickoff: NaiveDateTime },
    SetMatchLive { match_id: String },
    CreateProposition {
        match_id: Option<String>,
        player_id: Option<String>,
        description: String,
        odds: f64,
        outcome: Option<Outcome>,
    },
    CreateTemplate { category: String, description: String, odds: f64 },
    ListTemplates,
    DeleteTemplate { id: String },
    CreatePropositionFromTemplate {
        template_id: String,
        match_id: Option<String>,
        player_id: Option<String>,
        outcome: Option<Outcome>,
    },
    PendingProposals,
    ReviewProposal { id: String, approve: bool },
    SettleMatch { match_id: String, home_score: u64, away_score: u64 },
    CancelMatch { match_id: String },
    SettleProposition { proposition_id: String, result: PropResult },
    CancelProposition { proposition_id: String },
    UpdateUser { user: String, balance: Option<u64>, is_admin: Option<bool> },
    DeleteUser { user: String },
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub enum Response {
    None,
    SuccessfulLogin { username: String, balance: u64, is_admin: bool },
    WhoAmI(String),
    Standings(Vec<Team>),
    Matches(Vec<Match>),
    Propositions(Vec<Proposition>),
    Templates(Vec<Template>),
    Proposals(Vec<Proposal>),
    Wagers(Vec<Wager>),
    WagerPlaced { balance: u64 },
    Created { id: String },
    PropositionSettled(SettlementReport),
    MatchSettled(MatchReport),
    MatchCancelled { match_id: String, reports: Vec<SettlementReport> },
    Failed(Error),
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub enum Packet {
    RequestPacket(Request),
    ResponsePacket(Response),
    Error,
}

/// One websocket session speaking messagepack-encoded [`Packet`]s.
pub struct Connection {
    socket: tokio_tungstenite::WebSocketStream<TcpStream>,
}

impl Connection {
    pub async fn from_tcp_stream(connection: TcpStream) -> anyhow::Result<Self> {
        let socket = tokio_tungstenite::accept_async(connection).await?;
        Ok(Self { socket })
    }

    pub async fn read(&mut self) -> anyhow::Result<Packet> {
        let message = self
            .socket
            .next()
            .await
            .ok_or(anyhow::anyhow!("connection closed"))??;
        match message {
            Message::Binary(data) => Ok(rmp_serde::from_slice(&data)?),
            _ => bail!("incorrect data type received"),
        }
    }

    pub async fn send(&mut self, data: Packet) -> anyhow::Result<()> {
        let buf = rmp_serde::to_vec(&data)?;
        Ok(self.socket.send(Message::Binary(buf)).await?)
    }
}
