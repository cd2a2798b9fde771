//! Websocket front door: accepts connections, runs the login handshake and
//! turns each request packet into store or settlement work. All domain
//! failures travel back as `Response::Failed`; `Packet::Error` is reserved
//! for protocol-level breakage.

use anyhow::{anyhow, bail};
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::database_manager::{ask, DatabaseRequest};
use crate::settlement::SettlementRequest;
use common::network::{Connection, Packet, Request, Response};
use common::Error;

#[derive(Clone)]
struct Session {
    username: String,
    is_admin: bool,
}

pub async fn handle_listen_server(
    bind_addr: String,
    db_tx: mpsc::Sender<DatabaseRequest>,
    settlement_tx: mpsc::Sender<SettlementRequest>,
) {
    let listener = TcpListener::bind(&bind_addr).await.unwrap();
    info!(%bind_addr, "listening");

    loop {
        // transient accept failures (fd exhaustion etc.) must not kill the listener
        let (connection, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(%error, "accept failed");
                continue;
            }
        };
        let tx = db_tx.clone();
        let settle_tx = settlement_tx.clone();

        tokio::spawn(async move {
            let connection = match Connection::from_tcp_stream(connection).await {
                Ok(connection) => connection,
                Err(error) => {
                    warn!(%peer, %error, "websocket handshake failed");
                    return;
                }
            };
            handle_connection(connection, tx, settle_tx).await;
        });
    }
}

async fn handle_connection(
    mut connection: Connection,
    db_tx: mpsc::Sender<DatabaseRequest>,
    settlement_tx: mpsc::Sender<SettlementRequest>,
) {
    let session = handle_login(&mut connection, &db_tx).await;
    if let Ok(session) = session {
        match handle_client(session, &mut connection, db_tx, settlement_tx).await {
            Ok(()) => {}
            Err(_) => {
                connection.send(Packet::Error).await.ok();
            }
        }
    } else {
        connection.send(Packet::Error).await.ok();
    }
}

async fn handle_login(
    connection: &mut Connection,
    db_tx: &mpsc::Sender<DatabaseRequest>,
) -> anyhow::Result<Session> {
    let packet = connection.read().await?;
    if let Packet::RequestPacket(request) = packet {
        match request {
            Request::Login { user } => {
                let found = ask(db_tx, |responder| DatabaseRequest::GetUser {
                    name: user.clone(),
                    responder,
                })
                .await;
                match found {
                    Ok(Some(user)) => {
                        connection
                            .send(Packet::ResponsePacket(Response::SuccessfulLogin {
                                username: user.name.clone(),
                                balance: user.balance,
                                is_admin: user.is_admin,
                            }))
                            .await?;
                        Ok(Session {
                            username: user.name,
                            is_admin: user.is_admin,
                        })
                    }
                    Ok(None) => {
                        connection
                            .send(Packet::ResponsePacket(Response::Failed(Error::not_found(
                                "user", &user,
                            ))))
                            .await?;
                        bail!("login for unknown user {user}");
                    }
                    Err(error) => {
                        connection
                            .send(Packet::ResponsePacket(Response::Failed(error.clone())))
                            .await?;
                        Err(error.into())
                    }
                }
            }
            Request::Register { user } => {
                let created = ask(db_tx, |responder| DatabaseRequest::RegisterUser {
                    name: user.clone(),
                    is_admin: false,
                    responder,
                })
                .await;
                match created {
                    Ok(user) => {
                        connection
                            .send(Packet::ResponsePacket(Response::SuccessfulLogin {
                                username: user.name.clone(),
                                balance: user.balance,
                                is_admin: user.is_admin,
                            }))
                            .await?;
                        Ok(Session {
                            username: user.name,
                            is_admin: user.is_admin,
                        })
                    }
                    Err(error) => {
                        connection
                            .send(Packet::ResponsePacket(Response::Failed(error.clone())))
                            .await?;
                        Err(error.into())
                    }
                }
            }
            _ => {
                bail!("bad login");
            }
        }
    } else {
        bail!("Invalid request at login: {:?}", packet);
    }
}

async fn handle_client(
    session: Session,
    connection: &mut Connection,
    db_tx: mpsc::Sender<DatabaseRequest>,
    settlement_tx: mpsc::Sender<SettlementRequest>,
) -> anyhow::Result<()> {
    loop {
        let packet = connection.read().await;
        if let Ok(Packet::RequestPacket(request)) = packet {
            if matches!(request, Request::Login { .. } | Request::Register { .. }) {
                connection.send(Packet::Error).await.ok();
                bail!("Attempted re-login - denied");
            }
            let response = dispatch(request, &session, &db_tx, &settlement_tx).await;
            connection.send(Packet::ResponsePacket(response)).await?;
        } else {
            return match packet {
                Ok(pack) => bail!("incorrect packet type: {:?}", pack),
                Err(error) => {
                    match &error
                        .downcast_ref::<std::io::Error>()
                        .ok_or(anyhow!("not an std error"))?
                        .kind()
                    {
                        ErrorKind::ConnectionAborted => Ok(()), //connection aborted is considered successful,
                        _ => Err(error)?,
                    }
                }
            };
        }
    }
}

fn reply<T>(outcome: Result<T, Error>, ok: impl FnOnce(T) -> Response) -> Response {
    match outcome {
        Ok(value) => ok(value),
        Err(error) => Response::Failed(error),
    }
}

async fn dispatch(
    request: Request,
    session: &Session,
    db_tx: &mpsc::Sender<DatabaseRequest>,
    settlement_tx: &mpsc::Sender<SettlementRequest>,
) -> Response {
    if is_admin_request(&request) && !session.is_admin {
        warn!(user = %session.username, "admin request from regular user");
        return Response::Failed(Error::Forbidden);
    }

    match request {
        Request::Login { .. } | Request::Register { .. } => Response::Failed(Error::Forbidden),
        Request::WhoAmI => Response::WhoAmI(session.username.clone()),
        Request::Standings => reply(
            ask(db_tx, |responder| DatabaseRequest::Standings { responder }).await,
            Response::Standings,
        ),
        Request::UpcomingMatches => reply(
            ask(db_tx, |responder| DatabaseRequest::UpcomingMatches { responder }).await,
            Response::Matches,
        ),
        Request::CompletedMatches => reply(
            ask(db_tx, |responder| DatabaseRequest::CompletedMatches { responder }).await,
            Response::Matches,
        ),
        Request::ActivePropositions { match_id } => reply(
            ask(db_tx, |responder| DatabaseRequest::ActivePropositions {
                match_id,
                responder,
            })
            .await,
            Response::Propositions,
        ),
        Request::MyWagers => reply(
            ask(db_tx, |responder| DatabaseRequest::WagersForUser {
                name: session.username.clone(),
                responder,
            })
            .await,
            Response::Wagers,
        ),
        Request::PlaceWager {
            proposition_id,
            stake,
        } => {
            let placed = ask(db_tx, |responder| DatabaseRequest::PlaceWager {
                user: session.username.clone(),
                proposition: proposition_id,
                stake,
                responder,
            })
            .await;
            match placed {
                Ok(_) => {
                    let fresh = ask(db_tx, |responder| DatabaseRequest::GetUser {
                        name: session.username.clone(),
                        responder,
                    })
                    .await;
                    match fresh {
                        Ok(Some(user)) => Response::WagerPlaced {
                            balance: user.balance,
                        },
                        Ok(None) => {
                            Response::Failed(Error::not_found("user", &session.username))
                        }
                        Err(error) => Response::Failed(error),
                    }
                }
                Err(error) => Response::Failed(error),
            }
        }
        Request::CreateTeam { name } => reply(
            ask(db_tx, |responder| DatabaseRequest::CreateTeam { name, responder }).await,
            |team| Response::Created { id: team.name },
        ),
        Request::DeleteTeam { name } => reply(
            ask(db_tx, |responder| DatabaseRequest::DeleteTeam { name, responder }).await,
            |()| Response::None,
        ),
        Request::CreatePlayer { name, team } => reply(
            ask(db_tx, |responder| DatabaseRequest::CreatePlayer {
                name,
                team,
                responder,
            })
            .await,
            |player| Response::Created { id: player.id },
        ),
        Request::DeletePlayer { id } => reply(
            ask(db_tx, |responder| DatabaseRequest::DeletePlayer { id, responder }).await,
            |()| Response::None,
        ),
        Request::CreateMatch {
            home,
            away,
            kickoff,
        } => reply(
            ask(db_tx, |responder| DatabaseRequest::CreateMatch {
                home,
                away,
                kickoff,
                responder,
            })
            .await,
            |row| Response::Created { id: row.id },
        ),
        Request::SetMatchLive { match_id } => reply(
            ask(db_tx, |responder| DatabaseRequest::SetMatchLive {
                id: match_id,
                responder,
            })
            .await,
            |_| Response::None,
        ),
        Request::CreateProposition {
            match_id,
            player_id,
            description,
            odds,
            outcome,
        } => reply(
            ask(db_tx, |responder| DatabaseRequest::CreateProposition {
                match_id,
                player_id,
                description,
                odds,
                outcome,
                responder,
            })
            .await,
            |prop| Response::Created { id: prop.id },
        ),
        Request::CreateTemplate {
            category,
            description,
            odds,
        } => reply(
            ask(db_tx, |responder| DatabaseRequest::CreateTemplate {
                category,
                description,
                odds,
                responder,
            })
            .await,
            |template| Response::Created { id: template.id },
        ),
        Request::ListTemplates => reply(
            ask(db_tx, |responder| DatabaseRequest::Templates { responder }).await,
            Response::Templates,
        ),
        Request::DeleteTemplate { id } => reply(
            ask(db_tx, |responder| DatabaseRequest::DeleteTemplate { id, responder }).await,
            |()| Response::None,
        ),
        Request::CreatePropositionFromTemplate {
            template_id,
            match_id,
            player_id,
            outcome,
        } => reply(
            ask(db_tx, |responder| {
                DatabaseRequest::PropositionFromTemplate {
                    template_id,
                    match_id,
                    player_id,
                    outcome,
                    responder,
                }
            })
            .await,
            |prop| Response::Created { id: prop.id },
        ),
        Request::SubmitProposal { description, odds } => reply(
            ask(db_tx, |responder| DatabaseRequest::SubmitProposal {
                user: session.username.clone(),
                description,
                odds,
                responder,
            })
            .await,
            |proposal| Response::Created { id: proposal.id },
        ),
        Request::PendingProposals => reply(
            ask(db_tx, |responder| DatabaseRequest::PendingProposals { responder }).await,
            Response::Proposals,
        ),
        Request::ReviewProposal { id, approve } => reply(
            ask(db_tx, |responder| DatabaseRequest::ReviewProposal {
                id,
                approve,
                responder,
            })
            .await,
            |opened| match opened {
                Some(prop) => Response::Created { id: prop.id },
                None => Response::None,
            },
        ),
        Request::SettleMatch {
            match_id,
            home_score,
            away_score,
        } => reply(
            ask(settlement_tx, |responder| SettlementRequest::SettleMatch {
                id: match_id,
                home_score,
                away_score,
                responder,
            })
            .await,
            Response::MatchSettled,
        ),
        Request::CancelMatch { match_id } => {
            let id = match_id.clone();
            reply(
                ask(settlement_tx, |responder| SettlementRequest::CancelMatch {
                    id: match_id,
                    responder,
                })
                .await,
                |reports| Response::MatchCancelled {
                    match_id: id,
                    reports,
                },
            )
        }
        Request::SettleProposition {
            proposition_id,
            result,
        } => reply(
            ask(settlement_tx, |responder| {
                SettlementRequest::SettleProposition {
                    id: proposition_id,
                    result,
                    responder,
                }
            })
            .await,
            Response::PropositionSettled,
        ),
        Request::CancelProposition { proposition_id } => reply(
            ask(settlement_tx, |responder| {
                SettlementRequest::CancelProposition {
                    id: proposition_id,
                    responder,
                }
            })
            .await,
            Response::PropositionSettled,
        ),
        Request::UpdateUser {
            user,
            balance,
            is_admin,
        } => reply(
            ask(db_tx, |responder| DatabaseRequest::UpdateUser {
                name: user,
                balance,
                is_admin,
                responder,
            })
            .await,
            |user| Response::Created { id: user.name },
        ),
        Request::DeleteUser { user } => reply(
            ask(db_tx, |responder| DatabaseRequest::DeleteUser {
                name: user,
                responder,
            })
            .await,
            |()| Response::None,
        ),
    }
}

fn is_admin_request(request: &Request) -> bool {
    matches!(
        request,
        Request::CreateTeam { .. }
            | Request::DeleteTeam { .. }
            | Request::CreatePlayer { .. }
            | Request::DeletePlayer { .. }
            | Request::CreateMatch { .. }
            | Request::SetMatchLive { .. }
            | Request::CreateProposition { .. }
            | Request::CreateTemplate { .. }
            | Request::ListTemplates
            | Request::DeleteTemplate { .. }
            | Request::CreatePropositionFromTemplate { .. }
            | Request::PendingProposals
            | Request::ReviewProposal { .. }
            | Request::SettleMatch { .. }
            | Request::CancelMatch { .. }
            | Request::SettleProposition { .. }
            | Request::CancelProposition { .. }
            | Request::UpdateUser { .. }
            | Request::DeleteUser { .. }
    )
}
