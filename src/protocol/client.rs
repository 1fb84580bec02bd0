//! Persistent connection to the upstream game server.
//!
//! One connection per user: connect, handshake with the current credential
//! pair, then a single `select!` loop over the socket, the heartbeat timer
//! and the command channel. The loop never reconnects by itself; it reports
//! how the connection ended and the reconnection controller decides what
//! happens next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use super::messages::{ClientMessage, ServerMessage};
use crate::auth::CredentialPair;
use crate::engine::Selection;

/// How long the handshake may take before the attempt counts as failed.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive unanswered heartbeat probes that force a reconnect.
const MAX_MISSED_PONGS: u32 = 2;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Events emitted upward to the session worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    Connected,
    RoundOpened { round_id: String },
    RoundClosed { round_id: String },
    BetAccepted { round_id: String },
    BetRejected { round_id: String, reason: Option<String> },
    SessionInvalid,
    Disconnected { reason: String },
    /// Reconnection given up or auth permanently failed; the operation is
    /// over until the operator intervenes.
    Terminated { reason: String },
}

/// Commands accepted by the connection loop.
#[derive(Debug)]
pub enum ClientCommand {
    SubmitBet {
        round_id: String,
        selection: Selection,
        amount: f64,
    },
    Close,
}

/// Why a connection ended. The reconnection controller branches on this.
#[derive(Debug)]
pub enum ConnectionExit {
    /// User-initiated stop; must not trigger reconnection.
    NormalClose,
    /// Server instructed a migration; reopen against the new endpoint.
    Redirect { endpoint: String },
    /// Credentials refused mid-session; renew before reconnecting.
    SessionInvalid,
    /// Network failure, heartbeat timeout or server-side close.
    Abnormal { reason: String },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("not connected to the game server")]
    NotConnected,
}

/// Cheap handle the session worker keeps across reconnects. Submissions are
/// refused synchronously while no connection is open; acks and rejections
/// arrive asynchronously as [`ProtocolEvent`]s.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<ClientCommand>,
    open: Arc<AtomicBool>,
}

impl ClientHandle {
    /// Submit exactly one framed bet message. No retries here; the staking
    /// layer owns the retry policy.
    pub fn submit_bet(
        &self,
        round_id: &str,
        selection: Selection,
        amount: f64,
    ) -> Result<(), SubmitError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(SubmitError::NotConnected);
        }
        self.cmd_tx
            .try_send(ClientCommand::SubmitBet {
                round_id: round_id.to_string(),
                selection,
                amount,
            })
            .map_err(|_| SubmitError::NotConnected)
    }

    /// Request a normal close. The connection loop answers with
    /// `ConnectionExit::NormalClose`, which suppresses reconnection.
    pub fn close(&self) {
        let _ = self.cmd_tx.try_send(ClientCommand::Close);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn force_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }
}

/// Owns one user's connection lifecycle state shared with the handle.
pub struct ProtocolClient {
    heartbeat_interval: Duration,
    event_tx: mpsc::Sender<ProtocolEvent>,
    open: Arc<AtomicBool>,
}

impl ProtocolClient {
    pub fn new(
        heartbeat_interval: Duration,
        event_tx: mpsc::Sender<ProtocolEvent>,
    ) -> (Self, ClientHandle, mpsc::Receiver<ClientCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let open = Arc::new(AtomicBool::new(false));
        let handle = ClientHandle {
            cmd_tx,
            open: open.clone(),
        };
        (
            Self {
                heartbeat_interval,
                event_tx,
                open,
            },
            handle,
            cmd_rx,
        )
    }

    /// Connect, handshake, then stream until the connection ends. Returns
    /// how it ended; `Err` means the connection could not be established at
    /// all (both count as one attempt for backoff purposes).
    pub async fn connect_and_stream(
        &self,
        endpoint: &str,
        credentials: &CredentialPair,
        cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    ) -> Result<ConnectionExit> {
        info!(endpoint, "🔌 connecting to game server");
        let (ws_stream, resp) = connect_async(endpoint)
            .await
            .context("game server connect failed")?;
        debug!(status = %resp.status(), "websocket established");

        let (mut write, mut read) = ws_stream.split();

        // Handshake: hello out, welcome back, nothing else counts.
        send_frame(
            &mut write,
            &ClientMessage::Hello {
                session_token: credentials.session_token.clone(),
                auth_token: credentials.auth_token.clone(),
                user_id: credentials.external_user_id.clone(),
            },
        )
        .await?;

        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            while let Some(msg) = read.next().await {
                match msg.context("handshake read failed")? {
                    Message::Text(text) => match ServerMessage::parse(&text) {
                        Ok(ServerMessage::Welcome { table_id }) => return Ok(table_id),
                        Ok(ServerMessage::SessionInvalid { .. }) => {
                            anyhow::bail!("session invalid during handshake")
                        }
                        Ok(other) => debug!(?other, "pre-welcome frame ignored"),
                        Err(e) => debug!(error = %e, "unparseable handshake frame"),
                    },
                    Message::Close(frame) => anyhow::bail!("closed during handshake: {frame:?}"),
                    _ => {}
                }
            }
            anyhow::bail!("stream ended during handshake")
        })
        .await
        .context("handshake timed out")??;

        info!(table_id = ?handshake, "✅ game session open");
        self.open.store(true, Ordering::Release);
        let _ = self.event_tx.send(ProtocolEvent::Connected).await;

        let exit = self.stream_open(&mut write, &mut read, cmd_rx).await;
        self.open.store(false, Ordering::Release);

        if let ConnectionExit::Abnormal { reason } = &exit {
            let _ = self
                .event_tx
                .send(ProtocolEvent::Disconnected {
                    reason: reason.clone(),
                })
                .await;
        }
        Ok(exit)
    }

    async fn stream_open(
        &self,
        write: &mut WsSink,
        read: &mut WsSource,
        cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    ) -> ConnectionExit {
        let mut heartbeat = interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        heartbeat.tick().await; // first tick is immediate
        let mut missed_pongs: u32 = 0;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if missed_pongs >= MAX_MISSED_PONGS {
                        warn!("💔 {} heartbeats unanswered; dropping connection", missed_pongs);
                        return ConnectionExit::Abnormal {
                            reason: "heartbeat timeout".to_string(),
                        };
                    }
                    missed_pongs += 1;
                    if let Err(e) = send_frame(write, &ClientMessage::Ping).await {
                        return ConnectionExit::Abnormal {
                            reason: format!("heartbeat send failed: {e}"),
                        };
                    }
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        return ConnectionExit::NormalClose;
                    };
                    match cmd {
                        ClientCommand::SubmitBet { round_id, selection, amount } => {
                            if let Err(e) = send_frame(
                                write,
                                &ClientMessage::bet(&round_id, selection, amount),
                            )
                            .await
                            {
                                return ConnectionExit::Abnormal {
                                    reason: format!("bet send failed: {e}"),
                                };
                            }
                        }
                        ClientCommand::Close => {
                            let _ = write.send(Message::Close(None)).await;
                            return ConnectionExit::NormalClose;
                        }
                    }
                }
                ws_msg = read.next() => {
                    let Some(ws_msg) = ws_msg else {
                        return ConnectionExit::Abnormal {
                            reason: "stream ended".to_string(),
                        };
                    };
                    match ws_msg {
                        Ok(Message::Text(text)) => {
                            if let Some(exit) = self.dispatch(&text, &mut missed_pongs).await {
                                return exit;
                            }
                        }
                        Ok(Message::Ping(payload)) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Ok(Message::Close(frame)) => {
                            let reason = frame
                                .map(|f| format!("{} {}", f.code, f.reason))
                                .unwrap_or_else(|| "server close".to_string());
                            return ConnectionExit::Abnormal { reason };
                        }
                        Ok(_) => {}
                        Err(e) => {
                            return ConnectionExit::Abnormal {
                                reason: format!("read error: {e}"),
                            };
                        }
                    }
                }
            }
        }
    }

    /// Route one parsed server frame. Returns an exit when the frame ends
    /// the connection.
    async fn dispatch(&self, text: &str, missed_pongs: &mut u32) -> Option<ConnectionExit> {
        let msg = match ServerMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, raw = %&text[..text.len().min(200)], "skipping unparseable frame");
                return None;
            }
        };

        match msg {
            ServerMessage::Pong => {
                *missed_pongs = 0;
            }
            ServerMessage::RoundOpen { round_id } => {
                let _ = self
                    .event_tx
                    .send(ProtocolEvent::RoundOpened { round_id })
                    .await;
            }
            ServerMessage::RoundClosed { round_id } => {
                let _ = self
                    .event_tx
                    .send(ProtocolEvent::RoundClosed { round_id })
                    .await;
            }
            ServerMessage::BetAck { round_id } => {
                let _ = self
                    .event_tx
                    .send(ProtocolEvent::BetAccepted { round_id })
                    .await;
            }
            ServerMessage::BetReject { round_id, code } => {
                let _ = self
                    .event_tx
                    .send(ProtocolEvent::BetRejected {
                        round_id,
                        reason: code,
                    })
                    .await;
            }
            ServerMessage::Redirect { endpoint } => {
                info!(endpoint, "↪️ server redirect");
                return Some(ConnectionExit::Redirect { endpoint });
            }
            ServerMessage::SessionInvalid { reason } => {
                warn!(?reason, "session invalidated by server");
                let _ = self.event_tx.send(ProtocolEvent::SessionInvalid).await;
                return Some(ConnectionExit::SessionInvalid);
            }
            ServerMessage::Welcome { .. } => {
                debug!("duplicate welcome ignored");
            }
        }
        None
    }
}

/// The one place an outbound frame is built and written.
async fn send_frame(write: &mut WsSink, msg: &ClientMessage) -> Result<()> {
    write
        .send(Message::Text(msg.to_frame()))
        .await
        .context("frame send failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_refused_while_closed() {
        let (event_tx, _event_rx) = mpsc::channel(8);
        let (_client, handle, _cmd_rx) = ProtocolClient::new(Duration::from_secs(30), event_tx);

        assert!(!handle.is_open());
        assert!(matches!(
            handle.submit_bet("rnd-1", Selection::Red, 1.0),
            Err(SubmitError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_submit_enqueues_command_when_open() {
        let (event_tx, _event_rx) = mpsc::channel(8);
        let (client, handle, mut cmd_rx) = ProtocolClient::new(Duration::from_secs(30), event_tx);
        client.open.store(true, Ordering::Release);

        handle.submit_bet("rnd-1", Selection::Red, 4.0).unwrap();
        match cmd_rx.recv().await.unwrap() {
            ClientCommand::SubmitBet {
                round_id,
                selection,
                amount,
            } => {
                assert_eq!(round_id, "rnd-1");
                assert_eq!(selection, Selection::Red);
                assert_eq!(amount, 4.0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_emits_round_events() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (client, _handle, _cmd_rx) = ProtocolClient::new(Duration::from_secs(30), event_tx);
        let mut missed = 1;

        let exit = client
            .dispatch(r#"{"type":"round_open","round_id":"rnd-5"}"#, &mut missed)
            .await;
        assert!(exit.is_none());
        assert_eq!(
            event_rx.recv().await.unwrap(),
            ProtocolEvent::RoundOpened {
                round_id: "rnd-5".to_string()
            }
        );

        // Pong clears the miss counter without emitting anything.
        client.dispatch(r#"{"type":"pong"}"#, &mut missed).await;
        assert_eq!(missed, 0);
    }

    #[tokio::test]
    async fn test_dispatch_session_invalid_exits() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (client, _handle, _cmd_rx) = ProtocolClient::new(Duration::from_secs(30), event_tx);
        let mut missed = 0;

        let exit = client
            .dispatch(r#"{"type":"session_invalid","reason":"expired"}"#, &mut missed)
            .await;
        assert!(matches!(exit, Some(ConnectionExit::SessionInvalid)));
        assert_eq!(event_rx.recv().await.unwrap(), ProtocolEvent::SessionInvalid);
    }

    #[tokio::test]
    async fn test_dispatch_skips_garbage() {
        let (event_tx, _event_rx) = mpsc::channel(8);
        let (client, _handle, _cmd_rx) = ProtocolClient::new(Duration::from_secs(30), event_tx);
        let mut missed = 0;
        assert!(client
            .dispatch("{\"type\":\"confetti\"}", &mut missed)
            .await
            .is_none());
    }
}
