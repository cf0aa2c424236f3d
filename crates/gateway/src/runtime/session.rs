//! Session actor: one task per conversation that owns its history.
//!
//! All interaction goes through [`SessionHandle`], which sends commands
//! into a bounded inbox. The actor runs at most one turn at a time;
//! prompts and notifications that arrive mid-turn wait in a queue, while
//! attach, detach and snapshot requests are served immediately. History is
//! only ever written by the actor task itself.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use docent_domain::config::SessionsConfig;
use docent_domain::error::{Error, Result};
use docent_domain::event::SessionEvent;
use docent_domain::tool::Message;

use super::capabilities::CallContext;
use super::turn::{run_turn, TurnDeps, TurnOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Commands & handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum SessionCommand {
    Attach {
        connection_id: String,
        events: mpsc::Sender<SessionEvent>,
    },
    Detach {
        connection_id: String,
    },
    Prompt {
        connection_id: String,
        text: String,
    },
    Notify {
        content: String,
        delivered: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Message>>,
    },
}

/// Queued work that must not overlap a running turn.
enum Work {
    Prompt { connection_id: String, text: String },
    Notify { content: String, delivered: oneshot::Sender<usize> },
}

/// Cheap, cloneable address of a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: Arc<str>,
    tx: mpsc::Sender<SessionCommand>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True once the actor has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| Error::Other(format!("session {} has shut down", self.id)))
    }

    /// Start receiving this session's events on `events`.
    pub async fn attach(
        &self,
        connection_id: impl Into<String>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<()> {
        self.send(SessionCommand::Attach {
            connection_id: connection_id.into(),
            events,
        })
        .await
    }

    pub async fn detach(&self, connection_id: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::Detach {
            connection_id: connection_id.into(),
        })
        .await
    }

    /// Queue a user message. Returns once the actor has accepted it;
    /// progress arrives on attached connections.
    pub async fn prompt(&self, connection_id: impl Into<String>, text: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::Prompt {
            connection_id: connection_id.into(),
            text: text.into(),
        })
        .await
    }

    /// Push a synthetic assistant message followed by `stop` to every
    /// connection attached at delivery time. Returns how many received it;
    /// zero means the notification was dropped.
    pub async fn notify(&self, content: impl Into<String>) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Notify {
            content: content.into(),
            delivered: tx,
        })
        .await?;
        Ok(rx.await.unwrap_or(0))
    }

    /// Committed history.
    pub async fn messages(&self) -> Result<Vec<Message>> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot { reply: tx }).await?;
        rx.await
            .map_err(|_| Error::Other(format!("session {} has shut down", self.id)))
    }
}

#[cfg(test)]
impl SessionHandle {
    /// A handle with no actor behind it. It reads as open until the guard
    /// is dropped.
    pub(crate) fn unbacked(id: &str) -> (Self, Box<dyn std::any::Any + Send>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                id: Arc::from(id),
                tx,
            },
            Box::new(rx),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionActor {
    id: String,
    deps: Arc<TurnDeps>,
    inbox: mpsc::Receiver<SessionCommand>,
    history: Vec<Message>,
    connections: HashMap<String, mpsc::Sender<SessionEvent>>,
    pending: VecDeque<Work>,
    idle_timeout: Duration,
}

impl SessionActor {
    /// Spawn the actor for `id` and return its handle.
    pub fn spawn(id: impl Into<String>, deps: Arc<TurnDeps>, cfg: &SessionsConfig) -> SessionHandle {
        let id: String = id.into();
        let (tx, inbox) = mpsc::channel(cfg.inbox_capacity.max(1));
        let actor = SessionActor {
            id: id.clone(),
            deps,
            inbox,
            history: Vec::new(),
            connections: HashMap::new(),
            pending: VecDeque::new(),
            idle_timeout: Duration::from_secs(cfg.idle_timeout_secs.max(1)),
        };
        let span = tracing::info_span!("session", session_id = %id);
        tokio::spawn(actor.run().instrument(span));
        tracing::debug!(session_id = %id, "session actor started");
        SessionHandle {
            id: Arc::from(id),
            tx,
        }
    }

    async fn run(mut self) {
        loop {
            let work = match self.pending.pop_front() {
                Some(w) => w,
                None => match self.next_idle().await {
                    Some(w) => w,
                    None => break,
                },
            };
            match work {
                Work::Prompt {
                    connection_id,
                    text,
                } => self.drive_turn(connection_id, text).await,
                Work::Notify { content, delivered } => {
                    let n = self.deliver_notification(content);
                    let _ = delivered.send(n);
                }
            }
        }
        tracing::info!(
            session_id = %self.id,
            messages = self.history.len(),
            "session actor stopped"
        );
    }

    /// Wait for the next piece of queued work while idle. `None` means the
    /// actor should exit: every handle is gone, or it sat idle with no
    /// connection for the whole timeout.
    async fn next_idle(&mut self) -> Option<Work> {
        loop {
            let cmd = match tokio::time::timeout(self.idle_timeout, self.inbox.recv()).await {
                Ok(Some(cmd)) => cmd,
                Ok(None) => return None,
                Err(_) => {
                    if self.connections.is_empty() {
                        tracing::info!(session_id = %self.id, "session idle, shutting down");
                        return None;
                    }
                    continue;
                }
            };
            if let Some(work) = handle_command(
                cmd,
                &mut self.connections,
                &self.history,
                &self.id,
            )
            .await
            {
                return Some(work);
            }
        }
    }

    async fn drive_turn(&mut self, connection_id: String, text: String) {
        let ctx = CallContext {
            session_id: self.id.clone(),
            connection_id,
        };
        let (ev_tx, mut ev_rx) = mpsc::channel::<SessionEvent>(64);

        let outcome: TurnOutcome = {
            let turn = run_turn(&self.deps, &self.history, &ctx, &text, &ev_tx);
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    biased;
                    Some(ev) = ev_rx.recv() => {
                        broadcast(&self.id, &mut self.connections, ev);
                    }
                    outcome = &mut turn => break outcome,
                    Some(cmd) = self.inbox.recv() => {
                        if let Some(work) = handle_command(
                            cmd,
                            &mut self.connections,
                            &self.history,
                            &self.id,
                        )
                        .await
                        {
                            self.pending.push_back(work);
                        }
                    }
                }
            }
        };

        // Flush what the turn emitted after the last poll.
        drop(ev_tx);
        while let Some(ev) = ev_rx.recv().await {
            broadcast(&self.id, &mut self.connections, ev);
        }

        self.history.push(outcome.user);
        let terminal = match outcome.result {
            Ok(assistant) => {
                self.history.push(assistant);
                SessionEvent::stop()
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "turn failed");
                SessionEvent::error(e.to_string())
            }
        };
        tracing::debug!(
            session_id = %self.id,
            round_trips = outcome.round_trips,
            messages = self.history.len(),
            "turn committed"
        );
        broadcast(&self.id, &mut self.connections, terminal);
    }

    fn deliver_notification(&mut self, content: String) -> usize {
        if self.connections.is_empty() {
            tracing::info!(session_id = %self.id, "no connection attached, notification dropped");
            return 0;
        }
        broadcast(&self.id, &mut self.connections, SessionEvent::text(content.clone()));
        let delivered = broadcast(&self.id, &mut self.connections, SessionEvent::stop());
        self.history.push(Message::assistant(content));
        delivered
    }
}

/// Serve commands that never wait on a turn; hand back the ones that must.
async fn handle_command(
    cmd: SessionCommand,
    connections: &mut HashMap<String, mpsc::Sender<SessionEvent>>,
    history: &[Message],
    session_id: &str,
) -> Option<Work> {
    match cmd {
        SessionCommand::Attach {
            connection_id,
            events,
        } => {
            tracing::debug!(session_id, connection_id = %connection_id, "connection attached");
            connections.insert(connection_id, events);
            None
        }
        SessionCommand::Detach { connection_id } => {
            if connections.remove(&connection_id).is_some() {
                tracing::debug!(session_id, connection_id = %connection_id, "connection detached");
            }
            None
        }
        SessionCommand::Snapshot { reply } => {
            let _ = reply.send(history.to_vec());
            None
        }
        SessionCommand::Prompt {
            connection_id,
            text,
        } => Some(Work::Prompt {
            connection_id,
            text,
        }),
        SessionCommand::Notify { content, delivered } => Some(Work::Notify { content, delivered }),
    }
}

/// Send `event` to every attached connection without waiting on any of
/// them. A connection whose buffer is full or closed is detached, so one
/// stalled reader never holds up the turn or the other connections.
/// Returns how many received it.
fn broadcast(
    session_id: &str,
    connections: &mut HashMap<String, mpsc::Sender<SessionEvent>>,
    event: SessionEvent,
) -> usize {
    connections.retain(|id, tx| match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(session_id, connection_id = %id, "connection not keeping up, detached");
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(session_id, connection_id = %id, "connection gone, detached");
            false
        }
    });
    connections.len()
}
