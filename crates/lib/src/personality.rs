//! Personality sessions: rolling history, single-flight gate and a dedicated model worker
//! per personality.
//!
//! Requests arrive on the transport's delivery context; [`SessionManager::delivery_handler`]
//! spawns each one as its own task so delivery never waits on the model. Within one
//! personality only one request is processed at a time; requests arriving meanwhile are
//! dropped, not queued.

use crate::config::Personality;
use crate::llm::{ModelBackend, ModelError};
use crate::relay::{Delivery, DeliveryHandler, Publisher, RelayPayload, TransportError};
use crate::session::{ConversationTurn, History, SingleFlightGate};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown personality: {0}")]
    UnknownPersonality(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("publishing response failed: {0}")]
    Publish(#[from] TransportError),
}

/// What became of one request.
#[derive(Debug)]
pub enum RequestOutcome {
    /// The model replied and the reply was published.
    Replied(String),
    /// Another request for the same personality was in flight; nothing happened.
    Dropped,
    /// The request failed; the error has been logged and the gate released.
    Failed(SessionError),
}

struct ModelJob {
    turns: Vec<ConversationTurn>,
    reply: oneshot::Sender<Result<ConversationTurn, ModelError>>,
}

/// Single-worker execution context for model calls of one personality.
#[derive(Clone)]
pub struct ModelWorker {
    tx: mpsc::Sender<ModelJob>,
}

impl ModelWorker {
    /// Spawn the worker task. It runs until every handle is dropped.
    ///
    /// Jobs run one at a time, each in its own task, so a panicking backend call fails that
    /// job only and the worker keeps serving.
    pub fn spawn(personality: &str, backend: Arc<dyn ModelBackend>, model: String) -> Self {
        let (tx, mut rx) = mpsc::channel::<ModelJob>(1);
        let personality = personality.to_string();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let call = {
                    let backend = backend.clone();
                    let model = model.clone();
                    let turns = job.turns;
                    tokio::spawn(async move { backend.chat(&model, &turns).await })
                };
                let result = match call.await {
                    Ok(result) => result,
                    Err(e) => {
                        log::error!("{}: model call aborted: {}", personality, e);
                        Err(ModelError::Backend(format!("model call aborted: {}", e)))
                    }
                };
                if job.reply.send(result).is_err() {
                    log::debug!("{}: model reply discarded, requester gone", personality);
                }
            }
            log::debug!("{}: model worker stopped", personality);
        });
        Self { tx }
    }

    /// Run one model call on the worker and wait for its result.
    pub async fn invoke(
        &self,
        turns: Vec<ConversationTurn>,
    ) -> Result<ConversationTurn, ModelError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ModelJob { turns, reply })
            .await
            .map_err(|_| ModelError::WorkerGone)?;
        rx.await.map_err(|_| ModelError::WorkerGone)?
    }
}

/// State for one personality.
pub struct PersonalitySession {
    id: String,
    response_topic: String,
    history: Mutex<History>,
    gate: SingleFlightGate,
    worker: ModelWorker,
}

impl PersonalitySession {
    pub fn new(personality: &Personality, worker: ModelWorker) -> Self {
        Self {
            id: personality.id.clone(),
            response_topic: personality.response_topic(),
            history: Mutex::new(History::new(personality.prompt.clone())),
            gate: SingleFlightGate::new(),
            worker,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append the user turn and return the full sequence to send to the model.
    fn begin_exchange(&self, turn: ConversationTurn) -> Vec<ConversationTurn> {
        let mut history = self.history();
        history.trim();
        history.append(turn);
        history.turns().to_vec()
    }

    /// Append the assistant turn, if any, and trim.
    fn end_exchange(&self, reply: Option<ConversationTurn>) {
        let mut history = self.history();
        if let Some(reply) = reply {
            history.append(reply);
        }
        history.trim();
    }
}

/// Table of personality sessions sharing one model backend and one response publisher.
pub struct SessionManager {
    sessions: HashMap<String, Arc<PersonalitySession>>,
    publisher: Arc<dyn Publisher>,
}

impl SessionManager {
    /// Create a session (with its own worker) for each personality.
    pub fn new(
        personalities: &[Personality],
        backend: Arc<dyn ModelBackend>,
        model: &str,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let sessions = personalities
            .iter()
            .map(|p| {
                let worker = ModelWorker::spawn(&p.id, backend.clone(), model.to_string());
                (p.id.clone(), Arc::new(PersonalitySession::new(p, worker)))
            })
            .collect();
        Self {
            sessions,
            publisher,
        }
    }

    /// Request topics to subscribe to, one per personality.
    pub fn request_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.sessions.keys().map(|id| format!("{}_in", id)).collect();
        topics.sort();
        topics
    }

    /// Personality addressed by a request topic (`<id>_in`).
    pub fn personality_for_topic(&self, topic: &str) -> Option<&str> {
        let id = topic.strip_suffix("_in")?;
        self.sessions.get_key_value(id).map(|(k, _)| k.as_str())
    }

    /// Current history of a personality.
    pub fn history(&self, personality_id: &str) -> Option<Vec<ConversationTurn>> {
        self.sessions
            .get(personality_id)
            .map(|s| s.history().turns().to_vec())
    }

    /// True while a request for this personality is in flight.
    pub fn is_busy(&self, personality_id: &str) -> bool {
        self.sessions
            .get(personality_id)
            .is_some_and(|s| s.gate.is_held())
    }

    /// Handle one request for a personality: drop it if one is already in flight, otherwise
    /// run it through the model, publish the reply and release the gate. Errors are logged
    /// and returned, never propagated.
    pub async fn handle_request(&self, personality_id: &str, request: RelayPayload) -> RequestOutcome {
        let Some(session) = self.sessions.get(personality_id) else {
            log::warn!("request for unknown personality {}", personality_id);
            return RequestOutcome::Failed(SessionError::UnknownPersonality(
                personality_id.to_string(),
            ));
        };
        let Some(_guard) = session.gate.try_acquire() else {
            log::debug!("{}: busy, dropping request", session.id);
            return RequestOutcome::Dropped;
        };
        log::info!("{} received: {}", session.id, request.text);

        match self.respond(session, request).await {
            Ok(reply) => {
                log::info!("{} responding: {}", session.id, reply);
                RequestOutcome::Replied(reply)
            }
            Err(e) => {
                log::warn!("{} error processing message: {}", session.id, e);
                RequestOutcome::Failed(e)
            }
        }
    }

    async fn respond(
        &self,
        session: &PersonalitySession,
        request: RelayPayload,
    ) -> Result<String, SessionError> {
        let turns = session.begin_exchange(ConversationTurn::user(request.text));
        let reply = match session.worker.invoke(turns).await {
            Ok(reply) => reply,
            Err(e) => {
                session.end_exchange(None);
                return Err(e.into());
            }
        };
        let content = reply.content.clone();
        session.end_exchange(Some(reply));
        let payload = RelayPayload::new(request.id, content.as_str()).encode();
        self.publisher
            .publish(&session.response_topic, payload)
            .await?;
        Ok(content)
    }

    /// Delivery callback for the request broker: maps the topic to a personality and spawns
    /// the request so the delivery context is never blocked.
    pub fn delivery_handler(self: &Arc<Self>) -> DeliveryHandler {
        let manager = self.clone();
        Arc::new(move |delivery: Delivery| {
            let Some(id) = manager.personality_for_topic(&delivery.topic).map(str::to_string) else {
                log::debug!("ignoring message on unexpected topic {}", delivery.topic);
                return;
            };
            let request = RelayPayload::decode(&delivery.payload);
            let manager = manager.clone();
            tokio::spawn(async move {
                manager.handle_request(&id, request).await;
            });
        })
    }
}
