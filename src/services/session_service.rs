use crate::dto::envelope::{
    ChatHistoryData, ClearedData, ControlFrame, Inbound, JobSearchData, LoadedData, Outbound,
    SavedData, SearchFrame,
};
use crate::error::{Error, Result};
use crate::models::chat::Message;
use crate::services::history_service::ChatStore;
use crate::services::search_service::SearchService;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One live connection in the registry. Dropping the outbound sender ends
/// the connection's writer; the cancel token ends the receive loop when
/// the connection is superseded or reclaimed as idle.
pub struct SessionHandle {
    pub conn_id: Uuid,
    pub user_id: String,
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub cancel: CancellationToken,
    pub last_seen: Instant,
}

struct DetachedSession {
    user_id: String,
    since: Instant,
}

/// What a freshly resolved connection needs to run its receive loop.
pub struct SessionContext {
    pub chat_id: String,
    pub conn_id: Uuid,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub cancel: CancellationToken,
    pub resumed: bool,
}

struct SearchJob {
    user_id: String,
    frame: SearchFrame,
    outbound: mpsc::UnboundedSender<Outbound>,
}

struct ChatWorker {
    jobs: mpsc::UnboundedSender<SearchJob>,
    cancel: CancellationToken,
}

/// Owns the per-connection state machine: handshake/resumption, envelope
/// dispatch, grace-period bookkeeping and garbage collection. One manager
/// per process, created at service start.
pub struct SessionManager {
    search: SearchService,
    store: Arc<dyn ChatStore>,
    live: RwLock<HashMap<String, SessionHandle>>,
    detached: Mutex<HashMap<String, DetachedSession>>,
    /// One worker per chat id runs its searches strictly in dispatch
    /// order, so emission and persistence never interleave.
    chat_workers: Mutex<HashMap<String, ChatWorker>>,
    grace: Duration,
    idle_timeout: Duration,
    history_limit: usize,
}

impl SessionManager {
    pub fn new(
        search: SearchService,
        store: Arc<dyn ChatStore>,
        grace: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            search,
            store,
            live: RwLock::new(HashMap::new()),
            detached: Mutex::new(HashMap::new()),
            chat_workers: Mutex::new(HashMap::new()),
            grace,
            idle_timeout,
            history_limit: 50,
        }
    }

    /// Handshake: resolves the chat id (caller-supplied for resumption,
    /// fresh otherwise) and registers the connection as Active. Resuming
    /// a session replays its persisted history into the outbound stream
    /// before anything else is emitted.
    ///
    /// A chat id belongs to exactly one user. Every path a caller-supplied
    /// id can arrive through checks ownership: the detached map, the live
    /// registry, and the persistent store for ids past their grace period.
    pub async fn connect(
        &self,
        user_id: &str,
        requested_chat_id: Option<String>,
    ) -> Result<SessionContext> {
        let supplied = requested_chat_id.is_some();
        let chat_id = requested_chat_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let resumed = {
            let mut detached = self.detached.lock().await;
            match detached.get(&chat_id) {
                Some(d) if d.user_id == user_id => {
                    detached.remove(&chat_id);
                    true
                }
                Some(_) => {
                    return Err(Error::BadRequest(format!(
                        "chat {} belongs to another user",
                        chat_id
                    )))
                }
                None => false,
            }
        };

        // Neither live nor detached, but possibly persisted: a reconnect
        // after the grace period expired. The durable record decides who
        // the chat belongs to.
        if supplied && !resumed && !self.is_live(&chat_id).await {
            if let Some(chat) = self.store.load_chat(&chat_id).await? {
                if chat.user_id != user_id {
                    return Err(Error::BadRequest(format!(
                        "chat {} belongs to another user",
                        chat_id
                    )));
                }
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let conn_id = Uuid::new_v4();

        {
            let mut live = self.live.write().await;
            // A new connection bearing a known chat id supersedes the old
            // one; the stale connection is cancelled, not raced. Only the
            // owner may supersede.
            if let Some(existing) = live.get(&chat_id) {
                if existing.user_id != user_id {
                    return Err(Error::BadRequest(format!(
                        "chat {} belongs to another user",
                        chat_id
                    )));
                }
                if let Some(stale) = live.remove(&chat_id) {
                    stale.cancel.cancel();
                }
            }
            live.insert(
                chat_id.clone(),
                SessionHandle {
                    conn_id,
                    user_id: user_id.to_string(),
                    outbound: tx.clone(),
                    cancel: cancel.clone(),
                    last_seen: Instant::now(),
                },
            );
        }

        if resumed {
            if let Some(chat) = self.store.load_chat(&chat_id).await? {
                let _ = tx.send(Outbound::ChatHistory {
                    data: ChatHistoryData { chats: vec![chat] },
                    timestamp: Utc::now(),
                });
            }
        }

        tracing::info!(chat_id = %chat_id, user_id = %user_id, resumed, "session active");
        Ok(SessionContext {
            chat_id,
            conn_id,
            outbound: rx,
            cancel,
            resumed,
        })
    }

    /// Connection loss: the session record enters its grace period. A
    /// reconnect with the same chat id resumes it; otherwise the GC
    /// sweep collects it. The connection id guards against a dying
    /// connection detaching the session of its own replacement.
    pub async fn disconnect(&self, chat_id: &str, conn_id: Uuid) {
        let handle = {
            let mut live = self.live.write().await;
            match live.get(chat_id) {
                Some(handle) if handle.conn_id == conn_id => live.remove(chat_id),
                _ => None,
            }
        };
        if let Some(handle) = handle {
            handle.cancel.cancel();
            self.detached.lock().await.insert(
                chat_id.to_string(),
                DetachedSession {
                    user_id: handle.user_id,
                    since: Instant::now(),
                },
            );
            tracing::info!(chat_id = %chat_id, "session detached, grace period started");
        }
    }

    /// Explicit close or unrecoverable protocol error: terminal, no
    /// grace, and any pipeline work still attributable to the session
    /// is cancelled with it.
    pub async fn close(&self, chat_id: &str) {
        if let Some(handle) = self.live.write().await.remove(chat_id) {
            handle.cancel.cancel();
        }
        self.detached.lock().await.remove(chat_id);
        if let Some(worker) = self.chat_workers.lock().await.remove(chat_id) {
            worker.cancel.cancel();
        }
        tracing::info!(chat_id = %chat_id, "session closed");
    }

    pub async fn touch(&self, chat_id: &str) {
        if let Some(handle) = self.live.write().await.get_mut(chat_id) {
            handle.last_seen = Instant::now();
        }
    }

    pub async fn is_live(&self, chat_id: &str) -> bool {
        self.live.read().await.contains_key(chat_id)
    }

    /// Dispatches one inbound envelope for an Active session. Envelopes
    /// arrive one at a time per connection; searches detach into their
    /// own task but stay serialized per chat id.
    pub async fn handle_envelope(&self, chat_id: &str, user_id: &str, raw: &str) {
        self.touch(chat_id).await;

        let envelope = match Inbound::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Malformed frame: typed error reply, no state change.
                self.send(chat_id, Outbound::error(e.to_string())).await;
                return;
            }
        };

        match envelope {
            Inbound::Search(frame) => self.dispatch_search(chat_id, user_id, frame).await,
            Inbound::Control(ControlFrame::LoadChatHistory { user_id: explicit }) => {
                let target = explicit.unwrap_or_else(|| user_id.to_string());
                let reply = match self.store.user_chats(&target, self.history_limit).await {
                    Ok(chats) => Outbound::ChatHistory {
                        data: ChatHistoryData { chats },
                        timestamp: Utc::now(),
                    },
                    Err(e) => Outbound::error(format!("Failed to load chat history: {}", e)),
                };
                self.send(chat_id, reply).await;
            }
            Inbound::Control(ControlFrame::ClearChatHistory { user_id: explicit }) => {
                let target = explicit.unwrap_or_else(|| user_id.to_string());
                let reply = match self.store.clear_user_chats(&target).await {
                    Ok(deleted_count) => Outbound::ChatHistoryCleared {
                        data: ClearedData { deleted_count },
                        timestamp: Utc::now(),
                    },
                    Err(e) => Outbound::error(format!("Failed to clear chat history: {}", e)),
                };
                self.send(chat_id, reply).await;
            }
            Inbound::Control(ControlFrame::GetChat { chat_id: wanted }) => {
                // A chat is only handed back to the user it belongs to.
                let reply = match self.store.load_chat(&wanted).await {
                    Ok(Some(chat)) if chat.user_id != user_id => {
                        Outbound::error(format!("chat {} belongs to another user", wanted))
                    }
                    Ok(chat) => Outbound::ChatLoaded {
                        data: LoadedData { chat },
                        timestamp: Utc::now(),
                    },
                    Err(e) => Outbound::error(format!("Failed to load chat: {}", e)),
                };
                self.send(chat_id, reply).await;
            }
            Inbound::Control(ControlFrame::SaveChat { chat_data }) => {
                let reply = match self.store.save_chat(&chat_data).await {
                    Ok(()) => Outbound::ChatSaved {
                        data: SavedData { success: true },
                        timestamp: Utc::now(),
                    },
                    Err(e) => Outbound::error(format!("Failed to save chat: {}", e)),
                };
                self.send(chat_id, reply).await;
            }
        }
    }

    /// Fire-and-continue: the job goes to the chat's worker so the
    /// receive loop keeps draining frames, while searches on the same
    /// chat still run strictly in dispatch order. The worker outlives
    /// its connection on purpose: a search whose socket died mid-flight
    /// still persists its exchange, so a resume within the grace period
    /// replays it.
    async fn dispatch_search(&self, chat_id: &str, user_id: &str, frame: SearchFrame) {
        let outbound = {
            let live = self.live.read().await;
            match live.get(chat_id) {
                Some(handle) => handle.outbound.clone(),
                None => return,
            }
        };

        let worker = self.chat_worker(chat_id).await;
        let _ = worker.send(SearchJob {
            user_id: user_id.to_string(),
            frame,
            outbound,
        });
    }

    async fn send(&self, chat_id: &str, envelope: Outbound) {
        if let Some(handle) = self.live.read().await.get(chat_id) {
            let _ = handle.outbound.send(envelope);
        }
    }

    async fn chat_worker(&self, chat_id: &str) -> mpsc::UnboundedSender<SearchJob> {
        let mut workers = self.chat_workers.lock().await;
        if let Some(worker) = workers.get(chat_id) {
            if !worker.jobs.is_closed() {
                return worker.jobs.clone();
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<SearchJob>();
        let cancel = CancellationToken::new();
        let search = self.search.clone();
        let store = Arc::clone(&self.store);
        let chat_id_owned = chat_id.to_string();
        let worker_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let job = tokio::select! {
                    _ = worker_cancel.cancelled() => break,
                    job = rx.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };
                tokio::select! {
                    _ = worker_cancel.cancelled() => break,
                    _ = Self::run_search_job(&search, &store, &chat_id_owned, job) => {}
                }
            }
        });
        workers.insert(
            chat_id.to_string(),
            ChatWorker {
                jobs: tx.clone(),
                cancel,
            },
        );
        tx
    }

    async fn run_search_job(
        search: &SearchService,
        store: &Arc<dyn ChatStore>,
        chat_id: &str,
        job: SearchJob,
    ) {
        let outcome = match search.run(&job.frame.message, None).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = job.outbound.send(Outbound::error(e.to_string()));
                return;
            }
        };

        let user_message = Message::user(job.frame.message.clone());
        let bot_message = Message::bot(outcome.response.clone(), Some(outcome.matched.clone()));

        let _ = job.outbound.send(Outbound::JobSearchResponse {
            data: JobSearchData {
                response: outcome.response,
                matched_jobs: outcome.matched,
                jobs: outcome.jobs,
                total_jobs_found: outcome.total_jobs_found,
                total_matched_jobs: outcome.total_matched_jobs,
                requirements_extracted: outcome.criteria,
                source_errors: outcome.source_errors,
                chat_id: chat_id.to_string(),
            },
            timestamp: Utc::now(),
        });

        if let Err(e) = store
            .append_exchange(chat_id, &job.user_id, &user_message, &bot_message)
            .await
        {
            tracing::error!(chat_id = %chat_id, error = %e, "failed to persist exchange");
        }
    }

    /// One GC pass: collects detached sessions past their grace period
    /// and cancels live connections with no traffic for longer than the
    /// idle timeout, so dead connections do not sit out the whole grace
    /// period.
    pub async fn sweep(&self) -> (usize, usize) {
        let collected = {
            let mut detached = self.detached.lock().await;
            let before = detached.len();
            detached.retain(|_, d| d.since.elapsed() < self.grace);
            before - detached.len()
        };

        let mut idled = 0usize;
        {
            let live = self.live.read().await;
            for (chat_id, handle) in live.iter() {
                if handle.last_seen.elapsed() >= self.idle_timeout {
                    tracing::info!(chat_id = %chat_id, "cancelling idle connection");
                    handle.cancel.cancel();
                    idled += 1;
                }
            }
        }

        // A collected session is terminal: cancel and drop its worker.
        {
            let live = self.live.read().await;
            let detached = self.detached.lock().await;
            let mut workers = self.chat_workers.lock().await;
            workers.retain(|chat_id, worker| {
                let keep = live.contains_key(chat_id) || detached.contains_key(chat_id);
                if !keep {
                    worker.cancel.cancel();
                }
                keep
            });
        }

        (idled, collected)
    }
}
