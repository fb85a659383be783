//! Conversation sessions.
//!
//! A [`Session`] is one thread of one user's project. It owns the thread's
//! state behind an async mutex; every prompt becomes a [`Turn`] that holds
//! the lock until it has been saved. If the previous turn stopped on an
//! interrupt, the next prompt is taken as the answer to it instead of as
//! a new user message.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use saferplaces_core::error::Error;
use saferplaces_core::message::{Message, ThreadId};
use saferplaces_core::state::{ConversationState, LayerDescriptor, LayerType, StateUpdate};
use saferplaces_core::storage::{Checkpoint, PendingInterrupt};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::context;
use crate::event::TurnEvent;
use crate::graph::{NodeId, unanswered_calls_update};
use crate::runtime::AgentRuntime;
use crate::turn::{LAYER_REGISTRY_FILE, Turn};

/// State guarded by the session lock.
#[derive(Debug, Default)]
pub struct SessionState {
    pub(crate) state: ConversationState,
    pub(crate) pending: Option<PendingInterrupt>,
}

/// A layer to add to the project's registry.
#[derive(Debug, Clone, Default)]
pub struct NewLayer {
    pub src: String,
    /// Defaults to the file stem of `src`.
    pub title: Option<String>,
    pub description: Option<String>,
    /// Defaults to a guess from the extension of `src`.
    pub layer_type: Option<LayerType>,
    pub metadata: Option<Map<String, Value>>,
}

impl NewLayer {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            ..Default::default()
        }
    }

    fn into_descriptor(self) -> LayerDescriptor {
        let title = self.title.unwrap_or_else(|| {
            Path::new(&self.src)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.src.clone())
        });
        let layer_type = self.layer_type.unwrap_or_else(|| LayerType::from_src(&self.src));
        let mut layer = LayerDescriptor::new(title, self.src, layer_type);
        if let Some(description) = self.description {
            layer = layer.with_description(description);
        }
        if let Some(metadata) = self.metadata {
            layer = layer.with_metadata(metadata);
        }
        layer
    }
}

pub struct Session {
    runtime: Arc<AgentRuntime>,
    thread_id: ThreadId,
    user_id: String,
    project_id: String,
    bucket: String,
    inner: Arc<Mutex<SessionState>>,
}

impl Session {
    /// Open a thread: restore its checkpoint if there is one, and the
    /// project's layer registry from storage.
    pub async fn start(
        runtime: Arc<AgentRuntime>,
        thread_id: ThreadId,
        user_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Result<Self, Error> {
        let user_id = user_id.into();
        let project_id = project_id.into();
        let bucket = runtime.project_bucket(&user_id, &project_id);

        let mut inner = match runtime.checkpointer.load(&thread_id).await? {
            Some(checkpoint) => {
                info!(thread = %thread_id, pending = checkpoint.pending.is_some(), "thread restored");
                SessionState {
                    state: checkpoint.state,
                    pending: checkpoint.pending,
                }
            }
            None => SessionState {
                state: ConversationState {
                    user_id: Some(user_id.clone()),
                    project_id: Some(project_id.clone()),
                    available_tools: runtime.tool_binding(),
                    ..Default::default()
                },
                pending: None,
            },
        };

        let uri = format!("{bucket}/{LAYER_REGISTRY_FILE}");
        match saferplaces_storage::load_json::<Vec<LayerDescriptor>>(runtime.store.as_ref(), &uri).await {
            Ok(Some(layers)) => {
                info!(uri = %uri, count = layers.len(), "layer registry restored");
                inner.state.apply(StateUpdate::new().layers(layers));
            }
            Ok(None) => {}
            Err(e) => warn!(uri = %uri, error = %e, "layer registry not restored"),
        }

        Ok(Self {
            runtime,
            thread_id,
            user_id,
            project_id,
            bucket,
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Storage prefix of this session's project.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Start a turn for `text`. Waits for any turn still running on this
    /// thread.
    pub async fn prompt(&self, text: &str) -> Turn {
        let mut guard = self.inner.clone().lock_owned().await;
        let layers_before = guard.state.layer_registry.clone();

        if let Some(pending) = guard.pending.take() {
            info!(thread = %self.thread_id, node = %pending.node, "answering interrupt");
            return match NodeId::parse(&pending.node) {
                Ok(node) => self.turn(guard, Some(node), Some(text.to_string()), layers_before),
                Err(e) => {
                    let mut turn = self.turn(guard, None, None, layers_before);
                    turn.push(TurnEvent::Error { message: e.to_string() });
                    turn
                }
            };
        }

        if let Some(repair) = unanswered_calls_update(&guard.state) {
            warn!(thread = %self.thread_id, calls = repair.messages.len(), "answering tool calls left by an unfinished turn");
            guard.state.apply(repair);
        }

        let now = context::nowtime(Utc::now());
        let mut update = StateUpdate::new().message(context::nowtime_message(&now));
        if let Some(layers) = context::layer_registry_message(&guard.state.layer_registry) {
            update = update.message(layers);
        }
        update = update.message(Message::user(text));
        update.nowtime = Some(now);
        update.user_id = Some(self.user_id.clone());
        update.project_id = Some(self.project_id.clone());
        guard.state.apply(update);

        self.turn(guard, Some(NodeId::Chatbot), None, layers_before)
    }

    fn turn(
        &self,
        guard: tokio::sync::OwnedMutexGuard<SessionState>,
        start: Option<NodeId>,
        resume: Option<String>,
        layers_before: Vec<LayerDescriptor>,
    ) -> Turn {
        Turn::new(
            self.runtime.clone(),
            guard,
            self.thread_id.clone(),
            self.bucket.clone(),
            start,
            resume,
            layers_before,
        )
    }

    /// Add a layer outside of any turn and persist the registry.
    pub async fn register_layer(&self, layer: NewLayer) -> Result<Vec<LayerDescriptor>, Error> {
        let mut guard = self.inner.lock().await;
        let layer = layer.into_descriptor();
        info!(thread = %self.thread_id, src = %layer.src, "layer registered");
        guard.state.apply(StateUpdate::new().layers([layer]));

        let uri = format!("{}/{LAYER_REGISTRY_FILE}", self.bucket);
        saferplaces_storage::save_json(self.runtime.store.as_ref(), &uri, &guard.state.layer_registry).await?;
        let checkpoint = Checkpoint::new(self.thread_id.clone(), guard.state.clone(), guard.pending.clone());
        self.runtime.checkpointer.save(&checkpoint).await?;
        Ok(guard.state.layer_registry.clone())
    }

    pub async fn layers(&self) -> Vec<LayerDescriptor> {
        self.inner.lock().await.state.layer_registry.clone()
    }

    /// The interrupt the next prompt will answer, if any.
    pub async fn pending(&self) -> Option<PendingInterrupt> {
        self.inner.lock().await.pending.clone()
    }

    pub async fn state(&self) -> ConversationState {
        self.inner.lock().await.state.clone()
    }
}

/// Open sessions keyed by thread id.
pub struct SessionRegistry {
    runtime: Arc<AgentRuntime>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self {
            runtime,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    /// Open a session. A thread that is already open is handed back as is,
    /// so its turns keep sharing one lock; reopening it for a different
    /// user or project fails. A fresh thread id is generated when none is
    /// given.
    pub async fn start(
        &self,
        thread_id: Option<ThreadId>,
        user_id: &str,
        project_id: &str,
    ) -> Result<Arc<Session>, Error> {
        let thread_id = thread_id.unwrap_or_default();
        let mut sessions = self.sessions.write().await;
        if let Some(open) = sessions.get(thread_id.as_str()) {
            if open.user_id() != user_id || open.project_id() != project_id {
                return Err(Error::ThreadInUse {
                    thread: thread_id.to_string(),
                });
            }
            debug!(thread = %thread_id, "thread already open");
            return Ok(open.clone());
        }

        let session = Arc::new(Session::start(self.runtime.clone(), thread_id, user_id, project_id).await?);
        sessions.insert(session.thread_id().as_str().to_string(), session.clone());
        Ok(session)
    }

    pub async fn get(&self, thread_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(thread_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
