// src/session.rs - Emulation sessions and their lifecycle
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::control::{self, ControlMessage};
use crate::error::{EmuError, EmuResult};
use crate::event::{Event, EventKind};
use crate::model::{SharedModel, SystemModel};
use crate::sandbox::{ExecutionOutcome, SandboxRunner};
use crate::tick::spawn_tick_loop;

struct RunningExecution {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<ExecutionOutcome>,
}

/// One independent emulated board plus at most one running execution.
pub struct Session {
    id: String,
    model: SharedModel,
    runner: Arc<SandboxRunner>,
    execution: Mutex<Option<RunningExecution>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Session {
    /// Must be called inside a tokio runtime: the tick loop starts immediately.
    pub fn new(id: impl Into<String>, config: &Config, runner: Arc<SandboxRunner>) -> Arc<Self> {
        let id = id.into();
        let model = Arc::new(Mutex::new(SystemModel::new(&id, config)));
        let (shutdown_tx, _) = broadcast::channel(1);
        if let Some(period) = config.session.tick_interval() {
            spawn_tick_loop(model.clone(), period, shutdown_tx.subscribe());
        }
        tracing::info!("Session {} created", id);
        Arc::new(Self {
            id,
            model,
            runner,
            execution: Mutex::new(None),
            shutdown_tx,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    /// Start `code` in the background. Fails if a run is still in progress.
    pub async fn execute(&self, code: String) -> EmuResult<()> {
        let mut slot = self.execution.lock().await;
        if slot.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            return Err(EmuError::validation("an execution is already running in this session"));
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        let runner = self.runner.clone();
        let model = self.model.clone();
        let handle = tokio::spawn(async move { runner.run(&code, model, stop_rx).await });
        *slot = Some(RunningExecution { stop_tx, handle });
        Ok(())
    }

    /// Stop the running execution and wait for it to wind down.
    pub async fn stop(&self) -> Option<ExecutionOutcome> {
        let running = self.execution.lock().await.take();
        match running {
            Some(running) if !running.handle.is_finished() => {
                let _ = running.stop_tx.send(());
                match running.handle.await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        tracing::error!("Execution task of session {} failed: {}", self.id, e);
                        None
                    }
                }
            }
            _ => {
                self.model.lock().await.emit(
                    "",
                    EventKind::ExecutionStopped { message: "No active execution to stop".into() },
                );
                None
            }
        }
    }

    /// Wait for the current execution, if any, to finish on its own.
    pub async fn wait_for_execution(&self) -> Option<ExecutionOutcome> {
        let running = self.execution.lock().await.take()?;
        running.handle.await.ok()
    }

    pub async fn subscribe(&self) -> mpsc::Receiver<Event> {
        self.model.lock().await.events_mut().subscribe().1
    }

    /// Invoke `handler` once per event, in emission order, until teardown.
    pub async fn subscribe_with<F>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(Event) + Send + 'static,
    {
        let mut rx = self.subscribe().await;
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
        })
    }

    pub async fn handle_control(&self, message: ControlMessage) {
        let result = match message {
            ControlMessage::Execute { code } => self.execute(code).await,
            ControlMessage::Stop => {
                self.stop().await;
                Ok(())
            }
            other => control::apply(&mut *self.model.lock().await, other),
        };
        if let Err(e) = result {
            self.report_error(&e).await;
        }
    }

    pub async fn report_error(&self, err: &EmuError) {
        tracing::debug!("Session {}: {}", self.id, err);
        self.model
            .lock()
            .await
            .emit("", EventKind::error(format!("{}: {}", err.kind(), err)));
    }

    /// Kill any execution, stop the tick loop and close every subscriber.
    pub async fn teardown(&self) {
        if let Some(running) = self.execution.lock().await.take() {
            let _ = running.stop_tx.send(());
            if let Err(e) = running.handle.await {
                tracing::warn!("Execution task of session {} failed: {}", self.id, e);
            }
        }
        let _ = self.shutdown_tx.send(());
        self.model.lock().await.events_mut().clear_subscribers();
        tracing::info!("Session {} torn down", self.id);
    }
}

/// All live sessions, keyed by id. Each owns independent device state.
pub struct SessionManager {
    config: Config,
    runner: Arc<SandboxRunner>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        let runner = Arc::new(SandboxRunner::new(config.sandbox.clone()));
        Self {
            config,
            runner,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Join an existing session or create one; a missing id gets a fresh uuid.
    pub async fn open(&self, id: Option<String>) -> Arc<Session> {
        let id = id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id, &self.config, self.runner.clone()))
            .clone()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn subscribe<F>(&self, id: &str, handler: F) -> EmuResult<JoinHandle<()>>
    where
        F: FnMut(Event) + Send + 'static,
    {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| EmuError::NotConfigured(format!("Session {id}")))?;
        Ok(session.subscribe_with(handler).await)
    }

    pub async fn teardown(&self, id: &str) -> bool {
        let session = self.sessions.write().await.remove(id);
        match session {
            Some(session) => {
                session.teardown().await;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let manager = SessionManager::new(Config::default());
        let a = manager.open(Some("a".into())).await;
        let b = manager.open(Some("b".into())).await;
        a.model().lock().await.drive_input(4, true).unwrap();
        assert_eq!(a.model().lock().await.events().last_seq(), 1);
        assert_eq!(b.model().lock().await.events().last_seq(), 0);
        assert!(Arc::ptr_eq(&a, &manager.open(Some("a".into())).await));
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn test_stop_without_execution() {
        let manager = SessionManager::new(Config::default());
        let session = manager.open(None).await;
        let mut rx = session.subscribe().await;
        assert_eq!(session.stop().await, None);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event.kind, EventKind::ExecutionStopped { .. }));
    }

    #[tokio::test]
    async fn test_teardown_closes_subscribers() {
        let manager = SessionManager::new(Config::default());
        let session = manager.open(Some("t".into())).await;
        let mut rx = session.subscribe().await;
        assert!(manager.teardown("t").await);
        assert!(rx.recv().await.is_none());
        assert!(manager.get("t").await.is_none());
        assert!(!manager.teardown("t").await);
    }

    #[tokio::test]
    async fn test_subscribe_with_handler() {
        let manager = SessionManager::new(Config::default());
        let session = manager.open(Some("h".into())).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager
            .subscribe("h", move |event: Event| {
                let _ = tx.send(event.seq);
            })
            .await
            .unwrap();
        assert!(manager.subscribe("missing", |_| {}).await.is_err());
        session.handle_control(ControlMessage::Ping).await;
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn test_control_errors_become_events() {
        let manager = SessionManager::new(Config::default());
        let session = manager.open(None).await;
        let mut rx = session.subscribe().await;
        session
            .handle_control(ControlMessage::RemoveComponent { id: "ghost".into() })
            .await;
        match rx.recv().await.unwrap().kind {
            EventKind::Error { message } => assert!(message.starts_with("UnknownComponentError")),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
