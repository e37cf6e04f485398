use std::collections::HashMap;
use std::sync::Arc;

use slackbot_core::AppConfig;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::ResolvedBackend;
use crate::error::AgentError;
use crate::session::{Session, SessionOptions};
use crate::tools::ToolRegistry;

/// Creates the session backing a new conversation.
pub trait SessionFactory: Send + Sync {
    fn create(&self, conversation_key: &str) -> Session;
}

/// Builds sessions from the loaded application config and the shared backend.
pub struct ConfiguredSessionFactory {
    config: Arc<AppConfig>,
    backend: Arc<ResolvedBackend>,
    tools: ToolRegistry,
}

impl ConfiguredSessionFactory {
    pub fn new(config: Arc<AppConfig>, backend: Arc<ResolvedBackend>, tools: ToolRegistry) -> Self {
        Self { config, backend, tools }
    }
}

impl SessionFactory for ConfiguredSessionFactory {
    fn create(&self, _conversation_key: &str) -> Session {
        Session::from_config(
            self.config.session.name.clone(),
            &self.config.mcp_servers,
            Arc::clone(&self.backend),
            self.tools.clone(),
            SessionOptions::from(&self.config.session),
        )
    }
}

struct PooledSession {
    session: Arc<Mutex<Session>>,
    last_used: u64,
}

#[derive(Default)]
struct SessionPool {
    entries: HashMap<String, PooledSession>,
    clock: u64,
}

impl SessionPool {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn least_recently_used(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
    }
}

/// Keeps one [`Session`] per conversation and serialises turns within each.
pub struct AgentRuntime {
    factory: Arc<dyn SessionFactory>,
    max_sessions: usize,
    pool: Mutex<SessionPool>,
}

impl AgentRuntime {
    pub fn new(factory: Arc<dyn SessionFactory>, max_sessions: usize) -> Self {
        Self { factory, max_sessions: max_sessions.max(1), pool: Mutex::new(SessionPool::default()) }
    }

    /// Runs `text` as the next turn of the conversation identified by `conversation_key`.
    ///
    /// The session is created and connected on first use. When the pool is
    /// full, the least recently used session is dropped from the pool and
    /// cleaned up in the background once its current turn ends.
    pub async fn handle_thread_message(
        &self,
        conversation_key: &str,
        text: &str,
    ) -> Result<String, AgentError> {
        loop {
            let pooled = self.checkout(conversation_key).await;
            let mut session = pooled.lock().await;

            if session.is_closed() {
                // Evicted while this turn waited for the lock.
                debug!(
                    conversation = conversation_key,
                    "session was cleaned up while waiting, checking out a new one"
                );
                drop(session);
                self.forget(conversation_key, &pooled).await;
                continue;
            }

            if !session.is_connected() {
                let report = session.connect().await;
                debug!(
                    conversation = conversation_key,
                    connected = report.connected.len(),
                    failed = report.failed.len(),
                    "session tool servers connected"
                );
            }

            return session.run(text).await;
        }
    }

    async fn checkout(&self, conversation_key: &str) -> Arc<Mutex<Session>> {
        let mut pool = self.pool.lock().await;
        let now = pool.tick();

        if let Some(entry) = pool.entries.get_mut(conversation_key) {
            entry.last_used = now;
            return Arc::clone(&entry.session);
        }

        if pool.entries.len() >= self.max_sessions {
            if let Some(key) = pool.least_recently_used() {
                if let Some(entry) = pool.entries.remove(&key) {
                    retire(key, entry.session);
                }
            }
        }

        let session = Arc::new(Mutex::new(self.factory.create(conversation_key)));
        info!(
            event_name = "agent.runtime.session_created",
            conversation = conversation_key,
            "created session for conversation"
        );
        pool.entries.insert(
            conversation_key.to_string(),
            PooledSession { session: Arc::clone(&session), last_used: now },
        );

        session
    }

    /// Drops the pool entry for `conversation_key` if it still points at `session`.
    async fn forget(&self, conversation_key: &str, session: &Arc<Mutex<Session>>) {
        let mut pool = self.pool.lock().await;
        if pool.entries.get(conversation_key).is_some_and(|entry| Arc::ptr_eq(&entry.session, session)) {
            pool.entries.remove(conversation_key);
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.pool.lock().await.entries.len()
    }

    pub async fn has_session(&self, conversation_key: &str) -> bool {
        self.pool.lock().await.entries.contains_key(conversation_key)
    }

    /// Cleans up and drops every live session.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, PooledSession)> =
            self.pool.lock().await.entries.drain().collect();

        for (key, entry) in drained {
            let report = entry.session.lock().await.cleanup().await;
            info!(
                event_name = "agent.runtime.session_closed",
                conversation = %key,
                cleanup_failures = report.failed.len(),
                "session closed"
            );
        }
    }
}

/// Cleans up an evicted session without holding up the turn that evicted it.
fn retire(conversation_key: String, session: Arc<Mutex<Session>>) {
    tokio::spawn(async move {
        let report = session.lock().await.cleanup().await;
        info!(
            event_name = "agent.runtime.session_evicted",
            conversation = %conversation_key,
            cleanup_failures = report.failed.len(),
            "evicted least recently used session"
        );
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::{AgentRuntime, SessionFactory};
    use crate::servers::ToolServer;
    use crate::session::Session;
    use crate::testing::{backend_with, FakeToolServer, ScriptedLlm};
    use crate::tools::ToolRegistry;

    struct FakeFactory {
        llm: Arc<ScriptedLlm>,
        server: Arc<FakeToolServer>,
        created: AtomicUsize,
    }

    impl FakeFactory {
        fn new() -> Self {
            Self {
                llm: Arc::new(ScriptedLlm::echo("ack")),
                server: Arc::new(FakeToolServer::healthy("time")),
                created: AtomicUsize::new(0),
            }
        }
    }

    impl SessionFactory for FakeFactory {
        fn create(&self, _conversation_key: &str) -> Session {
            self.created.fetch_add(1, Ordering::SeqCst);
            Session::new(
                "Slack Bot",
                backend_with(self.llm.clone()),
                ToolRegistry::default(),
                vec![self.server.clone() as Arc<dyn ToolServer>],
                Default::default(),
            )
        }
    }

    #[tokio::test]
    async fn one_session_per_conversation_connected_once() {
        let factory = Arc::new(FakeFactory::new());
        let runtime = AgentRuntime::new(factory.clone(), 8);

        assert_eq!(runtime.handle_thread_message("C1:100.1", "hi").await.expect("reply"), "ack");
        runtime.handle_thread_message("C1:100.1", "again").await.expect("reply");
        runtime.handle_thread_message("C1:200.2", "other thread").await.expect("reply");

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(factory.server.connect_attempts.load(Ordering::SeqCst), 2);
        assert_eq!(runtime.active_sessions().await, 2);
    }

    #[tokio::test]
    async fn least_recently_used_session_is_evicted_and_cleaned_up() {
        let factory = Arc::new(FakeFactory::new());
        let runtime = AgentRuntime::new(factory.clone(), 2);

        runtime.handle_thread_message("a", "1").await.expect("reply");
        runtime.handle_thread_message("b", "2").await.expect("reply");
        runtime.handle_thread_message("a", "3").await.expect("reply");
        runtime.handle_thread_message("c", "4").await.expect("reply");

        assert_eq!(runtime.active_sessions().await, 2);
        assert!(runtime.has_session("a").await);
        assert!(!runtime.has_session("b").await);
        assert!(runtime.has_session("c").await);
        wait_for_cleanups(&factory, 1).await;
    }

    #[tokio::test]
    async fn eviction_skips_busy_session_and_never_reconnects_it() {
        let factory = Arc::new(FakeFactory::new());
        let runtime = AgentRuntime::new(factory.clone(), 1);
        runtime.handle_thread_message("a", "1").await.expect("reply");

        let stale = runtime.checkout("a").await;
        let busy = stale.lock().await;
        let reply = timeout(Duration::from_secs(5), runtime.handle_thread_message("b", "2"))
            .await
            .expect("new conversation should not wait for the evicted one")
            .expect("reply");
        assert_eq!(reply, "ack");
        assert_eq!(factory.server.cleanup_attempts.load(Ordering::SeqCst), 0);

        drop(busy);
        wait_for_cleanups(&factory, 1).await;

        let mut evicted = stale.lock().await;
        assert!(evicted.is_closed());
        assert!(evicted.connect().await.connected.is_empty());
        assert_eq!(factory.server.connect_attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closed_pool_entry_is_replaced_by_a_fresh_session() {
        let factory = Arc::new(FakeFactory::new());
        let runtime = AgentRuntime::new(factory.clone(), 4);
        let stale = runtime.checkout("a").await;
        stale.lock().await.cleanup().await;

        let reply = runtime.handle_thread_message("a", "hi").await.expect("reply");

        assert_eq!(reply, "ack");
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(factory.server.connect_attempts.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.active_sessions().await, 1);
    }

    #[tokio::test]
    async fn shutdown_cleans_up_every_session() {
        let factory = Arc::new(FakeFactory::new());
        let runtime = AgentRuntime::new(factory.clone(), 8);
        runtime.handle_thread_message("a", "1").await.expect("reply");
        runtime.handle_thread_message("b", "2").await.expect("reply");

        runtime.shutdown().await;

        assert_eq!(runtime.active_sessions().await, 0);
        assert_eq!(factory.server.cleanup_attempts.load(Ordering::SeqCst), 2);
    }

    async fn wait_for_cleanups(factory: &FakeFactory, expected: usize) {
        for _ in 0..100 {
            if factory.server.cleanup_attempts.load(Ordering::SeqCst) >= expected {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(factory.server.cleanup_attempts.load(Ordering::SeqCst), expected);
    }
}
