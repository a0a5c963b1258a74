//! LSP supervision: one supervised server per language.
//!
//! [`LspManager`] owns a [`Supervisor`] per language id. Servers are
//! registered from configuration and started lazily on the first document
//! of that language; start failures are logged and the language is left
//! without LSP support rather than failing the editor.

pub mod server;
pub mod supervisor;

pub use server::{
    LanguageServer, LspServerConfig, ProcessServerFactory, ServerExit, ServerFactory,
    SpawnedServer, TextRange,
};
pub use supervisor::{
    Supervisor, SupervisorConfig, SupervisorEvent, SupervisorEventKind, SupervisorState,
    TrackedDocument,
};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use keystorm_core::{Error, Result};
use url::Url;

use crate::bus::EventBus;

pub struct LspManager {
    supervisors: RwLock<HashMap<String, Arc<Supervisor>>>,
    config: SupervisorConfig,
    bus: RwLock<Option<Arc<EventBus>>>,
}

impl LspManager {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            supervisors: RwLock::new(HashMap::new()),
            config,
            bus: RwLock::new(None),
        }
    }

    pub fn set_bus(&self, bus: Arc<EventBus>) {
        *self.bus.write().unwrap() = Some(Arc::clone(&bus));
        for supervisor in self.supervisors.read().unwrap().values() {
            supervisor.set_bus(Arc::clone(&bus));
        }
    }

    /// Register a factory for a language. Replaces any previous registration.
    pub fn register(&self, language_id: &str, factory: Arc<dyn ServerFactory>) {
        let supervisor = Supervisor::new(language_id, factory, self.config.clone());
        if let Some(bus) = self.bus.read().unwrap().clone() {
            supervisor.set_bus(bus);
        }
        self.supervisors
            .write()
            .unwrap()
            .insert(language_id.to_string(), supervisor);
    }

    /// Register stdio servers from configuration entries.
    pub fn register_configured(&self, servers: &[LspServerConfig]) {
        for config in servers {
            self.register(
                &config.language_id,
                Arc::new(ProcessServerFactory::new(config.clone())),
            );
        }
    }

    pub fn supervisor(&self, language_id: &str) -> Option<Arc<Supervisor>> {
        self.supervisors.read().unwrap().get(language_id).cloned()
    }

    pub fn languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.supervisors.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Supervisor for a language, started if it is still idle. Start
    /// failures surface to the caller; the supervisor stays idle.
    pub async fn ensure_started(&self, language_id: &str) -> Result<Arc<Supervisor>> {
        let supervisor = self
            .supervisor(language_id)
            .ok_or(Error::ComponentNotAvailable("language server"))?;
        if supervisor.state() == SupervisorState::Idle {
            supervisor.start().await?;
        }
        Ok(supervisor)
    }

    pub async fn open_document(&self, language_id: &str, uri: &Url, text: &str) -> Result<()> {
        let supervisor = self.ensure_started(language_id).await?;
        supervisor.open_document(uri, language_id, text).await
    }

    pub async fn change_document(
        &self,
        language_id: &str,
        uri: &Url,
        range: Option<TextRange>,
        text: &str,
    ) -> Result<()> {
        let supervisor = self
            .supervisor(language_id)
            .ok_or(Error::ComponentNotAvailable("language server"))?;
        supervisor.change_document(uri, range, text).await
    }

    pub async fn close_document(&self, language_id: &str, uri: &Url) -> Result<()> {
        let supervisor = self
            .supervisor(language_id)
            .ok_or(Error::ComponentNotAvailable("language server"))?;
        supervisor.close_document(uri).await
    }

    /// Stop every supervisor, bounded by `deadline` overall.
    pub async fn shutdown_all(&self, deadline: Duration) {
        let supervisors: Vec<Arc<Supervisor>> =
            self.supervisors.read().unwrap().values().cloned().collect();
        let stop_all = async {
            for supervisor in supervisors {
                if let Err(err) = supervisor.stop().await {
                    tracing::warn!(language = supervisor.language_id(), %err, "supervisor stop failed");
                }
            }
        };
        if tokio::time::timeout(deadline, stop_all).await.is_err() {
            tracing::warn!("lsp shutdown exceeded its deadline");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unregistered_language_is_unavailable() {
        let manager = LspManager::new(SupervisorConfig::default());
        let uri = Url::parse("file:///tmp/a.zig").unwrap();
        let err = manager.open_document("zig", &uri, "").await.unwrap_err();
        assert!(matches!(err, Error::ComponentNotAvailable(_)));
    }

    #[tokio::test]
    async fn test_register_configured_creates_supervisors() {
        let manager = LspManager::new(SupervisorConfig::default());
        manager.register_configured(&[
            LspServerConfig {
                language_id: "rust".into(),
                command: "rust-analyzer".into(),
                args: vec![],
            },
            LspServerConfig {
                language_id: "go".into(),
                command: "gopls".into(),
                args: vec![],
            },
        ]);
        assert_eq!(manager.languages(), vec!["go", "rust"]);
        assert_eq!(
            manager.supervisor("rust").unwrap().state(),
            SupervisorState::Idle
        );
    }
}
