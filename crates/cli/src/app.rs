//! Composition root: opens the file-backed adapters under the data directory
//! and assembles the worker and listener from them.
//!
//! An [`App`] owns its data directory: the queue and the record store are both
//! locked while it is alive, so `serve` and `process-queue` never run against
//! the same data at once.

use std::sync::Arc;

use anyhow::Context;
use listener::ListenerState;
use storage::{FileSettings, JsonFileContentStore, SpoolDeadLetters, SpoolQueue};
use worker::{CrudManager, NotificationProcessor, QueueRunner, UuidLookup};

use crate::config::AppConfig;

pub struct App {
    pub config: AppConfig,
    pub queue: Arc<SpoolQueue>,
    pub dead_letters: Arc<SpoolDeadLetters>,
    pub store: Arc<JsonFileContentStore>,
    pub settings: Arc<FileSettings>,
}

impl App {
    #[tracing::instrument(level = "debug", skip_all, fields(data_dir = %config.data_dir.display()))]
    pub async fn open(config: AppConfig) -> anyhow::Result<Self> {
        let queue = SpoolQueue::open(config.queue_dir())
            .await
            .with_context(|| format!("opening the queue at {}", config.queue_dir().display()))?;
        let dead_letters = queue.dead_letters();
        let store = JsonFileContentStore::open(config.records_path())
            .await
            .with_context(|| {
                format!("opening the record store at {}", config.records_path().display())
            })?;
        let settings = FileSettings::new(config.settings_path());

        Ok(Self {
            queue: Arc::new(queue),
            dead_letters: Arc::new(dead_letters),
            store: Arc::new(store),
            settings: Arc::new(settings),
            config,
        })
    }

    pub fn runner(&self) -> QueueRunner {
        let lookup = UuidLookup::new(self.store.clone());
        let crud = CrudManager::new(self.store.clone()).with_body_format(self.config.body_format);
        let processor = NotificationProcessor::new(lookup, Arc::new(crud))
            .with_ignored_keys(self.config.ignored_keys.clone());
        QueueRunner::new(self.queue.clone(), self.dead_letters.clone(), processor)
            .with_time_budget(self.config.worker_time_budget)
    }

    pub fn listener_state(&self) -> ListenerState {
        ListenerState::new(self.queue.clone(), self.settings.clone())
    }
}
