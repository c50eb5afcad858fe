use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use regdesk::registration::{
    FileStorage, Notification, Notifier, NotifyError, StorageError, StorageKey, Upload,
};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Uploads written to a local directory under random names.
#[derive(Debug, Clone)]
pub(crate) struct LocalFileStorage {
    root: PathBuf,
    max_bytes: usize,
}

impl LocalFileStorage {
    pub(crate) fn open(root: impl AsRef<Path>, max_bytes: usize) -> Result<Self, std::io::Error> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, max_bytes })
    }

    fn path_for(&self, key: &StorageKey) -> Option<PathBuf> {
        let valid = !key.0.is_empty()
            && !key.0.starts_with('.')
            && key
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
        valid.then(|| self.root.join(&key.0))
    }
}

impl FileStorage for LocalFileStorage {
    fn store(&self, upload: &Upload) -> Result<StorageKey, StorageError> {
        if upload.data.len() > self.max_bytes {
            return Err(StorageError::Rejected(format!(
                "{} exceeds the {} byte upload limit",
                upload.file_name, self.max_bytes
            )));
        }

        let extension = Path::new(&upload.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(str::to_ascii_lowercase);
        let id = Uuid::new_v4().simple().to_string();
        let key = StorageKey(match extension {
            Some(extension) => format!("{id}.{extension}"),
            None => id,
        });

        fs::write(self.root.join(&key.0), &upload.data)?;
        info!(%key, file_name = %upload.file_name, bytes = upload.data.len(), "upload stored");
        Ok(key)
    }

    fn resolve_path(&self, key: &StorageKey) -> Option<PathBuf> {
        self.path_for(key).filter(|path| path.is_file())
    }

    fn discard(&self, key: &StorageKey) -> Result<(), StorageError> {
        let Some(path) = self.path_for(key) else {
            return Err(StorageError::Rejected(format!("invalid storage key {key}")));
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Notifier that logs every notification and keeps the history in memory.
#[derive(Default, Clone)]
pub(crate) struct LoggingNotifier {
    history: Arc<Mutex<Vec<(DateTime<Utc>, Notification)>>>,
}

impl LoggingNotifier {
    pub(crate) fn history(&self) -> Vec<(DateTime<Utc>, Notification)> {
        self.history
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Notifier for LoggingNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            participant_id = %notification.participant_id,
            email = %notification.email,
            template = %notification.template,
            key = %notification.key,
            "notification dispatched"
        );
        self.history
            .lock()
            .map_err(|_| NotifyError::Transport("notification history poisoned".to_string()))?
            .push((Utc::now(), notification));
        Ok(())
    }
}
