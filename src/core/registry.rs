//! Queue registry.
//!
//! The registry caches one [`QueueHandle`] per (queue name, role). It is an
//! ordinary value owned by the application and passed to producers and
//! workers; there is no global instance.

use super::handle::{QueueEvent, QueueHandle};
use crate::config::{QueueSettings, Role};
use crate::error::{HiveError, HiveResult, SerializedError};
use crate::queue::QueueConnector;
use crate::report::{ErrorContext, ErrorReporter, TracingReporter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Map key for a (name, role) pair.
///
/// Worker handles use the bare name, producer handles `"{name}:producer"`.
pub fn registry_key(name: &str, role: Role) -> String {
    match role {
        Role::Worker => name.to_string(),
        Role::Producer => format!("{name}:producer"),
    }
}

/// Process-local cache of queue handles.
pub struct QueueRegistry {
    connector: Arc<dyn QueueConnector>,
    reporter: Arc<dyn ErrorReporter>,
    settings: QueueSettings,
    handles: Mutex<HashMap<String, Arc<QueueHandle>>>,
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl QueueRegistry {
    /// Create a registry that opens queues through `connector`.
    ///
    /// `settings` is the template every handle starts from; role flags are
    /// overwritten per handle.
    pub fn new(connector: Arc<dyn QueueConnector>, settings: QueueSettings) -> Self {
        Self {
            connector,
            reporter: Arc::new(TracingReporter),
            settings,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Use a custom error reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Error reporter shared by every handle.
    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.reporter
    }

    /// Return the cached handle for (`name`, `role`), opening it on first use.
    pub async fn get_or_create(&self, name: &str, role: Role) -> HiveResult<Arc<QueueHandle>> {
        if name.trim().is_empty() {
            return Err(HiveError::InvalidQueueName);
        }

        let key = registry_key(name, role);
        // Held across connect so concurrent callers never open the same key twice.
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(&key) {
            return Ok(Arc::clone(handle));
        }

        let settings = self.settings.clone().for_role(role);
        let backend = match self.connector.connect(name, &settings).await {
            Ok(backend) => backend,
            Err(e) => {
                let kind = match role {
                    Role::Worker => "queue-error",
                    Role::Producer => "producer-queue-error",
                };
                tracing::error!(queue = name, role = %role, error = %e, "Failed to open queue");
                self.reporter.capture(
                    &SerializedError::from_hive(&e),
                    &ErrorContext::new().tag("queue", name).tag("type", kind),
                );
                return Err(e);
            }
        };

        let handle = Arc::new(QueueHandle::new(
            name,
            role,
            settings,
            backend,
            Arc::clone(&self.reporter),
        ));
        if role == Role::Worker {
            handle.emit(QueueEvent::Ready);
        }

        handles.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Cached handle for (`name`, `role`), without opening one.
    pub async fn get(&self, name: &str, role: Role) -> Option<Arc<QueueHandle>> {
        self.handles
            .lock()
            .await
            .get(&registry_key(name, role))
            .cloned()
    }

    /// Number of cached handles.
    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Whether no handles are cached.
    pub async fn is_empty(&self) -> bool {
        self.handles.lock().await.is_empty()
    }

    /// Close every handle concurrently and forget the ones that closed.
    ///
    /// Handles are taken out of the registry up front. Any that fail to close
    /// are put back so a later call can retry them, and the first error is
    /// returned.
    pub async fn close_all(&self) -> HiveResult<()> {
        let handles: Vec<(String, Arc<QueueHandle>)> =
            std::mem::take(&mut *self.handles.lock().await).into_iter().collect();

        let results =
            futures::future::join_all(handles.iter().map(|(_, handle)| handle.close())).await;

        let count = handles.len();
        let mut first_error = None;
        let mut unclosed = Vec::new();
        for ((key, handle), result) in handles.into_iter().zip(results) {
            if let Err(e) = result {
                tracing::error!(
                    queue = %handle.name(),
                    role = %handle.role(),
                    error = %e,
                    "Failed to close queue"
                );
                unclosed.push((key, handle));
                first_error.get_or_insert(e);
            }
        }

        if let Some(err) = first_error {
            let mut registered = self.handles.lock().await;
            for (key, handle) in unclosed {
                if registered.contains_key(&key) {
                    tracing::warn!(key = %key, "Queue reopened during close, dropping stale handle");
                    continue;
                }
                registered.insert(key, handle);
            }
            return Err(err);
        }

        tracing::info!(count, "All queues closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryBroker;

    fn registry() -> QueueRegistry {
        QueueRegistry::new(Arc::new(MemoryBroker::new()), QueueSettings::default())
    }

    #[test]
    fn test_registry_key() {
        assert_eq!(registry_key("emails", Role::Worker), "emails");
        assert_eq!(registry_key("emails", Role::Producer), "emails:producer");
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = registry();
        let first = registry.get_or_create("emails", Role::Worker).await.unwrap();
        let second = registry.get_or_create("emails", Role::Worker).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_roles_get_separate_handles() {
        let registry = registry();
        let worker = registry.get_or_create("emails", Role::Worker).await.unwrap();
        let producer = registry.get_or_create("emails", Role::Producer).await.unwrap();
        assert!(!Arc::ptr_eq(&worker, &producer));
        assert!(worker.settings().is_worker);
        assert!(worker.settings().remove_on_success);
        assert!(!worker.settings().remove_on_failure);
        assert!(!producer.settings().is_worker);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.get_or_create("  ", Role::Producer).await,
            Err(HiveError::InvalidQueueName)
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_all_clears_and_allows_fresh_handles() {
        let registry = registry();
        let before = registry.get_or_create("emails", Role::Worker).await.unwrap();
        registry.close_all().await.unwrap();
        assert!(before.is_closed());
        assert!(registry.is_empty().await);

        let after = registry.get_or_create("emails", Role::Worker).await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(!after.is_closed());
    }
}
