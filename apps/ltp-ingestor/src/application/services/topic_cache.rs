//! Topic Cache
//!
//! Write-through mapping from topic name to durable topic id.
//!
//! Resolution order: in-process map, then a lookup by unique name, then an
//! insert. Every path fills the map before returning. Topic attributes never
//! change after creation, so a cached id is never stale.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::{NewTopic, StoreError, TopicStore};
use crate::domain::observation::TopicId;
use crate::infrastructure::metrics;

/// Name → id cache in front of a [`TopicStore`].
pub struct TopicCache {
    store: Arc<dyn TopicStore>,
    ids: RwLock<HashMap<String, TopicId>>,
}

impl std::fmt::Debug for TopicCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicCache")
            .field("cached", &self.ids.read().len())
            .finish_non_exhaustive()
    }
}

impl TopicCache {
    /// Create an empty cache over a store.
    #[must_use]
    pub fn new(store: Arc<dyn TopicStore>) -> Self {
        Self {
            store,
            ids: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the id for a topic, creating the row on first sight.
    ///
    /// A concurrent writer winning the insert race surfaces as
    /// [`StoreError::DuplicateTopic`]; the existing row's id is fetched and
    /// used instead.
    ///
    /// # Errors
    ///
    /// Returns the store error if the lookup or insert fails for any other reason.
    pub async fn resolve_id(&self, topic: &NewTopic) -> Result<TopicId, StoreError> {
        if let Some(id) = self.cached(&topic.name) {
            metrics::record_topic_cache(true);
            return Ok(id);
        }
        metrics::record_topic_cache(false);

        let id = match self.store.find_topic_id(&topic.name).await? {
            Some(id) => id,
            None => self.insert_or_fetch(topic).await?,
        };

        self.ids.write().insert(topic.name.clone(), id);
        Ok(id)
    }

    async fn insert_or_fetch(&self, topic: &NewTopic) -> Result<TopicId, StoreError> {
        match self.store.insert_topic(topic).await {
            Ok(id) => {
                tracing::debug!(topic = %topic.name, id, kind = topic.kind.as_str(), "Topic created");
                Ok(id)
            }
            Err(StoreError::DuplicateTopic(_)) => {
                tracing::debug!(topic = %topic.name, "Topic inserted concurrently, fetching existing id");
                self.store.find_topic_id(&topic.name).await?.ok_or_else(|| {
                    StoreError::Read(format!(
                        "topic {} reported as duplicate but not found",
                        topic.name
                    ))
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Cached id for a name, without touching the store.
    #[must_use]
    pub fn cached(&self, name: &str) -> Option<TopicId> {
        self.ids.read().get(name).copied()
    }

    /// Number of cached names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
