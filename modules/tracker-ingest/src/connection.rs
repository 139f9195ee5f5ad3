use event_bus::EventBus;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Publish handle of the supervisor's current broker session, if any
///
/// The supervisor installs the handle once subscribed and clears it before the
/// session is released. The DLQ router and the publisher only ever borrow it,
/// so the process never opens a second broker connection.
#[derive(Clone, Default)]
pub struct LiveConnection {
    slot: Arc<RwLock<Option<Arc<dyn EventBus>>>>,
}

impl LiveConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, publisher: Arc<dyn EventBus>) {
        *self.slot.write().await = Some(publisher);
    }

    pub async fn clear(&self) {
        *self.slot.write().await = None;
    }

    pub async fn current(&self) -> Option<Arc<dyn EventBus>> {
        self.slot.read().await.clone()
    }

    pub async fn is_live(&self) -> bool {
        self.slot.read().await.is_some()
    }
}

impl std::fmt::Debug for LiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConnection").finish_non_exhaustive()
    }
}
