//! Connectivity providers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Source of the "is the device online" signal.
pub trait Connectivity: Send + Sync + 'static {
    fn is_online(&self) -> bool;
}

/// Reports online unconditionally.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Shared online flag the host flips from its own network listener.
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct OnlineFlag {
    online: Arc<AtomicBool>,
}

impl OnlineFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }
}

impl Default for OnlineFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for OnlineFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}
