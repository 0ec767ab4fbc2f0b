// * Event-source hook points and the single active handler slot
// * Hook points are permanent; the slot links them to whichever collector is currently alive

use crate::collector::event::{DeprecationEvent, DeprecationOptions};
use lazy_static::lazy_static;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

lazy_static! {
    static ref GLOBAL_SLOT: Arc<HandlerSlot> = Arc::new(HandlerSlot::new());
}

/// Receives every deprecation raised while installed.
pub trait DeprecationHandler: Send + Sync {
    fn handle(&self, event: &DeprecationEvent);
}

/// Independent places a deprecation can be raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    /// Deprecations raised by the embedded UI framework.
    Framework,
    /// Deprecations raised by the host application's own helper.
    Application,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPoint::Framework => write!(f, "framework"),
            HookPoint::Application => write!(f, "application"),
        }
    }
}

/// Nullable, replaceable registration for exactly one handler.
///
/// Installing over an existing handler replaces it; handlers never stack.
#[derive(Default)]
pub struct HandlerSlot {
    active: RwLock<Option<Arc<dyn DeprecationHandler>>>,
}

impl fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSlot")
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl HandlerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide slot wired to the permanent hook points.
    pub fn global() -> Arc<HandlerSlot> {
        Arc::clone(&GLOBAL_SLOT)
    }

    /// Installs `handler`, returning whichever handler it replaced.
    pub fn install(&self, handler: Arc<dyn DeprecationHandler>) -> Option<Arc<dyn DeprecationHandler>> {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        active.replace(handler)
    }

    pub fn uninstall(&self) -> Option<Arc<dyn DeprecationHandler>> {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        active.take()
    }

    /// Clears the slot only if `handler` is still the installed one, so a
    /// stale owner cannot remove its replacement.
    pub fn uninstall_if(&self, handler: &Arc<dyn DeprecationHandler>) -> bool {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        let owned = active
            .as_ref()
            .map(|current| same_handler(current, handler))
            .unwrap_or(false);
        if owned {
            *active = None;
        }
        owned
    }

    pub fn is_installed(&self) -> bool {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Forwards an event to the installed handler. Returns false when the slot is empty.
    pub fn dispatch(&self, event: &DeprecationEvent) -> bool {
        // * Clone out of the lock so the handler may reinstall without deadlocking
        let handler = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match handler {
            Some(handler) => {
                handler.handle(event);
                true
            }
            None => false,
        }
    }

    /// Entry point for a hook point raising a deprecation.
    pub fn emit(&self, hook: HookPoint, message: &str, options: DeprecationOptions) -> bool {
        trace!(hook = %hook, id = ?options.id, "Deprecation raised");
        self.dispatch(&DeprecationEvent::new(message, options))
    }
}

fn same_handler(a: &Arc<dyn DeprecationHandler>, b: &Arc<dyn DeprecationHandler>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Raises a deprecation from the host application through the global slot.
pub fn deprecated(message: &str, options: DeprecationOptions) -> bool {
    GLOBAL_SLOT.emit(HookPoint::Application, message, options)
}
