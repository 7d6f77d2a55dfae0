use std::sync::{Arc, OnceLock, RwLock};

/// Injectable logging sink used by every client and server in the process.
///
/// Implementations must be callable from any thread. The `auth` channel
/// carries connection acceptance and denial events so that deployments can
/// route them to an audit trail separately from operational logging.
pub trait Logger: Send + Sync {
    /// verbose diagnostics
    fn debug(&self, msg: &str);
    /// normal operational events
    fn info(&self, msg: &str);
    /// unexpected but recoverable conditions
    fn warning(&self, msg: &str);
    /// failures
    fn error(&self, msg: &str);
    /// connection authorization events
    fn auth(&self, msg: &str);
}

/// The default logger, forwarding each channel to the corresponding
/// [`tracing`](https://docs.rs/tracing) event. Authorization events are
/// emitted at info level under the `polbus::auth` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardLogger;

impl Logger for StandardLogger {
    fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    fn auth(&self, msg: &str) {
        tracing::info!(target: "polbus::auth", "{msg}");
    }
}

fn slot() -> &'static RwLock<Arc<dyn Logger>> {
    static SLOT: OnceLock<RwLock<Arc<dyn Logger>>> = OnceLock::new();
    SLOT.get_or_init(|| RwLock::new(Arc::new(StandardLogger)))
}

/// Replace the process-wide logger
pub fn install_logger(logger: Arc<dyn Logger>) {
    let mut guard = slot().write().unwrap_or_else(|e| e.into_inner());
    *guard = logger;
}

fn with_logger(f: impl FnOnce(&dyn Logger)) {
    let guard = slot().read().unwrap_or_else(|e| e.into_inner());
    f(guard.as_ref())
}

pub(crate) fn debug(msg: &str) {
    with_logger(|l| l.debug(msg));
}

pub(crate) fn info(msg: &str) {
    with_logger(|l| l.info(msg));
}

pub(crate) fn warning(msg: &str) {
    with_logger(|l| l.warning(msg));
}

pub(crate) fn error(msg: &str) {
    with_logger(|l| l.error(msg));
}

pub(crate) fn auth(msg: &str) {
    with_logger(|l| l.auth(msg));
}
