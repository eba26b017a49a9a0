//! Generic notification collaborator
//!
//! Failures that are not rendered inline in the transcript are handed to a
//! [`Notifier`]. The host decides how to show them (toast, banner, log).

use tracing::{error, warn};

pub trait Notifier: Send + Sync {
    /// An unclassified failure; the message list is left untouched.
    fn unexpected_error(&self, error: &str, hint: &str);

    /// A known failure with a short title (e.g. conversation not found).
    fn error(&self, message: &str, title: &str);
}

/// Notifier that only writes to the tracing log.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn unexpected_error(&self, error: &str, hint: &str) {
        error!("Unexpected error: {} ({})", error, hint);
    }

    fn error(&self, message: &str, title: &str) {
        warn!("{}: {}", title, message);
    }
}
