//! User-visible notifications (the UI's toast channel).

use tracing::{info, warn};

/// Severity of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Informational.
    Info,
    /// Something failed; the user may need to retry later.
    Error,
}

/// A message meant for the end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
}

impl Notice {
    /// An error notice.
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            message: message.into(),
        }
    }

    /// An informational notice.
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Sink for user-visible notices.
pub trait Notifier: Send + Sync {
    /// Show `notice` to the user.
    fn notify(&self, notice: Notice);
}

/// Notifier that only logs. Used when no UI sink is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => info!(title = %notice.title, "{}", notice.message),
            NoticeLevel::Error => warn!(title = %notice.title, "{}", notice.message),
        }
    }
}
