use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Error,
}

/// A transient, user-facing message. Notices sharing an `id` replace each
/// other instead of stacking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
            id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

pub trait Notifier: Send + Sync {
    fn show(&self, notice: Notice);
}

/// Keeps the visible notices in memory.
#[derive(Default)]
pub struct MemoryNotifier {
    visible: Mutex<Vec<Notice>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> Vec<Notice> {
        self.visible.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<Notice> {
        self.visible().pop()
    }

    pub fn dismiss(&self, id: &str) {
        if let Ok(mut guard) = self.visible.lock() {
            guard.retain(|n| n.id.as_deref() != Some(id));
        }
    }
}

impl Notifier for MemoryNotifier {
    fn show(&self, notice: Notice) {
        if let Some(id) = notice.id.as_deref() {
            self.dismiss(id);
        }
        if let Ok(mut guard) = self.visible.lock() {
            guard.push(notice);
        }
    }
}

/// Prints notices for the command line: successes to stdout, errors to
/// stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn show(&self, notice: Notice) {
        tracing::debug!(
            target: "stockroom",
            event = "notice",
            kind = ?notice.kind,
            id = notice.id.as_deref()
        );
        match notice.kind {
            NoticeKind::Success => println!("{}", notice.message),
            NoticeKind::Error => eprintln!("{}", notice.message),
        }
    }
}
