//! Progress events emitted during a migration run.

use serde::Serialize;
use tokio::sync::mpsc;

/// Migration stage boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PreMetaStart,
    PreMetaEnd,
    TableDataStart,
    TableDataEnd,
    PostMetaStart,
    PostMetaEnd,
}

/// Kind of schema object created on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Schema,
    Sequence,
    Table,
    PrimaryKey,
    NotNull,
    Default,
    Unique,
    Index,
    ForeignKey,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    ObjectCreated {
        kind: ObjectKind,
        full_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
    },
    TableDataProgress {
        table: String,
        /// Advisory row count taken before reading.
        total: i64,
        migrated: u64,
        completed: bool,
    },
    StageChanged {
        stage: Stage,
    },
}

/// Cloneable sender of progress events. A reporter without a channel
/// discards everything.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    sender: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Reporter plus the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    pub fn report(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            // A dropped receiver only means nobody is listening.
            let _ = sender.send(event);
        }
    }

    pub fn stage(&self, stage: Stage) {
        self.report(ProgressEvent::StageChanged { stage });
    }

    pub fn object(&self, kind: ObjectKind, full_name: impl Into<String>, owner: Option<String>) {
        self.report(ProgressEvent::ObjectCreated {
            kind,
            full_name: full_name.into(),
            owner,
        });
    }

    pub fn table_data(&self, table: &str, total: i64, migrated: u64, completed: bool) {
        self.report(ProgressEvent::TableDataProgress {
            table: table.to_string(),
            total,
            migrated,
            completed,
        });
    }
}
