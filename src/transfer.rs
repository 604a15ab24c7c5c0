//! Transfer Entities
//!
//! The UI-facing record of one profile's current sync run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::status::{translate, ProgressTracker, StatusNotification};

/// Opaque identity handed to the UI. Never the daemon's profile id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TransferId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Coarse transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Queued,
    Running,
    Error,
    Finished,
    Canceled,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Queued => "queued",
            TransferState::Running => "running",
            TransferState::Error => "error",
            TransferState::Finished => "finished",
            TransferState::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// Kind of data a sync profile handles
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    #[default]
    Contacts,
    Calendar,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Contacts => "contacts",
            Category::Calendar => "calendar",
            Category::Other(name) => name,
        }
    }

    /// Title used when neither the account nor the profile names the transfer.
    pub fn default_title(&self) -> String {
        match self {
            Category::Contacts => "Contacts".to_string(),
            Category::Calendar => "Calendar".to_string(),
            Category::Other(name) => name.clone(),
        }
    }

    pub fn default_icon(&self) -> &'static str {
        match self {
            Category::Contacts => "address-book-app",
            Category::Calendar => "calendar-app",
            Category::Other(_) => "sync",
        }
    }

    pub fn default_launch_target(&self) -> Option<LaunchTarget> {
        match self {
            Category::Contacts => {
                Some(LaunchTarget::DesktopFile("address-book-app.desktop".into()))
            }
            Category::Calendar => Some(LaunchTarget::DesktopFile("calendar-app.desktop".into())),
            Category::Other(_) => None,
        }
    }
}

impl From<String> for Category {
    fn from(name: String) -> Self {
        match name.as_str() {
            "contacts" => Category::Contacts,
            "calendar" => Category::Calendar,
            _ => Category::Other(name),
        }
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

/// How the application behind a transfer is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LaunchTarget {
    /// Desktop file name, e.g. `address-book-app.desktop`
    DesktopFile(String),
    /// Application registered under its own URL scheme
    UrlScheme(String),
}

impl LaunchTarget {
    pub fn url(&self) -> String {
        match self {
            LaunchTarget::DesktopFile(file) => format!("application:///{}", file),
            LaunchTarget::UrlScheme(app) => format!("{}://", app),
        }
    }
}

/// Display fields resolved once, when the transfer is first seen.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub title: String,
    pub icon: String,
    pub category: Category,
    pub launch_target: Option<LaunchTarget>,
}

/// A sync transfer as shown by the indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub profile_id: String,
    pub title: String,
    pub icon: String,
    pub category: Category,
    pub launch_target: Option<LaunchTarget>,
    pub state: TransferState,
    /// 0.0..=1.0, `None` while indeterminate
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    tracker: ProgressTracker,
}

impl Transfer {
    pub fn new(profile_id: impl Into<String>, metadata: TransferMetadata) -> Self {
        let TransferMetadata {
            title,
            icon,
            category,
            launch_target,
        } = metadata;

        Self {
            id: TransferId::new(),
            profile_id: profile_id.into(),
            title,
            icon,
            category,
            launch_target,
            state: TransferState::Queued,
            progress: Some(0.0),
            error: None,
            label: None,
            updated_at: Utc::now(),
            tracker: ProgressTracker::default(),
        }
    }

    /// Apply one decoded notification.
    pub fn apply(&mut self, notification: &StatusNotification) {
        let translation = translate(self.tracker, self.progress, notification);
        self.state = translation.state;
        self.progress = translation.progress;
        self.error = translation.error;
        self.label = translation.label.map(str::to_string);
        self.tracker = translation.tracker;
        self.updated_at = Utc::now();
    }

    pub fn tracker(&self) -> ProgressTracker {
        self.tracker
    }

    /// A new sync may only be requested after a failed or aborted run.
    pub fn can_start(&self) -> bool {
        matches!(self.state, TransferState::Error | TransferState::Canceled)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self.state, TransferState::Queued | TransferState::Running)
    }

    pub fn can_pause(&self) -> bool {
        false
    }

    pub fn can_resume(&self) -> bool {
        false
    }
}
