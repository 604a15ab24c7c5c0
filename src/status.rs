//! Sync Status Decoding
//!
//! msyncd reports every change of a sync session through one signal,
//! `syncStatus(profileId, status, message, moreDetails)`. `status` is the
//! coarse session state. `moreDetails` is overloaded: 0..=100 is a percentage
//! within the current phase, 201..=204 announces a new phase.
//!
//! Phase weighting (three equal thirds of the bar):
//!
//! | phase        | fraction          |
//! |--------------|-------------------|
//! | none yet     | indeterminate     |
//! | INITIALISING | 1/3               |
//! | SENDING      | 1/3 + pct / 300   |
//! | RECEIVING    | 2/3 + pct / 300   |
//! | FINALISING   | 1.0               |

use serde::{Deserialize, Serialize};

use crate::transfer::TransferState;

/// Label shown while a session is running.
pub const SYNCING_LABEL: &str = "Syncing";

const PHASE_SPAN: f64 = 1.0 / 3.0;

/// `status` argument of the `syncStatus` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// Request queued, or already queued when start was requested.
    Queued,
    /// Session started.
    Started,
    /// Session progressing.
    Progress,
    /// Session stopped on an error, or could not be started.
    Error,
    /// Session completed.
    Done,
    /// Session aborted.
    Aborted,
}

impl TryFrom<i32> for StatusCode {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, i32> {
        match code {
            0 => Ok(StatusCode::Queued),
            1 => Ok(StatusCode::Started),
            2 => Ok(StatusCode::Progress),
            3 => Ok(StatusCode::Error),
            4 => Ok(StatusCode::Done),
            5 => Ok(StatusCode::Aborted),
            other => Err(other),
        }
    }
}

/// Sync phase announced through `moreDetails`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Initialising,
    Sending,
    Receiving,
    Finalising,
}

impl Phase {
    pub fn from_marker(marker: i32) -> Option<Self> {
        match marker {
            201 => Some(Phase::Initialising),
            202 => Some(Phase::Sending),
            203 => Some(Phase::Receiving),
            204 => Some(Phase::Finalising),
            _ => None,
        }
    }

    pub fn marker(self) -> i32 {
        match self {
            Phase::Initialising => 201,
            Phase::Sending => 202,
            Phase::Receiving => 203,
            Phase::Finalising => 204,
        }
    }
}

/// Decoded `moreDetails` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    Percentage(u8),
    Phase(Phase),
    Unknown(i32),
}

impl From<i32> for Detail {
    fn from(raw: i32) -> Self {
        match raw {
            0..=100 => Detail::Percentage(raw as u8),
            marker if marker >= 200 => {
                Phase::from_marker(marker).map_or(Detail::Unknown(raw), Detail::Phase)
            }
            _ => Detail::Unknown(raw),
        }
    }
}

/// Signal body exactly as it came off the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatus {
    pub profile_id: String,
    pub status: i32,
    pub message: String,
    pub detail: i32,
}

/// A `syncStatus` signal with its status and detail channels decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusNotification {
    pub profile_id: String,
    pub status: StatusCode,
    pub message: String,
    pub detail: Detail,
}

impl StatusNotification {
    pub fn new(
        profile_id: impl Into<String>,
        status: StatusCode,
        message: impl Into<String>,
        detail: i32,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            status,
            message: message.into(),
            detail: Detail::from(detail),
        }
    }
}

impl TryFrom<RawStatus> for StatusNotification {
    /// The rejected status code.
    type Error = i32;

    fn try_from(raw: RawStatus) -> Result<Self, i32> {
        let status = StatusCode::try_from(raw.status)?;
        Ok(Self {
            profile_id: raw.profile_id,
            status,
            message: raw.message,
            detail: Detail::from(raw.detail),
        })
    }
}

/// Hidden per-transfer phase state. Persists between notifications of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTracker {
    phase: Option<Phase>,
    percent: u8,
}

impl ProgressTracker {
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Forget the phase of a previous run.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold one detail value into the tracker.
    pub fn advance(&mut self, detail: Detail) {
        match detail {
            Detail::Phase(phase) => {
                if self.phase != Some(phase) {
                    self.phase = Some(phase);
                    self.percent = 0;
                }
            }
            Detail::Percentage(percent) => {
                // Initialisation has no measurable extent; item counts belong to sending.
                if self.phase == Some(Phase::Initialising) {
                    self.phase = Some(Phase::Sending);
                }
                self.percent = percent.min(100);
            }
            Detail::Unknown(_) => {}
        }
    }

    /// Overall fraction for the current phase and percentage.
    pub fn fraction(&self) -> Option<f64> {
        let within = f64::from(self.percent) / 100.0 * PHASE_SPAN;
        match self.phase? {
            Phase::Initialising => Some(PHASE_SPAN),
            Phase::Sending => Some(PHASE_SPAN + within),
            Phase::Receiving => Some(2.0 * PHASE_SPAN + within),
            Phase::Finalising => Some(1.0),
        }
    }
}

/// Entity fields produced by one notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub state: TransferState,
    pub progress: Option<f64>,
    pub error: Option<String>,
    pub label: Option<&'static str>,
    pub tracker: ProgressTracker,
}

/// Decode a notification against the entity's previous tracker and progress.
pub fn translate(
    tracker: ProgressTracker,
    progress: Option<f64>,
    notification: &StatusNotification,
) -> Translation {
    let mut tracker = tracker;
    let (state, progress, error) = match notification.status {
        StatusCode::Queued => {
            tracker.reset();
            (TransferState::Queued, Some(0.0), None)
        }
        StatusCode::Started | StatusCode::Progress => {
            tracker.advance(notification.detail);
            (TransferState::Running, tracker.fraction(), None)
        }
        StatusCode::Error => (
            TransferState::Error,
            progress,
            Some(notification.message.clone()),
        ),
        StatusCode::Done => (TransferState::Finished, Some(1.0), None),
        StatusCode::Aborted => (TransferState::Canceled, progress, None),
    };

    let label = (state == TransferState::Running).then_some(SYNCING_LABEL);

    Translation {
        state,
        progress,
        error,
        label,
        tracker,
    }
}
