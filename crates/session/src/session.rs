//! A single proctoring session

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use frame_capture::EncodedFrame;
use gaze::{FlagStatus, GazeConfig, GazeLabel, GazeMonitor, LandmarkFrame};
use storage::EvidenceStore;
use tracing::{debug, info};

use crate::event::{Direction, GazeEvent};
use crate::evidence::{maybe_capture, CaptureOutcome};
use crate::{SessionError, SessionId};

/// Arrival time of a frame: monotonic for timing, wall clock for the log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTime {
    pub instant: Instant,
    pub wall: DateTime<Utc>,
}

impl FrameTime {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Utc::now(),
        }
    }

    /// The same clock pair advanced by `offset`
    pub fn after(&self, offset: Duration) -> Self {
        let delta = chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            instant: self.instant + offset,
            wall: self.wall + delta,
        }
    }
}

/// Result of processing one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStatus {
    /// Raw classification
    pub label: GazeLabel,
    /// Flag state machine result
    pub status: FlagStatus,
    /// Direction reported to the client and logged
    pub direction: Direction,
    /// Evidence handling, present only for flagged frames
    pub capture: Option<CaptureOutcome>,
    /// Whether an event was appended for this frame
    pub logged: bool,
}

impl FrameStatus {
    pub fn flagged_image(&self) -> Option<&str> {
        self.capture.as_ref().and_then(CaptureOutcome::stored_reference)
    }
}

/// Proctoring session: event log plus gaze state
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    active: bool,
    started_at: DateTime<Utc>,
    events: Vec<GazeEvent>,
    monitor: GazeMonitor,
    record_center: bool,
    frames_processed: u64,
    /// Set while a frame stream is attached
    streaming: bool,
    last_activity: Instant,
}

impl Session {
    /// Start a new active session
    pub fn new(id: SessionId, config: GazeConfig) -> Result<Self, SessionError> {
        let record_center = config.record_center_frames;
        let monitor = GazeMonitor::new(config)?;
        info!("Session {} started", id);
        Ok(Self {
            id,
            active: true,
            started_at: Utc::now(),
            events: Vec::new(),
            monitor,
            record_center,
            frames_processed: 0,
            streaming: false,
            last_activity: Instant::now(),
        })
    }

    /// Classify landmarks and process the frame
    pub fn process_frame(
        &mut self,
        landmarks: Option<&LandmarkFrame>,
        image: Option<&EncodedFrame>,
        at: FrameTime,
        evidence: &dyn EvidenceStore,
    ) -> Result<FrameStatus, SessionError> {
        self.ensure_active()?;
        let label = self.monitor.classify(landmarks);
        self.process_label(label, image, at, evidence)
    }

    /// Process an already classified frame.
    ///
    /// The frame is applied completely or not at all: the state update,
    /// evidence write, and event append all happen before returning.
    pub fn process_label(
        &mut self,
        label: GazeLabel,
        image: Option<&EncodedFrame>,
        at: FrameTime,
        evidence: &dyn EvidenceStore,
    ) -> Result<FrameStatus, SessionError> {
        self.ensure_active()?;
        let observation = self.monitor.observe_label(label, at.instant);
        self.frames_processed += 1;
        self.last_activity = self.last_activity.max(at.instant);

        let (direction, capture) = match observation.status {
            FlagStatus::Flagged => {
                let outcome = maybe_capture(
                    &self.id,
                    self.monitor.tracker_mut(),
                    image,
                    at.wall,
                    evidence,
                );
                (Direction::Flagged, Some(outcome))
            }
            FlagStatus::Away(label) => (Direction::from(label), None),
            FlagStatus::Centered => (Direction::Center, None),
        };

        let logged = !matches!(observation.status, FlagStatus::Centered) || self.record_center;
        if logged {
            let flagged_image = capture
                .as_ref()
                .and_then(CaptureOutcome::stored_reference)
                .map(str::to_string);
            self.append(GazeEvent {
                session_id: self.id,
                timestamp: at.wall,
                direction,
                flagged_image,
            });
        }

        Ok(FrameStatus {
            label,
            status: observation.status,
            direction,
            capture,
            logged,
        })
    }

    /// Append an event to the in-memory log
    pub fn append(&mut self, event: GazeEvent) {
        self.events.push(event);
    }

    /// Mark the session ended; no further frames are accepted
    pub fn deactivate(&mut self) {
        if self.active {
            debug!(
                "Session {} deactivated after {} frames ({} events)",
                self.id,
                self.frames_processed,
                self.events.len()
            );
        }
        self.active = false;
    }

    /// Claim the session for a frame stream; only one may be attached at a time
    pub fn attach_stream(&mut self) -> Result<(), SessionError> {
        self.ensure_active()?;
        if self.streaming {
            return Err(SessionError::Busy(self.id));
        }
        self.streaming = true;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Release the stream claim
    pub fn detach_stream(&mut self) {
        self.streaming = false;
        self.last_activity = Instant::now();
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Last time a frame was applied or a stream attached or detached
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.active {
            Ok(())
        } else {
            Err(SessionError::Inactive(self.id))
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn events(&self) -> &[GazeEvent] {
        &self.events
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Flagged events currently in memory
    pub fn flagged_count(&self) -> usize {
        self.events.iter().filter(|e| e.direction.is_flagged()).count()
    }

    pub fn monitor(&self) -> &GazeMonitor {
        &self.monitor
    }
}
