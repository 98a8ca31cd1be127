//! Assignment records for the video-to-renderer mapping.
//!
//! The table behind the assignment lock: one current assignment per
//! renderer, the cancellation tokens of pending activation retries, the
//! ordered set of scheduled assignments, and the desired assignments waiting
//! for their renderer to appear.

use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::catalog::{AssignmentRequest, VideoSnapshot};
use crate::media::Publication;

/// Lifecycle state of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentState {
    /// Inserted, activation not yet confirmed
    Pending,
    /// Driving the renderer; its media URL equals the renderer's CurrentURI
    Active,
    /// Activation retries exhausted; kept for renderer reappearance
    Failed,
    /// Pushed aside by a newer assignment
    Superseded,
}

/// One video-to-renderer assignment.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// Renderer this assignment drives
    pub renderer_id: String,
    /// Immutable snapshot of the assigned video
    pub video: VideoSnapshot,
    /// Conflict-resolution priority; user overrides use 100
    pub priority: i32,
    /// Whether playback restarts indefinitely
    pub looped: bool,
    /// When the assignment was created
    pub created_at: SystemTime,
    /// Activation attempts consumed so far
    pub retry_count: u32,
    /// Lifecycle state
    pub state: AssignmentState,
    /// Bumped whenever the assignment for this renderer is replaced or
    /// reactivated; stale activation attempts check it and give up
    pub epoch: u64,
    /// Media server publication backing the assignment, once published
    pub publication: Option<Publication>,
}

impl Assignment {
    /// Read-only view for callers outside the core.
    pub fn view(&self) -> AssignmentView {
        AssignmentView {
            renderer_id: self.renderer_id.clone(),
            video_id: self.video.id.clone(),
            priority: self.priority,
            looped: self.looped,
            state: self.state,
            retry_count: self.retry_count,
            created_at: self.created_at,
        }
    }
}

/// Read-only snapshot of an assignment.
#[derive(Debug, Clone)]
pub struct AssignmentView {
    pub renderer_id: String,
    pub video_id: String,
    pub priority: i32,
    pub looped: bool,
    pub state: AssignmentState,
    pub retry_count: u32,
    pub created_at: SystemTime,
}

/// Everything protected by the assignment lock.
#[derive(Debug, Default)]
pub(crate) struct AssignmentTable {
    /// Current assignment per renderer
    pub assignments: HashMap<String, Assignment>,
    /// Cancellation token of the pending retry sleeper per renderer
    pub retry_tokens: HashMap<String, CancellationToken>,
    /// Scheduled assignments ordered by fire time
    pub scheduled: BTreeMap<(Instant, u64), AssignmentRequest>,
    /// Assignments waiting for their renderer to appear
    pub desired: HashMap<String, AssignmentRequest>,
    epoch_counter: u64,
    schedule_counter: u64,
}

impl AssignmentTable {
    /// Allocates a fresh activation epoch.
    pub fn next_epoch(&mut self) -> u64 {
        self.epoch_counter += 1;
        self.epoch_counter
    }

    /// Allocates a tie-breaking sequence number for the scheduled set.
    pub fn next_schedule_seq(&mut self) -> u64 {
        self.schedule_counter += 1;
        self.schedule_counter
    }

    /// Cancels and removes the pending retry sleeper for a renderer.
    pub fn cancel_retry(&mut self, renderer_id: &str) {
        if let Some(token) = self.retry_tokens.remove(renderer_id) {
            token.cancel();
        }
    }

    /// True when `epoch` still identifies the current assignment of
    /// `renderer_id`.
    pub fn epoch_is_current(&self, renderer_id: &str, epoch: u64) -> bool {
        self.assignments
            .get(renderer_id)
            .is_some_and(|assignment| assignment.epoch == epoch)
    }
}
