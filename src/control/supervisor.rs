//! Per-renderer playback supervisor.
//!
//! One cooperative task per renderer id polls the transport every tick,
//! refreshes the renderer record and applies the loop/stall decision table.
//! The decision itself is a pure function over the tick observation and a
//! small per-supervisor memory, so every row of the table is testable
//! without a renderer.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::catalog::RestartReason;
use crate::config::{MIN_POSITION_ADVANCE_SECS, NO_MEDIA_REISSUE_TICKS, TRANSPORT_FAILURE_LIMIT};
use crate::devices::TransportState;

use super::controller::{ControllerInner, SupervisorDirective};

/// How many ticks the observed URI may diverge from the assignment before
/// the supervisor reconciles.
const URI_MISMATCH_TICKS: u32 = 2;

/// What one tick observed on the wire.
#[derive(Debug, Clone)]
pub(crate) struct TickObservation {
    /// Whether GetTransportInfo succeeded this tick
    pub transport_ok: bool,
    /// Transport state, when the poll succeeded
    pub state: Option<TransportState>,
    /// Playback position in seconds, when reported
    pub position_secs: Option<f64>,
    /// Track duration in seconds, when reported and non-zero
    pub duration_secs: Option<f64>,
    /// URI the transport claims to render, when reported
    pub current_uri: Option<String>,
}

/// Counters carried across ticks of one supervisor.
#[derive(Debug, Default)]
pub(crate) struct SupervisorMemory {
    stall_ticks: u32,
    stall_restarted: bool,
    near_end_restarted: bool,
    no_media_ticks: u32,
    failure_ticks: u32,
    uri_mismatch_ticks: u32,
    last_position: Option<f64>,
}

/// What a tick decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickAction {
    /// Healthy; nothing to do
    None,
    /// Re-issue SetAVTransportURI + Play (preceded by Stop for stalls)
    Restart(RestartReason),
    /// Transport unreachable; mark disconnected and exit
    Abandon,
}

/// Tunables the decision table reads.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SupervisorSettings {
    pub stall_threshold_ticks: u32,
    pub pre_restart_margin_secs: f64,
}

/// Applies the loop/stall decision table to one observation.
pub(crate) fn decide(
    observation: &TickObservation,
    looped: bool,
    expected_uri: &str,
    memory: &mut SupervisorMemory,
    settings: &SupervisorSettings,
) -> TickAction {
    if !observation.transport_ok {
        memory.failure_ticks += 1;
        if memory.failure_ticks >= TRANSPORT_FAILURE_LIMIT {
            return TickAction::Abandon;
        }
        return TickAction::None;
    }
    memory.failure_ticks = 0;

    match observation.state.as_ref() {
        Some(TransportState::Stopped) => {
            memory.stall_ticks = 0;
            memory.stall_restarted = false;
            memory.no_media_ticks = 0;
            memory.uri_mismatch_ticks = 0;
            memory.last_position = None;
            if looped {
                TickAction::Restart(RestartReason::Stopped)
            } else {
                TickAction::None
            }
        }
        Some(TransportState::Playing) => {
            memory.no_media_ticks = 0;

            // The active assignment's media URL and the transport's URI must
            // agree; a divergence that survives a tick gets reconciled
            let mismatch = !expected_uri.is_empty()
                && observation
                    .current_uri
                    .as_deref()
                    .is_some_and(|uri| !uri.is_empty() && !uri.eq_ignore_ascii_case(expected_uri));
            if mismatch {
                memory.uri_mismatch_ticks += 1;
                if memory.uri_mismatch_ticks >= URI_MISMATCH_TICKS {
                    memory.uri_mismatch_ticks = 0;
                    return TickAction::Restart(RestartReason::MediaLost);
                }
            } else {
                memory.uri_mismatch_ticks = 0;
            }

            let position = observation.position_secs;
            let advanced = match (memory.last_position, position) {
                (Some(previous), Some(current)) => current - previous >= MIN_POSITION_ADVANCE_SECS,
                // First sighting of a position counts as progress
                (None, Some(_)) => true,
                _ => false,
            };
            if position.is_some() {
                if advanced {
                    memory.last_position = position;
                    memory.stall_ticks = 0;
                    memory.stall_restarted = false;
                } else {
                    memory.stall_ticks += 1;
                }
            }

            // Some renderers never emit STOPPED at end-of-media; restart
            // just before the end instead.
            if looped {
                if let (Some(current), Some(duration)) = (position, observation.duration_secs) {
                    if current < duration - settings.pre_restart_margin_secs {
                        memory.near_end_restarted = false;
                    } else if !memory.near_end_restarted {
                        memory.near_end_restarted = true;
                        return TickAction::Restart(RestartReason::NearEnd);
                    }
                }
            }

            if memory.stall_ticks >= settings.stall_threshold_ticks && !memory.stall_restarted {
                // One restart per stall episode; the flag clears when the
                // position advances again.
                memory.stall_restarted = true;
                return TickAction::Restart(RestartReason::Stalled);
            }

            TickAction::None
        }
        Some(TransportState::NoMediaPresent) => {
            memory.stall_ticks = 0;
            memory.stall_restarted = false;
            memory.last_position = None;
            memory.no_media_ticks += 1;
            if memory.no_media_ticks >= NO_MEDIA_REISSUE_TICKS {
                memory.no_media_ticks = 0;
                TickAction::Restart(RestartReason::MediaLost)
            } else {
                TickAction::None
            }
        }
        _ => {
            // PAUSED_PLAYBACK, TRANSITIONING and vendor states are left alone
            memory.stall_ticks = 0;
            memory.no_media_ticks = 0;
            TickAction::None
        }
    }
}

/// The supervisor task body. Spawned once per renderer id under the
/// monitoring lock; releases its handle on exit.
pub(crate) async fn run_supervisor(
    controller: Arc<ControllerInner>,
    renderer_id: String,
    generation: u64,
    token: CancellationToken,
) {
    debug!("Supervisor for '{renderer_id}' started");
    let mut ticker = tokio::time::interval(controller.config().supervisor_tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let settings = SupervisorSettings {
        stall_threshold_ticks: controller.config().stall_threshold_ticks,
        pre_restart_margin_secs: controller.config().pre_restart_margin.as_secs_f64(),
    };
    let mut memory = SupervisorMemory::default();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let (client, looped, expected_uri) = match controller.supervisor_directive(&renderer_id) {
            SupervisorDirective::Exit => break,
            SupervisorDirective::Idle => continue,
            SupervisorDirective::Watch {
                client,
                looped,
                expected_uri,
            } => (client, looped, expected_uri),
        };

        // All I/O happens between lock acquisitions
        let observation = match client.transport_info().await {
            Ok(info) => {
                let state = info.state();
                let position = if state == TransportState::Playing {
                    client.position().await.ok()
                } else {
                    None
                };
                TickObservation {
                    transport_ok: true,
                    state: Some(state),
                    position_secs: position.as_ref().and_then(|p| p.position_secs()),
                    duration_secs: position.as_ref().and_then(|p| p.duration_secs()),
                    current_uri: position.map(|p| p.track_uri),
                }
            }
            Err(e) => {
                debug!("Supervisor poll for '{renderer_id}' failed: {e}");
                controller.note_soap_failure();
                TickObservation {
                    transport_ok: false,
                    state: None,
                    position_secs: None,
                    duration_secs: None,
                    current_uri: None,
                }
            }
        };
        if token.is_cancelled() {
            break;
        }

        controller.record_observation(&renderer_id, &observation);

        match decide(&observation, looped, &expected_uri, &mut memory, &settings) {
            TickAction::None => {}
            TickAction::Restart(reason) => {
                let stop_first = reason == RestartReason::Stalled;
                if let Err(e) = controller
                    .restart_playback(&renderer_id, &client, reason, stop_first)
                    .await
                {
                    controller.note_soap_failure();
                    warn!(
                        "Restart of '{renderer_id}' failed ({e}); last snapshot: {:?}",
                        controller.last_snapshot(&renderer_id)
                    );
                }
            }
            TickAction::Abandon => {
                warn!(
                    "Transport of '{renderer_id}' unreachable for {TRANSPORT_FAILURE_LIMIT} ticks; last snapshot: {:?}",
                    controller.last_snapshot(&renderer_id)
                );
                controller.mark_disconnected(&renderer_id);
                break;
            }
        }
    }

    controller.release_supervisor(&renderer_id, generation);
    info!("Supervisor for '{renderer_id}' exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI: &str = "http://10.0.0.2:9000/tok/a.mp4";

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            stall_threshold_ticks: 3,
            pre_restart_margin_secs: 3.0,
        }
    }

    fn playing(position: f64, duration: f64) -> TickObservation {
        TickObservation {
            transport_ok: true,
            state: Some(TransportState::Playing),
            position_secs: Some(position),
            duration_secs: if duration > 0.0 { Some(duration) } else { None },
            current_uri: Some(URI.to_string()),
        }
    }

    fn in_state(state: TransportState) -> TickObservation {
        TickObservation {
            transport_ok: true,
            state: Some(state),
            position_secs: None,
            duration_secs: None,
            current_uri: None,
        }
    }

    fn failed() -> TickObservation {
        TickObservation {
            transport_ok: false,
            state: None,
            position_secs: None,
            duration_secs: None,
            current_uri: None,
        }
    }

    #[test]
    fn test_stopped_with_loop_restarts() {
        let mut memory = SupervisorMemory::default();
        assert_eq!(
            decide(&in_state(TransportState::Stopped), true, URI, &mut memory, &settings()),
            TickAction::Restart(RestartReason::Stopped)
        );
    }

    #[test]
    fn test_stopped_without_loop_does_nothing() {
        let mut memory = SupervisorMemory::default();
        assert_eq!(
            decide(&in_state(TransportState::Stopped), false, URI, &mut memory, &settings()),
            TickAction::None
        );
    }

    #[test]
    fn test_healthy_progress_does_nothing() {
        let mut memory = SupervisorMemory::default();
        for tick in 0..5 {
            let position = tick as f64 * 2.0;
            assert_eq!(
                decide(&playing(position, 600.0), true, URI, &mut memory, &settings()),
                TickAction::None
            );
        }
    }

    #[test]
    fn test_stall_restarts_exactly_once_per_episode() {
        let mut memory = SupervisorMemory::default();
        let settings = settings();

        // Position advances once, then freezes
        assert_eq!(
            decide(&playing(5.0, 600.0), true, URI, &mut memory, &settings),
            TickAction::None
        );
        for _ in 0..2 {
            assert_eq!(
                decide(&playing(5.0, 600.0), true, URI, &mut memory, &settings),
                TickAction::None
            );
        }
        assert_eq!(
            decide(&playing(5.0, 600.0), true, URI, &mut memory, &settings),
            TickAction::Restart(RestartReason::Stalled)
        );
        // Still frozen: no second restart in the same episode
        for _ in 0..10 {
            assert_eq!(
                decide(&playing(5.0, 600.0), true, URI, &mut memory, &settings),
                TickAction::None
            );
        }

        // Progress resumes, then a second freeze starts a new episode
        assert_eq!(
            decide(&playing(8.0, 600.0), true, URI, &mut memory, &settings),
            TickAction::None
        );
        for _ in 0..2 {
            assert_eq!(
                decide(&playing(8.0, 600.0), true, URI, &mut memory, &settings),
                TickAction::None
            );
        }
        assert_eq!(
            decide(&playing(8.0, 600.0), true, URI, &mut memory, &settings),
            TickAction::Restart(RestartReason::Stalled)
        );
    }

    #[test]
    fn test_near_end_preemptive_restart() {
        let mut memory = SupervisorMemory::default();
        let settings = settings();

        assert_eq!(
            decide(&playing(5.0, 10.0), true, URI, &mut memory, &settings),
            TickAction::None
        );
        assert_eq!(
            decide(&playing(7.0, 10.0), true, URI, &mut memory, &settings),
            TickAction::Restart(RestartReason::NearEnd)
        );
        // The margin does not fire again until the position drops back
        assert_eq!(
            decide(&playing(7.5, 10.0), true, URI, &mut memory, &settings),
            TickAction::None
        );
        assert_eq!(
            decide(&playing(1.0, 10.0), true, URI, &mut memory, &settings),
            TickAction::None
        );
        assert_eq!(
            decide(&playing(7.2, 10.0), true, URI, &mut memory, &settings),
            TickAction::Restart(RestartReason::NearEnd)
        );
    }

    #[test]
    fn test_near_end_needs_loop_and_duration() {
        let settings = settings();
        // loop=false: play out to the end
        let mut memory = SupervisorMemory::default();
        assert_eq!(
            decide(&playing(9.0, 10.0), false, URI, &mut memory, &settings),
            TickAction::None
        );

        // Duration 0 (unknown): the margin cannot be computed
        let mut memory = SupervisorMemory::default();
        assert_eq!(
            decide(&playing(9.0, 0.0), true, URI, &mut memory, &settings),
            TickAction::None
        );
    }

    #[test]
    fn test_uri_divergence_reconciles_after_two_ticks() {
        let mut memory = SupervisorMemory::default();
        let settings = settings();
        let mut foreign = playing(3.0, 600.0);
        foreign.current_uri = Some("http://10.0.0.9:8200/other.mp4".to_string());

        assert_eq!(
            decide(&foreign, true, URI, &mut memory, &settings),
            TickAction::None
        );
        let mut foreign2 = foreign.clone();
        foreign2.position_secs = Some(4.0);
        assert_eq!(
            decide(&foreign2, true, URI, &mut memory, &settings),
            TickAction::Restart(RestartReason::MediaLost)
        );
    }

    #[test]
    fn test_uri_case_differences_are_not_divergence() {
        let mut memory = SupervisorMemory::default();
        let settings = settings();
        let mut observation = playing(3.0, 600.0);
        observation.current_uri = Some(URI.to_uppercase());

        assert_eq!(
            decide(&observation, true, URI, &mut memory, &settings),
            TickAction::None
        );
        let mut observation2 = observation.clone();
        observation2.position_secs = Some(4.0);
        assert_eq!(
            decide(&observation2, true, URI, &mut memory, &settings),
            TickAction::None
        );
    }

    #[test]
    fn test_no_media_present_reissues_after_two_ticks() {
        let mut memory = SupervisorMemory::default();
        let settings = settings();
        assert_eq!(
            decide(&in_state(TransportState::NoMediaPresent), true, URI, &mut memory, &settings),
            TickAction::None
        );
        assert_eq!(
            decide(&in_state(TransportState::NoMediaPresent), true, URI, &mut memory, &settings),
            TickAction::Restart(RestartReason::MediaLost)
        );
    }

    #[test]
    fn test_transport_failures_abandon_after_three_ticks() {
        let mut memory = SupervisorMemory::default();
        let settings = settings();
        assert_eq!(decide(&failed(), true, URI, &mut memory, &settings), TickAction::None);
        assert_eq!(decide(&failed(), true, URI, &mut memory, &settings), TickAction::None);
        assert_eq!(decide(&failed(), true, URI, &mut memory, &settings), TickAction::Abandon);
    }

    #[test]
    fn test_recovery_resets_failure_count() {
        let mut memory = SupervisorMemory::default();
        let settings = settings();
        decide(&failed(), true, URI, &mut memory, &settings);
        decide(&failed(), true, URI, &mut memory, &settings);
        decide(&playing(1.0, 600.0), true, URI, &mut memory, &settings);
        decide(&failed(), true, URI, &mut memory, &settings);
        decide(&failed(), true, URI, &mut memory, &settings);
        assert_eq!(decide(&failed(), true, URI, &mut memory, &settings), TickAction::Abandon);
    }

    #[test]
    fn test_paused_is_left_alone() {
        let mut memory = SupervisorMemory::default();
        assert_eq!(
            decide(
                &in_state(TransportState::PausedPlayback),
                true,
                URI,
                &mut memory,
                &settings()
            ),
            TickAction::None
        );
    }
}
