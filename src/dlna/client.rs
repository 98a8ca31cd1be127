//! AVTransport SOAP client for loopcast
//!
//! Wire-level control of one renderer: every action posts a SOAP envelope to
//! the renderer's AVTransport control URL and parses the response. Calls run
//! under a timeout with a single short retry on transport failures; SOAP
//! faults come back as [`Error::RendererRefused`] with the UPnP error code.

use log::{debug, trace};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::{
    DLNA_ACTION_GET_POSITION_INFO, DLNA_ACTION_GET_TRANSPORT_INFO, DLNA_ACTION_PAUSE,
    DLNA_ACTION_PLAY, DLNA_ACTION_SEEK, DLNA_ACTION_SET_AV_TRANSPORT_URI, DLNA_ACTION_STOP,
    DLNA_DEFAULT_SPEED, DLNA_INSTANCE_ID, SOAP_RETRY_DELAY_MS,
};
use crate::devices::{Render, TransportState};
use crate::error::{Error, Result};
use crate::utils::{format_hhmmss, time_str_to_seconds};

/// Builds the Play payload
fn build_play_payload(instance_id: u32, speed: u32) -> String {
    format!(
        r#"
    <InstanceID>{instance_id}</InstanceID>
    <Speed>{speed}</Speed>
"#
    )
}

/// Builds a payload carrying only the instance id (Pause, Stop, the getters)
fn build_instance_payload(instance_id: u32) -> String {
    format!(r#"<InstanceID>{instance_id}</InstanceID>"#)
}

/// Builds the Seek payload with a REL_TIME target
fn build_seek_payload(instance_id: u32, target: &str) -> String {
    format!(
        r#"
    <InstanceID>{instance_id}</InstanceID>
    <Unit>REL_TIME</Unit>
    <Target>{target}</Target>
"#
    )
}

/// Builds the SetAVTransportURI payload
fn build_set_uri_payload(instance_id: u32, uri: &str, metadata: &str) -> String {
    format!(
        r#"
    <InstanceID>{instance_id}</InstanceID>
    <CurrentURI>{uri}</CurrentURI>
    <CurrentURIMetaData>{metadata}</CurrentURIMetaData>
"#
    )
}

/// Playback position information
///
/// Contains the fields of a GetPositionInfo response the core cares about.
#[derive(Debug, Clone, Default)]
pub struct PositionInfo {
    /// Total duration of the current track (format: HH:MM:SS)
    pub track_duration: String,
    /// URI of the current track
    pub track_uri: String,
    /// Relative time position (format: HH:MM:SS)
    pub rel_time: String,
}

impl PositionInfo {
    /// Parses PositionInfo from an action response
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        PositionInfo {
            track_duration: map.get("TrackDuration").cloned().unwrap_or_default(),
            track_uri: map.get("TrackURI").cloned().unwrap_or_default(),
            rel_time: map.get("RelTime").cloned().unwrap_or_default(),
        }
    }

    /// Playback position in seconds, when the renderer reported one
    pub fn position_secs(&self) -> Option<f64> {
        time_str_to_seconds(&self.rel_time)
    }

    /// Track duration in seconds. A renderer reporting `00:00:00` has not
    /// provided a usable duration.
    pub fn duration_secs(&self) -> Option<f64> {
        time_str_to_seconds(&self.track_duration).filter(|&secs| secs > 0.0)
    }
}

/// Transport information
///
/// Contains the fields of a GetTransportInfo response the core cares about.
#[derive(Debug, Clone, Default)]
pub struct TransportInfo {
    /// Transport state (e.g., PLAYING, PAUSED_PLAYBACK, STOPPED)
    pub transport_state: String,
    /// Detailed transport status information
    pub transport_status: String,
}

impl TransportInfo {
    /// Parses TransportInfo from an action response
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        TransportInfo {
            transport_state: map
                .get("CurrentTransportState")
                .cloned()
                .unwrap_or_default(),
            transport_status: map
                .get("CurrentTransportStatus")
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// The parsed transport state
    pub fn state(&self) -> TransportState {
        TransportState::parse(&self.transport_state)
    }
}

/// SOAP control client for one renderer's AVTransport service.
#[derive(Debug, Clone)]
pub struct AvTransportClient {
    render: Render,
    timeout: Duration,
}

impl AvTransportClient {
    /// Creates a client driving `render` with the given per-call timeout.
    pub fn new(render: Render, timeout: Duration) -> Self {
        Self { render, timeout }
    }

    /// The render this client drives.
    pub fn render(&self) -> &Render {
        &self.render
    }

    /// SetAVTransportURI with DIDL-Lite metadata.
    pub async fn set_uri(&self, uri: &str, metadata: &str) -> Result<()> {
        debug!("Setting transport URI to {uri}");
        let payload = build_set_uri_payload(DLNA_INSTANCE_ID, uri, metadata);
        self.invoke(DLNA_ACTION_SET_AV_TRANSPORT_URI, &payload)
            .await?;
        Ok(())
    }

    /// Play with Speed=1.
    pub async fn play(&self) -> Result<()> {
        let payload = build_play_payload(DLNA_INSTANCE_ID, DLNA_DEFAULT_SPEED);
        self.invoke(DLNA_ACTION_PLAY, &payload).await?;
        Ok(())
    }

    /// Pause.
    pub async fn pause(&self) -> Result<()> {
        let payload = build_instance_payload(DLNA_INSTANCE_ID);
        self.invoke(DLNA_ACTION_PAUSE, &payload).await?;
        Ok(())
    }

    /// Stop.
    pub async fn stop(&self) -> Result<()> {
        let payload = build_instance_payload(DLNA_INSTANCE_ID);
        self.invoke(DLNA_ACTION_STOP, &payload).await?;
        Ok(())
    }

    /// Seek with Unit=REL_TIME. A renderer that faults on the seek unit maps
    /// to [`Error::Unsupported`].
    pub async fn seek(&self, position: Duration) -> Result<()> {
        let target = format_hhmmss(position);
        let payload = build_seek_payload(DLNA_INSTANCE_ID, &target);
        self.invoke(DLNA_ACTION_SEEK, &payload)
            .await
            .map_err(|err| match err {
                Error::RendererRefused {
                    code: 710 | 711, ..
                } => Error::Unsupported {
                    action: DLNA_ACTION_SEEK.to_string(),
                },
                other => other,
            })?;
        Ok(())
    }

    /// GetPositionInfo.
    pub async fn position(&self) -> Result<PositionInfo> {
        let payload = build_instance_payload(DLNA_INSTANCE_ID);
        let response = self.invoke(DLNA_ACTION_GET_POSITION_INFO, &payload).await?;
        Ok(PositionInfo::from_map(&response))
    }

    /// GetTransportInfo.
    pub async fn transport_info(&self) -> Result<TransportInfo> {
        let payload = build_instance_payload(DLNA_INSTANCE_ID);
        let response = self
            .invoke(DLNA_ACTION_GET_TRANSPORT_INFO, &payload)
            .await?;
        Ok(TransportInfo::from_map(&response))
    }

    /// Executes one action under the call timeout, retrying once after a
    /// short delay on transport failures only.
    async fn invoke(&self, action: &str, payload: &str) -> Result<HashMap<String, String>> {
        let mut retried = false;
        loop {
            trace!("Executing {action} with payload {payload}");
            let outcome = tokio::time::timeout(
                self.timeout,
                self.render
                    .service
                    .action(self.render.device.url(), action, payload),
            )
            .await;

            let err = match outcome {
                Ok(Ok(response)) => {
                    trace!("{action} response: {response:?}");
                    return Ok(response);
                }
                Ok(Err(source)) => map_action_error(action, source),
                Err(_) => Error::Transport {
                    action: action.to_string(),
                    reason: format!("no response within {:?}", self.timeout),
                },
            };

            if retried || !matches!(err, Error::Transport { .. }) {
                return Err(err);
            }
            retried = true;
            debug!("{action} failed ({err}), retrying once");
            tokio::time::sleep(Duration::from_millis(SOAP_RETRY_DELAY_MS)).await;
        }
    }
}

/// Maps a rupnp action failure onto the crate error kinds.
fn map_action_error(action: &str, err: rupnp::Error) -> Error {
    match err {
        rupnp::Error::UPnPError(fault) => Error::RendererRefused {
            code: fault.err_code(),
            description: fault.to_string(),
        },
        rupnp::Error::HttpErrorCode(status) => Error::RendererRefused {
            code: status.as_u16(),
            description: format!("HTTP status {status}"),
        },
        other => Error::Transport {
            action: action.to_string(),
            reason: other.to_string(),
        },
    }
}
