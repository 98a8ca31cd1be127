use std::fmt;

/// Errors that can happen inside loopcast
#[derive(Debug)]
pub enum Error {
    // Network and SOAP errors
    /// A socket, connect, or timeout failure while talking to a renderer
    Transport {
        /// The AVTransport action that was being executed
        action: String,
        /// What went wrong on the wire
        reason: String,
    },
    /// The renderer answered with a SOAP fault or a non-2xx status
    RendererRefused {
        /// UPnP error code (or HTTP status when no fault body was present)
        code: u16,
        /// Human readable fault description
        description: String,
    },
    /// The renderer requires a capability it does not advertise or accept
    Unsupported {
        /// The action that is not available on this renderer
        action: String,
    },
    /// Playback was commanded but the transport never reported PLAYING
    PlaybackNotConfirmed {
        /// The renderer that was being driven
        renderer_id: String,
        /// How long we waited for the transport to come up
        waited_ms: u64,
    },

    // Discovery errors
    /// SSDP search failed
    Discovery {
        /// The underlying SSDP error
        source: ssdp_client::Error,
    },
    /// A device description could not be fetched or parsed
    BadDescription {
        /// The LOCATION URL the description was fetched from
        location: String,
        /// Why the description was rejected
        reason: String,
    },

    // Media server errors
    /// No free TCP port in the configured media port range
    BindExhausted {
        /// Lower bound of the scanned range
        low: u16,
        /// Upper bound of the scanned range
        high: u16,
    },
    /// An HTTP request referenced a token that is not published
    NotPublished {
        /// The unknown token
        token: String,
    },
    /// A published file was gone when a renderer requested it
    FileMissing {
        /// Path to the missing file
        path: String,
    },

    // Assignment errors
    /// A higher priority assignment already holds the renderer
    Preempted {
        /// Priority of the assignment that kept the renderer
        current_priority: i32,
    },
    /// The catalog has no video under the requested id
    UnknownVideo {
        /// The video id that was looked up
        video_id: String,
    },
    /// The controller has no renderer under the requested id
    UnknownRenderer {
        /// The renderer id that was looked up
        renderer_id: String,
    },

    // Infrastructure errors
    /// Failed to parse a host or socket address
    InvalidAddress {
        /// The address that failed to parse
        address: String,
        /// The reason for the parsing failure
        reason: String,
    },
    /// Failed to identify the local IP address for media URLs
    LocalAddressResolutionFailed {
        /// The underlying error from local IP detection
        source: local_ip_address::Error,
    },
}

impl Error {
    /// Whether the supervisor or assignment engine should retry this failure
    /// under backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::RendererRefused { code, .. } => (500u16..=599).contains(code),
            Error::PlaybackNotConfirmed { .. } => true,
            _ => false,
        }
    }

    /// UPnP AVTransport "transition not available" style faults are resolved
    /// by issuing Stop before the retry.
    pub fn needs_stop_before_retry(&self) -> bool {
        matches!(
            self,
            Error::RendererRefused {
                code: 701 | 714 | 718,
                ..
            }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport { action, reason } => {
                write!(f, "Transport failure during '{action}': {reason}")
            }
            Error::RendererRefused { code, description } => {
                write!(f, "Renderer refused action (code {code}): {description}")
            }
            Error::Unsupported { action } => {
                write!(f, "Renderer does not support action '{action}'")
            }
            Error::PlaybackNotConfirmed {
                renderer_id,
                waited_ms,
            } => {
                write!(
                    f,
                    "Renderer '{renderer_id}' did not reach PLAYING within {waited_ms} ms"
                )
            }
            Error::Discovery { source } => {
                write!(f, "SSDP discovery failed: {source}")
            }
            Error::BadDescription { location, reason } => {
                write!(f, "Bad device description at '{location}': {reason}")
            }
            Error::BindExhausted { low, high } => {
                write!(f, "No free media port in range {low}-{high}")
            }
            Error::NotPublished { token } => {
                write!(f, "No published video for token '{token}'")
            }
            Error::FileMissing { path } => {
                write!(f, "Published file '{path}' is missing")
            }
            Error::Preempted { current_priority } => {
                write!(
                    f,
                    "Renderer is held by an assignment with priority {current_priority}"
                )
            }
            Error::UnknownVideo { video_id } => {
                write!(f, "No video '{video_id}' in the catalog")
            }
            Error::UnknownRenderer { renderer_id } => {
                write!(f, "No renderer '{renderer_id}' is registered")
            }
            Error::InvalidAddress { address, reason } => {
                write!(f, "Failed to parse network address '{address}': {reason}")
            }
            Error::LocalAddressResolutionFailed { source } => {
                write!(f, "Failed to resolve local address: {source}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Discovery { source } => Some(source),
            Error::LocalAddressResolutionFailed { source } => Some(source),
            _ => None,
        }
    }
}

impl From<ssdp_client::Error> for Error {
    fn from(err: ssdp_client::Error) -> Self {
        Error::Discovery { source: err }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_retryable() {
        let error = Error::Transport {
            action: "Play".to_string(),
            reason: "connection reset".to_string(),
        };
        assert!(error.is_retryable());
        assert!(!error.needs_stop_before_retry());
    }

    #[test]
    fn test_refused_5xx_is_retryable() {
        let error = Error::RendererRefused {
            code: 501,
            description: "Action Failed".to_string(),
        };
        assert!(error.is_retryable());

        let error = Error::RendererRefused {
            code: 402,
            description: "Invalid Args".to_string(),
        };
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_wrong_state_faults_need_stop() {
        for code in [701, 714, 718] {
            let error = Error::RendererRefused {
                code,
                description: "Transition not available".to_string(),
            };
            assert!(error.needs_stop_before_retry(), "code {code}");
        }
        let error = Error::RendererRefused {
            code: 716,
            description: "Resource not found".to_string(),
        };
        assert!(!error.needs_stop_before_retry());
    }

    #[test]
    fn test_preempted_is_terminal() {
        let error = Error::Preempted {
            current_priority: 100,
        };
        assert!(!error.is_retryable());
        assert!(error.to_string().contains("priority 100"));
    }

    #[test]
    fn test_bind_exhausted_display() {
        let error = Error::BindExhausted {
            low: 9000,
            high: 9100,
        };
        assert!(error.to_string().contains("9000-9100"));
    }
}
