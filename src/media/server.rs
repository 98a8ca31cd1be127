//! Embedded HTTP media server for loopcast
//!
//! Serves published video files to DLNA renderers. Renderers commonly issue
//! a probe GET followed by ranged GETs with slightly mutated URL forms, so
//! routing goes through an opaque publication token and every incoming path
//! is canonicalized before lookup. Responses carry the DLNA headers without
//! which common renderers reject the stream as an unsupported container.

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use futures::Stream;
use http::{HeaderMap, Method, StatusCode, header};
use log::{debug, error, info, warn};
use rand::RngCore;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::catalog::VideoSnapshot;
use crate::config::{Config, DEFAULT_DLNA_FLAGS, SERVER_HEADER, RendererProfile};
use crate::error::{Error, Result};
use crate::utils::{get_local_ip, mime_type_for_path, sanitize_filename_for_url};

use super::sessions::{SessionRegistry, SessionState, StreamingSession};

const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// A published video: one token maps to one assignment's payload.
#[derive(Debug, Clone)]
pub struct Publication {
    /// Opaque URL-safe token routing requests to this payload
    pub token: String,
    /// The payload
    pub video: VideoSnapshot,
    /// DLNA profile advertised in contentFeatures
    pub dlna_profile: Option<String>,
    /// DLNA flags advertised in contentFeatures
    pub flags: String,
    /// Full media URL handed to the renderer
    pub url: String,
    /// Subtitle sidecar URL, when the video has one
    pub subtitle_url: Option<String>,
}

#[derive(Debug)]
struct MediaInner {
    base_url: String,
    publications: RwLock<HashMap<String, Publication>>,
    sessions: SessionRegistry,
}

impl MediaInner {
    fn new(base_url: String) -> Self {
        Self {
            base_url,
            publications: RwLock::new(HashMap::new()),
            sessions: SessionRegistry::new(),
        }
    }

    fn publish(&self, video: &VideoSnapshot, profile: Option<&RendererProfile>) -> Publication {
        let token = generate_token();
        let filename = video
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .map(sanitize_filename_for_url)
            .unwrap_or_else(|| "video".to_string());
        let url = format!("{}/{token}/{filename}", self.base_url);
        let subtitle_url = video.subtitle.as_ref().map(|_| format!("{url}.srt"));

        let (dlna_profile, flags) = match profile {
            Some(profile) => (Some(profile.dlna_profile.clone()), profile.flags.clone()),
            None => (video.dlna_profile.clone(), DEFAULT_DLNA_FLAGS.to_string()),
        };

        let publication = Publication {
            token: token.clone(),
            video: video.clone(),
            dlna_profile,
            flags,
            url,
            subtitle_url,
        };
        self.publications
            .write()
            .expect("publication lock poisoned")
            .insert(token, publication.clone());
        info!("Published video '{}' at {}", video.id, publication.url);
        publication
    }

    fn unpublish(&self, token: &str) -> bool {
        let removed = self
            .publications
            .write()
            .expect("publication lock poisoned")
            .remove(token)
            .is_some();
        if removed {
            debug!("Unpublished token {token}");
        }
        removed
    }

    fn publication(&self, token: &str) -> Option<Publication> {
        self.publications
            .read()
            .expect("publication lock poisoned")
            .get(token)
            .cloned()
    }
}

/// The media streaming server. Cheap to clone; all clones share the same
/// publication table and session registry.
#[derive(Clone)]
pub struct MediaStreamingServer {
    inner: Arc<MediaInner>,
    token: CancellationToken,
    serve_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    drain_timeout: Duration,
    addr: SocketAddr,
}

impl MediaStreamingServer {
    /// Binds the first free port in the configured range and starts serving.
    ///
    /// When the whole range is busy this fails with
    /// [`Error::BindExhausted`], which is fatal to the core.
    pub async fn bind(config: &Config) -> Result<Self> {
        let host = match &config.media_host {
            Some(host) => host.clone(),
            None => get_local_ip()?,
        };
        let ip: IpAddr = host.parse().map_err(|e| Error::InvalidAddress {
            address: host.clone(),
            reason: format!("not an IP address: {e}"),
        })?;

        let (low, high) = config.media_port_range;
        let mut bound = None;
        for port in low..=high {
            match TcpListener::bind((ip, port)).await {
                Ok(listener) => {
                    bound = Some(listener);
                    break;
                }
                Err(e) => {
                    debug!("Media port {port} unavailable: {e}");
                }
            }
        }
        let listener = bound.ok_or(Error::BindExhausted { low, high })?;
        let addr = listener.local_addr().map_err(|e| Error::InvalidAddress {
            address: format!("{host}:{low}-{high}"),
            reason: e.to_string(),
        })?;

        let inner = Arc::new(MediaInner::new(format!("http://{host}:{}", addr.port())));
        let token = CancellationToken::new();

        let app = router(inner.clone());
        let shutdown = token.clone();
        let serve_task = tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
            if let Err(e) = served {
                error!("Media server error: {e}");
            }
        });

        info!("Media server listening on {addr}");
        Ok(Self {
            inner,
            token,
            serve_task: Arc::new(Mutex::new(Some(serve_task))),
            drain_timeout: config.drain_timeout,
            addr,
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The base URL published media URLs start with.
    pub fn base_url(&self) -> String {
        self.inner.base_url.clone()
    }

    /// Publishes a video and returns its media URL and token.
    pub fn publish(&self, video: &VideoSnapshot, profile: Option<&RendererProfile>) -> Publication {
        self.inner.publish(video, profile)
    }

    /// Removes a publication. Requests for the token fail with 404 afterwards.
    pub fn unpublish(&self, token: &str) -> bool {
        self.inner.unpublish(token)
    }

    /// Looks up a live publication.
    pub fn publication(&self, token: &str) -> Option<Publication> {
        self.inner.publication(token)
    }

    /// Snapshot of all streaming sessions.
    pub fn sessions(&self) -> Vec<StreamingSession> {
        self.inner.sessions.snapshot()
    }

    /// Stops the listener, waits up to the drain timeout for in-flight
    /// responses, then severs what is left and marks those sessions errored.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let task = self
            .serve_task
            .lock()
            .expect("serve task lock poisoned")
            .take();
        if let Some(mut task) = task {
            if tokio::time::timeout(self.drain_timeout, &mut task)
                .await
                .is_err()
            {
                warn!("Media server drain timed out, severing remaining connections");
                task.abort();
                self.inner.sessions.sever_open();
            }
        }
    }
}

fn router(inner: Arc<MediaInner>) -> Router {
    Router::new().fallback(serve_media).with_state(inner)
}

async fn serve_media(State(inner): State<Arc<MediaInner>>, request: Request) -> Response {
    let method = request.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return status_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    let Some((token, filename)) = split_request_path(request.uri().path()) else {
        return status_response(StatusCode::NOT_FOUND);
    };
    let Some(publication) = inner.publication(&token) else {
        debug!(
            "{}",
            Error::NotPublished {
                token: token.clone()
            }
        );
        return status_response(StatusCode::NOT_FOUND);
    };

    // The filename segment is cosmetic; only the `.srt` suffix routes to the
    // subtitle sidecar.
    let wants_subtitle = filename
        .as_deref()
        .is_some_and(|name| name.to_ascii_lowercase().ends_with(".srt"));
    let (file_path, mime) = if wants_subtitle {
        match &publication.video.subtitle {
            Some(subtitle) => (subtitle.clone(), mime_type_for_path(subtitle)),
            None => return status_response(StatusCode::NOT_FOUND),
        }
    } else {
        (publication.video.path.clone(), publication.video.mime.clone())
    };

    let total = match tokio::fs::metadata(&file_path).await {
        Ok(metadata) => metadata.len(),
        Err(_) => {
            warn!(
                "{}",
                Error::FileMissing {
                    path: file_path.display().to_string()
                }
            );
            return status_response(StatusCode::GONE);
        }
    };

    let range = parse_range(request.headers(), total);
    let (status, start, end) = match range {
        RangeOutcome::Full => (
            StatusCode::OK,
            0,
            total.saturating_sub(1),
        ),
        RangeOutcome::Satisfiable { start, end } => (StatusCode::PARTIAL_CONTENT, start, end),
        RangeOutcome::Unsatisfiable => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{total}"))
                .header(header::SERVER, SERVER_HEADER)
                .body(Body::empty())
                .expect("static response builds");
        }
    };
    let content_length = if total == 0 { 0 } else { end - start + 1 };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, mime)
        .header(header::CONTENT_LENGTH, content_length)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            "contentFeatures.dlna.org",
            content_features(
                if wants_subtitle {
                    None
                } else {
                    publication.dlna_profile.as_deref()
                },
                &publication.flags,
            ),
        )
        .header(
            "transferMode.dlna.org",
            if wants_subtitle { "Interactive" } else { "Streaming" },
        )
        .header(header::SERVER, SERVER_HEADER);
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{total}"),
        );
    }

    if method == Method::HEAD {
        return builder.body(Body::empty()).expect("static response builds");
    }

    let mut file = match tokio::fs::File::open(&file_path).await {
        Ok(file) => file,
        Err(_) => return status_response(StatusCode::GONE),
    };
    if start > 0 && file.seek(SeekFrom::Start(start)).await.is_err() {
        return status_response(StatusCode::GONE);
    }

    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let session_id =
        inner
            .sessions
            .open(&publication.token, &publication.video.id, client, content_length);
    debug!(
        "Serving {} bytes {start}-{end} of '{}' as session {session_id}",
        content_length, publication.video.id
    );

    let reader = file.take(content_length);
    let stream = TrackedStream {
        inner: ReaderStream::with_capacity(reader, STREAM_CHUNK_BYTES),
        sessions: inner.sessions.clone(),
        session_id,
        expected: content_length,
        delivered: 0,
        closed: false,
    };

    builder
        .body(Body::from_stream(stream))
        .expect("static response builds")
}

fn status_response(status: StatusCode) -> Response {
    Response::builder()
        .status(status)
        .header(header::SERVER, SERVER_HEADER)
        .body(Body::empty())
        .expect("static response builds")
}

/// The fourth protocolInfo field served in `contentFeatures.dlna.org`.
fn content_features(dlna_profile: Option<&str>, flags: &str) -> String {
    match dlna_profile {
        Some(profile) => {
            format!("DLNA.ORG_PN={profile};DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS={flags}")
        }
        None => format!("DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS={flags}"),
    }
}

/// Canonicalizes a request path and splits it into the token and the
/// cosmetic filename. Duplicate slashes, trailing slashes and
/// percent-encoding variants all resolve to the same token; token matching
/// is case-insensitive.
fn split_request_path(path: &str) -> Option<(String, Option<String>)> {
    let decoded = percent_decode(path);
    let mut segments = decoded.split('/').filter(|segment| !segment.is_empty());
    let token = segments.next()?.to_ascii_lowercase();
    let filename = segments.next().map(str::to_string);
    Some((token, filename))
}

/// Decodes percent-escapes, accepting both hex digit cases. Malformed
/// escapes pass through literally.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &input[i + 1..i + 3];
            if let Ok(value) = u8::from_str_radix(hex, 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[derive(Debug, PartialEq)]
enum RangeOutcome {
    Full,
    Satisfiable { start: u64, end: u64 },
    Unsatisfiable,
}

/// Parses a `Range: bytes=start-[end]` header. The end is clamped to EOF; a
/// start beyond EOF is unsatisfiable; anything malformed falls back to a
/// full response.
fn parse_range(headers: &HeaderMap, total: u64) -> RangeOutcome {
    let Some(value) = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
    else {
        return RangeOutcome::Full;
    };
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if total == 0 {
        return RangeOutcome::Full;
    }

    // Only the first range of a multi-range request is honored
    let first = spec.split(',').next().unwrap_or(spec).trim();
    let Some((start_str, end_str)) = first.split_once('-') else {
        return RangeOutcome::Full;
    };

    if start_str.is_empty() {
        // Suffix form: last N bytes
        let Ok(suffix) = end_str.parse::<u64>() else {
            return RangeOutcome::Full;
        };
        if suffix == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        let start = total.saturating_sub(suffix);
        return RangeOutcome::Satisfiable {
            start,
            end: total - 1,
        };
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    if start >= total {
        return RangeOutcome::Unsatisfiable;
    }

    let end = if end_str.is_empty() {
        total - 1
    } else {
        match end_str.parse::<u64>() {
            // Ranges past EOF are clamped rather than rejected
            Ok(end) => end.min(total - 1),
            Err(_) => return RangeOutcome::Full,
        }
    };
    if end < start {
        return RangeOutcome::Unsatisfiable;
    }

    RangeOutcome::Satisfiable { start, end }
}

/// Wraps the file stream to account bytes to the session and close it with
/// the right final state when the connection ends, including mid-stream
/// aborts where the body is simply dropped.
struct TrackedStream<S> {
    inner: S,
    sessions: SessionRegistry,
    session_id: u64,
    expected: u64,
    delivered: u64,
    closed: bool,
}

impl<S> Stream for TrackedStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.delivered += chunk.len() as u64;
                this.sessions.record_bytes(this.session_id, chunk.len() as u64);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.closed = true;
                this.sessions.close(this.session_id, SessionState::Errored);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.closed = true;
                let state = if this.delivered >= this.expected {
                    SessionState::Closed
                } else {
                    SessionState::Errored
                };
                this.sessions.close(this.session_id, state);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for TrackedStream<S> {
    fn drop(&mut self) {
        if !self.closed {
            let state = if self.delivered >= self.expected {
                SessionState::Closed
            } else {
                SessionState::Errored
            };
            self.sessions.close(self.session_id, state);
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use http::Request as HttpRequest;
    use std::io::Write;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const PAYLOAD: &[u8] = b"0123456789abcdefghij";

    fn fixture() -> (Arc<MediaInner>, Publication, TempDir) {
        let dir = TempDir::new().unwrap();
        let video_path = dir.path().join("Movie Night.mp4");
        std::fs::File::create(&video_path)
            .unwrap()
            .write_all(PAYLOAD)
            .unwrap();

        let inner = Arc::new(MediaInner::new("http://127.0.0.1:9000".to_string()));
        let video = VideoSnapshot::from_path("v1", &video_path).unwrap();
        let publication = inner.publish(&video, None);
        (inner, publication, dir)
    }

    async fn get(inner: &Arc<MediaInner>, path: &str) -> Response {
        let request = HttpRequest::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap();
        router(inner.clone()).oneshot(request).await.unwrap()
    }

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_publication_url_shape() {
        let (_, publication, _dir) = fixture();
        assert!(
            publication
                .url
                .starts_with(&format!("http://127.0.0.1:9000/{}/", publication.token))
        );
        assert!(publication.url.ends_with("movie.night.mp4"));
    }

    #[test]
    fn test_split_request_path_normalization() {
        let variants = [
            "/tok123/movie.mp4",
            "//tok123//movie.mp4/",
            "/TOK123/movie.mp4",
            "/%74%6Fk123/movie.mp4",
            "/%74%6fk123/movie.mp4",
        ];
        for variant in variants {
            let (token, filename) = split_request_path(variant).unwrap();
            assert_eq!(token, "tok123", "variant {variant}");
            assert_eq!(filename.as_deref(), Some("movie.mp4"), "variant {variant}");
        }
        assert!(split_request_path("/").is_none());
    }

    #[test]
    fn test_parse_range() {
        let with_range = |value: &str| {
            let mut headers = HeaderMap::new();
            headers.insert(header::RANGE, value.parse().unwrap());
            headers
        };

        assert_eq!(parse_range(&HeaderMap::new(), 100), RangeOutcome::Full);
        assert_eq!(
            parse_range(&with_range("bytes=0-"), 100),
            RangeOutcome::Satisfiable { start: 0, end: 99 }
        );
        assert_eq!(
            parse_range(&with_range("bytes=10-19"), 100),
            RangeOutcome::Satisfiable { start: 10, end: 19 }
        );
        // End past EOF is clamped
        assert_eq!(
            parse_range(&with_range("bytes=10-9999"), 100),
            RangeOutcome::Satisfiable { start: 10, end: 99 }
        );
        assert_eq!(
            parse_range(&with_range("bytes=-25"), 100),
            RangeOutcome::Satisfiable { start: 75, end: 99 }
        );
        assert_eq!(
            parse_range(&with_range("bytes=100-"), 100),
            RangeOutcome::Unsatisfiable
        );
        assert_eq!(parse_range(&with_range("lines=1-2"), 100), RangeOutcome::Full);
        assert_eq!(parse_range(&with_range("bytes=oops"), 100), RangeOutcome::Full);
    }

    #[tokio::test]
    async fn test_probe_then_range_are_byte_identical() {
        let (inner, publication, _dir) = fixture();
        let token = &publication.token;

        let probe = get(&inner, &format!("/{token}/movie.night.mp4")).await;
        assert_eq!(probe.status(), StatusCode::OK);
        let probe_body = to_bytes(probe.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&probe_body[..], PAYLOAD);

        // The renderer mutates the URL between probe and stream
        let upper = token.to_uppercase();
        let stream = get(&inner, &format!("/{upper}/movie.night.mp4/")).await;
        assert_eq!(stream.status(), StatusCode::OK);
        let stream_body = to_bytes(stream.into_body(), usize::MAX).await.unwrap();
        assert_eq!(probe_body, stream_body);

        // Each GET registered its own session
        let sessions = inner.sessions.snapshot();
        assert_eq!(sessions.len(), 2);
        assert_ne!(sessions[0].id, sessions[1].id);
        assert!(
            sessions
                .iter()
                .all(|session| session.state == SessionState::Closed
                    && session.bytes_served == PAYLOAD.len() as u64)
        );
    }

    #[tokio::test]
    async fn test_range_request() {
        let (inner, publication, _dir) = fixture();
        let request = HttpRequest::builder()
            .uri(format!("/{}/movie.night.mp4", publication.token))
            .header(header::RANGE, "bytes=4-9")
            .body(Body::empty())
            .unwrap();
        let response = router(inner.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            &format!("bytes 4-9/{}", PAYLOAD.len())
        );
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "6");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &PAYLOAD[4..10]);
    }

    #[tokio::test]
    async fn test_head_returns_headers_without_body() {
        let (inner, publication, _dir) = fixture();
        let request = HttpRequest::builder()
            .method(Method::HEAD)
            .uri(format!("/{}/movie.night.mp4", publication.token))
            .body(Body::empty())
            .unwrap();
        let response = router(inner.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            &PAYLOAD.len().to_string()
        );
        assert_eq!(response.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
        // A HEAD probe does not open a session
        assert!(inner.sessions.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_dlna_headers_present() {
        let (inner, publication, _dir) = fixture();
        let response = get(&inner, &format!("/{}/movie.night.mp4", publication.token)).await;

        let features = response
            .headers()
            .get("contentFeatures.dlna.org")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(features.contains("DLNA.ORG_PN=AVC_MP4_HP_HD_AAC"));
        assert!(features.contains("DLNA.ORG_OP=01"));
        assert!(features.contains("DLNA.ORG_FLAGS=01700000000000000000000000000000"));
        assert_eq!(
            response.headers().get("transferMode.dlna.org").unwrap(),
            "Streaming"
        );
        assert!(
            response
                .headers()
                .get(header::SERVER)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("UPnP/1.0 DLNA/1.50")
        );
    }

    #[tokio::test]
    async fn test_subtitle_sidecar() {
        let dir = TempDir::new().unwrap();
        let video_path = dir.path().join("clip.mp4");
        std::fs::write(&video_path, PAYLOAD).unwrap();
        std::fs::write(dir.path().join("clip.srt"), b"1\n00:00:01,000 --> 00:00:02,000\nhi\n")
            .unwrap();

        let inner = Arc::new(MediaInner::new("http://127.0.0.1:9000".to_string()));
        let video = VideoSnapshot::from_path("v1", &video_path).unwrap();
        let publication = inner.publish(&video, None);
        assert!(publication.subtitle_url.is_some());

        let response = get(&inner, &format!("/{}/clip.mp4.srt", publication.token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/srt");
        assert_eq!(
            response.headers().get("transferMode.dlna.org").unwrap(),
            "Interactive"
        );
    }

    #[tokio::test]
    async fn test_unknown_token_is_404() {
        let (inner, _publication, _dir) = fixture();
        let response = get(&inner, "/deadbeefdeadbeef/whatever.mp4").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unpublished_token_is_404() {
        let (inner, publication, _dir) = fixture();
        assert!(inner.unpublish(&publication.token));
        let response = get(&inner, &format!("/{}/movie.night.mp4", publication.token)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_file_is_410() {
        let (inner, publication, dir) = fixture();
        drop(dir);
        let response = get(&inner, &format!("/{}/movie.night.mp4", publication.token)).await;
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_bind_exhausted_when_range_is_busy() {
        // Occupy a port, then configure a range consisting of only that port
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let config = Config::new()
            .with_media_host("127.0.0.1")
            .with_media_port_range(port, port);
        let result = MediaStreamingServer::bind(&config).await;

        match result {
            Err(Error::BindExhausted { low, high }) => {
                assert_eq!((low, high), (port, port));
            }
            Ok(_) => panic!("bind unexpectedly succeeded on an occupied port"),
            Err(other) => panic!("expected BindExhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_bind_and_serve_over_tcp() {
        let config = Config::new()
            .with_media_host("127.0.0.1")
            .with_media_port_range(0, 0);
        let server = MediaStreamingServer::bind(&config).await.unwrap();

        let dir = TempDir::new().unwrap();
        let video_path = dir.path().join("clip.mp4");
        std::fs::write(&video_path, PAYLOAD).unwrap();
        let video = VideoSnapshot::from_path("v1", &video_path).unwrap();
        let publication = server.publish(&video, None);

        let stream = tokio::net::TcpStream::connect(server.local_addr()).await.unwrap();
        let (mut read_half, mut write_half) = stream.into_split();
        let request = format!(
            "GET /{}/clip.mp4 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            publication.token
        );
        tokio::io::AsyncWriteExt::write_all(&mut write_half, request.as_bytes())
            .await
            .unwrap();

        let mut response = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut read_half, &mut response)
            .await
            .unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200"));
        // Header names are case-insensitive on the wire
        assert!(response.to_lowercase().contains("contentfeatures.dlna.org"));
        assert!(response.ends_with("0123456789abcdefghij"));

        server.shutdown().await;
        let session = &server.sessions()[0];
        assert_eq!(session.state, SessionState::Closed);
        assert_eq!(session.bytes_served, PAYLOAD.len() as u64);
    }
}
