//! SSDP discovery for loopcast
//!
//! Finds UPnP MediaRenderers on the LAN and reports appearances, refreshes
//! and byebyes. Active M-SEARCH sweeps run on a fixed cadence; a passive
//! multicast listener picks up NOTIFY advertisements between sweeps.

use crate::config::{
    Config, DESCRIPTION_FETCH_TIMEOUT_SECS, SSDP_DEFAULT_MAX_AGE_SECS, SSDP_EXPIRY_FACTOR,
    SSDP_MULTICAST_ADDR, SSDP_PORT, SSDP_SEARCH_ATTEMPTS, SSDP_SEARCH_MX_SECS, SSDP_TTL,
};
use futures_util::stream::StreamExt;
use log::{debug, trace, warn};
use rupnp::ssdp::SearchTarget;
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::render::{AV_TRANSPORT, Render, renderer_id_from_usn};
use super::types::{RendererCapabilities, RendererDescription, RendererDescriptor};

/// Events reported by the discovery component.
#[derive(Debug)]
pub enum DiscoveryEvent {
    /// A renderer answered for the first time and its description resolved
    Appeared(RendererDescription),
    /// A known renderer advertised itself again
    Refreshed {
        renderer_id: String,
        descriptor: RendererDescriptor,
    },
    /// A renderer said goodbye or outlived its advertisement
    ByeBye { renderer_id: String },
    /// A sweep finished; `seen` holds every renderer id that answered
    SweepCompleted { seen: HashSet<String> },
}

#[derive(Debug)]
struct TrackedRenderer {
    last_seen: Instant,
    max_age: Duration,
}

/// Handle to the two discovery tasks.
#[derive(Debug)]
pub struct SsdpDiscovery {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SsdpDiscovery {
    /// Starts the sweep and NOTIFY tasks and returns the event receiver.
    pub fn start(config: &Config) -> (Self, mpsc::Receiver<DiscoveryEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let token = CancellationToken::new();
        let tracked = Arc::new(Mutex::new(HashMap::new()));

        let sweeper = Sweeper {
            interval: config.ssdp_search_interval,
            tracked: tracked.clone(),
            tx: tx.clone(),
            token: token.clone(),
        };
        let mut tasks = vec![tokio::spawn(sweeper.run())];

        let listener = NotifyListener {
            tracked,
            tx,
            token: token.clone(),
        };
        tasks.push(tokio::spawn(listener.run()));

        (Self { token, tasks }, rx)
    }

    /// Stops discovery; no events are emitted after this returns.
    pub async fn stop(self) {
        self.token.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

struct Sweeper {
    interval: Duration,
    tracked: Arc<Mutex<HashMap<String, TrackedRenderer>>>,
    tx: mpsc::Sender<DiscoveryEvent>,
    token: CancellationToken,
}

impl Sweeper {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let seen = self.sweep().await;
            if self.token.is_cancelled() {
                break;
            }

            if self
                .tx
                .send(DiscoveryEvent::SweepCompleted { seen })
                .await
                .is_err()
            {
                break;
            }

            for renderer_id in expire_stale(&self.tracked) {
                if self
                    .tx
                    .send(DiscoveryEvent::ByeBye { renderer_id })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
        debug!("SSDP sweep task stopped");
    }

    /// One discovery sweep: the M-SEARCH is repeated a few times because
    /// renderers routinely drop a single multicast datagram.
    async fn sweep(&self) -> HashSet<String> {
        let search_target = SearchTarget::URN(AV_TRANSPORT);
        let mut seen = HashSet::new();

        for attempt in 0..SSDP_SEARCH_ATTEMPTS {
            if self.token.is_cancelled() {
                break;
            }
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }

            let responses = match ssdp_client::search(
                &search_target,
                Duration::from_secs(SSDP_SEARCH_MX_SECS + 1),
                SSDP_SEARCH_MX_SECS as usize,
                SSDP_TTL,
            )
            .await
            {
                Ok(responses) => responses,
                Err(e) => {
                    warn!("SSDP search failed: {e}");
                    continue;
                }
            };

            let mut responses = std::pin::pin!(responses);
            while let Some(result) = responses.next().await {
                let response = match result {
                    Ok(response) => response,
                    Err(e) => {
                        debug!("A device returned error while discovering it: {e}");
                        continue;
                    }
                };

                let descriptor = RendererDescriptor {
                    usn: response.usn().to_string(),
                    location: response.location().to_string(),
                    server: Some(response.server().to_string()).filter(|s| !s.is_empty()),
                    max_age: Duration::from_secs(SSDP_DEFAULT_MAX_AGE_SECS),
                };
                let renderer_id = renderer_id_from_usn(&descriptor.usn);
                if !seen.insert(renderer_id.clone()) {
                    continue;
                }

                handle_advertisement(&self.tracked, &self.tx, renderer_id, descriptor).await;
            }
        }

        seen
    }
}

struct NotifyListener {
    tracked: Arc<Mutex<HashMap<String, TrackedRenderer>>>,
    tx: mpsc::Sender<DiscoveryEvent>,
    token: CancellationToken,
}

impl NotifyListener {
    async fn run(self) {
        let socket = match open_notify_socket() {
            Ok(socket) => socket,
            Err(e) => {
                warn!("NOTIFY listener disabled, could not open multicast socket: {e}");
                return;
            }
        };

        // Larger than any single datagram an MTU-ignoring stack will send
        let mut buf = [0u8; 8192];
        loop {
            let (len, addr) = tokio::select! {
                _ = self.token.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("NOTIFY receive failed: {e}");
                        continue;
                    }
                },
            };

            let packet = String::from_utf8_lossy(&buf[..len]);
            trace!("NOTIFY datagram from {addr}: {len} bytes");
            let Some(notify) = parse_notify(&packet) else {
                continue;
            };

            match notify {
                NotifyMessage::Alive(descriptor) => {
                    let renderer_id = renderer_id_from_usn(&descriptor.usn);
                    handle_advertisement(&self.tracked, &self.tx, renderer_id, descriptor).await;
                }
                NotifyMessage::ByeBye { usn } => {
                    let renderer_id = renderer_id_from_usn(&usn);
                    let known = self
                        .tracked
                        .lock()
                        .expect("discovery lock poisoned")
                        .remove(&renderer_id)
                        .is_some();
                    if known
                        && self
                            .tx
                            .send(DiscoveryEvent::ByeBye { renderer_id })
                            .await
                            .is_err()
                    {
                        break;
                    }
                }
            }
        }
        debug!("SSDP NOTIFY listener stopped");
    }
}

/// Routes one advertisement: known renderers refresh, unknown ones fetch
/// their description and appear. A renderer whose description cannot be
/// fetched is dropped without an event so the next advertisement retries.
async fn handle_advertisement(
    tracked: &Arc<Mutex<HashMap<String, TrackedRenderer>>>,
    tx: &mpsc::Sender<DiscoveryEvent>,
    renderer_id: String,
    descriptor: RendererDescriptor,
) {
    let refreshed = {
        let mut tracked = tracked.lock().expect("discovery lock poisoned");
        match tracked.get_mut(&renderer_id) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                entry.max_age = descriptor.max_age;
                true
            }
            None => false,
        }
    };

    if refreshed {
        let _ = tx
            .send(DiscoveryEvent::Refreshed {
                renderer_id,
                descriptor,
            })
            .await;
        return;
    }

    let render = match Render::from_location(
        &descriptor.location,
        Duration::from_secs(DESCRIPTION_FETCH_TIMEOUT_SECS),
    )
    .await
    {
        Ok(render) => render,
        Err(e) => {
            debug!("Dropping renderer at {}: {e}", descriptor.location);
            return;
        }
    };

    let description = RendererDescription {
        renderer_id: renderer_id.clone(),
        friendly_name: render.device.friendly_name().to_string(),
        location: descriptor.location.clone(),
        host: render.host(),
        server: descriptor.server.clone(),
        max_age: descriptor.max_age,
        capabilities: RendererCapabilities::default(),
        render,
    };

    tracked.lock().expect("discovery lock poisoned").insert(
        renderer_id,
        TrackedRenderer {
            last_seen: Instant::now(),
            max_age: descriptor.max_age,
        },
    );

    let _ = tx.send(DiscoveryEvent::Appeared(description)).await;
}

/// Removes renderers whose advertisements have expired and returns their ids.
fn expire_stale(tracked: &Arc<Mutex<HashMap<String, TrackedRenderer>>>) -> Vec<String> {
    let mut tracked = tracked.lock().expect("discovery lock poisoned");
    let expired: Vec<String> = tracked
        .iter()
        .filter(|(_, entry)| {
            entry.last_seen.elapsed() > entry.max_age.mul_f64(SSDP_EXPIRY_FACTOR)
        })
        .map(|(id, _)| id.clone())
        .collect();
    for id in &expired {
        tracked.remove(id);
    }
    expired
}

/// Opens the multicast socket the NOTIFY listener receives on.
///
/// socket2 is needed for reuse-address before bind; the socket is then
/// bridged into tokio.
fn open_notify_socket() -> std::io::Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let addr: SocketAddr = format!("0.0.0.0:{SSDP_PORT}")
        .parse()
        .expect("static bind address");
    socket.bind(&addr.into())?;

    let socket: StdUdpSocket = socket.into();
    socket.join_multicast_v4(
        &SSDP_MULTICAST_ADDR.parse::<Ipv4Addr>().expect("static multicast address"),
        &Ipv4Addr::UNSPECIFIED,
    )?;
    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket)
}

/// One-shot discovery: a single M-SEARCH window, descriptions resolved,
/// duplicates dropped. Used by the CLI `list` command.
pub async fn discover_once(duration_secs: u64) -> crate::error::Result<Vec<RendererDescription>> {
    let search_target = SearchTarget::URN(AV_TRANSPORT);
    let responses = ssdp_client::search(
        &search_target,
        Duration::from_secs(duration_secs),
        SSDP_SEARCH_MX_SECS as usize,
        SSDP_TTL,
    )
    .await?;

    let mut responses = std::pin::pin!(responses);
    let mut found = Vec::new();
    let mut seen = HashSet::new();

    while let Some(result) = responses.next().await {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                debug!("A device returned error while discovering it: {e}");
                continue;
            }
        };
        let renderer_id = renderer_id_from_usn(response.usn());
        if !seen.insert(renderer_id.clone()) {
            continue;
        }

        let location = response.location().to_string();
        let render = match Render::from_location(
            &location,
            Duration::from_secs(DESCRIPTION_FETCH_TIMEOUT_SECS),
        )
        .await
        {
            Ok(render) => render,
            Err(e) => {
                debug!("Dropping renderer at {location}: {e}");
                continue;
            }
        };

        found.push(RendererDescription {
            renderer_id,
            friendly_name: render.device.friendly_name().to_string(),
            host: render.host(),
            location,
            server: Some(response.server().to_string()).filter(|s| !s.is_empty()),
            max_age: Duration::from_secs(SSDP_DEFAULT_MAX_AGE_SECS),
            capabilities: RendererCapabilities::default(),
            render,
        });
    }

    Ok(found)
}

#[derive(Debug, PartialEq)]
enum NotifyMessage {
    Alive(RendererDescriptor),
    ByeBye { usn: String },
}

/// Parses an SSDP NOTIFY datagram. Returns None for anything that is not an
/// AVTransport/MediaRenderer advertisement.
fn parse_notify(packet: &str) -> Option<NotifyMessage> {
    let mut lines = packet.lines();
    if !lines.next()?.trim().starts_with("NOTIFY") {
        return None;
    }

    let mut headers: HashMap<String, String> = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_uppercase(), value.trim().to_string());
        }
    }

    let usn = headers.get("USN")?.clone();
    let nt = headers.get("NT").cloned().unwrap_or_default();
    if !nt.contains("AVTransport") && !nt.contains("MediaRenderer") {
        return None;
    }

    match headers.get("NTS").map(String::as_str) {
        Some("ssdp:byebye") => Some(NotifyMessage::ByeBye { usn }),
        Some("ssdp:alive") => {
            let location = headers.get("LOCATION")?.clone();
            let max_age = headers
                .get("CACHE-CONTROL")
                .and_then(|value| parse_max_age(value))
                .unwrap_or(Duration::from_secs(SSDP_DEFAULT_MAX_AGE_SECS));
            Some(NotifyMessage::Alive(RendererDescriptor {
                usn,
                location,
                server: headers.get("SERVER").cloned(),
                max_age,
            }))
        }
        _ => None,
    }
}

/// Parses `max-age=N` out of a CACHE-CONTROL header value.
fn parse_max_age(value: &str) -> Option<Duration> {
    value
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|seconds| seconds.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALIVE_PACKET: &str = "NOTIFY * HTTP/1.1\r\n\
        HOST: 239.255.255.250:1900\r\n\
        CACHE-CONTROL: max-age=120\r\n\
        LOCATION: http://192.168.1.20:49152/description.xml\r\n\
        NT: urn:schemas-upnp-org:service:AVTransport:1\r\n\
        NTS: ssdp:alive\r\n\
        SERVER: Linux/4.4 UPnP/1.0 Renderer/1.0\r\n\
        USN: uuid:abc-123::urn:schemas-upnp-org:service:AVTransport:1\r\n\r\n";

    #[test]
    fn test_parse_notify_alive() {
        let message = parse_notify(ALIVE_PACKET).unwrap();
        match message {
            NotifyMessage::Alive(descriptor) => {
                assert_eq!(
                    descriptor.usn,
                    "uuid:abc-123::urn:schemas-upnp-org:service:AVTransport:1"
                );
                assert_eq!(
                    descriptor.location,
                    "http://192.168.1.20:49152/description.xml"
                );
                assert_eq!(descriptor.max_age, Duration::from_secs(120));
                assert_eq!(
                    descriptor.server.as_deref(),
                    Some("Linux/4.4 UPnP/1.0 Renderer/1.0")
                );
            }
            other => panic!("expected alive, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_notify_byebye() {
        let packet = "NOTIFY * HTTP/1.1\r\n\
            HOST: 239.255.255.250:1900\r\n\
            NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
            NTS: ssdp:byebye\r\n\
            USN: uuid:abc-123::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";
        assert_eq!(
            parse_notify(packet),
            Some(NotifyMessage::ByeBye {
                usn: "uuid:abc-123::urn:schemas-upnp-org:device:MediaRenderer:1".to_string()
            })
        );
    }

    #[test]
    fn test_parse_notify_ignores_other_services() {
        let packet = "NOTIFY * HTTP/1.1\r\n\
            NT: urn:schemas-upnp-org:service:ContentDirectory:1\r\n\
            NTS: ssdp:alive\r\n\
            LOCATION: http://192.168.1.20/description.xml\r\n\
            USN: uuid:abc-123::urn:schemas-upnp-org:service:ContentDirectory:1\r\n\r\n";
        assert_eq!(parse_notify(packet), None);
    }

    #[test]
    fn test_parse_notify_rejects_msearch() {
        let packet = "M-SEARCH * HTTP/1.1\r\nST: ssdp:all\r\n\r\n";
        assert_eq!(parse_notify(packet), None);
    }

    #[test]
    fn test_parse_max_age() {
        assert_eq!(parse_max_age("max-age=1800"), Some(Duration::from_secs(1800)));
        assert_eq!(
            parse_max_age("no-cache, max-age=60"),
            Some(Duration::from_secs(60))
        );
        assert_eq!(parse_max_age("no-cache"), None);
    }

    #[test]
    fn test_expire_stale_removes_outlived_entries() {
        let tracked = Arc::new(Mutex::new(HashMap::new()));
        tracked.lock().unwrap().insert(
            "old".to_string(),
            TrackedRenderer {
                last_seen: Instant::now() - Duration::from_secs(10),
                max_age: Duration::from_secs(1),
            },
        );
        tracked.lock().unwrap().insert(
            "fresh".to_string(),
            TrackedRenderer {
                last_seen: Instant::now(),
                max_age: Duration::from_secs(1800),
            },
        );

        let expired = expire_stale(&tracked);
        assert_eq!(expired, vec!["old".to_string()]);
        assert!(tracked.lock().unwrap().contains_key("fresh"));
        assert!(!tracked.lock().unwrap().contains_key("old"));
    }
}
