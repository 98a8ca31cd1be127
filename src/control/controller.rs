//! Top-level coordinator of the loopcast core.
//!
//! The controller owns the authoritative renderer map, the assignment table,
//! the supervisor handles and the statistics counters, each behind its own
//! lock. The locks form a strict hierarchy (device state, then assignments,
//! then monitoring, then statistics); they are held briefly and never across
//! an await. State is copied out, I/O performed, and state reconciled on
//! reacquisition, guarded by assignment epochs so a stale activation or
//! retry can never overwrite a newer one.

use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::catalog::{AssignmentRequest, Catalog, CoreEvent, EventSink, RestartReason};
use crate::config::{ACTIVATION_CONFIRM_SECS, ACTIVATION_POLL_MS, Config, USER_OVERRIDE_PRIORITY};
use crate::devices::{
    DiscoveryEvent, Renderer, RendererDescription, RendererStatus, RendererView,
    TransportSnapshot, TransportState,
};
use crate::dlna::{AvTransportClient, MediaMetadata, build_didl_metadata};
use crate::error::{Error, Result};
use crate::media::{MediaStreamingServer, Publication, StreamingSession};
use crate::utils::backoff_delay;

use super::assignment::{Assignment, AssignmentState, AssignmentTable, AssignmentView};
use super::stats::Statistics;
use super::supervisor::{TickObservation, run_supervisor};

/// A renderer and its current assignment, as one consistent read.
#[derive(Debug, Clone)]
pub struct RendererOverview {
    pub renderer: RendererView,
    pub assignment: Option<AssignmentView>,
}

/// What a supervisor should do this tick.
pub(crate) enum SupervisorDirective {
    /// Renderer or assignment gone; the supervisor exits
    Exit,
    /// Assignment exists but is not active; sleep through this tick
    Idle,
    /// Poll the transport and apply the decision table
    Watch {
        client: AvTransportClient,
        looped: bool,
        expected_uri: String,
    },
}

#[derive(Debug)]
struct SupervisorHandle {
    generation: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct MonitorTable {
    next_generation: u64,
    handles: HashMap<String, SupervisorHandle>,
}

/// The loopcast core: discovery sink, assignment engine and supervisor host.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

pub(crate) struct ControllerInner {
    weak: Weak<ControllerInner>,
    config: Config,
    catalog: Arc<dyn Catalog>,
    events: Arc<dyn EventSink>,
    media: MediaStreamingServer,
    // Lock hierarchy, acquired only in this order and never across awaits
    device_state: RwLock<HashMap<String, Renderer>>,
    assignments: Mutex<AssignmentTable>,
    monitoring: Mutex<MonitorTable>,
    statistics: RwLock<Statistics>,
    shutdown: CancellationToken,
    schedule_wakeup: Notify,
}

impl Controller {
    /// Binds the media server and builds the core. Fails fast with
    /// [`Error::BindExhausted`] when no media port is free; in that case
    /// nothing else starts and no renderer is ever contacted.
    pub async fn new(
        config: Config,
        catalog: Arc<dyn Catalog>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let media = MediaStreamingServer::bind(&config).await?;
        let inner = Arc::new_cyclic(|weak| ControllerInner {
            weak: weak.clone(),
            config,
            catalog,
            events,
            media,
            device_state: RwLock::new(HashMap::new()),
            assignments: Mutex::new(AssignmentTable::default()),
            monitoring: Mutex::new(MonitorTable::default()),
            statistics: RwLock::new(Statistics::default()),
            shutdown: CancellationToken::new(),
            schedule_wakeup: Notify::new(),
        });

        {
            let mut table = inner.assignments.lock().expect("assignment lock poisoned");
            for request in inner.catalog.startup_assignments() {
                table.desired.insert(request.renderer_id.clone(), request);
            }
        }
        inner.spawn_scheduler();

        Ok(Self { inner })
    }

    /// Consumes discovery events until the channel closes or the core shuts
    /// down.
    pub async fn run(&self, events: mpsc::Receiver<DiscoveryEvent>) {
        self.inner.run(events).await
    }

    /// Registers a renderer or refreshes an existing record in place.
    pub async fn register(&self, description: RendererDescription) {
        self.inner.register(description).await
    }

    /// Removes a renderer record and everything attached to it.
    pub fn unregister(&self, renderer_id: &str) {
        self.inner.unregister(renderer_id)
    }

    /// Reconciles renderer liveness with the ids seen by the last sweep.
    pub async fn sync_with_discovery(&self, seen: &HashSet<String>) {
        self.inner.sync_with_discovery(seen).await
    }

    /// Assigns a video to a renderer. A currently held higher priority
    /// assignment rejects the call with [`Error::Preempted`].
    pub async fn assign(
        &self,
        renderer_id: &str,
        video_id: &str,
        priority: i32,
        looped: bool,
    ) -> Result<()> {
        self.inner.assign(renderer_id, video_id, priority, looped).await
    }

    /// User-driven play override at priority 100.
    pub async fn play(&self, renderer_id: &str, video_id: &str, looped: bool) -> Result<()> {
        self.inner
            .assign(renderer_id, video_id, USER_OVERRIDE_PRIORITY, looped)
            .await
    }

    /// Stops playback and drops the renderer's assignment.
    pub async fn stop(&self, renderer_id: &str) -> Result<()> {
        self.inner.stop(renderer_id).await
    }

    /// Pauses playback; the supervisor leaves paused renderers alone.
    pub async fn pause(&self, renderer_id: &str) -> Result<()> {
        self.inner.pause(renderer_id).await
    }

    /// Seeks to an absolute position.
    pub async fn seek(&self, renderer_id: &str, position: Duration) -> Result<()> {
        self.inner.seek(renderer_id, position).await
    }

    /// Queues an assignment to fire after `delay`.
    pub fn schedule_in(&self, delay: Duration, request: AssignmentRequest) {
        self.inner.schedule_in(delay, request)
    }

    /// One consistent view of every renderer and its assignment.
    pub fn snapshot(&self) -> Vec<RendererOverview> {
        self.inner.snapshot()
    }

    /// Read-only views of all renderer records.
    pub fn list_renderers(&self) -> Vec<RendererView> {
        self.inner
            .snapshot()
            .into_iter()
            .map(|overview| overview.renderer)
            .collect()
    }

    /// Snapshot of all media streaming sessions.
    pub fn list_sessions(&self) -> Vec<StreamingSession> {
        self.inner.media.sessions()
    }

    /// Aggregate counters.
    pub fn stats(&self) -> Statistics {
        self.inner
            .statistics
            .read()
            .expect("statistics lock poisoned")
            .clone()
    }

    /// Base URL of the embedded media server.
    pub fn media_base_url(&self) -> String {
        self.inner.media.base_url()
    }

    /// Stops supervisors, pending retries, the scheduler and the media
    /// server (draining in-flight responses).
    pub async fn shutdown(&self) {
        self.inner.shutdown_core().await
    }
}

impl ControllerInner {
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// A strong handle to self, for tasks this instance spawns.
    fn arc(&self) -> Arc<ControllerInner> {
        self.weak.upgrade().expect("controller inner alive")
    }

    async fn run(&self, mut events: mpsc::Receiver<DiscoveryEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                DiscoveryEvent::Appeared(description) => self.register(description).await,
                DiscoveryEvent::Refreshed { renderer_id, .. } => self.touch(&renderer_id),
                DiscoveryEvent::ByeBye { renderer_id } => {
                    info!("Renderer '{renderer_id}' said goodbye");
                    self.disconnect(&renderer_id);
                }
                DiscoveryEvent::SweepCompleted { seen } => self.sync_with_discovery(&seen).await,
            }
        }
        debug!("Controller event loop stopped");
    }

    async fn register(&self, description: RendererDescription) {
        let renderer_id = description.renderer_id.clone();
        let mut events_out = Vec::new();
        let mut newly_discovered = false;
        {
            let mut device = self.device_state.write().expect("device lock poisoned");
            match device.get_mut(&renderer_id) {
                Some(renderer) => {
                    // In-place refresh keeps identity and the active
                    // assignment, so no redundant Play is provoked
                    renderer.update_from(&description);
                    if matches!(
                        renderer.status,
                        RendererStatus::Discovered | RendererStatus::Disconnected
                    ) {
                        renderer.status = RendererStatus::Connected;
                        events_out.push(CoreEvent::Connected {
                            renderer_id: renderer_id.clone(),
                        });
                    }
                }
                None => {
                    info!(
                        "Registering renderer '{}' ({renderer_id})",
                        description.friendly_name
                    );
                    let mut renderer = Renderer::from_description(&description);
                    renderer.status = RendererStatus::Connected;
                    device.insert(renderer_id.clone(), renderer);
                    newly_discovered = true;
                    events_out.push(CoreEvent::Discovered {
                        renderer_id: renderer_id.clone(),
                        friendly_name: description.friendly_name.clone(),
                    });
                    events_out.push(CoreEvent::Connected {
                        renderer_id: renderer_id.clone(),
                    });
                }
            }
        }
        if newly_discovered {
            let mut stats = self.statistics.write().expect("statistics lock poisoned");
            stats.renderers_discovered += 1;
        }
        for event in events_out {
            self.events.publish(event);
        }
        self.catalog
            .record_status(&renderer_id, RendererStatus::Connected, SystemTime::now());

        // A desired (startup) assignment or a retained failed one gets its
        // chance now that the renderer is reachable
        enum FollowUp {
            Assign(AssignmentRequest),
            Activate(u64),
            Nothing,
        }
        let follow_up = {
            let mut table = self.assignments.lock().expect("assignment lock poisoned");
            if let Some(request) = table.desired.remove(&renderer_id) {
                FollowUp::Assign(request)
            } else if table
                .assignments
                .get(&renderer_id)
                .is_some_and(|assignment| assignment.state == AssignmentState::Failed)
            {
                let epoch = table.next_epoch();
                let assignment = table
                    .assignments
                    .get_mut(&renderer_id)
                    .expect("presence checked above");
                assignment.state = AssignmentState::Pending;
                assignment.retry_count = 0;
                assignment.epoch = epoch;
                FollowUp::Activate(epoch)
            } else {
                FollowUp::Nothing
            }
        };
        match follow_up {
            FollowUp::Assign(request) => {
                if let Err(e) = self
                    .assign(&request.renderer_id, &request.video_id, request.priority, request.looped)
                    .await
                {
                    warn!("Startup assignment for '{renderer_id}' failed: {e}");
                }
            }
            FollowUp::Activate(epoch) => self.arc().activate(renderer_id, epoch).await,
            FollowUp::Nothing => {}
        }
    }

    fn unregister(&self, renderer_id: &str) {
        self.cancel_supervisor(renderer_id);
        let existed = self
            .device_state
            .write()
            .expect("device lock poisoned")
            .remove(renderer_id)
            .is_some();
        {
            let mut table = self.assignments.lock().expect("assignment lock poisoned");
            table.cancel_retry(renderer_id);
            table.desired.remove(renderer_id);
            if let Some(assignment) = table.assignments.remove(renderer_id) {
                if let Some(publication) = assignment.publication {
                    self.media.unpublish(&publication.token);
                }
            }
        }
        if existed {
            info!("Unregistered renderer '{renderer_id}'");
        }
    }

    fn touch(&self, renderer_id: &str) {
        let mut device = self.device_state.write().expect("device lock poisoned");
        if let Some(renderer) = device.get_mut(renderer_id) {
            renderer.last_seen = SystemTime::now();
            renderer.missed_sweeps = 0;
        }
    }

    async fn sync_with_discovery(&self, seen: &HashSet<String>) {
        let mut lost = Vec::new();
        let mut recovered = Vec::new();
        {
            let mut device = self.device_state.write().expect("device lock poisoned");
            for (id, renderer) in device.iter_mut() {
                if seen.contains(id) {
                    renderer.last_seen = SystemTime::now();
                    renderer.missed_sweeps = 0;
                    if renderer.status == RendererStatus::Disconnected {
                        renderer.status = RendererStatus::Connected;
                        recovered.push(id.clone());
                    }
                } else if renderer.status != RendererStatus::Disconnected {
                    renderer.missed_sweeps += 1;
                    if renderer.missed_sweeps >= self.config.ssdp_miss_threshold {
                        renderer.status = RendererStatus::Disconnected;
                        lost.push(id.clone());
                    }
                }
            }
        }

        for renderer_id in lost {
            info!("Renderer '{renderer_id}' missed {} sweeps", self.config.ssdp_miss_threshold);
            self.after_disconnect(&renderer_id);
        }
        for renderer_id in recovered {
            info!("Renderer '{renderer_id}' reappeared");
            self.events.publish(CoreEvent::Connected {
                renderer_id: renderer_id.clone(),
            });
            self.catalog
                .record_status(&renderer_id, RendererStatus::Connected, SystemTime::now());
            self.reactivate(&renderer_id).await;
        }
    }

    /// Marks a renderer disconnected (byebye or supervisor abandonment).
    fn disconnect(&self, renderer_id: &str) {
        let changed = {
            let mut device = self.device_state.write().expect("device lock poisoned");
            match device.get_mut(renderer_id) {
                Some(renderer) if renderer.status != RendererStatus::Disconnected => {
                    renderer.status = RendererStatus::Disconnected;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.after_disconnect(renderer_id);
        }
    }

    /// Side effects of a disconnect, after the status flip.
    fn after_disconnect(&self, renderer_id: &str) {
        self.cancel_supervisor(renderer_id);
        {
            let mut table = self.assignments.lock().expect("assignment lock poisoned");
            table.cancel_retry(renderer_id);
        }
        {
            let mut stats = self.statistics.write().expect("statistics lock poisoned");
            stats.renderers_disconnected += 1;
        }
        self.events.publish(CoreEvent::Disconnected {
            renderer_id: renderer_id.to_string(),
        });
        self.catalog
            .record_status(renderer_id, RendererStatus::Disconnected, SystemTime::now());
    }

    pub(crate) fn mark_disconnected(&self, renderer_id: &str) {
        self.disconnect(renderer_id);
    }

    /// Puts a retained assignment back into play after a reappearance.
    async fn reactivate(&self, renderer_id: &str) {
        let epoch = {
            let mut table = self.assignments.lock().expect("assignment lock poisoned");
            table.cancel_retry(renderer_id);
            let epoch = table.next_epoch();
            match table.assignments.get_mut(renderer_id) {
                Some(assignment)
                    if matches!(
                        assignment.state,
                        AssignmentState::Active
                            | AssignmentState::Pending
                            | AssignmentState::Failed
                    ) =>
                {
                    assignment.state = AssignmentState::Pending;
                    assignment.retry_count = 0;
                    assignment.epoch = epoch;
                    Some(epoch)
                }
                _ => None,
            }
        };
        if let Some(epoch) = epoch {
            self.arc().activate(renderer_id.to_string(), epoch).await;
        }
    }

    async fn assign(
        &self,
        renderer_id: &str,
        video_id: &str,
        priority: i32,
        looped: bool,
    ) -> Result<()> {
        let video = self.catalog.video(video_id)?;
        let mut superseded = None;
        let epoch;
        {
            let device = self.device_state.read().expect("device lock poisoned");
            if !device.contains_key(renderer_id) {
                return Err(Error::UnknownRenderer {
                    renderer_id: renderer_id.to_string(),
                });
            }
            let mut table = self.assignments.lock().expect("assignment lock poisoned");
            if let Some(current) = table.assignments.get(renderer_id) {
                if matches!(
                    current.state,
                    AssignmentState::Pending | AssignmentState::Active
                ) && current.priority > priority
                {
                    return Err(Error::Preempted {
                        current_priority: current.priority,
                    });
                }
            }
            // The old assignment is superseded under the lock, before any
            // SOAP call is made; its pending retry dies with it
            table.cancel_retry(renderer_id);
            epoch = table.next_epoch();
            if let Some(previous) = table.assignments.remove(renderer_id) {
                if matches!(
                    previous.state,
                    AssignmentState::Pending | AssignmentState::Active
                ) {
                    superseded = Some(CoreEvent::AssignmentSuperseded {
                        renderer_id: renderer_id.to_string(),
                        video_id: previous.video.id.clone(),
                        by_priority: priority,
                    });
                }
                if let Some(publication) = previous.publication {
                    self.media.unpublish(&publication.token);
                }
            }
            table.assignments.insert(
                renderer_id.to_string(),
                Assignment {
                    renderer_id: renderer_id.to_string(),
                    video,
                    priority,
                    looped,
                    created_at: SystemTime::now(),
                    retry_count: 0,
                    state: AssignmentState::Pending,
                    epoch,
                    publication: None,
                },
            );
        }
        if let Some(event) = superseded {
            {
                let mut stats = self.statistics.write().expect("statistics lock poisoned");
                stats.assignments_superseded += 1;
            }
            self.events.publish(event);
        }

        self.arc().activate(renderer_id.to_string(), epoch).await;
        Ok(())
    }

    /// Drives a pending assignment to PLAYING: publish, SetAVTransportURI,
    /// Play, then await transport confirmation. Runs entirely outside locks.
    async fn activate(self: Arc<Self>, renderer_id: String, epoch: u64) {
        let (render, server) = {
            let device = self.device_state.read().expect("device lock poisoned");
            match device.get(&renderer_id) {
                Some(renderer) if renderer.status != RendererStatus::Disconnected => {
                    (renderer.render.clone(), renderer.server.clone())
                }
                _ => {
                    debug!("Activation skipped, renderer '{renderer_id}' not reachable");
                    return;
                }
            }
        };
        let video = {
            let table = self.assignments.lock().expect("assignment lock poisoned");
            match table.assignments.get(&renderer_id) {
                Some(assignment)
                    if assignment.epoch == epoch
                        && assignment.state == AssignmentState::Pending =>
                {
                    assignment.video.clone()
                }
                _ => return,
            }
        };

        let profile = self.config.profile_for(server.as_deref());
        let publication = self.media.publish(&video, profile);
        {
            let mut table = self.assignments.lock().expect("assignment lock poisoned");
            if !table.epoch_is_current(&renderer_id, epoch) {
                drop(table);
                self.media.unpublish(&publication.token);
                return;
            }
            if let Some(assignment) = table.assignments.get_mut(&renderer_id) {
                if let Some(previous) = assignment.publication.replace(publication.clone()) {
                    self.media.unpublish(&previous.token);
                }
            }
        }

        let metadata = build_didl_metadata(&media_metadata(&publication));
        let client = AvTransportClient::new(render, self.config.soap_timeout);
        let outcome = async {
            client.set_uri(&publication.url, &metadata).await?;
            client.play().await?;
            self.await_playing(&client, &renderer_id).await
        }
        .await;

        match outcome {
            Ok(()) => {
                let confirmed = {
                    let mut table = self.assignments.lock().expect("assignment lock poisoned");
                    match table.assignments.get_mut(&renderer_id) {
                        Some(assignment) if assignment.epoch == epoch => {
                            assignment.state = AssignmentState::Active;
                            assignment.retry_count = 0;
                            true
                        }
                        _ => false,
                    }
                };
                if !confirmed {
                    return;
                }
                {
                    let mut device = self.device_state.write().expect("device lock poisoned");
                    if let Some(renderer) = device.get_mut(&renderer_id) {
                        renderer.status = RendererStatus::Playing;
                    }
                }
                {
                    let mut stats = self.statistics.write().expect("statistics lock poisoned");
                    stats.playbacks_started += 1;
                }
                info!("Playback of '{}' active on '{renderer_id}'", video.id);
                self.events.publish(CoreEvent::PlaybackStarted {
                    renderer_id: renderer_id.clone(),
                    video_id: video.id.clone(),
                });
                self.spawn_supervisor(&renderer_id);
            }
            Err(err) => {
                self.note_soap_failure();
                warn!("Activation of '{}' on '{renderer_id}' failed: {err}", video.id);
                if err.needs_stop_before_retry() {
                    // Wrong-state faults clear after a Stop
                    let _ = client.stop().await;
                }
                if err.is_retryable() || err.needs_stop_before_retry() {
                    self.schedule_retry(renderer_id, epoch, video.id.clone());
                } else {
                    self.fail_assignment(&renderer_id, epoch, &video.id);
                }
            }
        }
    }

    /// Polls the transport until it reports PLAYING or the confirmation
    /// window closes.
    async fn await_playing(&self, client: &AvTransportClient, renderer_id: &str) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(ACTIVATION_CONFIRM_SECS);
        loop {
            if let Ok(info) = client.transport_info().await {
                if info.state() == TransportState::Playing {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::PlaybackNotConfirmed {
                    renderer_id: renderer_id.to_string(),
                    waited_ms: ACTIVATION_CONFIRM_SECS * 1000,
                });
            }
            tokio::time::sleep(Duration::from_millis(ACTIVATION_POLL_MS)).await;
        }
    }

    /// Books one failed attempt and either schedules the next retry or
    /// marks the assignment failed.
    fn schedule_retry(&self, renderer_id: String, epoch: u64, video_id: String) {
        let delay = {
            let mut table = self.assignments.lock().expect("assignment lock poisoned");
            if !table.epoch_is_current(&renderer_id, epoch) {
                return;
            }
            let max_attempts = self.config.retry_max_attempts;
            let assignment = table
                .assignments
                .get_mut(&renderer_id)
                .expect("epoch checked above");
            assignment.retry_count += 1;
            if assignment.retry_count >= max_attempts {
                assignment.state = AssignmentState::Failed;
                None
            } else {
                Some(backoff_delay(
                    self.config.retry_base,
                    self.config.retry_cap,
                    assignment.retry_count - 1,
                ))
            }
        };

        match delay {
            None => {
                {
                    let mut stats = self.statistics.write().expect("statistics lock poisoned");
                    stats.playback_failures += 1;
                }
                warn!(
                    "Assignment of '{video_id}' to '{renderer_id}' failed after {} attempts",
                    self.config.retry_max_attempts
                );
                self.events.publish(CoreEvent::PlaybackFailed {
                    renderer_id,
                    video_id,
                    attempts: self.config.retry_max_attempts,
                });
            }
            Some(delay) => {
                let token = CancellationToken::new();
                {
                    let mut table = self.assignments.lock().expect("assignment lock poisoned");
                    table.cancel_retry(&renderer_id);
                    table.retry_tokens.insert(renderer_id.clone(), token.clone());
                }
                debug!("Retrying '{video_id}' on '{renderer_id}' in {delay:?}");
                let inner = self.arc();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    {
                        let mut table = inner.assignments.lock().expect("assignment lock poisoned");
                        table.retry_tokens.remove(&renderer_id);
                        if !table.epoch_is_current(&renderer_id, epoch) {
                            return;
                        }
                    }
                    inner.activate(renderer_id, epoch).await;
                });
            }
        }
    }

    /// Terminal failure for non-retryable activation errors.
    fn fail_assignment(&self, renderer_id: &str, epoch: u64, video_id: &str) {
        let attempts = {
            let mut table = self.assignments.lock().expect("assignment lock poisoned");
            if !table.epoch_is_current(renderer_id, epoch) {
                return;
            }
            let assignment = table
                .assignments
                .get_mut(renderer_id)
                .expect("epoch checked above");
            assignment.state = AssignmentState::Failed;
            assignment.retry_count + 1
        };
        {
            let mut stats = self.statistics.write().expect("statistics lock poisoned");
            stats.playback_failures += 1;
        }
        self.events.publish(CoreEvent::PlaybackFailed {
            renderer_id: renderer_id.to_string(),
            video_id: video_id.to_string(),
            attempts,
        });
    }

    async fn stop(&self, renderer_id: &str) -> Result<()> {
        let render = {
            let device = self.device_state.read().expect("device lock poisoned");
            device
                .get(renderer_id)
                .map(|renderer| renderer.render.clone())
                .ok_or_else(|| Error::UnknownRenderer {
                    renderer_id: renderer_id.to_string(),
                })?
        };
        self.cancel_supervisor(renderer_id);
        {
            let mut table = self.assignments.lock().expect("assignment lock poisoned");
            table.cancel_retry(renderer_id);
            if let Some(assignment) = table.assignments.remove(renderer_id) {
                if let Some(publication) = assignment.publication {
                    self.media.unpublish(&publication.token);
                }
            }
        }

        let client = AvTransportClient::new(render, self.config.soap_timeout);
        client.stop().await?;
        let mut device = self.device_state.write().expect("device lock poisoned");
        if let Some(renderer) = device.get_mut(renderer_id) {
            renderer.status = RendererStatus::Stopped;
        }
        Ok(())
    }

    async fn pause(&self, renderer_id: &str) -> Result<()> {
        let render = {
            let device = self.device_state.read().expect("device lock poisoned");
            device
                .get(renderer_id)
                .map(|renderer| renderer.render.clone())
                .ok_or_else(|| Error::UnknownRenderer {
                    renderer_id: renderer_id.to_string(),
                })?
        };
        let client = AvTransportClient::new(render, self.config.soap_timeout);
        client.pause().await?;
        let mut device = self.device_state.write().expect("device lock poisoned");
        if let Some(renderer) = device.get_mut(renderer_id) {
            renderer.status = RendererStatus::Paused;
        }
        Ok(())
    }

    async fn seek(&self, renderer_id: &str, position: Duration) -> Result<()> {
        let render = {
            let device = self.device_state.read().expect("device lock poisoned");
            let renderer = device.get(renderer_id).ok_or_else(|| Error::UnknownRenderer {
                renderer_id: renderer_id.to_string(),
            })?;
            if !renderer.capabilities.seek {
                return Err(Error::Unsupported {
                    action: "Seek".to_string(),
                });
            }
            renderer.render.clone()
        };
        let client = AvTransportClient::new(render, self.config.soap_timeout);
        match client.seek(position).await {
            Ok(()) => Ok(()),
            Err(err @ Error::Unsupported { .. }) => {
                let mut device = self.device_state.write().expect("device lock poisoned");
                if let Some(renderer) = device.get_mut(renderer_id) {
                    renderer.capabilities.seek = false;
                }
                Err(err)
            }
            Err(other) => Err(other),
        }
    }

    fn schedule_in(&self, delay: Duration, request: AssignmentRequest) {
        {
            let mut table = self.assignments.lock().expect("assignment lock poisoned");
            let seq = table.next_schedule_seq();
            table.scheduled.insert((Instant::now() + delay, seq), request);
        }
        self.schedule_wakeup.notify_one();
    }

    /// The single timer routine draining due scheduled assignments.
    fn spawn_scheduler(&self) {
        let inner = self.arc();
        tokio::spawn(async move {
            loop {
                let next_due = {
                    let table = inner.assignments.lock().expect("assignment lock poisoned");
                    table.scheduled.keys().next().map(|&(at, _)| at)
                };
                let wake_at = next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = inner.schedule_wakeup.notified() => continue,
                    _ = tokio::time::sleep_until(wake_at) => {}
                }

                let due = {
                    let mut table = inner.assignments.lock().expect("assignment lock poisoned");
                    let now = Instant::now();
                    let mut due = Vec::new();
                    loop {
                        let Some(&key) = table.scheduled.keys().next() else {
                            break;
                        };
                        if key.0 > now {
                            break;
                        }
                        if let Some(request) = table.scheduled.remove(&key) {
                            due.push(request);
                        }
                    }
                    due
                };
                for request in due {
                    if let Err(e) = inner
                        .assign(
                            &request.renderer_id,
                            &request.video_id,
                            request.priority,
                            request.looped,
                        )
                        .await
                    {
                        warn!(
                            "Scheduled assignment for '{}' failed: {e}",
                            request.renderer_id
                        );
                    }
                }
            }
            debug!("Assignment scheduler stopped");
        });
    }

    fn snapshot(&self) -> Vec<RendererOverview> {
        let device = self.device_state.read().expect("device lock poisoned");
        let table = self.assignments.lock().expect("assignment lock poisoned");
        let mut overviews: Vec<RendererOverview> = device
            .values()
            .map(|renderer| RendererOverview {
                renderer: renderer.view(),
                assignment: table
                    .assignments
                    .get(&renderer.id)
                    .map(Assignment::view),
            })
            .collect();
        overviews.sort_by(|a, b| a.renderer.id.cmp(&b.renderer.id));
        overviews
    }

    // --- supervisor support -------------------------------------------------

    fn spawn_supervisor(&self, renderer_id: &str) {
        let mut table = self.monitoring.lock().expect("monitoring lock poisoned");
        if let Some(existing) = table.handles.get(renderer_id) {
            // A live, uncancelled supervisor keeps the renderer; a cancelled
            // one is on its way out and gets replaced (its exit is a no-op
            // thanks to the generation check in release_supervisor)
            if !existing.task.is_finished() && !existing.token.is_cancelled() {
                return;
            }
        }
        table.next_generation += 1;
        let generation = table.next_generation;
        let token = CancellationToken::new();
        let task = tokio::spawn(run_supervisor(
            self.arc(),
            renderer_id.to_string(),
            generation,
            token.clone(),
        ));
        table.handles.insert(
            renderer_id.to_string(),
            SupervisorHandle {
                generation,
                token,
                task,
            },
        );
    }

    fn cancel_supervisor(&self, renderer_id: &str) {
        let table = self.monitoring.lock().expect("monitoring lock poisoned");
        if let Some(handle) = table.handles.get(renderer_id) {
            handle.token.cancel();
        }
    }

    pub(crate) fn release_supervisor(&self, renderer_id: &str, generation: u64) {
        let mut table = self.monitoring.lock().expect("monitoring lock poisoned");
        if table
            .handles
            .get(renderer_id)
            .is_some_and(|handle| handle.generation == generation)
        {
            table.handles.remove(renderer_id);
        }
    }

    pub(crate) fn supervisor_directive(&self, renderer_id: &str) -> SupervisorDirective {
        let render = {
            let device = self.device_state.read().expect("device lock poisoned");
            match device.get(renderer_id) {
                Some(renderer) if renderer.status != RendererStatus::Disconnected => {
                    renderer.render.clone()
                }
                _ => return SupervisorDirective::Exit,
            }
        };
        let table = self.assignments.lock().expect("assignment lock poisoned");
        match table.assignments.get(renderer_id) {
            Some(assignment) => match assignment.state {
                AssignmentState::Active => SupervisorDirective::Watch {
                    client: AvTransportClient::new(render, self.config.soap_timeout),
                    looped: assignment.looped,
                    expected_uri: assignment
                        .publication
                        .as_ref()
                        .map(|publication| publication.url.clone())
                        .unwrap_or_default(),
                },
                AssignmentState::Pending => SupervisorDirective::Idle,
                AssignmentState::Failed | AssignmentState::Superseded => SupervisorDirective::Exit,
            },
            None => SupervisorDirective::Exit,
        }
    }

    pub(crate) fn record_observation(&self, renderer_id: &str, observation: &TickObservation) {
        {
            let mut stats = self.statistics.write().expect("statistics lock poisoned");
            stats.supervisor_ticks += 1;
        }
        if !observation.transport_ok {
            return;
        }
        let mut device = self.device_state.write().expect("device lock poisoned");
        if let Some(renderer) = device.get_mut(renderer_id) {
            renderer.observe_transport(TransportSnapshot {
                state: observation
                    .state
                    .clone()
                    .unwrap_or(TransportState::Other("UNKNOWN".to_string())),
                uri: observation.current_uri.clone().unwrap_or_default(),
                position_secs: observation.position_secs,
                duration_secs: observation.duration_secs,
                taken_at: std::time::Instant::now(),
            });
        }
    }

    pub(crate) fn last_snapshot(&self, renderer_id: &str) -> Option<TransportSnapshot> {
        let device = self.device_state.read().expect("device lock poisoned");
        device
            .get(renderer_id)
            .and_then(|renderer| renderer.transport.clone())
    }

    pub(crate) fn note_soap_failure(&self) {
        let mut stats = self.statistics.write().expect("statistics lock poisoned");
        stats.soap_failures += 1;
    }

    /// Re-issues the active assignment's URI and Play. Used by supervisors
    /// for loop, stall and media-lost recovery.
    pub(crate) async fn restart_playback(
        &self,
        renderer_id: &str,
        client: &AvTransportClient,
        reason: RestartReason,
        stop_first: bool,
    ) -> Result<()> {
        let (publication, video_id, epoch) = {
            let table = self.assignments.lock().expect("assignment lock poisoned");
            match table.assignments.get(renderer_id) {
                Some(assignment) if assignment.state == AssignmentState::Active => {
                    match &assignment.publication {
                        Some(publication) => (
                            publication.clone(),
                            assignment.video.id.clone(),
                            assignment.epoch,
                        ),
                        None => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        };

        debug!("Restarting '{video_id}' on '{renderer_id}' ({reason:?})");
        if stop_first {
            let _ = client.stop().await;
        }
        let metadata = build_didl_metadata(&media_metadata(&publication));
        client.set_uri(&publication.url, &metadata).await?;
        client.play().await?;

        if self
            .assignments
            .lock()
            .expect("assignment lock poisoned")
            .epoch_is_current(renderer_id, epoch)
        {
            {
                let mut stats = self.statistics.write().expect("statistics lock poisoned");
                stats.playback_restarts += 1;
            }
            self.events.publish(CoreEvent::PlaybackRestarted {
                renderer_id: renderer_id.to_string(),
                video_id,
                reason,
            });
        }
        Ok(())
    }

    async fn shutdown_core(&self) {
        self.shutdown.cancel();
        let handles: Vec<SupervisorHandle> = {
            let mut table = self.monitoring.lock().expect("monitoring lock poisoned");
            table.handles.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.token.cancel();
        }
        for handle in handles {
            let _ = handle.task.await;
        }
        {
            let mut table = self.assignments.lock().expect("assignment lock poisoned");
            let renderer_ids: Vec<String> = table.retry_tokens.keys().cloned().collect();
            for renderer_id in renderer_ids {
                table.cancel_retry(&renderer_id);
            }
        }
        self.media.shutdown().await;
        info!("Controller shut down");
    }
}

/// DIDL inputs for one publication.
fn media_metadata(publication: &Publication) -> MediaMetadata {
    MediaMetadata {
        title: publication.video.id.clone(),
        video_uri: publication.url.clone(),
        mime: publication.video.mime.clone(),
        dlna_profile: publication.dlna_profile.clone(),
        flags: publication.flags.clone(),
        subtitle_uri: publication.subtitle_url.clone(),
    }
}
