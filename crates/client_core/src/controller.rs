//! Analysis session controller.
//!
//! Owns the [`SessionState`], the selected input and the capture stream, and
//! turns [`SessionCommand`]s into backend calls and state transitions. Every
//! observable change is published as a [`SessionEvent`].

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use capture::{capture_jpeg, CaptureConstraints, MediaDevices, MediaStream};
use shared::{
    domain::{AnalysisRequestContext, InputKind, VideoFile},
    error::{AnalysisError, ErrorKind, ValidationError},
};
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    session::{ActiveResult, Mode, SessionState, Tab},
    view::ResultsView,
    AnalysisBackend, Settings,
};

pub const BACKEND_UNREACHABLE_MESSAGE: &str =
    "Warning: Backend API is not running. Please start the backend server.";
pub const STALE_REQUEST_MESSAGE: &str =
    "The previous analysis is still finishing. Please try again in a moment.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    pub playback_interval: Duration,
    pub preview_cards: usize,
    pub capture: CaptureConstraints,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ControllerOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            playback_interval: settings.playback_interval(),
            preview_cards: settings.preview_frame_cards,
            capture: settings.capture_constraints(),
        }
    }
}

pub enum SessionCommand {
    SelectFile(VideoFile),
    SetExpectedPose(Option<String>),
    SubmitAnalysis,
    CaptureAndAnalyze,
    NavigateFrame(isize),
    ToggleDisclosure,
    StartPlayback,
    CancelPlayback,
    StartCapture,
    StopCapture,
    SwitchTab(Tab),
    BackToHome,
    CheckBackend,
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectFile(_) => "select_file",
            Self::SetExpectedPose(_) => "set_expected_pose",
            Self::SubmitAnalysis => "submit_analysis",
            Self::CaptureAndAnalyze => "capture_and_analyze",
            Self::NavigateFrame(_) => "navigate_frame",
            Self::ToggleDisclosure => "toggle_disclosure",
            Self::StartPlayback => "start_playback",
            Self::CancelPlayback => "cancel_playback",
            Self::StartCapture => "start_capture",
            Self::StopCapture => "stop_capture",
            Self::SwitchTab(_) => "switch_tab",
            Self::BackToHome => "back_to_home",
            Self::CheckBackend => "check_backend",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeContext {
    Input,
    VideoAnalysis,
    FrameAnalysis,
    Capture,
    BackendCheck,
}

/// A failure surfaced to the user. Never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotice {
    pub kind: ErrorKind,
    pub context: NoticeContext,
    pub message: String,
}

impl UserNotice {
    pub fn from_error(context: NoticeContext, err: &AnalysisError) -> Self {
        let message = match (context, err) {
            (_, AnalysisError::Validation(inner)) => inner.to_string(),
            (_, AnalysisError::Busy) => STALE_REQUEST_MESSAGE.to_string(),
            (NoticeContext::VideoAnalysis, err) => format!("Error analyzing video: {err}"),
            (NoticeContext::FrameAnalysis, err) => format!("Error analyzing frame: {err}"),
            (NoticeContext::Capture, err) => format!("Could not access webcam: {err}"),
            (NoticeContext::BackendCheck, _) => BACKEND_UNREACHABLE_MESSAGE.to_string(),
            (NoticeContext::Input, err) => err.to_string(),
        };
        Self {
            kind: err.kind(),
            context,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ModeChanged(Mode),
    TabChanged(Tab),
    InputSelected { kind: InputKind, name: Option<String> },
    ResultReady(InputKind),
    FrameChanged { index: usize, total: usize },
    DisclosureChanged { show_all: bool },
    PlaybackStarted { total: usize },
    PlaybackFinished { completed: bool },
    CaptureStarted { stream_id: String, width: u32, height: u32 },
    CaptureStopped { stream_id: String },
    BackendStatus { reachable: bool },
    Notice(UserNotice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequestToken(Uuid);

struct InFlight {
    token: RequestToken,
    /// Set when the session was reset while the request ran; its outcome is dropped.
    stale: bool,
}

struct Playback {
    generation: u64,
    cancel: oneshot::Sender<()>,
    _task: JoinHandle<()>,
}

#[derive(Default)]
struct ControllerInner {
    state: SessionState,
    /// The upload tab's file. Webcam captures never replace it.
    selected_file: Option<VideoFile>,
    /// Kind of the input most recently selected or captured.
    last_input: Option<InputKind>,
    expected_pose: Option<String>,
    in_flight: Option<InFlight>,
    playback: Option<Playback>,
    playback_generation: u64,
}

enum PendingRequest {
    Video(VideoFile, AnalysisRequestContext),
    WebcamFrame(Vec<u8>),
}

pub struct SessionController {
    backend: Arc<dyn AnalysisBackend>,
    devices: Arc<dyn MediaDevices>,
    options: ControllerOptions,
    inner: Mutex<ControllerInner>,
    capture: tokio::sync::Mutex<Option<Arc<dyn MediaStream>>>,
    events: broadcast::Sender<SessionEvent>,
}

/// Releases the in-flight slot and leaves `Loading` on every exit path,
/// including the request future being dropped.
struct InFlightGuard<'a> {
    controller: &'a SessionController,
    token: RequestToken,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.controller.lock_inner();
        let Some(in_flight) = inner.in_flight.as_ref() else {
            return;
        };
        if in_flight.token != self.token {
            return;
        }
        let stale = in_flight.stale;
        inner.in_flight = None;
        if !stale && inner.state.fail_request() {
            self.controller.emit(SessionEvent::ModeChanged(Mode::Idle));
        }
    }
}

impl SessionController {
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        devices: Arc<dyn MediaDevices>,
        options: ControllerOptions,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            backend,
            devices,
            options,
            inner: Mutex::new(ControllerInner::default()),
            capture: tokio::sync::Mutex::new(None),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock_inner().state.clone()
    }

    pub fn results_view(&self) -> Option<ResultsView> {
        ResultsView::from_state(&self.lock_inner().state, self.options.preview_cards)
    }

    pub fn is_request_in_flight(&self) -> bool {
        self.lock_inner().in_flight.is_some()
    }

    pub fn selected_input(&self) -> Option<InputKind> {
        self.lock_inner().last_input
    }

    pub fn selected_file_name(&self) -> Option<String> {
        self.lock_inner()
            .selected_file
            .as_ref()
            .map(|file| file.name.clone())
    }

    fn lock_inner(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn notify(&self, context: NoticeContext, err: &AnalysisError) {
        let notice = UserNotice::from_error(context, err);
        warn!(kind = ?notice.kind, context = ?notice.context, message = %notice.message, "session notice");
        self.emit(SessionEvent::Notice(notice));
    }

    pub async fn dispatch(self: &Arc<Self>, command: SessionCommand) -> Result<(), AnalysisError> {
        debug!(command = command.name(), "session command");
        match command {
            SessionCommand::SelectFile(file) => self.select_file(file),
            SessionCommand::SetExpectedPose(pose) => self.set_expected_pose(pose),
            SessionCommand::SubmitAnalysis => {
                self.submit_analysis().await?;
            }
            SessionCommand::CaptureAndAnalyze => {
                self.capture_and_analyze().await?;
            }
            SessionCommand::NavigateFrame(delta) => {
                self.navigate_frame(delta);
            }
            SessionCommand::ToggleDisclosure => {
                self.toggle_disclosure();
            }
            SessionCommand::StartPlayback => {
                self.start_playback();
            }
            SessionCommand::CancelPlayback => {
                self.cancel_playback();
            }
            SessionCommand::StartCapture => self.start_capture().await?,
            SessionCommand::StopCapture => {
                self.stop_capture().await;
            }
            SessionCommand::SwitchTab(tab) => self.switch_tab(tab),
            SessionCommand::BackToHome => self.back_to_home(),
            SessionCommand::CheckBackend => return self.check_backend().await,
        }
        Ok(())
    }

    /// Replaces the active input with a video file and hides any previous results.
    pub fn select_file(&self, file: VideoFile) {
        let name = file.name.clone();
        {
            let mut inner = self.lock_inner();
            self.reset_locked(&mut inner);
            inner.selected_file = Some(file);
            inner.last_input = Some(InputKind::File);
        }
        info!(video = %name, "session: video selected");
        self.emit(SessionEvent::InputSelected {
            kind: InputKind::File,
            name: Some(name),
        });
    }

    pub fn set_expected_pose(&self, pose: Option<String>) {
        self.lock_inner().expected_pose = pose;
    }

    /// Uploads the selected video for analysis. A second call while one request
    /// is outstanding returns [`AnalysisError::Busy`] without touching state.
    pub async fn submit_analysis(&self) -> Result<ActiveResult, AnalysisError> {
        let pending = {
            let inner = self.lock_inner();
            Self::video_request(&inner)
        };
        match pending {
            Ok(pending) => self.run_request(pending).await,
            Err(err) => {
                if self.is_request_in_flight() {
                    return Err(self.busy(NoticeContext::VideoAnalysis));
                }
                let err = AnalysisError::from(err);
                self.notify(NoticeContext::Input, &err);
                Err(err)
            }
        }
    }

    fn video_request(inner: &ControllerInner) -> Result<PendingRequest, ValidationError> {
        let file = inner
            .selected_file
            .as_ref()
            .ok_or(ValidationError::MissingFile)?;
        let context =
            AnalysisRequestContext::new(inner.expected_pose.as_deref().unwrap_or_default())?;
        Ok(PendingRequest::Video(file.clone(), context))
    }

    /// Rejects a request while another is outstanding. A notice is emitted only
    /// when the outstanding one was abandoned by a reset.
    fn busy(&self, context: NoticeContext) -> AnalysisError {
        let stale = self
            .lock_inner()
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.stale);
        let err = AnalysisError::Busy;
        if stale {
            info!("session: rejecting request while an abandoned one is still running");
            self.notify(context, &err);
        } else {
            debug!("session: ignoring submission while a request is in flight");
        }
        err
    }

    async fn run_request(&self, pending: PendingRequest) -> Result<ActiveResult, AnalysisError> {
        let context = match &pending {
            PendingRequest::Video(..) => NoticeContext::VideoAnalysis,
            PendingRequest::WebcamFrame(_) => NoticeContext::FrameAnalysis,
        };
        let token = {
            let mut inner = self.lock_inner();
            if inner.in_flight.is_some() {
                drop(inner);
                return Err(self.busy(context));
            }
            let token = RequestToken(Uuid::new_v4());
            inner.in_flight = Some(InFlight {
                token,
                stale: false,
            });
            self.cancel_playback_locked(&mut inner);
            inner.state.begin_request();
            token
        };
        self.emit(SessionEvent::ModeChanged(Mode::Loading));

        let _guard = InFlightGuard {
            controller: self,
            token,
        };

        let outcome = match &pending {
            PendingRequest::Video(file, request_context) => self
                .backend
                .analyze_video(file, request_context)
                .await
                .map(ActiveResult::Video),
            PendingRequest::WebcamFrame(jpeg) => self
                .backend
                .analyze_webcam_frame(jpeg)
                .await
                .map(ActiveResult::Webcam),
        };

        match outcome {
            Ok(result) => {
                self.apply_result(token, result.clone());
                Ok(result)
            }
            Err(err) => {
                self.notify(context, &err);
                Err(err)
            }
        }
    }

    fn apply_result(&self, token: RequestToken, result: ActiveResult) {
        let mut inner = self.lock_inner();
        let stale = match inner.in_flight.as_ref() {
            Some(in_flight) if in_flight.token == token => in_flight.stale,
            _ => true,
        };
        if stale {
            info!("session: discarding result of a request abandoned by reset");
            return;
        }

        let kind = result.kind();
        let total = result.frames().len();
        match result {
            ActiveResult::Video(result) => inner.state.complete_video(result),
            ActiveResult::Webcam(result) => inner.state.complete_webcam(result),
        }
        drop(inner);

        info!(kind = ?kind, frames = total, "session: showing results");
        self.emit(SessionEvent::ModeChanged(Mode::ShowingResults));
        self.emit(SessionEvent::ResultReady(kind));
        if total > 0 {
            self.emit(SessionEvent::FrameChanged { index: 0, total });
        }
    }

    /// Grabs the current frame of the open capture stream and analyzes it.
    /// The selected video, if any, stays selected.
    pub async fn capture_and_analyze(&self) -> Result<ActiveResult, AnalysisError> {
        if self.is_request_in_flight() {
            return Err(self.busy(NoticeContext::FrameAnalysis));
        }

        let stream = self.capture.lock().await.clone();
        let Some(stream) = stream else {
            let err = AnalysisError::MediaAccess("webcam is not started".to_string());
            self.notify(NoticeContext::Capture, &err);
            return Err(err);
        };

        let jpeg = match capture_jpeg(stream.as_ref()).await {
            Ok(jpeg) => jpeg,
            Err(e) => {
                let err = AnalysisError::MediaAccess(e.to_string());
                self.notify(NoticeContext::Capture, &err);
                return Err(err);
            }
        };

        self.lock_inner().last_input = Some(InputKind::WebcamFrame);
        self.emit(SessionEvent::InputSelected {
            kind: InputKind::WebcamFrame,
            name: None,
        });
        self.run_request(PendingRequest::WebcamFrame(jpeg)).await
    }

    pub fn navigate_frame(&self, delta: isize) -> bool {
        let mut inner = self.lock_inner();
        if !inner.state.navigate(delta) {
            return false;
        }
        let event = SessionEvent::FrameChanged {
            index: inner.state.current_frame_index,
            total: inner.state.frame_count(),
        };
        drop(inner);
        self.emit(event);
        true
    }

    pub fn previous_frame(&self) -> bool {
        self.navigate_frame(-1)
    }

    pub fn next_frame(&self) -> bool {
        self.navigate_frame(1)
    }

    pub fn toggle_disclosure(&self) -> bool {
        let mut inner = self.lock_inner();
        if !inner.state.toggle_disclosure(self.options.preview_cards) {
            return false;
        }
        let show_all = inner.state.show_all_frames;
        drop(inner);
        self.emit(SessionEvent::DisclosureChanged { show_all });
        true
    }

    /// Steps through every frame from the first one, `playback_interval` apart.
    /// Manual navigation is disabled until it completes or is cancelled.
    pub fn start_playback(self: &Arc<Self>) -> bool {
        let mut inner = self.lock_inner();
        let total = inner.state.frame_count();
        if inner.state.mode != Mode::ShowingResults || inner.state.playing || total == 0 {
            return false;
        }

        inner.playback_generation += 1;
        let generation = inner.playback_generation;
        inner.state.playing = true;
        info!(frames = total, "session: playback started");
        self.emit(SessionEvent::PlaybackStarted { total });

        let (cancel, mut cancelled) = oneshot::channel();
        let controller = Arc::clone(self);
        let interval = self.options.playback_interval;
        let task = tokio::spawn(async move {
            for index in 0..total {
                if !controller.show_playback_frame(generation, index) {
                    return;
                }
                tokio::select! {
                    _ = &mut cancelled => return,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            controller.finish_playback(generation);
        });
        inner.playback = Some(Playback {
            generation,
            cancel,
            _task: task,
        });
        true
    }

    fn show_playback_frame(&self, generation: u64, index: usize) -> bool {
        let mut inner = self.lock_inner();
        let current = inner
            .playback
            .as_ref()
            .is_some_and(|playback| playback.generation == generation);
        if !current || !inner.state.jump_to(index) {
            return false;
        }
        let total = inner.state.frame_count();
        drop(inner);
        self.emit(SessionEvent::FrameChanged { index, total });
        true
    }

    fn finish_playback(&self, generation: u64) {
        let mut inner = self.lock_inner();
        let current = inner
            .playback
            .as_ref()
            .is_some_and(|playback| playback.generation == generation);
        if !current {
            return;
        }
        inner.playback = None;
        inner.state.playing = false;
        drop(inner);
        info!("session: playback finished");
        self.emit(SessionEvent::PlaybackFinished { completed: true });
    }

    pub fn cancel_playback(&self) -> bool {
        let mut inner = self.lock_inner();
        self.cancel_playback_locked(&mut inner)
    }

    fn cancel_playback_locked(&self, inner: &mut ControllerInner) -> bool {
        let Some(playback) = inner.playback.take() else {
            return false;
        };
        // The task may already be past its last sleep.
        let _ = playback.cancel.send(());
        inner.state.playing = false;
        info!("session: playback cancelled");
        self.emit(SessionEvent::PlaybackFinished { completed: false });
        true
    }

    /// Opens the capture stream, releasing any stream that is already open.
    pub async fn start_capture(&self) -> Result<(), AnalysisError> {
        let mut slot = self.capture.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop_all_tracks();
            self.emit(SessionEvent::CaptureStopped {
                stream_id: previous.id().to_string(),
            });
        }

        match self.devices.open_stream(self.options.capture).await {
            Ok(stream) => {
                let (width, height) = stream.dimensions();
                let stream_id = stream.id().to_string();
                *slot = Some(stream);
                drop(slot);
                info!(stream_id = %stream_id, width, height, "session: capture started");
                self.emit(SessionEvent::CaptureStarted {
                    stream_id,
                    width,
                    height,
                });
                Ok(())
            }
            Err(e) => {
                drop(slot);
                let err = AnalysisError::MediaAccess(e.to_string());
                self.notify(NoticeContext::Capture, &err);
                Err(err)
            }
        }
    }

    /// Stops every track of the open stream. Returns `false` when none was open.
    pub async fn stop_capture(&self) -> bool {
        let Some(stream) = self.capture.lock().await.take() else {
            return false;
        };
        stream.stop_all_tracks();
        info!(stream_id = stream.id(), "session: capture stopped");
        self.emit(SessionEvent::CaptureStopped {
            stream_id: stream.id().to_string(),
        });
        true
    }

    pub async fn is_capturing(&self) -> bool {
        self.capture
            .lock()
            .await
            .as_ref()
            .is_some_and(|stream| stream.is_active())
    }

    pub fn switch_tab(&self, tab: Tab) {
        let mut inner = self.lock_inner();
        if inner.state.tab == tab {
            return;
        }
        if inner.state.mode != Mode::Loading {
            self.cancel_playback_locked(&mut inner);
        }
        inner.state.switch_tab(tab);
        let mode = inner.state.mode;
        drop(inner);
        self.emit(SessionEvent::TabChanged(tab));
        self.emit(SessionEvent::ModeChanged(mode));
    }

    /// Clears the input, results and navigation. A request still running is
    /// left to finish but its outcome is discarded.
    pub fn back_to_home(&self) {
        {
            let mut inner = self.lock_inner();
            self.reset_locked(&mut inner);
            inner.selected_file = None;
            inner.last_input = None;
        }
        self.emit(SessionEvent::ModeChanged(Mode::Idle));
    }

    fn reset_locked(&self, inner: &mut ControllerInner) {
        self.cancel_playback_locked(inner);
        if let Some(in_flight) = inner.in_flight.as_mut() {
            in_flight.stale = true;
        }
        inner.state.reset();
    }

    pub async fn check_backend(&self) -> Result<(), AnalysisError> {
        match self.backend.health_check().await {
            Ok(()) => {
                info!("session: backend API is running");
                self.emit(SessionEvent::BackendStatus { reachable: true });
                Ok(())
            }
            Err(err) => {
                self.emit(SessionEvent::BackendStatus { reachable: false });
                self.notify(NoticeContext::BackendCheck, &err);
                Err(err)
            }
        }
    }

    /// Releases the capture stream and stops playback, as when leaving the page.
    pub async fn shutdown(&self) {
        self.cancel_playback();
        self.stop_capture().await;
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
