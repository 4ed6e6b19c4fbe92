//! Session state machine: idle → loading → showing results, plus frame navigation.
//!
//! All transitions are plain methods on [`SessionState`]; the controller owns the
//! only mutable instance and hands out clones as read-only snapshots.

use shared::domain::{AnalysisResult, FrameResult, InputKind, WebcamResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Idle,
    Loading,
    ShowingResults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Upload,
    Webcam,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActiveResult {
    Video(AnalysisResult),
    Webcam(WebcamResult),
}

impl ActiveResult {
    pub fn kind(&self) -> InputKind {
        match self {
            Self::Video(_) => InputKind::File,
            Self::Webcam(_) => InputKind::WebcamFrame,
        }
    }

    pub fn frames(&self) -> &[FrameResult] {
        match self {
            Self::Video(result) => &result.frame_results,
            Self::Webcam(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub mode: Mode,
    pub tab: Tab,
    pub current_frame_index: usize,
    pub show_all_frames: bool,
    pub playing: bool,
    pub active_result: Option<ActiveResult>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_count(&self) -> usize {
        self.active_result
            .as_ref()
            .map_or(0, |result| result.frames().len())
    }

    pub fn current_frame(&self) -> Option<&FrameResult> {
        self.active_result
            .as_ref()
            .and_then(|result| result.frames().get(self.current_frame_index))
    }

    pub fn is_loading(&self) -> bool {
        self.mode == Mode::Loading
    }

    /// Manual navigation is disabled while nothing is shown or playback runs.
    pub fn can_navigate(&self) -> bool {
        self.mode == Mode::ShowingResults && !self.playing && self.frame_count() > 0
    }

    pub fn begin_request(&mut self) {
        self.mode = Mode::Loading;
        self.active_result = None;
        self.current_frame_index = 0;
        self.show_all_frames = false;
        self.playing = false;
    }

    pub fn complete_video(&mut self, result: AnalysisResult) {
        self.show_result(ActiveResult::Video(result));
    }

    pub fn complete_webcam(&mut self, result: WebcamResult) {
        self.show_result(ActiveResult::Webcam(result));
    }

    fn show_result(&mut self, result: ActiveResult) {
        self.active_result = Some(result);
        self.mode = Mode::ShowingResults;
        self.current_frame_index = 0;
        self.show_all_frames = false;
        self.playing = false;
    }

    /// Leaves the loading state after a failed or abandoned request.
    pub fn fail_request(&mut self) -> bool {
        if self.mode != Mode::Loading {
            return false;
        }
        self.mode = Mode::Idle;
        true
    }

    /// Moves the viewer by `delta`. Targets outside `[0, len - 1]` are ignored.
    pub fn navigate(&mut self, delta: isize) -> bool {
        if !self.can_navigate() || delta == 0 {
            return false;
        }
        let Some(target) = self.current_frame_index.checked_add_signed(delta) else {
            return false;
        };
        if target >= self.frame_count() {
            return false;
        }
        self.current_frame_index = target;
        true
    }

    pub fn previous_frame(&mut self) -> bool {
        self.navigate(-1)
    }

    pub fn next_frame(&mut self) -> bool {
        self.navigate(1)
    }

    /// Positions the viewer during playback.
    pub fn jump_to(&mut self, index: usize) -> bool {
        if self.mode != Mode::ShowingResults || index >= self.frame_count() {
            return false;
        }
        self.current_frame_index = index;
        true
    }

    /// Flips between the preview and the full card list. Only possible when
    /// there are more frames than `preview_cards`.
    pub fn toggle_disclosure(&mut self, preview_cards: usize) -> bool {
        if self.mode != Mode::ShowingResults || self.frame_count() <= preview_cards {
            return false;
        }
        self.show_all_frames = !self.show_all_frames;
        true
    }

    /// Back to the landing state. The selected tab survives.
    pub fn reset(&mut self) {
        *self = Self {
            tab: self.tab,
            ..Self::default()
        };
    }

    /// Changing tab hides any displayed results; an in-flight request keeps loading.
    pub fn switch_tab(&mut self, tab: Tab) -> bool {
        if self.tab == tab {
            return false;
        }
        self.tab = tab;
        if self.mode != Mode::Loading {
            let tab = self.tab;
            *self = Self {
                tab,
                ..Self::default()
            };
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(frame_number: u32) -> FrameResult {
        FrameResult {
            frame_number,
            image: None,
            pose_detected: "Bhujangasana".into(),
            confidence: 0.8,
            is_correct: frame_number % 2 == 0,
            feedback: String::new(),
        }
    }

    fn result_with_frames(count: u32) -> AnalysisResult {
        AnalysisResult {
            accuracy_percentage: 50.0,
            average_confidence: 0.8,
            total_frames_analyzed: count,
            correct_frames: count / 2,
            overall_feedback: "Decent attempt.".into(),
            expected_pose: Some("Bhujangasana".into()),
            video_name: None,
            frame_results: (0..count).map(frame).collect(),
        }
    }

    fn showing(count: u32) -> SessionState {
        let mut state = SessionState::new();
        state.begin_request();
        state.complete_video(result_with_frames(count));
        state
    }

    #[test]
    fn request_lifecycle_transitions() {
        let mut state = SessionState::new();
        assert_eq!(state.mode, Mode::Idle);

        state.begin_request();
        assert!(state.is_loading());
        assert!(!state.can_navigate());

        state.complete_video(result_with_frames(3));
        assert_eq!(state.mode, Mode::ShowingResults);
        assert_eq!(state.current_frame_index, 0);
        assert_eq!(state.current_frame().map(|f| f.frame_number), Some(0));
    }

    #[test]
    fn failure_returns_to_idle_only_from_loading() {
        let mut state = SessionState::new();
        state.begin_request();
        assert!(state.fail_request());
        assert_eq!(state.mode, Mode::Idle);
        assert!(!state.fail_request());

        let mut shown = showing(2);
        assert!(!shown.fail_request());
        assert_eq!(shown.mode, Mode::ShowingResults);
    }

    #[test]
    fn navigation_is_idempotent_at_boundaries() {
        let mut state = showing(3);
        assert!(!state.previous_frame());
        assert_eq!(state.current_frame_index, 0);

        assert!(state.next_frame());
        assert!(state.next_frame());
        assert_eq!(state.current_frame_index, 2);
        assert!(!state.next_frame());
        assert_eq!(state.current_frame_index, 2);

        assert!(!state.navigate(5));
        assert!(!state.navigate(-3));
        assert_eq!(state.current_frame_index, 2);
        assert!(state.navigate(-2));
        assert_eq!(state.current_frame_index, 0);
    }

    #[test]
    fn navigation_is_disabled_during_playback_and_without_frames() {
        let mut state = showing(3);
        state.playing = true;
        assert!(!state.next_frame());
        assert!(state.jump_to(2));
        assert_eq!(state.current_frame_index, 2);

        let mut empty = showing(0);
        assert!(!empty.next_frame());
        assert!(!empty.jump_to(0));
    }

    #[test]
    fn disclosure_needs_more_frames_than_preview() {
        let mut five = showing(5);
        assert!(!five.toggle_disclosure(5));
        assert!(!five.show_all_frames);

        let mut six = showing(6);
        assert!(six.toggle_disclosure(5));
        assert!(six.show_all_frames);
        assert!(six.toggle_disclosure(5));
        assert!(!six.show_all_frames);
    }

    #[test]
    fn webcam_results_have_no_navigable_frames() {
        let mut state = SessionState::new();
        state.begin_request();
        state.complete_webcam(WebcamResult {
            is_correct: false,
            confidence: 0.4,
            pose_class: "Tadasana".into(),
            feedback: "Straighten your back".into(),
        });
        assert_eq!(state.frame_count(), 0);
        assert!(!state.next_frame());
        assert_eq!(
            state.active_result.as_ref().map(ActiveResult::kind),
            Some(InputKind::WebcamFrame)
        );
    }

    #[test]
    fn reset_keeps_tab_and_switching_tab_hides_results() {
        let mut state = showing(4);
        assert!(state.switch_tab(Tab::Webcam));
        assert_eq!(state.mode, Mode::Idle);
        assert!(state.active_result.is_none());
        assert!(!state.switch_tab(Tab::Webcam));

        let mut loading = SessionState::new();
        loading.begin_request();
        loading.switch_tab(Tab::Webcam);
        assert!(loading.is_loading());

        let mut shown = showing(2);
        shown.tab = Tab::Webcam;
        shown.reset();
        assert_eq!(shown.tab, Tab::Webcam);
        assert_eq!(shown.mode, Mode::Idle);
    }
}
