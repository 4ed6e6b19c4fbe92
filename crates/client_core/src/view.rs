//! Read-only projections of the session for front-ends to render verbatim.

use shared::domain::{AnalysisResult, FrameResult, InputKind, StatusBand, WebcamResult};

use crate::session::{ActiveResult, Mode, SessionState};

pub const CAPTURED_FRAME_LABEL: &str = "Captured Frame";

/// Shortest decimal rendering, so `90.0` shows as `90` and `85.5` as `85.5`.
pub fn format_number(value: f64) -> String {
    format!("{value}")
}

pub fn format_percent(confidence: f64) -> String {
    format!("{:.1}%", confidence * 100.0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryStats {
    pub accuracy: String,
    pub confidence: String,
    pub frames_analyzed: String,
    pub correct_frames: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCard {
    pub label: String,
    pub pose: String,
    pub confidence: String,
    pub is_correct: bool,
    pub feedback: String,
    pub image: Option<String>,
}

impl FrameCard {
    pub fn status_icon(&self) -> &'static str {
        if self.is_correct {
            "✅"
        } else {
            "❌"
        }
    }

    fn from_frame(frame: &FrameResult) -> Self {
        Self {
            label: frame.label(),
            pose: frame.pose_detected.clone(),
            confidence: format_percent(frame.confidence),
            is_correct: frame.is_correct,
            feedback: frame.feedback.clone(),
            image: frame.image.clone(),
        }
    }

    fn from_webcam(result: &WebcamResult) -> Self {
        Self {
            label: CAPTURED_FRAME_LABEL.to_string(),
            pose: result.pose_class.clone(),
            confidence: format_percent(result.confidence),
            is_correct: result.is_correct,
            feedback: result.feedback.clone(),
            image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameViewer {
    pub index: usize,
    pub total: usize,
    pub card: FrameCard,
    pub can_go_previous: bool,
    pub can_go_next: bool,
    pub playing: bool,
}

impl FrameViewer {
    pub fn position(&self) -> String {
        format!("Frame {} of {}", self.index + 1, self.total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisclosureToggle {
    pub expanded: bool,
    pub total: usize,
}

impl DisclosureToggle {
    pub fn label(&self) -> String {
        if self.expanded {
            "Show fewer frames".to_string()
        } else {
            format!("Show all {} frames", self.total)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsView {
    pub kind: InputKind,
    pub summary: SummaryStats,
    pub status: StatusBand,
    pub feedback: String,
    pub viewer: Option<FrameViewer>,
    pub cards: Vec<FrameCard>,
    pub disclosure: Option<DisclosureToggle>,
}

impl ResultsView {
    /// `None` unless results are on screen.
    pub fn from_state(state: &SessionState, preview_cards: usize) -> Option<Self> {
        if state.mode != Mode::ShowingResults {
            return None;
        }
        match state.active_result.as_ref()? {
            ActiveResult::Video(result) => Some(Self::video(state, result, preview_cards)),
            ActiveResult::Webcam(result) => Some(Self::webcam(result)),
        }
    }

    fn video(state: &SessionState, result: &AnalysisResult, preview_cards: usize) -> Self {
        let frames = &result.frame_results;
        let viewer = frames.get(state.current_frame_index).map(|frame| {
            let navigable = state.can_navigate();
            FrameViewer {
                index: state.current_frame_index,
                total: frames.len(),
                card: FrameCard::from_frame(frame),
                can_go_previous: navigable && state.current_frame_index > 0,
                can_go_next: navigable && state.current_frame_index + 1 < frames.len(),
                playing: state.playing,
            }
        });

        let visible = if state.show_all_frames {
            frames.len()
        } else {
            frames.len().min(preview_cards)
        };
        let disclosure = (frames.len() > preview_cards).then_some(DisclosureToggle {
            expanded: state.show_all_frames,
            total: frames.len(),
        });

        Self {
            kind: InputKind::File,
            summary: SummaryStats {
                accuracy: format!("{}%", format_number(result.accuracy_percentage)),
                confidence: format!("{:.2}", result.average_confidence),
                frames_analyzed: result.total_frames_analyzed.to_string(),
                correct_frames: format!(
                    "{} / {}",
                    result.correct_frames, result.total_frames_analyzed
                ),
            },
            status: result.status_band(),
            feedback: result.feedback_text(),
            viewer,
            cards: frames[..visible].iter().map(FrameCard::from_frame).collect(),
            disclosure,
        }
    }

    fn webcam(result: &WebcamResult) -> Self {
        let correct = u8::from(result.is_correct);
        Self {
            kind: InputKind::WebcamFrame,
            summary: SummaryStats {
                accuracy: format!("{}%", format_number(result.accuracy_percentage())),
                confidence: format_percent(result.confidence),
                frames_analyzed: "1".to_string(),
                correct_frames: format!("{correct} / 1"),
            },
            status: StatusBand::from_accuracy(result.accuracy_percentage()),
            feedback: result.feedback.clone(),
            viewer: None,
            cards: vec![FrameCard::from_webcam(result)],
            disclosure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(count: u32) -> Vec<FrameResult> {
        (0..count)
            .map(|frame_number| FrameResult {
                frame_number,
                image: Some("data:image/jpeg;base64,/9j/".into()),
                pose_detected: "Tadasana".into(),
                confidence: 0.877,
                is_correct: frame_number != 1,
                feedback: format!("frame {frame_number}"),
            })
            .collect()
    }

    fn showing(accuracy: f64, count: u32) -> SessionState {
        let mut state = SessionState::new();
        state.begin_request();
        state.complete_video(AnalysisResult {
            accuracy_percentage: accuracy,
            average_confidence: 0.8765,
            total_frames_analyzed: count,
            correct_frames: count.saturating_sub(1),
            overall_feedback: "Good job!".into(),
            expected_pose: Some("Tadasana".into()),
            video_name: Some("flow.mp4".into()),
            frame_results: frames(count),
        });
        state
    }

    #[test]
    fn hidden_unless_showing_results() {
        let mut state = SessionState::new();
        assert!(ResultsView::from_state(&state, 5).is_none());
        state.begin_request();
        assert!(ResultsView::from_state(&state, 5).is_none());
    }

    #[test]
    fn summary_shows_counts_verbatim() {
        let view = ResultsView::from_state(&showing(85.5, 4), 5).expect("view");
        assert_eq!(view.summary.accuracy, "85.5%");
        assert_eq!(view.summary.confidence, "0.88");
        assert_eq!(view.summary.frames_analyzed, "4");
        assert_eq!(view.summary.correct_frames, "3 / 4");
        assert_eq!(view.status, StatusBand::Good);
        assert_eq!(view.feedback, "Expected Asana: Tadasana\n\nGood job!");
    }

    #[test]
    fn whole_percentages_drop_the_fraction() {
        let view = ResultsView::from_state(&showing(90.0, 1), 5).expect("view");
        assert_eq!(view.summary.accuracy, "90%");
        assert_eq!(view.status, StatusBand::Excellent);
    }

    #[test]
    fn five_frames_have_no_disclosure_toggle() {
        let view = ResultsView::from_state(&showing(60.0, 5), 5).expect("view");
        assert_eq!(view.cards.len(), 5);
        assert!(view.disclosure.is_none());
        assert_eq!(view.status, StatusBand::NeedsImprovement);
    }

    #[test]
    fn six_frames_preview_five_and_reveal_the_sixth() {
        let mut state = showing(80.0, 6);
        let collapsed = ResultsView::from_state(&state, 5).expect("view");
        assert_eq!(collapsed.cards.len(), 5);
        let toggle = collapsed.disclosure.expect("toggle");
        assert!(!toggle.expanded);
        assert_eq!(toggle.label(), "Show all 6 frames");

        assert!(state.toggle_disclosure(5));
        let expanded = ResultsView::from_state(&state, 5).expect("view");
        assert_eq!(expanded.cards.len(), 6);
        assert_eq!(expanded.cards[5].label, "Frame 6");
        assert_eq!(expanded.disclosure.map(|t| t.label()).as_deref(), Some("Show fewer frames"));
    }

    #[test]
    fn viewer_reflects_position_and_bounds() {
        let mut state = showing(75.0, 3);
        let viewer = ResultsView::from_state(&state, 5)
            .and_then(|view| view.viewer)
            .expect("viewer");
        assert_eq!(viewer.position(), "Frame 1 of 3");
        assert!(!viewer.can_go_previous);
        assert!(viewer.can_go_next);
        assert_eq!(viewer.card.confidence, "87.7%");

        state.next_frame();
        state.next_frame();
        let viewer = ResultsView::from_state(&state, 5)
            .and_then(|view| view.viewer)
            .expect("viewer");
        assert_eq!(viewer.position(), "Frame 3 of 3");
        assert!(viewer.can_go_previous);
        assert!(!viewer.can_go_next);

        state.playing = true;
        let viewer = ResultsView::from_state(&state, 5)
            .and_then(|view| view.viewer)
            .expect("viewer");
        assert!(!viewer.can_go_previous && !viewer.can_go_next);
        assert!(viewer.playing);
    }

    #[test]
    fn webcam_result_renders_as_single_frame() {
        let mut state = SessionState::new();
        state.begin_request();
        state.complete_webcam(WebcamResult {
            is_correct: true,
            confidence: 0.912,
            pose_class: "Vajrasana".into(),
            feedback: "Hold steady".into(),
        });
        let view = ResultsView::from_state(&state, 5).expect("view");
        assert_eq!(view.summary.accuracy, "100%");
        assert_eq!(view.summary.confidence, "91.2%");
        assert_eq!(view.summary.frames_analyzed, "1");
        assert_eq!(view.summary.correct_frames, "1 / 1");
        assert_eq!(view.feedback, "Hold steady");
        assert_eq!(view.cards.len(), 1);
        assert_eq!(view.cards[0].label, CAPTURED_FRAME_LABEL);
        assert_eq!(view.cards[0].status_icon(), "✅");
        assert!(view.viewer.is_none());
    }
}
