//! Plain-text rendering of the controller's result projections.

use client_core::{
    view::{FrameCard, FrameViewer},
    NoticeContext, ResultsView, UserNotice,
};
use shared::{domain::InputKind, protocol::error_detail};

pub fn results(view: &ResultsView) -> String {
    let title = match view.kind {
        InputKind::File => "Analysis Results",
        InputKind::WebcamFrame => "Webcam Analysis",
    };
    let mut lines = vec![
        format!("== {title} =="),
        format!("Status:          {}", view.status),
        format!("Accuracy:        {}", view.summary.accuracy),
        format!("Avg confidence:  {}", view.summary.confidence),
        format!("Frames analyzed: {}", view.summary.frames_analyzed),
        format!("Correct frames:  {}", view.summary.correct_frames),
        String::new(),
        "Feedback:".to_string(),
    ];
    lines.extend(view.feedback.lines().map(|line| {
        if line.is_empty() {
            String::new()
        } else {
            format!("  {line}")
        }
    }));
    if let Some(viewer) = &view.viewer {
        lines.push(String::new());
        lines.push(self::viewer(viewer));
    }
    lines.push(String::new());
    lines.push(cards(view));
    lines.join("\n")
}

pub fn cards(view: &ResultsView) -> String {
    let mut lines: Vec<String> = view.cards.iter().map(card).collect();
    if let Some(toggle) = view.disclosure {
        lines.push(format!("  [more] {}", toggle.label()));
    }
    lines.join("\n")
}

pub fn card(card: &FrameCard) -> String {
    format!(
        "{} {:<14} {:<20} {:>6}  {}",
        card.status_icon(),
        card.label,
        card.pose,
        card.confidence,
        card.feedback
    )
}

pub fn viewer(viewer: &FrameViewer) -> String {
    let controls = if viewer.playing {
        "playing".to_string()
    } else {
        let mut controls = Vec::new();
        if viewer.can_go_previous {
            controls.push("[prev]");
        }
        if viewer.can_go_next {
            controls.push("[next]");
        }
        controls.join(" ")
    };
    format!(
        "{}  {}\n  {}",
        viewer.position(),
        card(&viewer.card),
        controls
    )
}

pub fn notice(notice: &UserNotice) -> String {
    match notice.context {
        NoticeContext::BackendCheck => format!("warning: {}", notice.message),
        _ => format!("error: {}", notice.message),
    }
}

/// The backend's `detail` message, when the error body carried one.
pub fn server_detail(status: u16, body: &str) -> Option<String> {
    let detail = error_detail(body);
    if detail.is_empty() || detail == body.trim() {
        return None;
    }
    Some(format!("backend said ({status}): {detail}"))
}
