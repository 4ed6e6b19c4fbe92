//! Line-based frame browser for a finished analysis.

use std::sync::Arc;

use anyhow::{Context, Result};
use client_core::{SessionController, SessionEvent, SessionState};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};
use tracing::warn;

use crate::render;

pub const HELP: &str =
    "commands: next (n), prev (p), play, stop, more (m), show (s), home, help, quit (q)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Next,
    Previous,
    Play,
    Stop,
    More,
    Show,
    Home,
    Help,
    Quit,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let command = match line.trim().to_ascii_lowercase().as_str() {
            "n" | "next" => Self::Next,
            "p" | "prev" | "previous" => Self::Previous,
            "play" => Self::Play,
            "stop" => Self::Stop,
            "m" | "more" | "less" => Self::More,
            "s" | "show" => Self::Show,
            "home" | "back" => Self::Home,
            "h" | "help" | "?" => Self::Help,
            "q" | "quit" | "exit" => Self::Quit,
            _ => return None,
        };
        Some(command)
    }
}

/// Reads commands from stdin and prints session events until `quit`,
/// `home` or end of input.
pub async fn run(
    controller: Arc<SessionController>,
    mut events: broadcast::Receiver<SessionEvent>,
) -> Result<()> {
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read from stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match ReplCommand::parse(&line) {
                    Some(command) => {
                        if !apply(&controller, command) {
                            break;
                        }
                    }
                    None => println!("unknown command '{}'; {HELP}", line.trim()),
                }
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&controller, event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "repl: missed session events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    controller.cancel_playback();
    Ok(())
}

/// Returns `false` when the browser should exit.
fn apply(controller: &Arc<SessionController>, command: ReplCommand) -> bool {
    match command {
        ReplCommand::Next => {
            if !controller.next_frame() {
                println!("{}", navigation_blocked(controller, "last"));
            }
        }
        ReplCommand::Previous => {
            if !controller.previous_frame() {
                println!("{}", navigation_blocked(controller, "first"));
            }
        }
        ReplCommand::Play => {
            if !controller.start_playback() {
                println!("{}", playback_refused(&controller.snapshot()));
            }
        }
        ReplCommand::Stop => {
            if !controller.cancel_playback() {
                println!("playback is not running");
            }
        }
        ReplCommand::More => {
            if !controller.toggle_disclosure() {
                println!("all frames are already listed");
            }
        }
        ReplCommand::Show => match controller.results_view() {
            Some(view) => println!("{}", render::results(&view)),
            None => println!("no results to show"),
        },
        ReplCommand::Home => {
            controller.back_to_home();
            println!("Session cleared.");
            return false;
        }
        ReplCommand::Help => println!("{HELP}"),
        ReplCommand::Quit => return false,
    }
    true
}

fn navigation_blocked(controller: &SessionController, edge: &str) -> String {
    if controller.snapshot().playing {
        "navigation is disabled during playback".to_string()
    } else {
        format!("already at the {edge} frame")
    }
}

fn playback_refused(state: &SessionState) -> &'static str {
    if state.playing {
        "playback is already running"
    } else {
        "there are no frames to play"
    }
}

fn print_event(controller: &SessionController, event: SessionEvent) {
    match event {
        SessionEvent::FrameChanged { .. } => {
            if let Some(viewer) = controller.results_view().and_then(|view| view.viewer) {
                println!("{}", render::viewer(&viewer));
            }
        }
        SessionEvent::DisclosureChanged { .. } => {
            if let Some(view) = controller.results_view() {
                println!("{}", render::cards(&view));
            }
        }
        SessionEvent::PlaybackStarted { total } => println!("playing {total} frames"),
        SessionEvent::PlaybackFinished { completed: true } => println!("playback finished"),
        SessionEvent::PlaybackFinished { completed: false } => println!("playback stopped"),
        SessionEvent::Notice(notice) => eprintln!("{}", render::notice(&notice)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_forms() {
        assert_eq!(ReplCommand::parse("n"), Some(ReplCommand::Next));
        assert_eq!(ReplCommand::parse("  Prev "), Some(ReplCommand::Previous));
        assert_eq!(ReplCommand::parse("PLAY"), Some(ReplCommand::Play));
        assert_eq!(ReplCommand::parse("less"), Some(ReplCommand::More));
        assert_eq!(ReplCommand::parse("back"), Some(ReplCommand::Home));
        assert_eq!(ReplCommand::parse("exit"), Some(ReplCommand::Quit));
    }

    #[test]
    fn refused_playback_names_the_reason() {
        let mut state = SessionState::new();
        assert_eq!(playback_refused(&state), "there are no frames to play");
        state.playing = true;
        assert_eq!(playback_refused(&state), "playback is already running");
    }

    #[test]
    fn rejects_unknown_commands() {
        assert_eq!(ReplCommand::parse("jump 3"), None);
        assert_eq!(ReplCommand::parse(""), None);
    }
}
