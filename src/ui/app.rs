use std::time::{Duration, Instant};

use chrono::Utc;
use eframe::egui;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::common::{BackendCommand, BackendEvent};

use super::components::{chat_area, header, input_bar, join_screen};
use super::state::{AppState, JoinPhase};

/// How often the UI wakes up to drain backend events when idle.
const EVENT_POLL: Duration = Duration::from_millis(100);

pub struct ChatApp {
    state: AppState,
    command_sender: mpsc::Sender<BackendCommand>,
    event_receiver: mpsc::Receiver<BackendEvent>,
    focus_name: bool,
}

impl ChatApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        state: AppState,
        command_sender: mpsc::Sender<BackendCommand>,
        event_receiver: mpsc::Receiver<BackendEvent>,
    ) -> Self {
        Self {
            state,
            command_sender,
            event_receiver,
            focus_name: true,
        }
    }

    fn handle_backend_events(&mut self) {
        while let Ok(event) = self.event_receiver.try_recv() {
            self.state.apply(event, Utc::now());
        }
    }

    fn send_command(&mut self, command: BackendCommand) {
        if let Err(err) = self.command_sender.try_send(command) {
            log::warn!("Failed to send command to backend: {err}");
        }
    }

    fn submit_draft(&mut self) {
        let Some(message) = self.state.begin_send(Utc::now()) else {
            return;
        };
        let command = BackendCommand::SendMessage(message);
        if let Err(TrySendError::Full(command) | TrySendError::Closed(command)) =
            self.command_sender.try_send(command)
        {
            log::warn!("Backend unavailable; rolling back send");
            if let BackendCommand::SendMessage(message) = command {
                self.state.send_failed(message);
            }
        }
    }

    fn show_join_screen(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            if join_screen::render(ui, &mut self.state, &mut self.focus_name) {
                self.state.begin_join(Instant::now());
            }
        });
    }

    fn show_chat(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("chat_header").show(ctx, |ui| {
            ui.add_space(6.0);
            if header::render(ui, &self.state) {
                self.send_command(BackendCommand::Refresh);
            }
            ui.add_space(6.0);
        });

        egui::TopBottomPanel::bottom("input_bar").show(ctx, |ui| {
            ui.add_space(8.0);
            if input_bar::render(ui, &mut self.state.draft) {
                self.submit_draft();
            }
            ui.add_space(8.0);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            header::render_error(ui, &self.state);
            let scroll = self.state.take_scroll_request();
            chat_area::render(ui, &self.state.bubbles(), scroll);
        });
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_backend_events();
        if self.state.poll_join(Instant::now()) {
            log::info!(
                "Joined chat as {}",
                self.state.display_name().unwrap_or_default()
            );
        }

        match self.state.phase() {
            JoinPhase::Joined => self.show_chat(ctx),
            JoinPhase::EnteringName | JoinPhase::Joining { .. } => self.show_join_screen(ctx),
        }

        ctx.request_repaint_after(EVENT_POLL);
    }
}

impl Drop for ChatApp {
    fn drop(&mut self) {
        // Leave the realtime channel before the sender closes.
        self.send_command(BackendCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Session;
    use crate::ui::state::SEND_ERROR;

    fn app(command_sender: mpsc::Sender<BackendCommand>) -> ChatApp {
        let mut state = AppState::new(
            Session::with_user_id("ada-id"),
            Duration::ZERO,
            Duration::from_secs(40),
        );
        state.name_input = "Ada".to_string();
        let now = Instant::now();
        assert!(state.begin_join(now));
        assert!(state.poll_join(now));

        let (_, event_receiver) = mpsc::channel(1);
        ChatApp {
            state,
            command_sender,
            event_receiver,
            focus_name: false,
        }
    }

    #[test]
    fn test_send_rolls_back_when_backend_is_gone() {
        let (commands, receiver) = mpsc::channel(4);
        drop(receiver);
        let mut app = app(commands);

        app.state.draft = "hi".to_string();
        app.submit_draft();

        assert!(app.state.messages().is_empty());
        assert_eq!(app.state.draft, "hi");
        assert_eq!(app.state.error().map(|banner| banner.text), Some(SEND_ERROR));
    }

    #[test]
    fn test_send_rolls_back_when_command_queue_is_full() {
        let (commands, mut receiver) = mpsc::channel(1);
        commands.try_send(BackendCommand::Refresh).unwrap();
        let mut app = app(commands);

        app.state.draft = "hi".to_string();
        app.submit_draft();

        assert!(app.state.messages().is_empty());
        assert_eq!(app.state.draft, "hi");
        assert!(matches!(receiver.try_recv(), Ok(BackendCommand::Refresh)));
    }

    #[test]
    fn test_send_is_queued_for_backend() {
        let (commands, mut receiver) = mpsc::channel(4);
        let mut app = app(commands);

        app.state.draft = "hi".to_string();
        app.submit_draft();

        assert_eq!(app.state.messages().len(), 1);
        match receiver.try_recv() {
            Ok(BackendCommand::SendMessage(message)) => assert_eq!(message.content, "hi"),
            other => panic!("expected send command, got {other:?}"),
        }
    }
}
