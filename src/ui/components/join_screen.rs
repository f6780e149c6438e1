use eframe::egui;

use crate::ui::state::{AppState, JoinPhase};

/// Name entry form. Returns `true` when the form was submitted.
pub fn render(ui: &mut egui::Ui, state: &mut AppState, focus_name: &mut bool) -> bool {
    let joining = matches!(state.phase(), JoinPhase::Joining { .. });
    let mut submit = false;

    ui.vertical_centered(|ui| {
        ui.add_space(ui.available_height() * 0.25);
        ui.heading(egui::RichText::new("💬 Welcome to Chat").strong());
        ui.add_space(24.0);
        ui.label("What should we call you?");
        ui.add_space(8.0);

        let response = ui.add_enabled(
            !joining,
            egui::TextEdit::singleline(&mut state.name_input)
                .hint_text("Enter your name")
                .desired_width(280.0),
        );
        if std::mem::take(focus_name) {
            response.request_focus();
        }
        if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
            submit = true;
        }

        ui.add_space(16.0);
        if joining {
            ui.horizontal(|ui| {
                ui.add_space((ui.available_width() - 100.0).max(0.0) / 2.0);
                ui.spinner();
                ui.label("Joining...");
            });
        } else {
            let button = egui::Button::new("Join Chat").min_size(egui::vec2(280.0, 32.0));
            if ui.add_enabled(state.name_is_valid(), button).clicked() {
                submit = true;
            }
        }
    });

    submit && !joining
}
