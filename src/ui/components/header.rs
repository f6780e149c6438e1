use eframe::egui;

use crate::common::SubscriptionStatus;
use crate::ui::state::AppState;

/// Returns `true` when the refresh button was clicked.
pub fn render(ui: &mut egui::Ui, state: &AppState) -> bool {
    let mut refresh = false;
    ui.horizontal(|ui| {
        ui.heading("💬 Real-time Chat");
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            if let Some(name) = state.display_name() {
                ui.label(egui::RichText::new(name).strong().color(super::ACCENT));
                ui.label("Chatting as");
            }
            ui.add_space(12.0);
            let (color, text) = match state.subscription {
                Some(SubscriptionStatus::Subscribed) => (egui::Color32::GREEN, "live"),
                Some(SubscriptionStatus::Connecting) => (egui::Color32::YELLOW, "connecting"),
                Some(SubscriptionStatus::Offline) | None => (egui::Color32::GRAY, "polling"),
            };
            ui.label(egui::RichText::new(text).weak());
            ui.colored_label(color, "●");
            if ui
                .small_button("⟳")
                .on_hover_text(format!("{} messages loaded", state.messages().len()))
                .clicked()
            {
                refresh = true;
            }
        });
    });
    refresh
}

/// Generic error line above the message list.
pub fn render_error(ui: &mut egui::Ui, state: &AppState) {
    let Some(banner) = state.error() else {
        return;
    };
    egui::Frame::new()
        .fill(egui::Color32::from_rgb(254, 226, 226))
        .stroke(egui::Stroke::new(1.0, egui::Color32::from_rgb(248, 113, 113)))
        .corner_radius(8.0)
        .inner_margin(egui::Margin::same(10))
        .show(ui, |ui| {
            ui.set_width(ui.available_width());
            ui.colored_label(egui::Color32::from_rgb(185, 28, 28), banner.text);
        });
    ui.add_space(8.0);
}
