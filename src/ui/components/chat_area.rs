use eframe::egui;

use crate::ui::state::Bubble;

const OTHER_FILL: egui::Color32 = egui::Color32::from_rgb(243, 244, 246);

pub fn render(ui: &mut egui::Ui, bubbles: &[Bubble<'_>], scroll_to_bottom: bool) {
    egui::ScrollArea::vertical()
        .auto_shrink([false, false])
        .stick_to_bottom(true)
        .show(ui, |ui| {
            if bubbles.is_empty() {
                ui.vertical_centered(|ui| {
                    ui.add_space(32.0);
                    ui.label(
                        egui::RichText::new("No messages yet. Be the first to send one!").weak(),
                    );
                });
                return;
            }

            let last = bubbles.len() - 1;
            for (index, bubble) in bubbles.iter().enumerate() {
                let response = render_bubble(ui, bubble);
                if scroll_to_bottom && index == last {
                    response.scroll_to_me(Some(egui::Align::BOTTOM));
                }
                ui.add_space(8.0);
            }
        });
}

fn render_bubble(ui: &mut egui::Ui, bubble: &Bubble<'_>) -> egui::Response {
    let layout = if bubble.own {
        egui::Layout::right_to_left(egui::Align::TOP)
    } else {
        egui::Layout::left_to_right(egui::Align::TOP)
    };
    let (fill, text_color) = if bubble.own {
        (super::ACCENT, egui::Color32::WHITE)
    } else {
        (OTHER_FILL, egui::Color32::from_rgb(17, 24, 39))
    };
    let max_width = ui.available_width() * 0.7;

    ui.with_layout(layout, |ui| {
        egui::Frame::new()
            .fill(if bubble.pending { fill.gamma_multiply(0.7) } else { fill })
            .corner_radius(14.0)
            .inner_margin(egui::Margin::same(10))
            .show(ui, |ui| {
                ui.set_max_width(max_width);
                ui.with_layout(egui::Layout::top_down(egui::Align::LEFT), |ui| {
                    ui.label(egui::RichText::new(bubble.label).small().color(text_color));
                    ui.add(egui::Label::new(egui::RichText::new(bubble.text).color(text_color)).wrap());
                });
            })
            .response
    })
    .inner
}
