use eframe::egui;

/// Returns `true` when the user submitted the draft (Send button or Enter).
/// Validation of the text happens in the state transition.
pub fn render(ui: &mut egui::Ui, draft: &mut String) -> bool {
    let mut send = false;
    ui.horizontal(|ui| {
        let button_width = 80.0;
        let response = ui.add(
            egui::TextEdit::singleline(draft)
                .hint_text("Type a message...")
                .desired_width(ui.available_width() - button_width),
        );
        if ui
            .add_sized([button_width - 8.0, 28.0], egui::Button::new("➤ Send"))
            .clicked()
        {
            send = true;
        }

        if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
            send = true;
            response.request_focus();
        }
    });

    send
}
