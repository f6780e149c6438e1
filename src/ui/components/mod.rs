pub mod chat_area;
pub mod header;
pub mod input_bar;
pub mod join_screen;

use eframe::egui::Color32;

/// Blue used for own bubbles and the user name.
pub const ACCENT: Color32 = Color32::from_rgb(59, 130, 246);
