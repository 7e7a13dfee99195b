//! Shared styling and small drawing helpers for the panel.

use eframe::egui::{self, pos2, Color32, Frame, Pos2, Sense, Stroke, Ui, Vec2};

use crate::mqtt::ConnectionState;

/// Dark theme palette.
pub struct UiColors;

impl UiColors {
    pub const MAIN_BG: Color32 = Color32::from_rgb(30, 30, 30);

    pub const INNER_BG: Color32 = Color32::from_rgb(25, 25, 25);

    pub const BORDER: Color32 = Color32::from_rgb(60, 60, 60);

    /// Connected, acknowledged
    pub const ACTIVE: Color32 = Color32::from_rgb(50, 200, 20);

    /// Connecting or reconnecting
    pub const PENDING: Color32 = Color32::from_rgb(220, 170, 30);

    /// Disconnected, failed, device errors
    pub const INACTIVE: Color32 = Color32::from_rgb(200, 50, 20);
}

pub fn create_frame(bg_color: Color32) -> Frame {
    Frame::new()
        .stroke(Stroke::new(1.0, UiColors::BORDER))
        .fill(bg_color)
        .inner_margin(6)
        .outer_margin(2)
}

pub fn state_color(state: ConnectionState) -> Color32 {
    match state {
        ConnectionState::Connected => UiColors::ACTIVE,
        ConnectionState::Connecting | ConnectionState::Reconnecting | ConnectionState::Lost => {
            UiColors::PENDING
        }
        ConnectionState::Disconnected | ConnectionState::Fatal => UiColors::INACTIVE,
    }
}

/// Status dot followed by the state name.
pub fn connection_badge(ui: &mut Ui, state: ConnectionState) {
    ui.colored_label(state_color(state), "\u{2B24}");
    ui.label(state.to_string());
}

/// Points of a line through `values`, scaled into `rect`.
pub fn sparkline_points(values: &[f64], rect: egui::Rect) -> Vec<Pos2> {
    if values.len() < 2 {
        return Vec::new();
    }
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let span = (hi - lo).max(f64::EPSILON);
    let step = rect.width() / (values.len() - 1) as f32;

    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let y = rect.bottom() - rect.height() * ((v - lo) / span) as f32;
            pos2(rect.left() + step * i as f32, y)
        })
        .collect()
}

pub fn sparkline(ui: &mut Ui, values: &[f64], size: Vec2) {
    let (rect, _) = ui.allocate_exact_size(size, Sense::hover());
    let painter = ui.painter_at(rect);
    painter.rect_filled(rect, 2.0, UiColors::INNER_BG);

    let points = sparkline_points(values, rect.shrink(2.0));
    if !points.is_empty() {
        painter.add(egui::Shape::line(points, Stroke::new(1.5, UiColors::ACTIVE)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eframe::egui::{Rect, Vec2};

    #[test]
    fn sparkline_spans_the_rect() {
        let rect = Rect::from_min_size(pos2(0.0, 0.0), Vec2::new(100.0, 10.0));
        let points = sparkline_points(&[1.0, 3.0, 2.0], rect);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], pos2(0.0, 10.0));
        assert_eq!(points[1], pos2(50.0, 0.0));
        assert_eq!(points[2], pos2(100.0, 5.0));
    }

    #[test]
    fn flat_or_short_series() {
        let rect = Rect::from_min_size(pos2(0.0, 0.0), Vec2::new(10.0, 10.0));
        assert!(sparkline_points(&[6.0], rect).is_empty());
        let flat = sparkline_points(&[6.0, 6.0], rect);
        assert!(flat.iter().all(|p| p.y == 10.0));
    }
}
