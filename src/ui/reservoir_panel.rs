use eframe::egui::{self, ComboBox, DragValue, Id, Modal, RichText, Ui, Vec2};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::common::{connection_badge, create_frame, sparkline, UiColors};
use crate::mqtt::ConnectionState;
use crate::persistence::Preferences;
use crate::reservoir::telemetry::{EC, PH};
use crate::reservoir::{ControllerError, DoserLabels, ReservoirController};

const REPAINT_INTERVAL: Duration = Duration::from_millis(100);
const PLOT_SIZE: Vec2 = Vec2::new(240.0, 48.0);

#[derive(Clone, Copy, Debug, PartialEq)]
enum Calibration {
    Ph,
    Ec,
}

/// The reservoir control window.
///
/// Drains the controller once per frame and renders straight from its
/// accessors; the only state kept here is widget input.
pub struct ReservoirPanel {
    controller: ReservoirController,
    preferences: Arc<Mutex<Preferences>>,
    doser_id: u32,
    dose_amount: f64,
    calibration_ph: f64,
    calibration_ec: f64,
    confirm: Option<Calibration>,
    label_drafts: Vec<(u32, String)>,
    action_error: Option<String>,
}

impl ReservoirPanel {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        mut controller: ReservoirController,
        preferences: Arc<Mutex<Preferences>>,
    ) -> Self {
        cc.egui_ctx.set_theme(egui::Theme::Dark);
        controller.replace_doser_labels(preferences.lock().doser_labels.clone());

        Self {
            controller,
            preferences,
            doser_id: 0,
            dose_amount: 1.0,
            calibration_ph: 7.0,
            calibration_ec: 1.41,
            confirm: None,
            label_drafts: Vec::new(),
            action_error: None,
        }
    }

    fn act(&mut self, what: &str, result: Result<(), ControllerError>) {
        match result {
            Ok(()) => self.action_error = None,
            Err(e) => {
                error!("{} failed: {}", what, e);
                self.action_error = Some(format!("{} failed: {}", what, e));
            }
        }
    }

    fn doser_ids(&self) -> Vec<u32> {
        match self.controller.doser_count() {
            Some(count) => (0..count).collect(),
            None => self.controller.doser_labels().iter().map(|(id, _)| id).collect(),
        }
    }

    fn status_row(&mut self, ui: &mut Ui) {
        let state = self.controller.connection_state();
        ui.horizontal(|ui| {
            ui.heading("Reservoir Controller");
            connection_badge(ui, state);
        });

        if state == ConnectionState::Fatal {
            let detail = self
                .controller
                .session_failure()
                .map(|f| {
                    format!(
                        "Gave up after {} attempts: {}",
                        f.failed_attempts, f.last_error
                    )
                })
                .unwrap_or_else(|| "Connection failed".to_string());
            ui.colored_label(UiColors::INACTIVE, detail);
        }
    }

    fn telemetry_section(&mut self, ui: &mut Ui, compact: bool) {
        ui.separator();
        ui.label(RichText::new("Status").strong());

        for (name, metric) in [("pH", PH), ("EC", EC)] {
            let Some(latest) = self.controller.latest(metric) else {
                continue;
            };
            ui.horizontal(|ui| {
                ui.label(format!("{} [{:.2}]", name, latest));
                if !compact {
                    sparkline(ui, &self.controller.history(metric), PLOT_SIZE);
                    if let Some((lo, hi)) = self.controller.telemetry().range(metric) {
                        ui.weak(format!("{:.2} .. {:.2}", lo, hi));
                    }
                }
            });
        }

        ui.label(format!(
            "Liquid level: {}",
            self.controller.liquid_level().unwrap_or("unknown")
        ));
    }

    fn rpc_section(&mut self, ui: &mut Ui) {
        ui.separator();
        ui.label(RichText::new("RPC interface").strong());

        let valve_open = self.controller.valve_open().unwrap_or(false);
        let valve_text = if valve_open { "Close valve" } else { "Open valve" };
        if ui.button(valve_text).clicked() {
            let result = if valve_open {
                self.controller.close_valve()
            } else {
                self.controller.open_valve()
            };
            self.act("Valve command", result);
        }

        ui.horizontal(|ui| {
            let ids = self.doser_ids();
            if ids.is_empty() {
                ui.label("Doser");
                ui.add(DragValue::new(&mut self.doser_id).range(0..=31));
            } else {
                let labels = self.controller.doser_labels();
                let entries: Vec<(u32, String)> =
                    ids.iter().map(|id| (*id, labels.display_name(*id))).collect();
                ComboBox::from_id_salt("doser")
                    .selected_text(labels.display_name(self.doser_id))
                    .show_ui(ui, |ui| {
                        for (id, name) in entries {
                            ui.selectable_value(&mut self.doser_id, id, name);
                        }
                    });
            }
            ui.add(
                DragValue::new(&mut self.dose_amount)
                    .range(0.1..=500.0)
                    .speed(0.1)
                    .suffix(" ml"),
            );
            if ui.button("Dose").clicked() {
                let result = self.controller.dose(self.doser_id, self.dose_amount);
                self.act("Dose", result);
            }
        });

        if ui.button("Reset dosers").clicked() {
            let result = self.controller.reset_dosers();
            self.act("Reset dosers", result);
        }

        ui.horizontal(|ui| {
            ui.add(
                DragValue::new(&mut self.calibration_ph)
                    .range(0.0..=14.0)
                    .speed(0.01),
            );
            if ui.button("Calibrate pH sensor").clicked() {
                self.confirm = Some(Calibration::Ph);
            }
        });
        ui.horizontal(|ui| {
            ui.add(
                DragValue::new(&mut self.calibration_ec)
                    .range(0.0..=20.0)
                    .speed(0.01),
            );
            if ui.button("Calibrate EC sensor").clicked() {
                self.confirm = Some(Calibration::Ec);
            }
        });

        ui.horizontal(|ui| {
            let count = self
                .controller
                .doser_count()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ui.label(format!("Dosers count: {}", count));
            if ui.button("Get dosers count").clicked() {
                let result = self.controller.query_doser_count().map(|_| ());
                self.act("Doser count query", result);
            }
        });

        if let Some(reported) = self.controller.peek_fresh_error() {
            ui.colored_label(
                UiColors::INACTIVE,
                format!(
                    "Error {{ code: {}, message: {} }}",
                    reported.code, reported.message
                ),
            );
        }
    }

    fn calibration_modal(&mut self, ctx: &egui::Context) {
        let Some(calibration) = self.confirm else {
            return;
        };
        let (name, value) = match calibration {
            Calibration::Ph => ("PH", self.calibration_ph),
            Calibration::Ec => ("EC", self.calibration_ec),
        };

        let mut confirmed = false;
        let mut declined = false;
        let modal = Modal::new(Id::new("calibration_confirm")).show(ctx, |ui| {
            ui.set_width(260.0);
            ui.label(format!(
                "Is your {} probe in {:.2} calibration solution?",
                name, value
            ));
            ui.separator();
            egui::Sides::new().show(
                ui,
                |left| {
                    if left.button("Yes").clicked() {
                        confirmed = true;
                    }
                },
                |right| {
                    if right.button("No").clicked() {
                        declined = true;
                    }
                },
            );
        });

        let choice = if confirmed {
            Some(true)
        } else if declined || modal.should_close() {
            Some(false)
        } else {
            None
        };

        match choice {
            Some(true) => {
                self.confirm = None;
                let result = match calibration {
                    Calibration::Ph => self.controller.calibrate_ph(value),
                    Calibration::Ec => self.controller.calibrate_ec(value),
                };
                self.act("Calibration", result);
            }
            Some(false) => self.confirm = None,
            None => {}
        }
    }

    fn preferences_section(&mut self, ui: &mut Ui) {
        ui.separator();
        let mut compact = self.preferences.lock().compact_view;
        if ui.checkbox(&mut compact, "Compact view").changed() {
            self.preferences.lock().compact_view = compact;
        }

        let header = egui::CollapsingHeader::new("Doser labels").show(ui, |ui| {
            for (id, label) in self.label_drafts.iter_mut() {
                ui.horizontal(|ui| {
                    ui.label(format!("#{}", id));
                    ui.text_edit_singleline(label);
                });
            }
            if ui.button("Save labels").clicked() {
                let labels: DoserLabels = self
                    .label_drafts
                    .iter()
                    .filter(|(_, label)| !label.trim().is_empty())
                    .map(|(id, label)| (*id, label.trim().to_string()))
                    .collect();
                info!("Updating {} doser labels", labels.len());
                self.preferences.lock().doser_labels = labels.clone();
                self.controller.replace_doser_labels(labels);
            }
        });

        // refresh drafts while the section is closed so reopening shows current labels
        if header.body_returned.is_none() {
            self.label_drafts = self
                .doser_ids()
                .into_iter()
                .map(|id| {
                    let label = self.controller.doser_labels().get(id).unwrap_or("");
                    (id, label.to_string())
                })
                .collect();
        }
    }
}

impl eframe::App for ReservoirPanel {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.controller.drain_and_route();
        let compact = self.preferences.lock().compact_view;

        egui::CentralPanel::default().show(ctx, |ui| {
            create_frame(UiColors::MAIN_BG).show(ui, |ui| {
                self.status_row(ui);

                if self.controller.is_connected() {
                    self.telemetry_section(ui, compact);
                    self.rpc_section(ui);
                } else {
                    ui.label("Not Connected");
                }

                if let Some(message) = &self.action_error {
                    ui.colored_label(UiColors::INACTIVE, message);
                }

                self.preferences_section(ui);
            });
        });

        self.calibration_modal(ctx);
        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}

impl Drop for ReservoirPanel {
    fn drop(&mut self) {
        self.controller.shutdown();
    }
}
