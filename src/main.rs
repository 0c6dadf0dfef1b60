#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use fishgrid::{
    midi::MidiMirror, AudioState, CellFlags, Config, Engine, GridSurface, Sequencer,
    SequencerSettings,
};

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    env_logger::init();
    let config = Config::load();
    log::info!("starting at {} BPM", config.bpm);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([720.0, 760.0])
            .with_title("FISHGRID - Step Sequencer"),
        ..Default::default()
    };

    eframe::run_native(
        "FISHGRID",
        options,
        Box::new(move |_cc| Ok(Box::new(FishGridApp::new(config)))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    eprintln!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

#[cfg(feature = "gui")]
struct FishGridApp {
    sequencer: Sequencer<Engine, GridSurface>,

    // UI state
    available_midi_ports: Vec<String>,
    selected_port: Option<usize>,
}

#[cfg(feature = "gui")]
impl FishGridApp {
    fn new(config: Config) -> Self {
        let available_midi_ports = MidiMirror::available_ports();
        let engine = Engine::new(&config);
        let selected_port = engine
            .midi()
            .port_name()
            .and_then(|name| available_midi_ports.iter().position(|port| port == name));

        Self {
            sequencer: Sequencer::new(
                SequencerSettings::from(&config),
                engine,
                GridSurface::new(config.feedback),
            ),
            available_midi_ports,
            selected_port,
        }
    }

    fn cell_color(flags: CellFlags) -> egui::Color32 {
        if flags.contains(CellFlags::FEEDBACK) {
            egui::Color32::from_rgb(255, 200, 80)
        } else if flags.contains(CellFlags::ACTIVE | CellFlags::HIGHLIGHT) {
            egui::Color32::from_rgb(120, 220, 255)
        } else if flags.contains(CellFlags::ACTIVE) {
            egui::Color32::from_rgb(40, 110, 220)
        } else if flags.contains(CellFlags::HIGHLIGHT) {
            egui::Color32::from_rgb(60, 90, 70)
        } else {
            egui::Color32::from_rgb(30, 40, 50)
        }
    }

    fn audio_status(&self) -> &'static str {
        match self.sequencer.audio_state() {
            AudioState::Locked => "Audio locked - press Start or click a fish",
            AudioState::Unlocking => "Unlocking audio...",
            AudioState::Ready => "Audio ready",
        }
    }
}

#[cfg(feature = "gui")]
impl eframe::App for FishGridApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = std::time::Instant::now();
        self.sequencer.pump();
        self.sequencer.view_mut().expire_feedback(now);

        // Ticks and the unlock arrive off the UI thread; feedback only needs
        // a redraw when it runs out.
        if self.sequencer.is_playing() || self.sequencer.audio_state() == AudioState::Unlocking {
            ctx.request_repaint();
        } else if let Some(expiry) = self.sequencer.view().next_expiry() {
            ctx.request_repaint_after(expiry.saturating_duration_since(now));
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("FISHGRID - Step Sequencer");
            ui.add_space(10.0);

            // MIDI Port Selection
            let mut selected_port_changed = None;
            ui.horizontal(|ui| {
                ui.label("MIDI Mirror:");
                if self.available_midi_ports.is_empty() {
                    ui.label("No MIDI ports available");
                } else {
                    egui::ComboBox::from_label("")
                        .selected_text(
                            self.selected_port
                                .and_then(|i| self.available_midi_ports.get(i))
                                .map(String::as_str)
                                .unwrap_or("Select port..."),
                        )
                        .show_ui(ui, |ui| {
                            for (i, port_name) in self.available_midi_ports.iter().enumerate() {
                                if ui
                                    .selectable_label(self.selected_port == Some(i), port_name)
                                    .clicked()
                                {
                                    selected_port_changed = Some(i);
                                }
                            }
                        });
                }
            });

            if let Some(port_idx) = selected_port_changed {
                match self.sequencer.playback_mut().midi_mut().connect(port_idx) {
                    Ok(()) => self.selected_port = Some(port_idx),
                    Err(err) => log::warn!("{err}"),
                }
            }

            ui.add_space(10.0);

            // Transport controls
            ui.horizontal(|ui| {
                let view = self.sequencer.view();
                let mut start = egui::Button::new(view.start_label()).min_size(egui::vec2(140.0, 32.0));
                if view.start_button_flashing() {
                    start = start.fill(egui::Color32::from_rgb(255, 200, 80));
                }
                if ui.add(start).clicked() {
                    self.sequencer.toggle_sequence();
                }

                if ui
                    .add(egui::Button::new("Clear").min_size(egui::vec2(80.0, 32.0)))
                    .clicked()
                {
                    self.sequencer.clear_all();
                }

                ui.add_space(20.0);
                ui.label(format!("BPM: {}", self.sequencer.playback().bpm()));
                ui.add_space(20.0);
                ui.label(self.audio_status());
                ui.label(format!("Voices: {}", self.sequencer.playback().active_voices()));
            });

            ui.add_space(20.0);

            egui::Grid::new("fish_grid")
                .spacing([6.0, 6.0])
                .show(ui, |ui| {
                    for row in 0..fishgrid::sequencer::ROWS {
                        ui.label(self.sequencer.pitch(row).to_string());
                        for col in 0..fishgrid::sequencer::COLS {
                            let flags = self.sequencer.view().flags(row, col);
                            let button = egui::Button::new("🐠")
                                .min_size(egui::vec2(64.0, 64.0))
                                .fill(Self::cell_color(flags));

                            if ui.add(button).clicked() {
                                self.sequencer.click_cell(row, col);
                            }
                        }
                        ui.end_row();
                    }
                });

            // Info
            ui.separator();
            ui.label("Click a fish to toggle it; active fish play when the playhead passes");
            if !self.sequencer.playback().midi().is_connected() {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    "No MIDI output connected - audio playback only",
                );
            }
        });
    }
}
