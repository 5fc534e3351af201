use eframe::egui::{
    self, Align, Color32, FontId, Frame, Key, Layout, Margin, RichText, ScrollArea, Sense, Stroke,
    Vec2,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};

use super::command::Command;
use crate::browser::FileBrowser;
use crate::engine::{Registers, SessionState};
use crate::state::{DebuggerEvent, DebuggerState, ProgramState, StateEvent, UiEvent};

// ─── Palette ──────────────────────────────────────────────────────────────────

const BG_APP: Color32 = Color32::from_rgb(0x11, 0x11, 0x11);
const BG_TOPBAR: Color32 = Color32::from_rgb(0x1a, 0x1a, 0x1a);
const BG_PANEL: Color32 = Color32::from_rgb(0x14, 0x14, 0x14);
const BG_CONSOLE: Color32 = Color32::from_rgb(0x0f, 0x0f, 0x0f);
const BG_HOVER: Color32 = Color32::from_rgb(0x22, 0x22, 0x22);
const BG_LINE_HL: Color32 = Color32::from_rgb(0x18, 0x2b, 0x18);
const BG_LINE_ERR: Color32 = Color32::from_rgb(0x2b, 0x16, 0x16);
const SEP_COLOR: Color32 = Color32::from_rgb(0x28, 0x28, 0x28);

const ACCENT: Color32 = Color32::from_rgb(0x00, 0xcc, 0x44);
const RED: Color32 = Color32::from_rgb(0xcc, 0x44, 0x44);
const BLUE: Color32 = Color32::from_rgb(0x44, 0x88, 0xcc);

const TXT: Color32 = Color32::from_rgb(0xb0, 0xc4, 0xb0);
const TXT_DIM: Color32 = Color32::from_rgb(0x44, 0x44, 0x44);
const TXT_MUTED: Color32 = Color32::from_rgb(0x77, 0x77, 0x77);
const TXT_CYAN: Color32 = Color32::from_rgb(0x7e, 0xc8, 0xe3);
const TXT_YELLOW: Color32 = Color32::from_rgb(0xe8, 0xc9, 0x7d);
const TXT_HL: Color32 = Color32::from_rgb(0xd4, 0xf0, 0xd4);

// ─── UI-only tab state ────────────────────────────────────────────────────────

#[derive(Default, PartialEq, Clone, Copy)]
enum BottomTab {
    #[default]
    Output,
    Console,
}

// ─── App ──────────────────────────────────────────────────────────────────────

pub struct App {
    pub state: DebuggerState,
    event_rx: Receiver<DebuggerEvent>,
    cmd_tx: Sender<Command>,

    // UI state
    browser: Option<FileBrowser>,
    console_log: Vec<String>,
    bottom_tab: BottomTab,
    open_session: bool,
    open_registers: bool,

    source_lines: Vec<String>,
    source_file: Option<PathBuf>,
    // Registers from the previous stop, to mark the ones a step changed.
    prev_registers: Option<Registers>,
    scrolled_to: Option<u32>,
}

impl App {
    pub fn new(
        state: DebuggerState,
        root: &Path,
        event_rx: Receiver<DebuggerEvent>,
        cmd_tx: Sender<Command>,
    ) -> Self {
        let mut console_log = Vec::new();
        let browser = match FileBrowser::open(root) {
            Ok(browser) => Some(browser),
            Err(e) => {
                console_log.push(format!("[UI] cannot list {}: {e}", root.display()));
                None
            }
        };

        Self {
            state,
            event_rx,
            cmd_tx,
            browser,
            console_log,
            bottom_tab: BottomTab::Output,
            open_session: true,
            open_registers: true,
            source_lines: Vec::new(),
            source_file: None,
            prev_registers: None,
            scrolled_to: None,
        }
    }

    fn send(&self, cmd: Command) {
        let _ = self.cmd_tx.send(cmd);
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                DebuggerEvent::State(s) => {
                    match &s {
                        StateEvent::SessionUpdated(next) => {
                            if next.registers != self.state.session.registers {
                                self.prev_registers = self.state.session.registers;
                            }
                        }
                        StateEvent::BuildFinished { log } => {
                            self.console_log.push(format!("[BUILD] {}", log.command));
                            for line in log.diagnostics.lines() {
                                self.console_log.push(line.to_owned());
                            }
                            if log.failed {
                                self.bottom_tab = BottomTab::Console;
                            }
                        }
                        _ => {}
                    }
                    self.state.apply(s);
                    self.load_source_if_needed();
                }
                DebuggerEvent::Ui(UiEvent::ConsoleOutput(text)) => {
                    self.console_log.push(text);
                }
                DebuggerEvent::Ui(UiEvent::DebuggerError(err)) => {
                    self.console_log.push(format!("[ERROR] {err}"));
                }
            }
        }
    }

    fn load_source_if_needed(&mut self) {
        let Some(target) = self.state.persistent.source.clone() else {
            self.source_lines.clear();
            self.source_file = None;
            return;
        };
        if self.source_file.as_ref() == Some(&target) {
            return;
        }

        match std::fs::read_to_string(&target) {
            Ok(text) => {
                self.source_lines = text.lines().map(str::to_owned).collect();
                self.console_log.push(format!(
                    "[UI] {} ({} lines)",
                    target.display(),
                    self.source_lines.len()
                ));
            }
            Err(e) => {
                self.console_log
                    .push(format!("[UI] cannot read {}: {e}", target.display()));
                self.source_lines.clear();
            }
        }
        self.source_file = Some(target);
        self.scrolled_to = None;
    }

    fn handle_keys(&self, ctx: &egui::Context) {
        let (run, step, stop) = ctx.input(|i| {
            (
                i.key_pressed(Key::R),
                i.key_pressed(Key::N) || i.key_pressed(Key::S),
                i.key_pressed(Key::Escape),
            )
        });
        if run && self.state.can_start() {
            self.send(Command::Start);
        }
        if step && self.state.can_step() {
            self.send(Command::StepLine);
        }
        if stop {
            self.send(Command::Stop);
        }
    }

    fn status_color(&self) -> Color32 {
        match (&self.state.program, self.state.session.state) {
            (ProgramState::Building, _) => BLUE,
            (ProgramState::BuildFailed, _) => RED,
            (ProgramState::Loaded, SessionState::Stopped) => ACCENT,
            (ProgramState::Loaded, SessionState::Exited) => TXT_YELLOW,
            (ProgramState::Loaded, SessionState::Error) => RED,
            _ => TXT_DIM,
        }
    }
}

// ─── eframe::App ──────────────────────────────────────────────────────────────

impl eframe::App for App {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        apply_theme(ctx);
        self.drain_events();
        self.handle_keys(ctx);

        ctx.request_repaint_after(std::time::Duration::from_millis(50));

        // ── TOP BAR ───────────────────────────────────────────────────────────
        egui::TopBottomPanel::top("top_bar")
            .frame(flat(BG_TOPBAR).inner_margin(Margin {
                left: 8,
                right: 8,
                top: 4,
                bottom: 4,
            }))
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label(m("stepdbg", 13.0, ACCENT).strong());
                    ui.add(egui::Separator::default().vertical());

                    if tbtn(ui, "Run", true, self.state.can_start()).clicked() {
                        self.send(Command::Start);
                    }
                    if tbtn(ui, "Step", false, self.state.can_step()).clicked() {
                        self.send(Command::StepLine);
                    }
                    if tbtn(ui, "Stop", false, self.state.is_loaded()).clicked() {
                        self.send(Command::Stop);
                    }

                    ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                        let (r, _) = ui.allocate_exact_size(Vec2::splat(12.0), Sense::hover());
                        ui.painter().rect_filled(r, 2.0, self.status_color());
                        ui.add_space(6.0);

                        let location = match (&self.source_file, self.state.current_line()) {
                            (Some(file), Some(line)) => {
                                format!("{}:{line}  {}", short_name(file), self.state.state_label())
                            }
                            _ => self.state.state_label().to_owned(),
                        };
                        ui.label(m(&location, 11.0, TXT_MUTED));
                    });
                });
            });

        // ── OUTPUT / CONSOLE (bottom) ─────────────────────────────────────────
        egui::TopBottomPanel::bottom("console")
            .resizable(true)
            .min_height(50.0)
            .default_height(180.0)
            .frame(flat(BG_CONSOLE))
            .show(ctx, |ui| {
                Frame::new()
                    .fill(BG_TOPBAR)
                    .inner_margin(Margin {
                        left: 8,
                        right: 8,
                        top: 0,
                        bottom: 0,
                    })
                    .show(ui, |ui| {
                        ui.horizontal(|ui| {
                            for (label, tab) in
                                [("Output", BottomTab::Output), ("Console", BottomTab::Console)]
                            {
                                if tab_btn(ui, label, self.bottom_tab == tab).clicked() {
                                    self.bottom_tab = tab;
                                }
                            }
                        });
                    });
                hl(ui);

                ScrollArea::vertical()
                    .id_salt("con_log")
                    .stick_to_bottom(true)
                    .auto_shrink([false, false])
                    .show(ui, |ui| {
                        ui.add_space(2.0);
                        match self.bottom_tab {
                            BottomTab::Output => {
                                let session = &self.state.session;
                                if session.output.is_empty() {
                                    ui.label(m("No output", 11.0, TXT_DIM).italics());
                                }
                                for line in session.output.lines() {
                                    ui.horizontal(|ui| {
                                        ui.add_space(6.0);
                                        ui.label(m(line, 11.0, TXT));
                                    });
                                }
                                if session.output_dropped > 0 {
                                    ui.label(m(
                                        &format!("[{} bytes dropped]", session.output_dropped),
                                        11.0,
                                        TXT_YELLOW,
                                    ));
                                }
                            }
                            BottomTab::Console => {
                                for line in &self.console_log {
                                    let color = if line.starts_with("[ERROR]") { RED } else { TXT };
                                    ui.horizontal(|ui| {
                                        ui.add_space(6.0);
                                        ui.label(m(line, 11.0, color));
                                    });
                                }
                            }
                        }
                        ui.add_space(2.0);
                    });
            });

        // ── FILE BROWSER (left) ───────────────────────────────────────────────
        egui::SidePanel::left("files")
            .resizable(true)
            .min_width(160.0)
            .default_width(220.0)
            .frame(flat(BG_PANEL))
            .show(ctx, |ui| {
                let Some(browser) = self.browser.as_mut() else {
                    ui.label(m("No directory", 11.0, TXT_DIM).italics());
                    return;
                };

                ui.horizontal(|ui| {
                    ui.add_space(6.0);
                    ui.label(m(&browser.cwd().display().to_string(), 11.0, TXT_MUTED));
                });
                hl(ui);

                let mut enter: Option<usize> = None;
                let mut debug: Option<PathBuf> = None;
                let mut up = false;

                ScrollArea::vertical().id_salt("browser").show(ui, |ui| {
                    ui.set_min_width(ui.available_width());
                    if row_btn(ui, "..", TXT_MUTED).clicked() {
                        up = true;
                    }
                    let selected = browser.selected().map(|e| e.path.clone());
                    for (idx, entry) in browser.entries().iter().enumerate() {
                        ui.horizontal(|ui| {
                            let (label, color) = if entry.is_dir {
                                (format!("{}/", entry.name), BLUE)
                            } else if selected.as_ref() == Some(&entry.path) {
                                (entry.name.clone(), TXT_HL)
                            } else if entry.is_debuggable() {
                                (entry.name.clone(), TXT_CYAN)
                            } else {
                                (entry.name.clone(), TXT_MUTED)
                            };
                            if row_btn(ui, &label, color).clicked() {
                                enter = Some(idx);
                            }
                            if entry.is_debuggable() {
                                ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                                    if tbtn(ui, "Debug", true, true).clicked() {
                                        debug = Some(entry.path.clone());
                                    }
                                });
                            }
                        });
                    }
                });

                let moved = if up {
                    browser.parent()
                } else if let Some(idx) = enter {
                    browser.activate(idx)
                } else {
                    Ok(())
                };
                if let Err(e) = moved {
                    self.console_log.push(format!("[UI] {e}"));
                }
                if let Some(source) = debug {
                    self.send(Command::Debug { source });
                }
            });

        // ── RIGHT PANEL ───────────────────────────────────────────────────────
        egui::SidePanel::right("right_panel")
            .resizable(true)
            .min_width(180.0)
            .default_width(260.0)
            .frame(flat(BG_PANEL))
            .show(ctx, |ui| {
                ScrollArea::vertical().id_salt("right").show(ui, |ui| {
                    ui.set_min_width(ui.available_width());

                    // SESSION ───────────────────────────────────────────────────
                    sec_hdr(ui, "Session", &mut self.open_session);
                    if self.open_session {
                        let session = &self.state.session;
                        kv(ui, "state", self.state.state_label(), self.status_color());
                        if let Some(exe) = &self.state.persistent.executable {
                            kv(ui, "program", &short_name(exe), TXT_CYAN);
                        }
                        ui.horizontal(|ui| {
                            ui.add_space(8.0);
                            ui.label(m(
                                &line_status(
                                    self.state.current_line(),
                                    self.source_lines.len(),
                                    session.instruction_count,
                                ),
                                11.0,
                                TXT_YELLOW,
                            ));
                        });
                        if let Some(err) = self.state.error_line() {
                            kv(ui, "error", &err, RED);
                        }
                        if let Some(fault) = &session.resolver_fault {
                            kv(ui, "resolver", fault, RED);
                        }
                        ui.add_space(4.0);
                    }
                    hl(ui);

                    // REGISTERS ─────────────────────────────────────────────────
                    sec_hdr(ui, "Registers", &mut self.open_registers);
                    if self.open_registers {
                        match &self.state.session.registers {
                            None => {
                                ui.label(m("Not stopped", 11.0, TXT_DIM).italics());
                            }
                            Some(regs) => {
                                let prev = self.prev_registers.map(|p| p.named());
                                egui::Grid::new("reg_grid")
                                    .num_columns(2)
                                    .spacing([12.0, 1.0])
                                    .striped(true)
                                    .show(ui, |ui| {
                                        for (i, (name, value)) in regs.named().iter().enumerate() {
                                            let changed = prev
                                                .as_ref()
                                                .is_some_and(|p| p[i].1 != *value);
                                            ui.horizontal(|ui| {
                                                ui.add_space(8.0);
                                                ui.label(m(name, 11.0, TXT_CYAN));
                                            });
                                            let col = if changed { TXT_HL } else { TXT_YELLOW };
                                            ui.label(m(&format!("{value:#018x}"), 11.0, col));
                                            ui.end_row();
                                        }
                                    });
                            }
                        }
                        ui.add_space(4.0);
                    }
                    hl(ui);
                });
            });

        // ── SOURCE VIEW (central) ─────────────────────────────────────────────
        egui::CentralPanel::default()
            .frame(flat(BG_APP))
            .show(ctx, |ui| {
                ScrollArea::both().id_salt("source").show(ui, |ui| {
                    if self.source_lines.is_empty() {
                        ui.centered_and_justified(|ui| {
                            ui.label(m("No source file loaded", 13.0, TXT_DIM).italics());
                        });
                        return;
                    }

                    let current_line = self.state.current_line();
                    let faulted = self.state.session.state == SessionState::Error;

                    for (idx, text) in self.source_lines.iter().enumerate() {
                        let number = idx as u32 + 1;
                        let is_current = Some(number) == current_line;
                        let rect = source_row(ui, number, text, is_current, faulted);
                        if is_current && self.scrolled_to != current_line {
                            ui.scroll_to_rect(rect, Some(Align::Center));
                            self.scrolled_to = current_line;
                        }
                    }
                });
            });
    }
}

// ─── Source row ───────────────────────────────────────────────────────────────

fn source_row(
    ui: &mut egui::Ui,
    line_no: u32,
    code: &str,
    is_current: bool,
    faulted: bool,
) -> egui::Rect {
    let (rect, _) = ui.allocate_exact_size(
        Vec2::new(f32::max(ui.available_width(), 900.0), 18.0),
        Sense::hover(),
    );
    let p = ui.painter();
    let cy = rect.center().y;

    if is_current {
        let (fill, edge) = if faulted {
            (BG_LINE_ERR, RED)
        } else {
            (BG_LINE_HL, ACCENT)
        };
        p.rect_filled(rect, 0.0, fill);
        p.line_segment([rect.left_top(), rect.left_bottom()], Stroke::new(2.0, edge));
        p.text(
            egui::pos2(rect.left() + 9.0, cy),
            egui::Align2::CENTER_CENTER,
            "▶",
            FontId::monospace(11.0),
            edge,
        );
    }

    // Line number, right-aligned in a 56 px gutter
    p.text(
        egui::pos2(rect.left() + 56.0, cy),
        egui::Align2::RIGHT_CENTER,
        format!("{line_no}"),
        FontId::monospace(12.0),
        TXT_DIM,
    );

    p.text(
        egui::pos2(rect.left() + 66.0, cy),
        egui::Align2::LEFT_CENTER,
        code,
        FontId::monospace(12.5),
        if is_current { TXT_HL } else { TXT },
    );
    rect
}

// ─── Text helpers ─────────────────────────────────────────────────────────────

fn short_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn line_status(line: Option<u32>, total: usize, steps: u64) -> String {
    match line {
        Some(line) => format!("Line {line} / {total} | Steps {steps}"),
        None => format!("Line - / {total} | Steps {steps}"),
    }
}

// ─── Micro-helpers ────────────────────────────────────────────────────────────

#[inline]
fn m(text: &str, size: f32, color: Color32) -> RichText {
    RichText::new(text)
        .font(FontId::monospace(size))
        .color(color)
}

#[inline]
fn flat(bg: Color32) -> Frame {
    Frame::new().fill(bg)
}

fn tbtn(ui: &mut egui::Ui, label: &str, accent: bool, enabled: bool) -> egui::Response {
    let color = match (enabled, accent) {
        (false, _) => TXT_DIM,
        (true, true) => ACCENT,
        (true, false) => Color32::from_rgb(0xaa, 0xaa, 0xaa),
    };
    ui.add_enabled(
        enabled,
        egui::Button::new(m(label, 12.0, color))
            .fill(if accent && enabled {
                Color32::from_rgb(0x1a, 0x3a, 0x1a)
            } else {
                BG_TOPBAR
            })
            .stroke(Stroke::new(1.0, SEP_COLOR))
            .min_size(Vec2::new(0.0, 22.0)),
    )
}

fn tab_btn(ui: &mut egui::Ui, label: &str, active: bool) -> egui::Response {
    let col = if active {
        Color32::from_rgb(0xe0, 0xe0, 0xe0)
    } else {
        TXT_DIM
    };
    let fill = if active {
        BG_HOVER
    } else {
        Color32::TRANSPARENT
    };
    let resp = ui.add(
        egui::Button::new(m(label, 12.0, col))
            .fill(fill)
            .stroke(Stroke::NONE)
            .min_size(Vec2::new(0.0, 24.0)),
    );
    if active {
        let r = resp.rect;
        ui.painter().line_segment(
            [r.left_bottom(), r.right_bottom()],
            Stroke::new(2.0, ACCENT),
        );
    }
    resp
}

fn row_btn(ui: &mut egui::Ui, label: &str, color: Color32) -> egui::Response {
    ui.add(
        egui::Button::new(m(label, 12.0, color))
            .fill(Color32::TRANSPARENT)
            .stroke(Stroke::NONE)
            .min_size(Vec2::new(0.0, 18.0)),
    )
}

fn kv(ui: &mut egui::Ui, key: &str, value: &str, color: Color32) {
    ui.horizontal(|ui| {
        ui.add_space(8.0);
        ui.label(m(key, 11.0, TXT_DIM));
        ui.label(m(value, 11.0, color));
    });
}

fn sec_hdr(ui: &mut egui::Ui, label: &str, open: &mut bool) {
    let icon = if *open { "▾" } else { "▸" };
    if ui
        .add(
            egui::Button::new(m(
                &format!("{icon}  {label}"),
                12.0,
                Color32::from_rgb(0xcc, 0xcc, 0xcc),
            ))
            .fill(BG_TOPBAR)
            .stroke(Stroke::NONE)
            .min_size(Vec2::new(ui.available_width(), 22.0)),
        )
        .clicked()
    {
        *open = !*open;
    }
}

fn hl(ui: &mut egui::Ui) {
    let y = ui.cursor().top();
    ui.painter()
        .hline(ui.max_rect().x_range(), y, Stroke::new(1.0, SEP_COLOR));
    ui.add_space(1.0);
}

fn apply_theme(ctx: &egui::Context) {
    let mut v = egui::Visuals::dark();
    v.panel_fill = BG_APP;
    v.window_fill = BG_APP;
    v.extreme_bg_color = BG_CONSOLE;
    v.faint_bg_color = BG_TOPBAR;
    v.widgets.noninteractive.bg_fill = BG_TOPBAR;
    v.widgets.noninteractive.bg_stroke = Stroke::new(1.0, SEP_COLOR);
    v.widgets.inactive.bg_fill = BG_TOPBAR;
    v.widgets.hovered.bg_fill = BG_HOVER;
    v.widgets.active.bg_fill = BG_HOVER;
    v.override_text_color = Some(TXT);
    ctx.set_visuals(v);
}
