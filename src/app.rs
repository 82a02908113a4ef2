use std::collections::HashMap;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use eframe::egui;
use egui::{Color32, ColorImage, Pos2, Rect, Sense, Stroke, TextureHandle, TextureOptions, Vec2};

use drawtask::api::HttpExperimentApi;
use drawtask::base::{BaseTask, Phase};
use drawtask::canvas::{DrawCanvas, StimulusImage, TrialCanvas};
use drawtask::config::{ImageData, TaskConfig, TaskSettings};
use drawtask::preload::ThreadedPreloader;
use drawtask::session::{GENERIC_ERROR_HTML, NetworkSession, SessionError, SessionPage};
use drawtask::task::DrawTask;
use drawtask::{log_err, log_info};

type HttpSession = NetworkSession<HttpExperimentApi>;
type SessionJob = JoinHandle<(HttpSession, Result<(), SessionError>)>;

const SURVEY_RADIOS: &[(&str, &str, &[&str])] = &[
    ("survey_radio_handed", "Which hand do you write with?", &["left", "right", "both"]),
    ("survey_radio_use_hand", "Which hand did you draw with?", &["left", "right"]),
    (
        "survey_radio_device",
        "What did you draw with?",
        &["mouse", "trackpad", "tablet", "touchscreen"],
    ),
];

const SURVEY_TEXTS: &[(&str, &str)] = &[
    ("survey_txt_native_lang", "Native language"),
    ("survey_txt_country", "Country"),
];

enum Mode {
    Standalone(Box<DrawTask>),
    Network {
        session: Option<HttpSession>,
        job: Option<SessionJob>,
        /// The worker died mid-step; the session is gone.
        worker_failed: bool,
    },
}

pub struct DrawTaskApp {
    mode: Mode,
    /// Stimulus textures keyed by image source, pruned after every session step.
    textures: HashMap<String, TextureHandle>,
    results_dir: Option<PathBuf>,
    results_written: bool,
}

impl DrawTaskApp {
    /// Standalone task: validate the image lists and start preloading.
    pub fn standalone(
        settings: &TaskSettings,
        config: &TaskConfig,
        data: ImageData,
        with_survey: bool,
    ) -> Self {
        let mut task = DrawTask::standard(config);
        if with_survey {
            task.base_mut().flags_mut().skip_survey = false;
        }
        let worker = task.base().worker_id.clone().unwrap_or_else(|| "anon".to_string());
        drawtask::logger::set_context(Some(format!("{} {}", worker, task.base().condition())));
        let mut preloader = ThreadedPreloader::new(settings.asset_root.clone());
        if let Err(e) = task.load_images(data, &mut preloader) {
            log_err!("Task setup failed: {}", e);
            let messages = task.base_mut().messages_mut();
            if messages.error.is_none() {
                messages.error = Some(e.to_string());
            }
        }
        Self {
            mode: Mode::Standalone(Box::new(task)),
            textures: HashMap::new(),
            results_dir: settings.results_dir.clone(),
            results_written: false,
        }
    }

    /// Networked session; the first node is requested on a worker thread.
    pub fn network(
        settings: &TaskSettings,
        api: HttpExperimentApi,
        participant: &str,
    ) -> Self {
        let session =
            NetworkSession::new(api, participant).with_render_delay(settings.render_delay());
        let job = thread::spawn(move || {
            let mut session = session;
            let result = session.create_agent();
            (session, result)
        });
        Self {
            mode: Mode::Network {
                session: None,
                job: Some(job),
                worker_failed: false,
            },
            textures: HashMap::new(),
            results_dir: settings.results_dir.clone(),
            results_written: false,
        }
    }
}

impl eframe::App for DrawTaskApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let textures = &mut self.textures;
        match &mut self.mode {
            Mode::Standalone(task) => {
                if task.poll_preloader() {
                    ctx.request_repaint();
                }
                if task.is_loading() {
                    ctx.request_repaint_after(std::time::Duration::from_millis(50));
                }
                if task.base().phase() == Phase::Finished
                    && !self.results_written
                    && let Some(dir) = &self.results_dir
                {
                    self.results_written = true;
                    if let Err(e) = task.base().write_results(dir) {
                        log_err!("Could not write results to {}: {}", dir.display(), e);
                    }
                }
                standalone_ui(ctx, task, textures);
            }
            Mode::Network {
                session,
                job,
                worker_failed,
            } => {
                match join_finished(job) {
                    Some(Ok((s, result))) => {
                        if let Err(e) = result {
                            log_err!("Session step failed: {}", e);
                        }
                        let keep: Vec<&str> =
                            s.canvases().iter().map(|c| c.target.src.as_str()).collect();
                        prune_textures(textures, &keep);
                        *session = Some(s);
                    }
                    Some(Err(_)) => {
                        log_err!("Session worker panicked");
                        textures.clear();
                        *worker_failed = true;
                    }
                    None => {}
                }
                if job.is_some() {
                    ctx.request_repaint_after(std::time::Duration::from_millis(50));
                }
                if *worker_failed {
                    egui::CentralPanel::default().show(ctx, |ui| {
                        ui.label(strip_tags(GENERIC_ERROR_HTML));
                    });
                } else {
                    network_ui(ctx, session, job, textures);
                }
            }
        }
    }
}

// ============================================================================
// STANDALONE TASK
// ============================================================================

fn standalone_ui(
    ctx: &egui::Context,
    task: &mut DrawTask,
    textures: &mut HashMap<String, TextureHandle>,
) {
    let alert = task.base().messages().alert.clone();
    if let Some(msg) = &alert {
        egui::Window::new("Notice")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(msg);
                if ui.button("OK").clicked() {
                    task.base_mut().dismiss_alert();
                }
            });
    }

    egui::CentralPanel::default().show(ctx, |ui| {
        ui.add_enabled_ui(alert.is_none(), |ui| {
            if let Some(err) = &task.base().messages().error {
                ui.colored_label(Color32::from_rgb(180, 30, 30), err.as_str());
                return;
            }
            match task.base().phase() {
                Phase::Loading => loading_ui(ui, task),
                Phase::Instructions => instructions_ui(ui, task, textures),
                Phase::Main => trials_ui(ui, task, textures),
                Phase::Survey => survey_ui(ui, task),
                Phase::Finished => finished_ui(ui, task),
            }
        });
    });
}

fn loading_ui(ui: &mut egui::Ui, task: &DrawTask) {
    ui.heading("Loading images");
    let pct = task.display().percent_loaded.unwrap_or(0);
    ui.add(egui::ProgressBar::new(pct as f32 / 100.0).text(format!("{}%", pct)));
}

fn instructions_ui(
    ui: &mut egui::Ui,
    task: &mut DrawTask,
    textures: &mut HashMap<String, TextureHandle>,
) {
    let n = task.display().ntrials_label.unwrap_or(0);
    ui.heading("Instructions");
    ui.label(format!(
        "You will be shown {} characters. Copy each one as accurately as you can by \
         drawing in the box next to it. Try it out below.",
        n
    ));
    ui.add_space(8.0);
    if let Some(demo) = task.demo_mut() {
        canvas_ui(ui, demo, textures);
    }
    ui.add_space(8.0);
    if task.display().continue_visible && ui.button("Start").clicked() {
        log_info!("Main experiment started ({} trials)", task.num_trials());
        task.start_main_exp();
    }
}

fn trials_ui(
    ui: &mut egui::Ui,
    task: &mut DrawTask,
    textures: &mut HashMap<String, TextureHandle>,
) {
    egui::ScrollArea::vertical().show(ui, |ui| {
        for (i, canvas) in task.canvases_mut().iter_mut().enumerate() {
            ui.label(format!("Character {}", i + 1));
            canvas_ui(ui, canvas, textures);
            ui.separator();
        }
        if ui.button("Finished").clicked()
            && let Err(e) = task.finished_drawing()
        {
            log_err!("Printing results failed: {}", e);
        }
    });
}

fn survey_ui(ui: &mut egui::Ui, task: &mut DrawTask) {
    ui.heading("A few questions");
    let survey = task.base_mut().survey_mut();
    for (key, question, options) in SURVEY_RADIOS {
        ui.label(*question);
        ui.horizontal(|ui| {
            let current = survey.get(*key).cloned().unwrap_or_default();
            for option in options.iter() {
                if ui.radio(current == *option, *option).clicked() {
                    survey.insert(key.to_string(), option.to_string());
                }
            }
        });
    }
    for (key, label) in SURVEY_TEXTS {
        ui.horizontal(|ui| {
            ui.label(*label);
            ui.text_edit_singleline(survey.entry(key.to_string()).or_default());
        });
    }
    if ui.button("Submit").clicked()
        && let Err(e) = task.submit_survey()
    {
        log_err!("Printing results failed: {}", e);
    }
}

fn finished_ui(ui: &mut egui::Ui, task: &DrawTask) {
    ui.heading("Thank you!");
    ui.label("Your drawings have been recorded.");
    if let Some(form) = &task.base().messages().form_text {
        egui::ScrollArea::vertical().max_height(300.0).show(ui, |ui| {
            let mut text = form.as_str();
            ui.add(egui::TextEdit::multiline(&mut text).code_editor().desired_width(f32::INFINITY));
        });
    }
}

// ============================================================================
// NETWORKED SESSION
// ============================================================================

fn network_ui(
    ctx: &egui::Context,
    session: &mut Option<HttpSession>,
    job: &mut Option<SessionJob>,
    textures: &mut HashMap<String, TextureHandle>,
) {
    egui::CentralPanel::default().show(ctx, |ui| {
        let Some(s) = session.as_mut() else {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label("Contacting the experiment server...");
            });
            return;
        };
        match s.page().clone() {
            SessionPage::Replaced(html) => {
                ui.label(strip_tags(&html));
            }
            SessionPage::Questionnaire => {
                ui.heading("Questionnaire");
                ui.label("Thank you for taking part. Please complete the closing questionnaire.");
            }
            SessionPage::Drawing => {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    for canvas in s.canvases_mut() {
                        canvas_ui(ui, canvas, textures);
                        ui.separator();
                    }
                });
                let control = s.submit_control().clone();
                if ui
                    .add_enabled(control.enabled, egui::Button::new(control.label))
                    .clicked()
                    && let Some(mut owned) = session.take()
                {
                    *job = Some(thread::spawn(move || {
                        let result = owned.submit_response();
                        (owned, result)
                    }));
                }
            }
        }
    });
}

/// Result of a finished worker, leaving a running one in place.
fn join_finished<T>(job: &mut Option<JoinHandle<T>>) -> Option<thread::Result<T>> {
    if job.as_ref().is_some_and(|j| j.is_finished()) {
        job.take().map(JoinHandle::join)
    } else {
        None
    }
}

/// Drop textures whose source no longer backs a canvas.
fn prune_textures<T>(textures: &mut HashMap<String, T>, keep: &[&str]) {
    textures.retain(|src, _| keep.contains(&src.as_str()));
}

/// Plain-text rendering of a server error page.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// CANVAS WIDGET
// ============================================================================

fn texture_for<'a>(
    ui: &egui::Ui,
    textures: &'a mut HashMap<String, TextureHandle>,
    image: &StimulusImage,
) -> &'a TextureHandle {
    textures.entry(image.src.clone()).or_insert_with(|| {
        let size = [image.width() as usize, image.height() as usize];
        let color = ColorImage::from_rgba_unmultiplied(size, image.pixels.as_raw());
        ui.ctx().load_texture(image.src.clone(), color, TextureOptions::LINEAR)
    })
}

fn paint_image(
    ui: &mut egui::Ui,
    textures: &mut HashMap<String, TextureHandle>,
    image: &StimulusImage,
    rect: Rect,
) {
    let texture = texture_for(ui, textures, image);
    let uv = Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0));
    ui.painter().image(texture.id(), rect, uv, Color32::WHITE);
    if image.bordered {
        ui.painter().rect_stroke(rect, 0.0, Stroke::new(1.0, Color32::DARK_GRAY));
    }
}

/// Target image beside a drawing surface, with the completion image (if
/// any) on its configured side.
fn canvas_ui(
    ui: &mut egui::Ui,
    canvas: &mut DrawCanvas,
    textures: &mut HashMap<String, TextureHandle>,
) {
    ui.horizontal(|ui| {
        let target = canvas.target.clone();
        let (target_rect, _) = ui.allocate_exact_size(
            Vec2::new(target.width() as f32, target.height() as f32),
            Sense::hover(),
        );
        paint_image(ui, textures, &target, target_rect);
        ui.add_space(16.0);

        let surface = (canvas.width as f32, canvas.height as f32);
        match (canvas.completion.clone(), canvas.side) {
            (Some(completion), Some(side)) => {
                let image = (completion.width() as f32, completion.height() as f32);
                let layout = side.arrange(image, surface);
                let total = Vec2::new(layout.total.0, layout.total.1);
                let (area, _) = ui.allocate_exact_size(total, Sense::hover());
                let image_rect = Rect::from_min_size(
                    area.min + Vec2::new(layout.image_offset.0, layout.image_offset.1),
                    Vec2::new(image.0, image.1),
                );
                paint_image(ui, textures, &completion, image_rect);
                let surface_rect = Rect::from_min_size(
                    area.min + Vec2::new(layout.surface_offset.0, layout.surface_offset.1),
                    Vec2::new(surface.0, surface.1),
                );
                let id = ui.id().with(canvas.id());
                let response = ui.interact(surface_rect, id, Sense::click_and_drag());
                surface_ui(ui, canvas, surface_rect, &response);
            }
            _ => {
                let size = Vec2::new(surface.0, surface.1);
                let (surface_rect, response) =
                    ui.allocate_exact_size(size, Sense::click_and_drag());
                surface_ui(ui, canvas, surface_rect, &response);
            }
        }

        ui.vertical(|ui| {
            if ui.small_button("Undo").clicked() {
                canvas.undo();
            }
            if ui.small_button("Clear").clicked() {
                canvas.clear();
            }
        });
    });
}

fn surface_ui(
    ui: &mut egui::Ui,
    canvas: &mut DrawCanvas,
    rect: Rect,
    response: &egui::Response,
) {
    let local = |p: Pos2| (p.x - rect.min.x, p.y - rect.min.y);

    if response.drag_started()
        && let Some(pos) = response.interact_pointer_pos()
    {
        let (x, y) = local(pos);
        canvas.begin_stroke(x, y);
    } else if response.dragged()
        && let Some(pos) = response.interact_pointer_pos()
    {
        let (x, y) = local(pos);
        canvas.extend_stroke(x, y);
    }
    if response.drag_released() {
        canvas.end_stroke();
    }
    if response.clicked()
        && !canvas.is_drawing()
        && let Some(pos) = response.interact_pointer_pos()
    {
        let (x, y) = local(pos);
        canvas.begin_stroke(x, y);
        canvas.end_stroke();
    }

    let painter = ui.painter_at(rect);
    painter.rect_filled(rect, 0.0, Color32::WHITE);
    painter.rect_stroke(rect, 0.0, Stroke::new(1.0, Color32::GRAY));
    let pen = Stroke::new(canvas.pen_width, Color32::BLACK);
    for stroke in canvas.strokes() {
        let points: Vec<Pos2> = stroke
            .points
            .iter()
            .map(|p| rect.min + Vec2::new(p[0], p[1]))
            .collect();
        match points.as_slice() {
            [] => {}
            [p] => painter.circle_filled(*p, canvas.pen_width * 0.5, Color32::BLACK),
            _ => {
                painter.add(egui::Shape::line(points, pen));
            }
        }
    }
    if canvas.is_empty() {
        painter.text(
            rect.center(),
            egui::Align2::CENTER_CENTER,
            "draw here",
            egui::FontId::proportional(12.0),
            Color32::LIGHT_GRAY,
        );
    }
}
