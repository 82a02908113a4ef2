use std::cell::Cell;
use std::rc::Rc;
use std::sync::mpsc::Sender;

use image::{ImageError, Rgba, RgbaImage};
use rand::SeedableRng;
use rand::rngs::StdRng;

use drawtask::base::{BaseTask, Phase, SuperTask};
use drawtask::canvas::{CanvasFactory, SidePlacement, StimulusImage, TrialCanvas};
use drawtask::config::{ImageData, TaskConfig, UrlParams};
use drawtask::preload::{BlockingPreloader, ImageBatch, ImagePreloader, LoadedImages, PreloadEvent};
use drawtask::targets::target_list;
use drawtask::task::{DrawTask, INCOMPLETE_DRAWINGS_MSG, TaskError};

// ============================================================================
// Fakes
// ============================================================================

/// Records every batch it is asked for and never answers.
#[derive(Default)]
struct RecordingPreloader {
    batches: Vec<ImageBatch>,
}

impl ImagePreloader for RecordingPreloader {
    fn preload(&mut self, batch: ImageBatch, _events: Sender<PreloadEvent>) {
        self.batches.push(batch);
    }
}

/// Answers immediately with blank images named after the requested sources.
struct InstantPreloader;

impl ImagePreloader for InstantPreloader {
    fn preload(&mut self, batch: ImageBatch, events: Sender<PreloadEvent>) {
        let blank = |src: &String| StimulusImage::new(src.clone(), RgbaImage::new(10, 10));
        let images = match batch {
            ImageBatch::Single(t) => LoadedImages {
                targets: t.iter().map(blank).collect(),
                completions: None,
            },
            ImageBatch::Paired(t, c) => LoadedImages {
                targets: t.iter().map(blank).collect(),
                completions: Some(c.iter().map(blank).collect()),
            },
        };
        let _ = events.send(PreloadEvent::Progress(100));
        let _ = events.send(PreloadEvent::Done(images));
    }
}

/// A canvas whose ink is switched from the test through a shared flag.
struct FakeCanvas {
    id: String,
    inked: Rc<Cell<bool>>,
}

impl TrialCanvas for FakeCanvas {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_empty(&self) -> bool {
        !self.inked.get()
    }

    fn get_drawing(&self) -> String {
        if self.inked.get() { "[[[1,1]]]".into() } else { "[]".into() }
    }

    fn get_image(&self) -> Result<String, ImageError> {
        Ok(format!("fake:{}", self.id))
    }
}

#[derive(Default)]
struct FakeFactory {
    flags: std::cell::RefCell<Vec<Rc<Cell<bool>>>>,
}

impl CanvasFactory for FakeFactory {
    type Canvas = FakeCanvas;

    fn create(
        &self,
        id: &str,
        _target: &StimulusImage,
        _completion: Option<(&StimulusImage, SidePlacement)>,
    ) -> FakeCanvas {
        let inked = Rc::new(Cell::new(false));
        self.flags.borrow_mut().push(inked.clone());
        FakeCanvas {
            id: id.to_string(),
            inked,
        }
    }
}

fn config(query: &str) -> TaskConfig {
    TaskConfig {
        url: UrlParams::from_query(query),
        ..TaskConfig::default()
    }
}

fn draw_task(query: &str) -> DrawTask {
    DrawTask::standard(&config(query)).with_rng(StdRng::seed_from_u64(3))
}

fn fake_task(query: &str) -> DrawTask<FakeFactory, SuperTask> {
    let config = config(query);
    let mut rng = StdRng::seed_from_u64(8);
    let base = SuperTask::new(&config, &mut rng);
    DrawTask::new(&config, FakeFactory::default(), base).with_rng(rng)
}

fn names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{}{}", prefix, i)).collect()
}

/// Load `n` images, press continue, and return the task with its canvases up.
fn started_fake_task(n: usize) -> DrawTask<FakeFactory, SuperTask> {
    let mut t = fake_task("");
    t.load_images(ImageData::targets(names("t", n)), &mut InstantPreloader)
        .unwrap();
    t.poll_preloader();
    t.start_main_exp();
    t
}

// ============================================================================
// Image list validation
// ============================================================================

#[test]
fn permutation_keeps_targets_and_completions_paired() {
    let mut t = draw_task("");
    let mut pre = RecordingPreloader::default();
    let data = ImageData {
        targets: names("t", 10),
        completions: Some(names("c", 10)),
        side: Some(SidePlacement::Bottom),
    };
    t.load_images(data, &mut pre).unwrap();

    assert_eq!(pre.batches.len(), 1);
    let ImageBatch::Paired(targets, completions) = &pre.batches[0] else {
        panic!("expected a paired batch");
    };
    assert_eq!(targets.len(), 10);
    for (target, completion) in targets.iter().zip(completions) {
        assert_eq!(target[1..], completion[1..]);
    }
    let perm = t.permutation().unwrap();
    assert_eq!(targets, &perm.apply(&names("t", 10)));
    assert_eq!(t.side(), Some(SidePlacement::Bottom));
}

#[test]
fn completions_without_side_are_rejected() {
    let mut t = draw_task("");
    let mut pre = RecordingPreloader::default();
    let data = ImageData {
        targets: names("t", 3),
        completions: Some(names("c", 3)),
        side: None,
    };
    assert!(matches!(t.load_images(data, &mut pre), Err(TaskError::MissingSide)));
    assert!(pre.batches.is_empty());
    assert_eq!(t.display().ntrials_label, None);
    assert!(t.permutation().is_none());
    assert!(!t.is_loading());
}

#[test]
fn mismatched_lists_are_rejected() {
    let mut t = draw_task("");
    let mut pre = RecordingPreloader::default();
    let data = ImageData {
        targets: names("t", 4),
        completions: Some(names("c", 3)),
        side: Some(SidePlacement::Left),
    };
    assert!(matches!(
        t.load_images(data, &mut pre),
        Err(TaskError::LengthMismatch {
            targets: 4,
            completions: 3
        })
    ));
    assert!(pre.batches.is_empty());
    assert_eq!(t.display().ntrials_label, None);
}

#[test]
fn side_is_ignored_without_completions() {
    let mut t = draw_task("");
    let mut pre = RecordingPreloader::default();
    let data = ImageData {
        targets: names("t", 2),
        completions: None,
        side: Some(SidePlacement::Top),
    };
    t.load_images(data, &mut pre).unwrap();
    assert_eq!(t.side(), None);
    assert!(matches!(pre.batches[0], ImageBatch::Single(_)));
}

// ============================================================================
// ntrials override
// ============================================================================

#[test]
fn ntrials_caps_the_trial_count() {
    let mut t = draw_task("ntrials=5");
    t.load_images(ImageData::targets(target_list(10, 1)), &mut RecordingPreloader::default())
        .unwrap();
    assert_eq!(t.num_trials(), 5);
    assert_eq!(t.display().ntrials_label, Some(5));
}

#[test]
fn ntrials_above_the_image_count_is_an_error() {
    let mut t = draw_task("ntrials=15");
    let mut pre = RecordingPreloader::default();
    let err = t
        .load_images(ImageData::targets(target_list(10, 1)), &mut pre)
        .unwrap_err();
    assert!(matches!(
        err,
        TaskError::TooManyTrials {
            requested: 15,
            available: 10
        }
    ));
    assert_eq!(
        t.base().messages().error.as_deref(),
        Some("URL parameter ntrials: the maximum number of trials is 10")
    );
    assert!(pre.batches.is_empty());
    assert_eq!(t.display().ntrials_label, None);
}

#[test]
fn non_positive_ntrials_means_every_image() {
    for query in ["ntrials=0", "ntrials=-3", "ntrials=abc", ""] {
        let mut t = draw_task(query);
        t.load_images(ImageData::targets(target_list(10, 1)), &mut RecordingPreloader::default())
            .unwrap();
        assert_eq!(t.num_trials(), 10, "query {:?}", query);
    }
}

#[test]
fn only_the_first_ntrials_images_get_canvases() {
    let mut t = draw_task("ntrials=3");
    t.load_images(ImageData::targets(names("t", 6)), &mut InstantPreloader)
        .unwrap();
    t.poll_preloader();
    t.start_main_exp();
    assert_eq!(t.canvases().len(), 3);
    let perm = t.permutation().unwrap();
    let expected = perm.apply(&names("t", 6));
    for (canvas, src) in t.canvases().iter().zip(&expected) {
        assert_eq!(&canvas.target.src, src);
    }
}

// ============================================================================
// Finishing
// ============================================================================

#[test]
fn zero_canvases_count_as_full() {
    let t = started_fake_task(0);
    assert!(t.canvases().is_empty());
    assert!(t.check_full_canvases());
}

#[test]
fn one_canvas_needs_ink() {
    let t = started_fake_task(1);
    assert!(!t.check_full_canvases());
    t.canvases()[0].inked.set(true);
    assert!(t.check_full_canvases());
}

#[test]
fn any_empty_canvas_blocks_finishing() {
    let mut t = started_fake_task(3);
    assert!(!t.check_full_canvases());

    t.canvases()[0].inked.set(true);
    t.canvases()[2].inked.set(true);
    assert!(!t.finished_drawing().unwrap());
    assert_eq!(t.base().messages().alert.as_deref(), Some(INCOMPLETE_DRAWINGS_MSG));
    assert_eq!(t.base().phase(), Phase::Main);

    t.base_mut().dismiss_alert();
    t.canvases()[1].inked.set(true);
    assert!(t.finished_drawing().unwrap());
    assert_eq!(t.base().phase(), Phase::Finished);

    let form = t.base().form().unwrap();
    for id in ["0", "1", "2"] {
        assert!(form.contains(&format!("\"image\":\"fake:{}\"", id)));
    }
}

#[test]
fn check_full_canvases_does_not_touch_the_page() {
    let t = started_fake_task(2);
    let before = t.base().messages().clone();
    t.check_full_canvases();
    assert_eq!(t.base().messages(), &before);
    assert_eq!(t.base().phase(), Phase::Main);
}

// ============================================================================
// End to end
// ============================================================================

#[test]
fn full_run_from_png_files() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("characters")).unwrap();
    let targets = target_list(4, 1);
    for name in &targets {
        RgbaImage::from_pixel(30, 20, Rgba([0, 0, 0, 255]))
            .save(root.path().join(name))
            .unwrap();
    }

    let mut t = draw_task("workerId=W9");
    t.load_images(
        ImageData::targets(targets.clone()),
        &mut BlockingPreloader::new(root.path()),
    )
    .unwrap();
    assert!(t.poll_preloader());
    assert_eq!(t.display().percent_loaded, Some(100));
    assert_eq!(t.base().phase(), Phase::Instructions);
    assert!(t.display().continue_visible);

    t.start_main_exp();
    assert_eq!(t.canvases().len(), 4);
    assert!(!t.finished_drawing().unwrap());

    for canvas in t.canvases_mut() {
        canvas.begin_stroke(5.0, 5.0);
        canvas.extend_stroke(40.0, 40.0);
        canvas.end_stroke();
    }
    assert!(t.finished_drawing().unwrap());
    assert_eq!(t.base().phase(), Phase::Finished);

    let form = t.base().messages().form_text.clone().unwrap();
    assert!(form.contains("workerId=W9"));
    let lines: Vec<&str> = form.lines().filter(|l| l.starts_with('{')).collect();
    assert_eq!(lines.len(), 4);
    for line in lines {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(v["image"].as_str().unwrap().starts_with("data:image/png;base64,"));
        assert_ne!(v["drawing"], "[]");
    }

    let out = tempfile::tempdir().unwrap();
    let path = t.base().write_results(out.path()).unwrap();
    assert!(path.file_name().unwrap().to_string_lossy().starts_with("W9-"));
}

#[test]
fn missing_png_reports_a_load_error() {
    let root = tempfile::tempdir().unwrap();
    let mut t = draw_task("");
    t.load_images(
        ImageData::targets(target_list(2, 1)),
        &mut BlockingPreloader::new(root.path()),
    )
    .unwrap();
    t.poll_preloader();
    assert!(!t.is_loading());
    assert!(!t.display().continue_visible);
    assert!(t.base().messages().error.as_deref().unwrap().starts_with("I am very sorry"));
}
