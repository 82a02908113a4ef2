//! The standalone drawing task: permute the trials, preload the images, show
//! one canvas per trial and refuse to finish until every canvas has ink.

use std::sync::mpsc::{self, Receiver, TryRecvError};

use image::ImageError;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::base::{BaseTask, Phase, SuperTask, SurveyStep};
use crate::canvas::{
    CanvasFactory, DrawCanvasFactory, SidePlacement, StimulusImage, TrialCanvas, print_list_canvas,
};
use crate::config::{ImageData, TaskConfig};
use crate::perm::Permutation;
use crate::preload::{ImageBatch, ImagePreloader, LoadedImages, PreloadEvent, resize_and_protect};

/// Survey questions the drawing task requires before the form can be printed.
pub const SURVEY_FIELDS: [&str; 5] = [
    "survey_radio_handed",
    "survey_txt_native_lang",
    "survey_txt_country",
    "survey_radio_use_hand",
    "survey_radio_device",
];

pub const INCOMPLETE_DRAWINGS_MSG: &str = "Not all drawings are completed.";
pub const EMPTY_FIELD_MSG: &str = "A required field is still empty.";

#[derive(Debug)]
pub enum TaskError {
    /// Completion images were given without saying where to put them.
    MissingSide,
    LengthMismatch { targets: usize, completions: usize },
    /// `ntrials` asks for more trials than there are images.
    TooManyTrials { requested: usize, available: usize },
    Image(ImageError),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::MissingSide => {
                write!(f, "missing side placement for a completion task")
            }
            TaskError::LengthMismatch { targets, completions } => write!(
                f,
                "image lists are not the same length ({} targets, {} completions)",
                targets, completions
            ),
            TaskError::TooManyTrials { available, .. } => write!(
                f,
                "URL parameter ntrials: the maximum number of trials is {}",
                available
            ),
            TaskError::Image(e) => write!(f, "Image encoding error: {}", e),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<ImageError> for TaskError {
    fn from(e: ImageError) -> Self {
        TaskError::Image(e)
    }
}

/// Task-owned parts of the page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskDisplay {
    /// Trial count shown in the instructions.
    pub ntrials_label: Option<usize>,
    pub percent_loaded: Option<u32>,
    /// The button leading from the instructions into the trials.
    pub continue_visible: bool,
}

pub struct DrawTask<F: CanvasFactory = DrawCanvasFactory, B: BaseTask = SuperTask> {
    base: B,
    factory: F,
    rng: StdRng,
    size_imgs: u32,
    contact_email: String,
    ntrials_override: Option<i64>,

    num_trials: usize,
    side: Option<SidePlacement>,
    permutation: Option<Permutation>,
    imgs_target: Vec<StimulusImage>,
    imgs_complete: Option<Vec<StimulusImage>>,
    preload_rx: Option<Receiver<PreloadEvent>>,

    list_canvas: Vec<F::Canvas>,
    demo: Option<F::Canvas>,
    display: TaskDisplay,
}

impl DrawTask {
    /// Task with the stock framework and canvases.
    pub fn standard(config: &TaskConfig) -> Self {
        let mut rng = StdRng::from_entropy();
        let base = SuperTask::new(config, &mut rng);
        Self::new(config, DrawCanvasFactory::default(), base).with_rng(rng)
    }
}

impl<F: CanvasFactory, B: BaseTask> DrawTask<F, B> {
    pub fn new(config: &TaskConfig, factory: F, mut base: B) -> Self {
        // The drawing task runs without quiz or survey and always echoes its data.
        {
            let flags = base.flags_mut();
            flags.skip_quiz = true;
            flags.skip_survey = true;
            flags.debug = true;
        }
        Self {
            base,
            factory,
            rng: StdRng::from_entropy(),
            size_imgs: config.size_imgs,
            contact_email: config.contact_email.clone(),
            ntrials_override: config.url.ntrials(),
            num_trials: 0,
            side: None,
            permutation: None,
            imgs_target: Vec::new(),
            imgs_complete: None,
            preload_rx: None,
            list_canvas: Vec::new(),
            demo: None,
            display: TaskDisplay::default(),
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut B {
        &mut self.base
    }

    pub fn display(&self) -> &TaskDisplay {
        &self.display
    }

    pub fn num_trials(&self) -> usize {
        self.num_trials
    }

    pub fn side(&self) -> Option<SidePlacement> {
        self.side
    }

    pub fn permutation(&self) -> Option<&Permutation> {
        self.permutation.as_ref()
    }

    pub fn canvases(&self) -> &[F::Canvas] {
        &self.list_canvas
    }

    pub fn canvases_mut(&mut self) -> &mut [F::Canvas] {
        &mut self.list_canvas
    }

    pub fn demo(&self) -> Option<&F::Canvas> {
        self.demo.as_ref()
    }

    pub fn demo_mut(&mut self) -> Option<&mut F::Canvas> {
        self.demo.as_mut()
    }

    /// Loaded target images, in trial order.
    pub fn target_images(&self) -> &[StimulusImage] {
        &self.imgs_target
    }

    pub fn is_loading(&self) -> bool {
        self.preload_rx.is_some()
    }

    /// Validate the image lists, fix the trial count and order, and start
    /// preloading. Nothing on the page changes when validation fails.
    pub fn load_images<P: ImagePreloader + ?Sized>(
        &mut self,
        data: ImageData,
        preloader: &mut P,
    ) -> Result<(), TaskError> {
        let ImageData {
            targets,
            completions,
            side,
        } = data;

        let side = match (&completions, side) {
            (Some(_), None) => return Err(TaskError::MissingSide),
            (Some(_), Some(side)) => Some(side),
            (None, _) => None,
        };

        let len = targets.len();
        if let Some(c) = &completions
            && c.len() != len
        {
            return Err(TaskError::LengthMismatch {
                targets: len,
                completions: c.len(),
            });
        }

        let mut num_trials = len;
        // Zero or negative requests are treated as "no override".
        if let Some(requested) = self.ntrials_override
            && requested > 0
        {
            let requested = requested as usize;
            if requested > len {
                let err = TaskError::TooManyTrials {
                    requested,
                    available: len,
                };
                self.base.throw_error(&err.to_string());
                return Err(err);
            }
            num_trials = requested;
        }

        self.side = side;
        self.num_trials = num_trials;
        self.display.ntrials_label = Some(num_trials);

        let perm = Permutation::random(len, &mut self.rng);
        let targets = perm.apply(&targets);
        let batch = match completions {
            Some(c) => ImageBatch::Paired(targets, perm.apply(&c)),
            None => ImageBatch::Single(targets),
        };
        self.permutation = Some(perm);

        crate::log_info!(
            "Loading {} image(s) for {} trial(s)",
            batch.total(),
            num_trials
        );
        let (tx, rx) = mpsc::channel();
        self.preload_rx = Some(rx);
        preloader.preload(batch, tx);
        Ok(())
    }

    /// Handle every preloader event received so far. Returns `true` when
    /// anything changed on the page.
    pub fn poll_preloader(&mut self) -> bool {
        let mut changed = false;
        loop {
            let Some(rx) = &self.preload_rx else { break };
            match rx.try_recv() {
                Ok(PreloadEvent::Progress(pct)) => self.display_perc_loaded(pct),
                Ok(PreloadEvent::Done(images)) => {
                    self.preload_rx = None;
                    self.quiz_button_on(images);
                }
                Ok(PreloadEvent::Failed(detail)) => {
                    self.preload_rx = None;
                    self.display_load_error(&detail);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.preload_rx = None;
                    self.display_load_error("preloader stopped without a result");
                }
            }
            changed = true;
        }
        changed
    }

    pub fn display_perc_loaded(&mut self, pct: u32) {
        self.display.percent_loaded = Some(pct);
    }

    pub fn display_load_error(&mut self, detail: &str) {
        crate::log_err!("Image loading failed: {}", detail);
        self.base.messages_mut().error = Some(format!(
            "I am very sorry, there was an error loading the images. Please email {} to report this problem.",
            self.contact_email
        ));
    }

    /// Images are ready: keep them, show the demo canvas and unhide the
    /// button into the trials.
    pub fn quiz_button_on(&mut self, images: LoadedImages) {
        self.imgs_target = resize_and_protect(&images.targets, self.size_imgs, false);
        self.imgs_complete = images
            .completions
            .map(|c| resize_and_protect(&c, self.size_imgs, false));

        self.demo = self.imgs_target.first().map(|target| {
            let completion = self.completion_for(0);
            self.factory.create("demo", target, completion)
        });
        self.display.continue_visible = true;
        self.base.set_phase(Phase::Instructions);
    }

    fn completion_for(&self, i: usize) -> Option<(&StimulusImage, SidePlacement)> {
        let side = self.side?;
        self.imgs_complete
            .as_ref()
            .and_then(|c| c.get(i))
            .map(|img| (img, side))
    }

    pub fn start_main_exp(&mut self) {
        self.base.start_main_exp();
        self.display_canvases();
    }

    /// One canvas per trial, ids `"0"`, `"1"`, ... in permuted order.
    pub fn display_canvases(&mut self) {
        let canvases: Vec<F::Canvas> = self
            .imgs_target
            .iter()
            .take(self.num_trials)
            .enumerate()
            .map(|(i, target)| {
                self.factory
                    .create(&i.to_string(), target, self.completion_for(i))
            })
            .collect();
        self.list_canvas = canvases;
    }

    /// True when every trial canvas has been drawn on.
    pub fn check_full_canvases(&self) -> bool {
        self.list_canvas.iter().all(|c| !c.is_empty())
    }

    /// The participant pressed "finished". Returns `Ok(false)` when an empty
    /// canvas kept the task open.
    pub fn finished_drawing(&mut self) -> Result<bool, TaskError> {
        if !self.check_full_canvases() {
            self.base.alert(INCOMPLETE_DRAWINGS_MSG);
            return Ok(false);
        }
        self.load_survey()?;
        Ok(true)
    }

    pub fn load_survey(&mut self) -> Result<(), TaskError> {
        match self.base.load_survey() {
            SurveyStep::Skipped => self.print_data_to_form(),
            SurveyStep::Shown => Ok(()),
        }
    }

    pub fn check_survey(&mut self) -> bool {
        let survey = self.base.survey();
        let missing = SURVEY_FIELDS
            .iter()
            .any(|f| survey.get(*f).is_none_or(|v| v.trim().is_empty()));
        if missing {
            self.base.alert(EMPTY_FIELD_MSG);
            return false;
        }
        self.base.check_survey()
    }

    /// Survey "submit" button. Returns `Ok(false)` when a field is missing.
    pub fn submit_survey(&mut self) -> Result<bool, TaskError> {
        if !self.check_survey() {
            return Ok(false);
        }
        self.print_data_to_form()?;
        Ok(true)
    }

    pub fn print_data_to_form(&mut self) -> Result<(), TaskError> {
        let text = print_list_canvas(&self.list_canvas)?;
        self.base.append_data(&text);
        self.base.print_data_to_form();
        Ok(())
    }
}
