//! Networked drawing session.
//!
//! A participant repeatedly gets a node from the experiment server, fetches
//! the stimuli sent to that node, draws one copy per stimulus and posts the
//! drawings back. Every request waits for the previous one; nothing retries.

use std::path::Path;
use std::thread;
use std::time::Duration;

use image::{ImageError, Rgba, RgbaImage};

use crate::api::{ApiError, ExperimentApi, InfoPost, NodeId};
use crate::canvas::{CanvasFactory, DrawCanvasFactory, StimulusImage, TrialCanvas};
use crate::config::DEFAULT_RENDER_DELAY_MS;
use crate::preload::load_image_source;
use crate::stimulus::{DrawingResponse, Stimulus, parse_stimuli};

/// Edge of the networked variant's drawing surfaces.
pub const SESSION_CANVAS_SIZE: u32 = 100;

pub const SUBMIT_LABEL: &str = "Submit";
pub const SENDING_LABEL: &str = "Sending...";

/// Shown when a failed request carries no error page of its own.
pub const GENERIC_ERROR_HTML: &str =
    "<p>There has been an error and so you are unable to continue, sorry!</p>";

#[derive(Debug)]
pub enum SessionError {
    Api(ApiError),
    /// `info.contents` was not a stimulus list.
    Payload(serde_json::Error),
    Image(ImageError),
    /// Submit pressed before a node was assigned.
    NoNode,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Api(e) => write!(f, "{}", e),
            SessionError::Payload(e) => write!(f, "Malformed stimulus list: {}", e),
            SessionError::Image(e) => write!(f, "Image encoding error: {}", e),
            SessionError::NoNode => write!(f, "No node has been assigned yet"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ApiError> for SessionError {
    fn from(e: ApiError) -> Self {
        SessionError::Api(e)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Payload(e)
    }
}

impl From<ImageError> for SessionError {
    fn from(e: ImageError) -> Self {
        SessionError::Image(e)
    }
}

/// What the participant's window shows.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum SessionPage {
    #[default]
    Drawing,
    /// Body replaced with a server-provided error page.
    Replaced(String),
    /// Exit allowed; the closing questionnaire is showing.
    Questionnaire,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitControl {
    pub enabled: bool,
    pub label: String,
}

impl Default for SubmitControl {
    fn default() -> Self {
        Self {
            enabled: false,
            label: SUBMIT_LABEL.to_string(),
        }
    }
}

pub struct NetworkSession<A: ExperimentApi, F: CanvasFactory = DrawCanvasFactory> {
    api: A,
    factory: F,
    participant_id: String,
    render_delay: Duration,
    node_id: Option<NodeId>,
    story: Vec<Stimulus>,
    canvases: Vec<F::Canvas>,
    submit: SubmitControl,
    page: SessionPage,
    exit_allowed: bool,
    submitted: usize,
}

impl<A: ExperimentApi> NetworkSession<A> {
    pub fn new(api: A, participant_id: impl Into<String>) -> Self {
        Self::with_factory(api, DrawCanvasFactory::square(SESSION_CANVAS_SIZE), participant_id)
    }
}

impl<A: ExperimentApi, F: CanvasFactory> NetworkSession<A, F> {
    pub fn with_factory(api: A, factory: F, participant_id: impl Into<String>) -> Self {
        Self {
            api,
            factory,
            participant_id: participant_id.into(),
            render_delay: Duration::from_millis(DEFAULT_RENDER_DELAY_MS),
            node_id: None,
            story: Vec::new(),
            canvases: Vec::new(),
            submit: SubmitControl::default(),
            page: SessionPage::Drawing,
            exit_allowed: false,
            submitted: 0,
        }
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    pub fn story(&self) -> &[Stimulus] {
        &self.story
    }

    pub fn canvases(&self) -> &[F::Canvas] {
        &self.canvases
    }

    pub fn canvases_mut(&mut self) -> &mut [F::Canvas] {
        &mut self.canvases
    }

    pub fn submit_control(&self) -> &SubmitControl {
        &self.submit
    }

    pub fn page(&self) -> &SessionPage {
        &self.page
    }

    pub fn exit_allowed(&self) -> bool {
        self.exit_allowed
    }

    /// Number of successful submissions so far.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Register with the server and, on success, fetch the node's stimuli.
    pub fn create_agent(&mut self) -> Result<(), SessionError> {
        match self.api.create_node(&self.participant_id) {
            Ok(id) => {
                crate::logger::set_context(Some(format!("{} node {}", self.participant_id, id)));
                crate::log_info!("Participant {} assigned node {}", self.participant_id, id);
                self.node_id = Some(id);
                self.get_info()
            }
            Err(e) => {
                crate::log_err!("Node creation failed: {}", e);
                match e.error_html() {
                    Some(html) => self.page = SessionPage::Replaced(html),
                    None => {
                        self.exit_allowed = true;
                        self.page = SessionPage::Questionnaire;
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Fetch the stimuli for the current node and render them.
    pub fn get_info(&mut self) -> Result<(), SessionError> {
        let node_id = self.node_id.ok_or(SessionError::NoNode)?;
        let story = self
            .api
            .received_infos(node_id)
            .map_err(SessionError::from)
            .and_then(|contents| Ok(parse_stimuli(&contents)?));
        match story {
            Ok(story) => {
                self.story = story;
                self.render();
                Ok(())
            }
            Err(e) => {
                crate::log_err!("Fetching stimuli for node {} failed: {}", node_id, e);
                self.replace_page(&e);
                Err(e)
            }
        }
    }

    /// One canvas per stimulus, then unlock the submit control.
    fn render(&mut self) {
        if !self.render_delay.is_zero() {
            thread::sleep(self.render_delay);
        }
        let canvases: Vec<F::Canvas> = self
            .story
            .iter()
            .enumerate()
            .map(|(i, stimulus)| {
                let image = stimulus_image(stimulus);
                self.factory.create(&format!("stimulus-{}", i), &image, None)
            })
            .collect();
        self.canvases = canvases;
        self.submit = SubmitControl {
            enabled: true,
            label: SUBMIT_LABEL.to_string(),
        };
    }

    /// The `{name, image, drawing}` entries for the current canvases.
    pub fn responses(&self) -> Result<Vec<DrawingResponse>, SessionError> {
        self.story
            .iter()
            .zip(&self.canvases)
            .map(|(stimulus, canvas)| {
                Ok(DrawingResponse {
                    name: stimulus.name.clone(),
                    image: canvas.get_image()?,
                    drawing: canvas.get_drawing(),
                })
            })
            .collect()
    }

    /// Post the drawings for the current node, then start the next node.
    pub fn submit_response(&mut self) -> Result<(), SessionError> {
        let node_id = self.node_id.ok_or(SessionError::NoNode)?;
        self.submit = SubmitControl {
            enabled: false,
            label: SENDING_LABEL.to_string(),
        };

        let posted = self
            .responses()
            .and_then(|responses| Ok(serde_json::to_string(&responses)?))
            .and_then(|contents| {
                self.api
                    .post_info(node_id, &InfoPost::new(contents))
                    .map_err(SessionError::from)
            });
        if let Err(e) = posted {
            crate::log_err!("Submitting drawings for node {} failed: {}", node_id, e);
            self.replace_page(&e);
            return Err(e);
        }

        self.submitted += 1;
        crate::log_info!("Drawings for node {} submitted", node_id);
        self.create_agent()
    }

    fn replace_page(&mut self, e: &SessionError) {
        let html = match e {
            SessionError::Api(api) => api.error_html(),
            _ => None,
        };
        self.page = SessionPage::Replaced(html.unwrap_or_else(|| GENERIC_ERROR_HTML.to_string()));
    }
}

/// Decode a stimulus image. Undecodable images become a blank placeholder so
/// the participant still gets a canvas for every stimulus.
fn stimulus_image(stimulus: &Stimulus) -> StimulusImage {
    match load_image_source(&stimulus.image, Path::new(".")) {
        Ok(img) => img,
        Err(e) => {
            crate::log_warn!("Stimulus '{}' could not be decoded: {}", stimulus.name, e);
            StimulusImage::new(
                stimulus.image.clone(),
                RgbaImage::from_pixel(
                    SESSION_CANVAS_SIZE,
                    SESSION_CANVAS_SIZE,
                    Rgba([255, 255, 255, 255]),
                ),
            )
        }
    }
}
