//! Batch image preloading with progress reporting.
//!
//! A preloader receives the image lists for a task and reports back through
//! an `mpsc` channel: a `Progress` event after every decoded image, then a
//! single `Done` or `Failed`. The UI thread drains the channel each frame.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::ImageError;
use image::imageops::{self, FilterType};

use crate::canvas::StimulusImage;

#[derive(Debug)]
pub enum PreloadError {
    Io(PathBuf, std::io::Error),
    Decode(String, ImageError),
    DataUrl(String),
}

impl std::fmt::Display for PreloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreloadError::Io(path, e) => write!(f, "I/O error reading {}: {}", path.display(), e),
            PreloadError::Decode(src, e) => write!(f, "Could not decode {}: {}", src, e),
            PreloadError::DataUrl(e) => write!(f, "Malformed data URL: {}", e),
        }
    }
}

impl std::error::Error for PreloadError {}

/// Image lists to load. Paired lists must be the same length.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageBatch {
    Single(Vec<String>),
    Paired(Vec<String>, Vec<String>),
}

impl ImageBatch {
    pub fn total(&self) -> usize {
        match self {
            ImageBatch::Single(t) => t.len(),
            ImageBatch::Paired(t, c) => t.len() + c.len(),
        }
    }
}

/// Decoded images, in the order they were requested.
#[derive(Clone, Debug, Default)]
pub struct LoadedImages {
    pub targets: Vec<StimulusImage>,
    pub completions: Option<Vec<StimulusImage>>,
}

#[derive(Debug)]
pub enum PreloadEvent {
    /// Percentage of images decoded so far, 0..=100.
    Progress(u32),
    Done(LoadedImages),
    Failed(String),
}

/// Loads a batch of images and reports through `events`.
pub trait ImagePreloader {
    fn preload(&mut self, batch: ImageBatch, events: Sender<PreloadEvent>);
}

/// Loads on the rayon pool so the UI keeps repainting.
#[derive(Clone, Debug)]
pub struct ThreadedPreloader {
    pub root: PathBuf,
}

impl ThreadedPreloader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ImagePreloader for ThreadedPreloader {
    fn preload(&mut self, batch: ImageBatch, events: Sender<PreloadEvent>) {
        let root = self.root.clone();
        rayon::spawn(move || load_batch(batch, &root, &events));
    }
}

/// Loads on the calling thread; every event is queued before `preload` returns.
#[derive(Clone, Debug)]
pub struct BlockingPreloader {
    pub root: PathBuf,
}

impl BlockingPreloader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ImagePreloader for BlockingPreloader {
    fn preload(&mut self, batch: ImageBatch, events: Sender<PreloadEvent>) {
        load_batch(batch, &self.root, &events);
    }
}

/// Rounded percentage of `done` out of `total`; an empty batch counts as complete.
pub fn percent(done: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((done * 100 + total / 2) / total) as u32
}

/// Decode every image in `batch`, sending progress and the final outcome.
/// A closed receiver aborts the load quietly.
pub fn load_batch(batch: ImageBatch, root: &Path, events: &Sender<PreloadEvent>) {
    let total = batch.total();
    let mut done = 0usize;

    let mut load_list = |list: &[String]| -> Result<Option<Vec<StimulusImage>>, PreloadError> {
        let mut out = Vec::with_capacity(list.len());
        for src in list {
            out.push(load_image_source(src, root)?);
            done += 1;
            if events.send(PreloadEvent::Progress(percent(done, total))).is_err() {
                return Ok(None);
            }
        }
        Ok(Some(out))
    };

    let result = match &batch {
        ImageBatch::Single(targets) => load_list(targets).map(|t| {
            t.map(|targets| LoadedImages {
                targets,
                completions: None,
            })
        }),
        ImageBatch::Paired(targets, completions) => load_list(targets).and_then(|t| match t {
            None => Ok(None),
            Some(targets) => load_list(completions).map(|c| {
                c.map(|completions| LoadedImages {
                    targets,
                    completions: Some(completions),
                })
            }),
        }),
    };

    match result {
        Ok(Some(images)) => {
            crate::log_info!("Preloaded {} image(s)", total);
            let _ = events.send(PreloadEvent::Done(images));
        }
        Ok(None) => {}
        Err(e) => {
            crate::log_err!("Image preload failed: {}", e);
            let _ = events.send(PreloadEvent::Failed(e.to_string()));
        }
    }
}

/// Decode an image from a `data:` URL or a path relative to `root`.
pub fn load_image_source(src: &str, root: &Path) -> Result<StimulusImage, PreloadError> {
    if src.starts_with("data:") {
        let bytes = decode_data_url(src)?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| PreloadError::Decode(short_src(src), e))?;
        return Ok(StimulusImage::new(src, img.into_rgba8()));
    }

    let path = root.join(src);
    let bytes = std::fs::read(&path).map_err(|e| PreloadError::Io(path.clone(), e))?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| PreloadError::Decode(src.to_string(), e))?;
    Ok(StimulusImage::new(src, img.into_rgba8()))
}

/// Payload bytes of a base64 `data:` URL.
pub fn decode_data_url(src: &str) -> Result<Vec<u8>, PreloadError> {
    let rest = src
        .strip_prefix("data:")
        .ok_or_else(|| PreloadError::DataUrl("missing data: scheme".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| PreloadError::DataUrl("missing ',' separator".to_string()))?;
    if !meta.ends_with(";base64") {
        return Err(PreloadError::DataUrl(format!("unsupported encoding '{}'", meta)));
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|e| PreloadError::DataUrl(e.to_string()))
}

/// First 40 characters of a source, for error messages.
fn short_src(src: &str) -> String {
    let mut chars = src.chars();
    let head: String = chars.by_ref().take(40).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Scale every image to `size`×`size` and optionally mark it for a border.
pub fn resize_and_protect(
    images: &[StimulusImage],
    size: u32,
    has_border: bool,
) -> Vec<StimulusImage> {
    let size = size.max(1);
    images
        .iter()
        .map(|img| {
            let pixels = if img.width() == size && img.height() == size {
                img.pixels.clone()
            } else {
                let resized = imageops::resize(&*img.pixels, size, size, FilterType::Triangle);
                std::sync::Arc::new(resized)
            };
            StimulusImage {
                src: img.src.clone(),
                pixels,
                bordered: has_border,
            }
        })
        .collect()
}
