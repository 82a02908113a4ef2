//! Stimulus records exchanged with the experiment server, and the builder
//! that turns a directory of character images into a payload.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::canvas::PNG_DATA_URL_PREFIX;

/// One image the participant is asked to copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    pub name: String,
    /// Data URL or asset path.
    pub image: String,
    #[serde(default)]
    pub drawing: String,
}

/// One submitted drawing, as posted back to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawingResponse {
    pub name: String,
    pub image: String,
    pub drawing: String,
}

#[derive(Debug)]
pub enum PayloadError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadError::Io(e) => write!(f, "I/O error: {}", e),
            PayloadError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for PayloadError {}

impl From<std::io::Error> for PayloadError {
    fn from(e: std::io::Error) -> Self {
        PayloadError::Io(e)
    }
}

impl From<serde_json::Error> for PayloadError {
    fn from(e: serde_json::Error) -> Self {
        PayloadError::Json(e)
    }
}

/// Parse the JSON list carried in an info's `contents`.
pub fn parse_stimuli(contents: &str) -> Result<Vec<Stimulus>, serde_json::Error> {
    serde_json::from_str(contents)
}

/// Every `.png` in `dir`, shuffled, embedded as data URLs.
pub fn collect_stimuli<R: Rng + ?Sized>(
    dir: &Path,
    rng: &mut R,
) -> Result<Vec<Stimulus>, PayloadError> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.contains(".png"))
        .collect();
    // read_dir order is platform dependent; sort before shuffling so a seeded
    // rng gives the same order everywhere
    names.sort();
    names.shuffle(rng);

    let mut stimuli = Vec::with_capacity(names.len());
    for name in names {
        let bytes = std::fs::read(dir.join(&name))?;
        stimuli.push(Stimulus {
            image: format!("{}{}", PNG_DATA_URL_PREFIX, STANDARD.encode(&bytes)),
            name,
            drawing: String::new(),
        });
    }
    Ok(stimuli)
}

/// JSON string of [`collect_stimuli`], ready to be stored as an info's contents.
pub fn build_payload<R: Rng + ?Sized>(dir: &Path, rng: &mut R) -> Result<String, PayloadError> {
    Ok(serde_json::to_string(&collect_stimuli(dir, rng)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn payload_holds_every_png_as_a_data_url() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.png", "c.png"] {
            image::RgbaImage::new(2, 2).save(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let json = build_payload(dir.path(), &mut StdRng::seed_from_u64(5)).unwrap();
        let stimuli = parse_stimuli(&json).unwrap();
        let mut names: Vec<&str> = stimuli.iter().map(|s| s.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
        assert!(stimuli.iter().all(|s| s.image.starts_with(PNG_DATA_URL_PREFIX)));
        assert!(stimuli.iter().all(|s| s.drawing.is_empty()));
    }

    #[test]
    fn seeded_order_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6 {
            image::RgbaImage::new(1, 1)
                .save(dir.path().join(format!("{}.png", i)))
                .unwrap();
        }
        let a = collect_stimuli(dir.path(), &mut StdRng::seed_from_u64(9)).unwrap();
        let b = collect_stimuli(dir.path(), &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn drawing_defaults_to_empty() {
        let s = parse_stimuli(r#"[{"name":"x","image":"characters/x.png"}]"#).unwrap();
        assert_eq!(s[0].drawing, "");
    }

    #[test]
    fn missing_directory_is_io_error() {
        let err = build_payload(Path::new("/definitely/not/here"), &mut StdRng::seed_from_u64(1));
        assert!(matches!(err, Err(PayloadError::Io(_))));
    }
}
