use std::io::Cursor;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageError, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Prefix of every PNG data URL produced or accepted by the crate.
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Default drawing-surface edge in pixels.
pub const DEFAULT_CANVAS_SIZE: u32 = 200;

/// Default pen diameter in canvas pixels.
pub const DEFAULT_PEN_WIDTH: f32 = 3.0;

// ============================================================================
// SIDE PLACEMENT
// ============================================================================

/// Which side of the drawing surface a completion image is anchored to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidePlacement {
    Left,
    Right,
    Top,
    Bottom,
}

impl SidePlacement {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Some(SidePlacement::Left),
            "right" => Some(SidePlacement::Right),
            "top" => Some(SidePlacement::Top),
            "bottom" => Some(SidePlacement::Bottom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SidePlacement::Left => "left",
            SidePlacement::Right => "right",
            SidePlacement::Top => "top",
            SidePlacement::Bottom => "bottom",
        }
    }

    pub fn all() -> &'static [SidePlacement] {
        &[
            SidePlacement::Left,
            SidePlacement::Right,
            SidePlacement::Top,
            SidePlacement::Bottom,
        ]
    }

    /// Offsets (within the combined area) of the completion image and of the
    /// drawing surface, plus the combined size. `image` and `surface` are
    /// `(width, height)` pairs.
    pub fn arrange(&self, image: (f32, f32), surface: (f32, f32)) -> CompletionLayout {
        let (iw, ih) = image;
        let (sw, sh) = surface;
        match self {
            SidePlacement::Left => CompletionLayout {
                image_offset: (0.0, 0.0),
                surface_offset: (iw, 0.0),
                total: (iw + sw, ih.max(sh)),
            },
            SidePlacement::Right => CompletionLayout {
                image_offset: (sw, 0.0),
                surface_offset: (0.0, 0.0),
                total: (iw + sw, ih.max(sh)),
            },
            SidePlacement::Top => CompletionLayout {
                image_offset: (0.0, 0.0),
                surface_offset: (0.0, ih),
                total: (iw.max(sw), ih + sh),
            },
            SidePlacement::Bottom => CompletionLayout {
                image_offset: (0.0, sh),
                surface_offset: (0.0, 0.0),
                total: (iw.max(sw), ih + sh),
            },
        }
    }
}

impl std::fmt::Display for SidePlacement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`SidePlacement::arrange`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompletionLayout {
    pub image_offset: (f32, f32),
    pub surface_offset: (f32, f32),
    pub total: (f32, f32),
}

// ============================================================================
// STIMULUS IMAGES
// ============================================================================

/// A decoded stimulus (target or completion) image.
#[derive(Clone, Debug)]
pub struct StimulusImage {
    /// Where the image came from: an asset-relative path or a data URL.
    pub src: String,
    pub pixels: Arc<RgbaImage>,
    /// Draw a thin frame around the image when displayed.
    pub bordered: bool,
}

impl StimulusImage {
    pub fn new(src: impl Into<String>, pixels: RgbaImage) -> Self {
        Self {
            src: src.into(),
            pixels: Arc::new(pixels),
            bordered: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// What the task controllers need from a per-trial drawing surface.
pub trait TrialCanvas {
    fn id(&self) -> &str;
    /// True until the participant has put at least one mark on the surface.
    fn is_empty(&self) -> bool;
    /// Serialized stroke data.
    fn get_drawing(&self) -> String;
    /// Rasterised drawing as a PNG data URL.
    fn get_image(&self) -> Result<String, ImageError>;
}

/// Builds one canvas per trial.
pub trait CanvasFactory {
    type Canvas: TrialCanvas;

    fn create(
        &self,
        id: &str,
        target: &StimulusImage,
        completion: Option<(&StimulusImage, SidePlacement)>,
    ) -> Self::Canvas;
}

// ============================================================================
// DRAW CANVAS
// ============================================================================

/// One freehand stroke in canvas pixel coordinates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stroke {
    pub points: Vec<[f32; 2]>,
}

/// Freehand drawing surface paired with the image(s) it asks the participant to copy.
#[derive(Clone, Debug)]
pub struct DrawCanvas {
    id: String,
    pub target: StimulusImage,
    pub completion: Option<StimulusImage>,
    pub side: Option<SidePlacement>,
    pub width: u32,
    pub height: u32,
    pub pen_width: f32,
    strokes: Vec<Stroke>,
    /// True while a pointer drag is extending the last stroke.
    drawing: bool,
}

impl DrawCanvas {
    pub fn new(id: impl Into<String>, target: StimulusImage, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            target,
            completion: None,
            side: None,
            width: width.max(1),
            height: height.max(1),
            pen_width: DEFAULT_PEN_WIDTH,
            strokes: Vec::new(),
            drawing: false,
        }
    }

    pub fn with_completion(mut self, completion: StimulusImage, side: SidePlacement) -> Self {
        self.completion = Some(completion);
        self.side = Some(side);
        self
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    /// Start a new stroke at `(x, y)`. Points outside the surface are clamped.
    pub fn begin_stroke(&mut self, x: f32, y: f32) {
        let p = self.clamp(x, y);
        self.strokes.push(Stroke { points: vec![p] });
        self.drawing = true;
    }

    /// Append a point to the stroke in progress. Ignored when no stroke is open
    /// or the point repeats the previous one.
    pub fn extend_stroke(&mut self, x: f32, y: f32) {
        if !self.drawing {
            return;
        }
        let p = self.clamp(x, y);
        if let Some(stroke) = self.strokes.last_mut()
            && stroke.points.last() != Some(&p)
        {
            stroke.points.push(p);
        }
    }

    pub fn end_stroke(&mut self) {
        self.drawing = false;
    }

    /// Remove the most recent stroke.
    pub fn undo(&mut self) -> bool {
        self.drawing = false;
        self.strokes.pop().is_some()
    }

    pub fn clear(&mut self) {
        self.drawing = false;
        self.strokes.clear();
    }

    fn clamp(&self, x: f32, y: f32) -> [f32; 2] {
        [
            x.clamp(0.0, self.width as f32 - 1.0),
            y.clamp(0.0, self.height as f32 - 1.0),
        ]
    }

    /// Render the strokes in black on a white surface.
    pub fn rasterize(&self) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(self.width, self.height, Rgba([255, 255, 255, 255]));
        let radius = (self.pen_width * 0.5).max(0.5);
        let ink = Rgba([0, 0, 0, 255]);
        for stroke in &self.strokes {
            match stroke.points.as_slice() {
                [] => {}
                [p] => stamp_disc(&mut img, p[0], p[1], radius, ink),
                pts => {
                    for seg in pts.windows(2) {
                        let (a, b) = (seg[0], seg[1]);
                        let dx = b[0] - a[0];
                        let dy = b[1] - a[1];
                        let len = (dx * dx + dy * dy).sqrt();
                        // Stamp at half-pixel spacing so segments have no gaps
                        let steps = (len * 2.0).ceil().max(1.0) as usize;
                        for s in 0..=steps {
                            let t = s as f32 / steps as f32;
                            stamp_disc(&mut img, a[0] + dx * t, a[1] + dy * t, radius, ink);
                        }
                    }
                }
            }
        }
        img
    }
}

fn stamp_disc(img: &mut RgbaImage, cx: f32, cy: f32, radius: f32, color: Rgba<u8>) {
    let (w, h) = img.dimensions();
    let min_x = (cx - radius).floor().max(0.0) as u32;
    let min_y = (cy - radius).floor().max(0.0) as u32;
    let max_x = ((cx + radius).ceil() as u32).min(w.saturating_sub(1));
    let max_y = ((cy + radius).ceil() as u32).min(h.saturating_sub(1));
    let r2 = radius * radius;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            if dx * dx + dy * dy <= r2 {
                img.put_pixel(x, y, color);
            }
        }
    }
}

/// Encode an image as a PNG data URL.
pub fn png_data_url(img: &RgbaImage) -> Result<String, ImageError> {
    let mut buf = Vec::new();
    PngEncoder::new(Cursor::new(&mut buf)).write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        ColorType::Rgba8,
    )?;
    Ok(format!("{}{}", PNG_DATA_URL_PREFIX, STANDARD.encode(&buf)))
}

impl TrialCanvas for DrawCanvas {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_empty(&self) -> bool {
        self.strokes.iter().all(|s| s.points.is_empty())
    }

    fn get_drawing(&self) -> String {
        serde_json::to_string(&self.strokes).unwrap_or_else(|_| "[]".to_string())
    }

    fn get_image(&self) -> Result<String, ImageError> {
        png_data_url(&self.rasterize())
    }
}

/// Creates [`DrawCanvas`]es of a fixed surface size.
#[derive(Clone, Copy, Debug)]
pub struct DrawCanvasFactory {
    pub width: u32,
    pub height: u32,
    pub pen_width: f32,
}

impl DrawCanvasFactory {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
            pen_width: DEFAULT_PEN_WIDTH,
        }
    }
}

impl Default for DrawCanvasFactory {
    fn default() -> Self {
        Self::square(DEFAULT_CANVAS_SIZE)
    }
}

impl CanvasFactory for DrawCanvasFactory {
    type Canvas = DrawCanvas;

    fn create(
        &self,
        id: &str,
        target: &StimulusImage,
        completion: Option<(&StimulusImage, SidePlacement)>,
    ) -> DrawCanvas {
        let mut canvas = DrawCanvas::new(id, target.clone(), self.width, self.height);
        canvas.pen_width = self.pen_width;
        match completion {
            Some((img, side)) => canvas.with_completion(img.clone(), side),
            None => canvas,
        }
    }
}

/// One JSON line per canvas (`id`, `drawing`, `image`), in list order.
pub fn print_list_canvas<C: TrialCanvas>(canvases: &[C]) -> Result<String, ImageError> {
    let mut out = String::new();
    for canvas in canvases {
        let line = serde_json::json!({
            "id": canvas.id(),
            "drawing": canvas.get_drawing(),
            "image": canvas.get_image()?,
        });
        out.push_str(&line.to_string());
        out.push('\n');
    }
    Ok(out)
}
