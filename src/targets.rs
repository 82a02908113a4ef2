//! File names of the handwritten character images shown as drawing targets.

/// Directory (relative to the asset root) holding the character images.
pub const CHARACTER_DIR: &str = "characters/";
/// Stem shared by every character image.
pub const CHARACTER_STEM: &str = "handwritten";

/// `count` target paths numbered from `start`, e.g. `characters/handwritten1.png`.
pub fn target_list(count: usize, start: usize) -> Vec<String> {
    image_list(CHARACTER_DIR, CHARACTER_STEM, count, start)
}

/// `<dir><stem><N>.png` for `N` in `start..start + count`.
pub fn image_list(dir: &str, stem: &str, count: usize, start: usize) -> Vec<String> {
    (start..start + count)
        .map(|n| format!("{}{}{}.png", dir, stem, n))
        .collect()
}
