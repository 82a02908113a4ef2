//! Task configuration: page URL parameters, the persisted settings file, and
//! the per-task configuration handed to the controllers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::canvas::SidePlacement;

/// Default edge length of stimulus images, in pixels.
pub const DEFAULT_SIZE_IMGS: u32 = 105;

/// Default wait before canvases are rendered in the networked variant.
pub const DEFAULT_RENDER_DELAY_MS: u64 = 100;

pub const DEFAULT_CONTACT_EMAIL: &str = "brenden@mit.edu";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    InvalidUrl(String),
    Io(std::io::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidUrl(e) => write!(f, "Invalid page URL: {}", e),
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<url::ParseError> for ConfigError {
    fn from(e: url::ParseError) -> Self {
        ConfigError::InvalidUrl(e.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

// ============================================================================
// URL PARAMETERS
// ============================================================================

/// Query parameters of the page the task was launched from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UrlParams {
    params: HashMap<String, String>,
}

impl UrlParams {
    /// Parse the query string of a full page URL. Later duplicates win.
    pub fn from_url(page: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(page)?;
        Ok(Self {
            params: url.query_pairs().into_owned().collect(),
        })
    }

    /// Parse a bare query string such as `ntrials=5&debug=true` (a leading `?` is allowed).
    pub fn from_query(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        Self {
            params: url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    /// Integer parameter. A value that does not parse yields `None`, the
    /// same as an absent parameter.
    pub fn int_param(&self, key: &str) -> Option<i64> {
        self.param(key).and_then(parse_leading_int)
    }

    /// `true` only for the literal strings `true` / `1`.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.param(key).map(|v| matches!(v.trim(), "true" | "1"))
    }

    /// Number of trials requested through `ntrials`, when present and numeric.
    pub fn ntrials(&self) -> Option<i64> {
        self.int_param("ntrials")
    }
}

/// Leading-integer parse: optional sign followed by digits, trailing text ignored.
fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

// ============================================================================
// PERSISTED SETTINGS
// ============================================================================

/// Operator settings read from `settings.cfg` (key=value per line).
#[derive(Clone, Debug, PartialEq)]
pub struct TaskSettings {
    pub size_imgs: u32,
    /// Default `ntrials` when the page URL does not carry one.
    pub ntrials: Option<i64>,
    /// Directory that asset-relative image paths resolve against.
    pub asset_root: PathBuf,
    /// Where finished result forms are written. `None` disables writing.
    pub results_dir: Option<PathBuf>,
    pub render_delay_ms: u64,
    pub contact_email: String,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            size_imgs: DEFAULT_SIZE_IMGS,
            ntrials: None,
            asset_root: PathBuf::from("static/images"),
            results_dir: None,
            render_delay_ms: DEFAULT_RENDER_DELAY_MS,
            contact_email: DEFAULT_CONTACT_EMAIL.to_string(),
        }
    }
}

impl TaskSettings {
    pub fn settings_path() -> PathBuf {
        crate::logger::data_dir().join("drawtask").join("settings.cfg")
    }

    /// Load from the default location, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load() -> Self {
        match std::fs::read_to_string(Self::settings_path()) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Parse settings text. Unknown keys and malformed values are ignored.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "size_imgs" => {
                    if let Ok(v) = val.parse::<u32>()
                        && v > 0
                    {
                        s.size_imgs = v;
                    }
                }
                "ntrials" => s.ntrials = parse_leading_int(val),
                "asset_root" if !val.is_empty() => s.asset_root = PathBuf::from(val),
                "results_dir" => {
                    s.results_dir = if val.is_empty() { None } else { Some(PathBuf::from(val)) };
                }
                "render_delay_ms" => {
                    if let Ok(v) = val.parse() {
                        s.render_delay_ms = v;
                    }
                }
                "contact_email" if !val.is_empty() => s.contact_email = val.to_string(),
                _ => {}
            }
        }
        s
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("size_imgs={}\n", self.size_imgs));
        if let Some(n) = self.ntrials {
            out.push_str(&format!("ntrials={}\n", n));
        }
        out.push_str(&format!("asset_root={}\n", self.asset_root.display()));
        if let Some(dir) = &self.results_dir {
            out.push_str(&format!("results_dir={}\n", dir.display()));
        }
        out.push_str(&format!("render_delay_ms={}\n", self.render_delay_ms));
        out.push_str(&format!("contact_email={}\n", self.contact_email));
        out
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::settings_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_text())?;
        Ok(())
    }

    pub fn render_delay(&self) -> Duration {
        Duration::from_millis(self.render_delay_ms)
    }
}

// ============================================================================
// TASK CONFIG
// ============================================================================

/// Everything a drawing task is constructed from.
#[derive(Clone, Debug)]
pub struct TaskConfig {
    /// Possible condition names; one is chosen per session.
    pub list_condition: Vec<String>,
    pub size_imgs: u32,
    pub url: UrlParams,
    pub contact_email: String,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            list_condition: vec!["default".to_string()],
            size_imgs: DEFAULT_SIZE_IMGS,
            url: UrlParams::default(),
            contact_email: DEFAULT_CONTACT_EMAIL.to_string(),
        }
    }
}

impl TaskConfig {
    pub fn from_settings(settings: &TaskSettings, mut url: UrlParams) -> Self {
        if url.param("ntrials").is_none()
            && let Some(n) = settings.ntrials
        {
            url.set("ntrials", n.to_string());
        }
        Self {
            size_imgs: settings.size_imgs,
            url,
            contact_email: settings.contact_email.clone(),
            ..Self::default()
        }
    }
}

/// Image lists handed to [`crate::task::DrawTask::load_images`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageData {
    pub targets: Vec<String>,
    pub completions: Option<Vec<String>>,
    pub side: Option<SidePlacement>,
}

impl ImageData {
    pub fn targets(targets: Vec<String>) -> Self {
        Self {
            targets,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_params_from_page_url() {
        let p = UrlParams::from_url("https://example.org/exp.html?ntrials=5&workerId=A1&debug=true")
            .unwrap();
        assert_eq!(p.ntrials(), Some(5));
        assert_eq!(p.param("workerId"), Some("A1"));
        assert_eq!(p.flag("debug"), Some(true));
        assert_eq!(p.flag("skip_quiz"), None);
    }

    #[test]
    fn invalid_url_is_an_error() {
        assert!(matches!(
            UrlParams::from_url("not a url"),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn ntrials_parses_like_a_leading_integer() {
        assert_eq!(UrlParams::from_query("?ntrials=12abc").ntrials(), Some(12));
        assert_eq!(UrlParams::from_query("ntrials=-3").ntrials(), Some(-3));
        assert_eq!(UrlParams::from_query("ntrials=abc").ntrials(), None);
        assert_eq!(UrlParams::from_query("ntrials=").ntrials(), None);
        assert_eq!(UrlParams::from_query("").ntrials(), None);
    }

    #[test]
    fn settings_parse_ignores_garbage() {
        let s = TaskSettings::parse(
            "# comment\nsize_imgs=80\nntrials=4\nbogus\nrender_delay_ms=x\nresults_dir=out\nunknown=1\n",
        );
        assert_eq!(s.size_imgs, 80);
        assert_eq!(s.ntrials, Some(4));
        assert_eq!(s.render_delay_ms, DEFAULT_RENDER_DELAY_MS);
        assert_eq!(s.results_dir, Some(PathBuf::from("out")));
        assert_eq!(TaskSettings::parse(&s.to_text()), s);
    }

    #[test]
    fn settings_ntrials_only_fills_a_missing_url_param() {
        let settings = TaskSettings {
            ntrials: Some(3),
            ..TaskSettings::default()
        };
        let cfg = TaskConfig::from_settings(&settings, UrlParams::default());
        assert_eq!(cfg.url.ntrials(), Some(3));

        let cfg = TaskConfig::from_settings(&settings, UrlParams::from_query("ntrials=8"));
        assert_eq!(cfg.url.ntrials(), Some(8));
    }
}
