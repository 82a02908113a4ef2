// ============================================================================
// drawtask command line: GUI launch options and headless helpers
// ============================================================================
//
// Usage examples:
//   drawtask                                        (standalone task, 10 characters)
//   drawtask --url "http://host/exp.html?ntrials=5" draw --nchar 20
//   drawtask draw --completion-stem complete --side left
//   drawtask network --server http://localhost:5000 --participant abc123
//   drawtask targets --count 10 --start 1
//   drawtask payload static/images/characters --seed 4 > payload.json
//   drawtask preload "static/images/characters/*.png"
//
// `targets`, `payload` and `preload` never open a window.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;

use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;

use drawtask::canvas::SidePlacement;
use drawtask::config::{ImageData, TaskSettings, UrlParams};
use drawtask::preload::{BlockingPreloader, ImageBatch, ImagePreloader, PreloadEvent};
use drawtask::stimulus::build_payload;
use drawtask::targets::{CHARACTER_DIR, image_list, target_list};

/// Character-copying drawing task.
#[derive(Parser, Debug)]
#[command(name = "drawtask", about = "Character-copying drawing experiment")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Page URL whose query parameters configure the task
    /// (ntrials, condition, workerId, debug, skip_quiz, skip_survey).
    #[arg(long, global = true, value_name = "URL")]
    pub url: Option<String>,

    /// Directory that image paths are resolved against.
    #[arg(long, global = true, value_name = "DIR")]
    pub assets: Option<PathBuf>,

    /// Write finished result forms into this directory.
    #[arg(long, global = true, value_name = "DIR")]
    pub results_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Standalone drawing task (the default when no subcommand is given).
    Draw {
        /// Number of character images.
        #[arg(long, default_value_t = 10)]
        nchar: usize,
        /// Number of the first character image.
        #[arg(long, default_value_t = 1)]
        start: usize,
        /// File stem of paired completion images (e.g. "complete").
        #[arg(long, value_name = "STEM")]
        completion_stem: Option<String>,
        /// Side of the canvas the completion image sits on: left, right, top, bottom.
        #[arg(long, value_parser = parse_side)]
        side: Option<SidePlacement>,
        /// Ask the closing survey questions.
        #[arg(long)]
        survey: bool,
    },
    /// Networked variant: stimuli come from an experiment server.
    Network {
        /// Server root URL.
        #[arg(long)]
        server: String,
        #[arg(long)]
        participant: String,
    },
    /// Print the target image list.
    Targets {
        #[arg(long, default_value_t = 10)]
        count: usize,
        #[arg(long, default_value_t = 1)]
        start: usize,
    },
    /// Print a stimulus payload (JSON) built from the PNGs in a directory.
    Payload {
        dir: PathBuf,
        /// Seed for the shuffle; random when omitted.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Load images (paths or glob patterns) and report progress.
    Preload {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
    },
}

fn parse_side(s: &str) -> Result<SidePlacement, String> {
    SidePlacement::parse(s).ok_or_else(|| format!("'{}' is not one of left, right, top, bottom", s))
}

impl Command {
    /// Commands that run to completion without opening a window.
    pub fn is_headless(&self) -> bool {
        matches!(
            self,
            Command::Targets { .. } | Command::Payload { .. } | Command::Preload { .. }
        )
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Draw {
            nchar: 10,
            start: 1,
            completion_stem: None,
            side: None,
            survey: false,
        }
    }
}

impl CliArgs {
    /// Settings file values overridden by command-line flags.
    pub fn settings(&self) -> TaskSettings {
        let mut settings = TaskSettings::load();
        if let Some(dir) = &self.assets {
            settings.asset_root = dir.clone();
        }
        if let Some(dir) = &self.results_dir {
            settings.results_dir = Some(dir.clone());
        }
        settings
    }

    /// Query parameters from `--url`; an unparsable URL is reported and ignored.
    pub fn url_params(&self) -> UrlParams {
        match &self.url {
            Some(url) => UrlParams::from_url(url).unwrap_or_else(|e| {
                eprintln!("warning: {}", e);
                UrlParams::default()
            }),
            None => UrlParams::default(),
        }
    }
}

/// Image lists for the standalone task.
pub fn image_data(
    nchar: usize,
    start: usize,
    completion_stem: Option<&str>,
    side: Option<SidePlacement>,
) -> ImageData {
    ImageData {
        targets: target_list(nchar, start),
        completions: completion_stem.map(|stem| image_list(CHARACTER_DIR, stem, nchar, start)),
        side,
    }
}

// ============================================================================
// Headless entry point
// ============================================================================

/// Run a headless command and return the process exit code.
pub fn run(args: &CliArgs, command: &Command) -> ExitCode {
    match command {
        Command::Targets { count, start } => {
            for name in target_list(*count, *start) {
                println!("{}", name);
            }
            ExitCode::SUCCESS
        }
        Command::Payload { dir, seed } => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(*seed),
                None => StdRng::from_entropy(),
            };
            match build_payload(dir, &mut rng) {
                Ok(json) => {
                    println!("{}", json);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("error: {}: {}", dir.display(), e);
                    ExitCode::FAILURE
                }
            }
        }
        Command::Preload { inputs } => {
            let root = args.assets.clone().unwrap_or_else(|| PathBuf::from("."));
            run_preload(inputs, &root)
        }
        Command::Draw { .. } | Command::Network { .. } => {
            eprintln!("error: this command needs the GUI.");
            ExitCode::FAILURE
        }
    }
}

fn run_preload(patterns: &[String], root: &Path) -> ExitCode {
    let inputs = resolve_inputs(patterns, root);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    let sources: Vec<String> = inputs
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    let (tx, rx) = mpsc::channel();
    BlockingPreloader::new(root).preload(ImageBatch::Single(sources), tx);

    let mut code = ExitCode::FAILURE;
    for event in rx.try_iter() {
        match event {
            PreloadEvent::Progress(pct) => eprintln!("loaded {:>3}%", pct),
            PreloadEvent::Done(images) => {
                for img in &images.targets {
                    println!("{}  {}x{}", img.src, img.width(), img.height());
                }
                code = ExitCode::SUCCESS;
            }
            PreloadEvent::Failed(e) => eprintln!("error: {}", e),
        }
    }
    code
}

/// Literal paths (relative to `root`) are used as-is; anything else is
/// expanded as a glob.
fn resolve_inputs(patterns: &[String], root: &Path) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);
        if root.join(as_path).exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(&root.join(pattern).to_string_lossy()) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    let entry = entry.strip_prefix(root).map(Path::to_path_buf).unwrap_or(entry);
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}
