mod app;
mod cli;

use clap::Parser;
use eframe::egui;

use app::DrawTaskApp;
use drawtask::api::HttpExperimentApi;
use drawtask::config::TaskConfig;
use drawtask::{log_info, logger};

fn main() -> Result<(), eframe::Error> {
    let args = cli::CliArgs::parse();
    let command = args.command.clone().unwrap_or_default();

    // -- CLI / headless mode ---------------------------------------------
    if command.is_headless() {
        let code = cli::run(&args, &command);
        std::process::exit(if code == std::process::ExitCode::SUCCESS {
            0
        } else {
            1
        });
    }

    // -- GUI mode -----------------------------------------------------

    // Run log (overwrites the previous sitting's log)
    logger::init(match command {
        cli::Command::Network { .. } => "network session",
        _ => "standalone task",
    });

    let settings = args.settings();
    let config = TaskConfig::from_settings(&settings, args.url_params());

    let (title, app) = match command {
        cli::Command::Network {
            server,
            participant,
        } => {
            let api = match HttpExperimentApi::new(&server) {
                Ok(api) => api,
                Err(e) => {
                    eprintln!("error: --server {}: {}", server, e);
                    std::process::exit(2);
                }
            };
            log_info!("Network session for {} against {}", participant, api.base());
            ("Drawing task (network)", DrawTaskApp::network(&settings, api, &participant))
        }
        cli::Command::Draw {
            nchar,
            start,
            completion_stem,
            side,
            survey,
        } => {
            let data = cli::image_data(nchar, start, completion_stem.as_deref(), side);
            log_info!(
                "Standalone task: {} character(s) from {}",
                data.targets.len(),
                settings.asset_root.display()
            );
            ("Drawing task", DrawTaskApp::standalone(&settings, &config, data, survey))
        }
        // Headless commands returned above.
        _ => std::process::exit(1),
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 720.0])
            .with_title(title),
        ..Default::default()
    };

    eframe::run_native(title, options, Box::new(|_cc| Box::new(app)))
}
