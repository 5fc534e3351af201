use std::sync::mpsc;
use std::thread;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use stepdbg::config::Cli;
use stepdbg::state::{DebuggerEvent, DebuggerState};
use stepdbg::ui::{App, command::Command};
use stepdbg::worker;

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stepdbg=info")),
        )
        .init();

    let config = Cli::parse().into_config();
    let root = config.root.clone();

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
    let (event_tx, event_rx) = mpsc::channel::<DebuggerEvent>();

    let worker = thread::Builder::new()
        .name("session".into())
        .spawn(move || worker::run_loop(config, cmd_rx, event_tx))
        .map_err(|e| eframe::Error::AppCreation(Box::new(e)))?;

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("stepdbg")
            .with_inner_size([1400.0, 800.0]),
        ..Default::default()
    };

    let quit_tx = cmd_tx.clone();
    let result = eframe::run_native(
        "stepdbg",
        native_options,
        Box::new(move |_cc| {
            let state = DebuggerState::new();
            Ok(Box::new(App::new(state, &root, event_rx, cmd_tx)))
        }),
    );

    // Kills any traced child before the process goes away.
    let _ = quit_tx.send(Command::Quit);
    let _ = worker.join();
    result
}
