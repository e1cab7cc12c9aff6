use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use msgshell_client::{
    host::PolicyHost,
    logging::init_logging,
    replay::{replay, write_json_line},
    settings::{SettingsOverrides, effective_settings, save_settings_with_retry, settings_path},
};
use msgshell_core::{ViewportInput, classify_window_open};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "msgshell-policy")]
struct PolicyArgs {
    /// Settings file (defaults to the data directory's settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Append logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[arg(long, global = true)]
    bootstrap_window_ms: Option<u64>,
    #[arg(long, global = true)]
    max_navigations: Option<u32>,
    #[arg(long, global = true)]
    dedup_ttl_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the window-open action for a URL.
    Classify { url: String },
    /// Print the viewport state for a path.
    Viewport {
        #[arg(long)]
        path: String,
        #[arg(long, default_value_t = false)]
        overlay: bool,
    },
    /// Feed JSON-lines host events through the policy host.
    Replay {
        /// Read events from a file instead of stdin.
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Print the effective settings.
    Settings {
        /// Persist the effective settings to the settings file.
        #[arg(long, default_value_t = false)]
        write: bool,
    },
}

fn main() {
    let args = PolicyArgs::parse();
    init_logging(args.log_file.as_deref());

    if let Err(err) = run(args) {
        error!("{}", err);
        std::process::exit(1);
    }
}

impl PolicyArgs {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            bootstrap_window_ms: self.bootstrap_window_ms,
            max_navigations: self.max_navigations,
            dedup_ttl_ms: self.dedup_ttl_ms,
        }
    }
}

fn run(args: PolicyArgs) -> Result<(), String> {
    let path = args.settings.clone().unwrap_or_else(settings_path);
    let settings = effective_settings(&path, &args.overrides())
        .map_err(|err| format!("invalid settings: {err}"))?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Command::Classify { url } => {
            write_json_line(&mut out, &classify_window_open(&url)).map_err(|err| err.to_string())
        }
        Command::Viewport {
            path: url_path,
            overlay,
        } => {
            let host = PolicyHost::new(&settings);
            let update = host.on_viewport_change(&ViewportInput::new(url_path, overlay));
            write_json_line(&mut out, &update).map_err(|err| err.to_string())
        }
        Command::Replay { input } => {
            let reader: Box<dyn BufRead> = match input {
                Some(input) => {
                    let file = File::open(&input)
                        .map_err(|err| format!("failed to open {}: {err}", input.display()))?;
                    Box::new(BufReader::new(file))
                }
                None => Box::new(BufReader::new(io::stdin())),
            };
            let mut host = PolicyHost::new(&settings);
            replay(reader, &mut out, &mut host)
                .map(|_| ())
                .map_err(|err| err.to_string())
        }
        Command::Settings { write } => {
            if write {
                save_settings_with_retry(&path, &settings)
                    .map_err(|err| format!("failed to save {}: {err}", path.display()))?;
                info!(path = %path.display(), "settings saved");
            }
            write_json_line(&mut out, &settings).map_err(|err| err.to_string())
        }
    }
}
