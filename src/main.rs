use anyhow::bail;
use clap::Parser;
use indicatif::ProgressBar;
use inquire::error::InquireResult;
use tracing_subscriber::EnvFilter;

mod chunker;
mod cli;
mod config;
mod diff;
mod embed;
mod engine;
mod fetch;
mod heartbeat;
mod index;
mod lock;
mod quality;
mod results;
mod source;
mod store;
mod web;
mod worker;

use config::Config;
use engine::Engine;
use lock::FileLock;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SEMDEX_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let base_path = config::resolve_base_path()?;
    let base_str = base_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("base path is not valid UTF-8"))?;
    let config = Config::load_with(base_str);

    match args.command {
        cli::Command::Daemon {} => {
            // Held for the daemon's whole lifetime.
            let _lock = FileLock::try_acquire(&base_path)?;

            let host = config.web.host.clone();
            let port = config.web.port;
            let engine = Engine::init(config)?;
            web::start_daemon(engine, host, port);
            Ok(())
        }

        cli::Command::Sync { folders } => {
            let _lock = FileLock::try_acquire(&base_path)?;
            let mut engine = Engine::init(config)?;

            let folders = if folders.is_empty() {
                engine.indexed_folders()?
            } else {
                folders
            };
            if folders.is_empty() {
                println!("nothing tracked yet; pass --folder <id> (`semdex folders` lists them)");
                return Ok(());
            }

            let spinner = ProgressBar::new_spinner();
            spinner.enable_steady_tick(std::time::Duration::from_millis(120));
            let summary =
                engine.sync(&folders, &mut |text| spinner.set_message(text.to_string()))?;
            spinner.finish_and_clear();

            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }

        cli::Command::Search { query, page } => {
            let mut engine = Engine::init(config)?;

            let first_page = engine.search(&query)?;
            let hits = if page > 1 {
                engine.more_results(page)
            } else {
                first_page
            };

            println!("{}", serde_json::to_string_pretty(&hits)?);
            Ok(())
        }

        cli::Command::Stats {} => {
            let engine = Engine::init(config)?;
            println!("{}", serde_json::to_string_pretty(&engine.stats()?)?);
            Ok(())
        }

        cli::Command::Clear { yes } => {
            if !yes {
                match inquire::prompt_confirmation(
                    "This deletes every indexed bookmark, dead link and the cached index. Are you sure?",
                ) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }

            let _lock = FileLock::try_acquire(&base_path)?;
            let mut engine = Engine::init(config)?;
            engine.clear_all()?;
            println!("all data cleared");
            Ok(())
        }

        cli::Command::Folders {} => {
            let engine = Engine::init(config)?;
            let tracked = engine.indexed_folders()?;
            for (id, path) in engine.folder_listing()? {
                let marker = if tracked.contains(&id) { "*" } else { " " };
                println!("{marker} {id}  {path}");
            }
            Ok(())
        }
    }
}
