//! Stash CLI
//!
//! Restores and saves build caches kept in S3 from CI jobs.

mod commands;
mod config;
mod handlers;
mod logging;
mod outputs;

use clap::Parser;
use commands::{Commands, GlobalArgs};
use config::StashConfig;
use console::style;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "stash")]
#[command(author, version, about = "S3-backed build cache for CI jobs", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.global.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("✗").red(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = StashConfig::load(cli.global.config.as_deref())?.resolve(&cli.global)?;
    tracing::debug!(working_dir = %settings.working_dir.display(), "Resolved settings");

    match cli.command {
        Commands::Restore(args) => handlers::restore(&settings, args).await,
        Commands::Lookup(args) => handlers::lookup(&settings, args).await,
        Commands::Save(args) => handlers::save(&settings, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_repeated_inputs() {
        let cli = Cli::try_parse_from([
            "stash",
            "--store-dir",
            "/cache",
            "restore",
            "--path",
            "target",
            "--path",
            "~/.cargo/registry",
            "--key",
            "cargo-abc",
            "--restore-key",
            "cargo-",
            "--lookup-only",
        ])
        .unwrap();

        let Commands::Restore(args) = cli.command else {
            panic!("expected restore");
        };
        assert_eq!(args.target.paths, vec!["target", "~/.cargo/registry"]);
        assert_eq!(args.target.key.as_deref(), Some("cargo-abc"));
        assert_eq!(args.target.restore_keys, vec!["cargo-"]);
        assert!(args.lookup_only);
        assert_eq!(
            cli.global.store_dir.as_deref(),
            Some(std::path::Path::new("/cache"))
        );
    }

    #[test]
    fn test_cli_parses_compression() {
        let cli =
            Cli::try_parse_from(["stash", "save", "--compression", "zstd", "-k", "k"]).unwrap();
        assert_eq!(cli.global.compression, Some(stash_core::Compression::Zstd));
        assert!(matches!(cli.command, Commands::Save(_)));
    }

    #[test]
    fn test_cli_parses_path_style_switch() {
        let cli = Cli::try_parse_from(["stash", "--force-path-style", "save", "-k", "k"]).unwrap();
        assert_eq!(cli.global.force_path_style, Some(true));

        let cli =
            Cli::try_parse_from(["stash", "save", "--force-path-style=false", "-k", "k"]).unwrap();
        assert_eq!(cli.global.force_path_style, Some(false));

        let cli = Cli::try_parse_from(["stash", "save", "-k", "k"]).unwrap();
        assert_eq!(cli.global.force_path_style, None);
    }
}
