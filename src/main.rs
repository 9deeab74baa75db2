// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tailwiki: deployment shim for a tailnet-only wiki
//!
//! Brings up Tailscale, starts the wiki, then answers the platform's health check.

use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tailwiki::config::{LoggingConfig, DEFAULT_GREETING_NAME, DEFAULT_PUBLIC_ADDR};
use tailwiki::public::{greeting, local_hostname, router, shutdown_signal, PublicServer};
use tailwiki::readiness::probe_from_settings;
use tailwiki::{bring_up, Config, Environment, PostgresStateStore, Settings, TokioSupervisor};

/// Tailwiki: tailnet-only wiki deployment shim
///
/// Restores the Tailscale node from PostgreSQL, joins the tailnet, starts the
/// wiki and serves a placeholder page on the public port.
#[derive(Parser, Debug)]
#[command(name = "tailwiki")]
#[command(author, version, long_about = None)]
struct Cli {
    /// The name to say hello to
    #[arg(long, default_value = DEFAULT_GREETING_NAME)]
    name: String,

    /// The address to bind to (overridden by PORT)
    #[arg(long, default_value = DEFAULT_PUBLIC_ADDR)]
    public: String,

    /// Settings file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Print the effective settings and exit
    #[arg(long)]
    print_settings: bool,
}

/// Accept the single-dash long flags existing Procfiles use (`-name`, `-public=:80`)
fn normalize_go_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some(text) if is_go_long_flag(text) => OsString::from(format!("-{}", text)),
            _ => arg,
        })
        .collect()
}

fn is_go_long_flag(arg: &str) -> bool {
    ["-name", "-public"]
        .iter()
        .any(|flag| arg == *flag || arg.starts_with(&format!("{}=", flag)))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_go_flags(std::env::args_os()));

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(error) => {
            eprintln!("Error: {}", error);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&cli, &settings.logging);

    match run(cli, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("Error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) {
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(cli.debug);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.with_ansi(std::io::stderr().is_terminal()).init();
    }
}

async fn run(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    if cli.print_settings {
        print!("{}", toml::to_string_pretty(&settings)?);
        return Ok(());
    }

    let config = Config::resolve(settings, Environment::from_process(), cli.name, cli.public)
        .context("Failed to resolve configuration")?;

    let supervisor = TokioSupervisor::new();
    let readiness = probe_from_settings(&config.tunnel.readiness);

    let services = {
        let store = PostgresStateStore::connect_lazy(&config.database_url)?;
        bring_up(&config, &store, &supervisor, readiness.as_ref())
            .await
            .context("Startup failed")?
    };
    services.detach();

    let hostname = local_hostname();
    let server = PublicServer::bind(&config.public.bind_addr).await?;
    info!(hostname = %hostname, "Serving public placeholder");

    server
        .serve(
            router(greeting(&config.public.greeting_name, &hostname)),
            shutdown_signal(),
        )
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let args = normalize_go_flags(args.iter().map(OsString::from));
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_defaults() {
        let cli = parse(&["tailwiki"]);
        assert_eq!(cli.name, "visitor");
        assert_eq!(cli.public, ":80");
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_go_style_flags() {
        let cli = parse(&["tailwiki", "-name", "Ada", "-public=:8080"]);
        assert_eq!(cli.name, "Ada");
        assert_eq!(cli.public, ":8080");
    }

    #[test]
    fn test_cli_double_dash_flags() {
        let cli = parse(&["tailwiki", "--name=Ada", "--public", "127.0.0.1:9000"]);
        assert_eq!(cli.name, "Ada");
        assert_eq!(cli.public, "127.0.0.1:9000");
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = parse(&["tailwiki", "-v"]);
        assert!(cli.verbose);
    }

    #[test]
    fn test_help_uses_doc_comment() {
        use clap::CommandFactory;

        let help = Cli::command().render_help().to_string();
        assert!(help.contains("tailnet-only wiki deployment shim"));
        assert!(!help.contains("Deployment shim: brings up"));
    }

    #[test]
    fn test_normalize_leaves_other_args_alone() {
        let original = ["tailwiki", "-v", "--debug", "-c", "x.toml"].map(OsString::from);
        let args = normalize_go_flags(original.clone());
        assert_eq!(args, original);
    }
}
