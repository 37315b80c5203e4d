use anyhow::{Context, Result};
use confdrift_config::{config_path, ensure_workspace_config, validate_config};
use confdriftd::cli::{Cli, parse_cli};
use confdriftd::commands::run_command;
use confdriftd::logging::init_tracing;

fn main() -> Result<()> {
    let cli = parse_cli();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    let config = ensure_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load or create workspace config at {}",
            config_path(&workspace).display()
        )
    })?;

    init_tracing(
        cli.log_format.unwrap_or(config.logging.format),
        &config.logging,
    )
    .context("failed to install tracing subscriber")?;
    for warning in validate_config(&config) {
        tracing::warn!(code = warning.code, "config warning: {}", warning.message);
    }

    let mut out = std::io::stdout().lock();
    run_command(&workspace, &config, &cli.command, &mut out)
}
