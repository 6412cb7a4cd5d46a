use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::{
    audit::AuditLog,
    config::{
        resolve_config_path, write_default_config, ConfigSelection, ConfigSource,
        CryptainerConfig, CONFIG_ENV_VAR,
    },
    error::{explain_error_code, normalize_error_code, CryptainerError, Result},
    fs_secure::ensure_private_dir,
    secrets::{
        pass::PassSecretStore,
        passgen::{PasswordGenerator, DEFAULT_PASSWORD_LENGTH},
        SecretPrompt, SecretSource,
    },
    types::{BackendKind, SecretValue, VolumeName},
    volume::{
        AutoApprove, Backends, CleanupReport, CreateOptions, StepOutcome,
        SystemMountTable, VolumeController,
    },
};

use super::{
    output::{self, render_volume_table, OutputStatus},
    render_error,
    secret_input::{read_secret_stdin, ConsoleCleanupDecider, ConsolePrompt},
    Cli, Command, ErrorFormatArg,
};

/// Environment variable holding the tracing filter.
const LOG_ENV_VAR: &str = "CRYPTAINER_LOG";

struct CliState {
    config: CryptainerConfig,
    controller: VolumeController,
    error_format: ErrorFormatArg,
}

pub(crate) fn run(cli: Cli) -> Result<i32> {
    init_tracing(cli.debug);
    let Cli {
        config,
        volumes_dir,
        mount_dir,
        error_format,
        command,
        ..
    } = cli;

    match command {
        Command::Explain { code } => return run_explain(&code),
        Command::Passgen { length } => return run_passgen(config.as_deref(), length),
        _ => {}
    }

    let overrides_complete = volumes_dir.is_some() && mount_dir.is_some();
    let selection = select_config(config.as_deref())?;
    let loaded = load_effective_config(&selection, overrides_complete)?;
    let mut state = build_state(
        loaded,
        volumes_dir.as_deref(),
        mount_dir.as_deref(),
        error_format,
    )?;

    match command {
        Command::Create {
            volume_type,
            size,
            auto_mount,
            store,
            password_stdin,
            password_prompt,
            name,
        } => {
            let secret = if password_stdin {
                Some(read_secret_stdin()?)
            } else if password_prompt {
                Some(ConsolePrompt.prompt_secret(&VolumeName::new(&name)?, true)?)
            } else {
                None
            };
            let options = CreateOptions {
                kind: BackendKind::from(volume_type),
                name,
                secret,
                size,
                auto_mount,
                store_secret: store,
            };
            run_create(&mut state, options)
        }
        Command::Mount {
            use_store,
            password_stdin,
            names,
        } => {
            let source = if use_store {
                SecretSource::Store
            } else if password_stdin {
                SecretSource::Value(read_secret_stdin()?)
            } else {
                SecretSource::Prompt
            };
            run_mount(&mut state, &names, source)
        }
        Command::Umount { all, names } => {
            let names = if all {
                state
                    .controller
                    .mounted_names()?
                    .into_iter()
                    .map(String::from)
                    .collect()
            } else {
                names
            };
            run_umount(&mut state, &names)
        }
        Command::List { all, json } => run_list(&mut state, all, json),
        Command::Cleanup { yes } => {
            let report = if yes || state.config.auto_cleanup {
                state.controller.cleanup(&mut AutoApprove)?
            } else {
                state.controller.cleanup(&mut ConsoleCleanupDecider)?
            };
            print_cleanup_report(&report)
        }
        Command::Verify { json } => run_verify(&state, json),
        Command::Explain { .. } | Command::Passgen { .. } => Ok(0),
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV_VAR)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_target(false)
        .try_init();
}

fn select_config(explicit: Option<&Path>) -> Result<ConfigSelection> {
    let env_value = std::env::var(CONFIG_ENV_VAR).ok();
    let home = dirs::home_dir();
    resolve_config_path(
        explicit,
        env_value.as_deref(),
        home.as_deref(),
        std::env::current_dir()?,
    )
}

fn load_effective_config(
    selection: &ConfigSelection,
    overrides_complete: bool,
) -> Result<CryptainerConfig> {
    if selection.path.exists() {
        return CryptainerConfig::load_from_path(&selection.path);
    }
    if overrides_complete {
        return CryptainerConfig::defaults_for(&selection.path);
    }
    match selection.source {
        ConfigSource::Default => {
            write_default_config(&selection.path)?;
            Err(CryptainerError::InvalidInput(format!(
                "created default config at {}; set volumes.volumes_dir and volumes.mount_dir, then rerun",
                selection.path.display()
            )))
        }
        ConfigSource::Flag | ConfigSource::Env => Err(CryptainerError::InvalidInput(format!(
            "config file does not exist: {}",
            selection.path.display()
        ))),
    }
}

fn build_state(
    config: CryptainerConfig,
    volumes_override: Option<&Path>,
    mount_override: Option<&Path>,
    error_format: ErrorFormatArg,
) -> Result<CliState> {
    let paths = config.volume_paths(volumes_override, mount_override, &std::env::current_dir()?)?;
    ensure_private_dir(paths.config_dir())?;
    let audit_log = AuditLog::new(paths.audit_file())?;
    tracing::debug!(
        volumes_root = %paths.volumes_root().display(),
        mount_root = %paths.mount_root().display(),
        config = %config.source_path.display(),
        "resolved volume layout"
    );

    let controller = VolumeController::new(
        paths,
        Backends::system(),
        Box::new(SystemMountTable::new()),
        audit_log,
    )?
    .with_password_generator(PasswordGenerator::new(config.passgen_length)?)
    .with_secret_store(Box::new(PassSecretStore::new(config.store_prefix.clone())))
    .with_secret_prompt(Box::new(ConsolePrompt))
    .with_auto_cleanup(config.auto_cleanup);

    Ok(CliState {
        config,
        controller,
        error_format,
    })
}

fn run_create(state: &mut CliState, options: CreateOptions) -> Result<i32> {
    let outcome = state.controller.create(options)?;
    if let Some(code) = stdout_line_or_exit(&format!(
        "created {} volume `{}` at {}",
        outcome.kind,
        outcome.name,
        outcome.storage_path.display()
    ))? {
        return Ok(code);
    }

    let stored = matches!(outcome.stored, StepOutcome::Succeeded);
    if let (Some(secret), false) = (&outcome.generated_secret, stored) {
        if let Some(code) = print_generated_secret(secret)? {
            return Ok(code);
        }
    }

    match &outcome.stored {
        StepOutcome::Succeeded => {
            if let Some(code) = stdout_line_or_exit("password saved to secret store")? {
                return Ok(code);
            }
        }
        StepOutcome::Failed(error) => warn_line(&format!(
            "warning: volume created but storing its password failed: {}",
            render_error(error, state.error_format)
        )),
        StepOutcome::Skipped => {}
    }
    match &outcome.mounted {
        StepOutcome::Succeeded => {
            if let Some(code) = stdout_line_or_exit(&format!(
                "mounted `{}` at {}",
                outcome.name,
                outcome.mount_path.display()
            ))? {
                return Ok(code);
            }
        }
        StepOutcome::Failed(error) => warn_line(&format!(
            "warning: volume created but auto-mount failed: {}",
            render_error(error, state.error_format)
        )),
        StepOutcome::Skipped => {}
    }
    Ok(0)
}

fn print_generated_secret(secret: &SecretValue) -> Result<Option<i32>> {
    let text = secret.expose(|bytes| String::from_utf8_lossy(bytes).into_owned());
    stdout_line_or_exit(&format!("password: {text}"))
}

fn run_mount(state: &mut CliState, names: &[String], source: SecretSource) -> Result<i32> {
    let mut failed = false;
    for name in names {
        match state.controller.mount(name, source.clone()) {
            Ok(outcome) => {
                if let Some(code) = stdout_line_or_exit(&format!(
                    "mounted `{}` at {}",
                    outcome.name,
                    outcome.mount_path.display()
                ))? {
                    return Ok(code);
                }
            }
            Err(error) => {
                failed = true;
                warn_line(&render_error(&error, state.error_format));
            }
        }
    }
    Ok(i32::from(failed))
}

fn run_umount(state: &mut CliState, names: &[String]) -> Result<i32> {
    if names.is_empty() {
        return Ok(stdout_line_or_exit("no mounted volumes")?.unwrap_or(0));
    }
    let mut failed = false;
    for name in names {
        match state.controller.unmount(name) {
            Ok(outcome) => {
                if let Some(code) = stdout_line_or_exit(&format!("unmounted `{}`", outcome.name))? {
                    return Ok(code);
                }
                if let Some(report) = &outcome.cleanup {
                    for path in &report.removed {
                        tracing::info!(path = %path.display(), "removed leftover mount directory");
                    }
                }
            }
            Err(error) => {
                failed = true;
                warn_line(&render_error(&error, state.error_format));
            }
        }
    }
    Ok(i32::from(failed))
}

fn run_list(state: &mut CliState, show_unknown: bool, json: bool) -> Result<i32> {
    let listing = state.controller.list(show_unknown)?;
    if let Some(warning) = &listing.warning {
        warn_line(&format!("warning: mount status unavailable: {warning}"));
    }
    let rendered = if json {
        serde_json::to_string_pretty(&listing)?
    } else if listing.volumes.is_empty() {
        "no volumes".to_owned()
    } else {
        render_volume_table(&listing.volumes)
    };
    Ok(stdout_line_or_exit(&rendered)?.unwrap_or(0))
}

fn print_cleanup_report(report: &CleanupReport) -> Result<i32> {
    if let Some(reason) = &report.aborted {
        warn_line(&format!("warning: cleanup skipped, mount table unavailable: {reason}"));
        return Ok(1);
    }
    let mut lines = Vec::new();
    lines.extend(report.removed.iter().map(|path| format!("removed {}", path.display())));
    lines.extend(report.kept.iter().map(|path| format!("kept {}", path.display())));
    lines.extend(
        report
            .skipped_non_empty
            .iter()
            .map(|path| format!("skipped {} (not empty)", path.display())),
    );
    for failure in &report.failed {
        warn_line(&format!(
            "warning: could not clean up {}: {}",
            failure.path.display(),
            failure.error
        ));
    }
    if lines.is_empty() && report.failed.is_empty() {
        lines.push("nothing to clean up".to_owned());
    }
    if !lines.is_empty() {
        stdout_line_or_exit(&lines.join("\n"))?;
    }
    Ok(i32::from(!report.is_complete()))
}

fn run_verify(state: &CliState, json: bool) -> Result<i32> {
    let report = state.controller.verify()?;
    let rendered = if json {
        serde_json::to_string_pretty(&report)?
    } else {
        let mut lines = vec![format!(
            "registry {}: integrity {}",
            report.registry_path.display(),
            if report.integrity_ok { "ok" } else { "MISMATCH" }
        )];
        lines.extend(report.stale.iter().map(|stale| {
            format!(
                "stale: `{}` recorded as {} but detected as {}",
                stale.name, stale.recorded, stale.detected
            )
        }));
        lines.extend(
            report
                .missing_storage
                .iter()
                .map(|name| format!("missing storage: `{name}`")),
        );
        lines.extend(
            report
                .unregistered
                .iter()
                .map(|entry| format!("unregistered: `{}` ({})", entry.name, entry.detected)),
        );
        lines.join("\n")
    };
    let code = if report.is_clean() { 0 } else { 1 };
    Ok(stdout_line_or_exit(&rendered)?.unwrap_or(code))
}

fn run_explain(code: &str) -> Result<i32> {
    let normalized = normalize_error_code(code);
    let explanation = explain_error_code(&normalized).ok_or_else(|| {
        CryptainerError::InvalidInput(format!("unknown error code `{normalized}`"))
    })?;
    Ok(stdout_line_or_exit(explanation)?.unwrap_or(0))
}

fn run_passgen(config_path: Option<&Path>, length: Option<usize>) -> Result<i32> {
    let length = match length {
        Some(length) => length,
        None => configured_passgen_length(config_path)?,
    };
    let secret = PasswordGenerator::new(length)?.generate();
    let text = secret.expose(|bytes| String::from_utf8_lossy(bytes).into_owned());
    Ok(stdout_line_or_exit(&text)?.unwrap_or(0))
}

fn configured_passgen_length(config_path: Option<&Path>) -> Result<usize> {
    let selection = select_config(config_path)?;
    if selection.path.exists() {
        return Ok(CryptainerConfig::load_from_path(&selection.path)?.passgen_length);
    }
    Ok(DEFAULT_PASSWORD_LENGTH)
}

fn stdout_line_or_exit(line: &str) -> Result<Option<i32>> {
    match output::stdout_line(line) {
        Ok(OutputStatus::Written) => Ok(None),
        Ok(OutputStatus::BrokenPipe) => Ok(Some(0)),
        Err(error) => Err(CryptainerError::Io(error)),
    }
}

fn warn_line(line: &str) {
    let _ = output::stderr_line(line);
}
