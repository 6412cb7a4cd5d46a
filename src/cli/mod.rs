mod commands;
mod output;
mod secret_input;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::{
    error::{classify_error_code, CryptainerError, Result},
    types::BackendKind,
};

const NAME_ARG_HELP: &str =
    "Volume name (example: `photos`). Allowed characters: letters, digits, `.`, `_`, and `-`.";
const ERROR_CODE_ARG_HELP: &str = "Error code from CLI stderr (example: `E301`).";
const ERROR_FORMAT_ARG_HELP: &str = "Error output format (`text` or `json`).";
const CLI_AFTER_HELP: &str = r#"Examples:
  cryptainer create -t gocryptfs photos
  cryptainer create -t veracrypt -s 2G -a --store archive.hc
  cryptainer mount photos
  cryptainer mount --use-store photos archive.hc
  cryptainer list --all
  cryptainer umount --all
  cryptainer cleanup
  cryptainer explain E304

Configuration:
  ~/.cryptainer/config.toml (override with --config or CRYPTAINER_CONFIG)
"#;
const CREATE_COMMAND_AFTER_HELP: &str = r#"Examples:
  cryptainer create -t gocryptfs photos
  printf 'secret' | cryptainer create -t veracrypt -s 512M --password-stdin archive.hc

Notes:
  - Without --password-stdin or --password-prompt a password is generated.
  - Sizes (`-s`) apply to VeraCrypt only and use K, M, G or T suffixes.
  - VeraCrypt volume names end in `.hc` (example: `archive.hc`).
"#;
const MOUNT_COMMAND_AFTER_HELP: &str = r#"Examples:
  cryptainer mount photos
  cryptainer mount --use-store photos archive.hc

Recovery:
  If the type is unknown, run `cryptainer list --all` and `cryptainer verify`.
"#;
const EXPLAIN_COMMAND_AFTER_HELP: &str = r#"Examples:
  cryptainer explain E301
  cryptainer explain e304

Tip:
  Error codes are shown in stderr output, for example `error[E301]: ...`.
"#;

/// Top-level command line parser.
#[derive(Debug, Parser)]
#[command(
    name = "cryptainer",
    version,
    about = "Lifecycle manager for gocryptfs and VeraCrypt encrypted volumes.",
    after_help = CLI_AFTER_HELP,
    arg_required_else_help = true,
    next_line_help = true
)]
pub struct Cli {
    /// Config file override path.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Volumes root override.
    #[arg(long)]
    pub volumes_dir: Option<PathBuf>,
    /// Mount root override.
    #[arg(long)]
    pub mount_dir: Option<PathBuf>,
    /// Enable debug logging on stderr.
    #[arg(long)]
    pub debug: bool,
    /// Error output format.
    #[arg(long, value_enum, default_value_t = ErrorFormatArg::Text, help = ERROR_FORMAT_ARG_HELP)]
    pub error_format: ErrorFormatArg,
    /// Subcommand.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Creates a new encrypted volume.
    #[command(after_help = CREATE_COMMAND_AFTER_HELP)]
    Create {
        /// Volume type.
        #[arg(short = 't', long = "type", value_enum)]
        volume_type: VolumeTypeArg,
        /// Container size (VeraCrypt only), for example `1024M`.
        #[arg(short = 's', long)]
        size: Option<String>,
        /// Mount the volume after creating it.
        #[arg(short = 'a', long)]
        auto_mount: bool,
        /// Save the password in the secret store.
        #[arg(long)]
        store: bool,
        /// Read the password from stdin (trims trailing CR/LF).
        #[arg(long, conflicts_with = "password_prompt")]
        password_stdin: bool,
        /// Enter the password interactively.
        #[arg(long)]
        password_prompt: bool,
        /// Volume name.
        #[arg(help = NAME_ARG_HELP)]
        name: String,
    },
    /// Mounts one or more volumes.
    #[command(after_help = MOUNT_COMMAND_AFTER_HELP)]
    Mount {
        /// Take passwords from the secret store.
        #[arg(long, conflicts_with = "password_stdin")]
        use_store: bool,
        /// Read one password from stdin and use it for every volume.
        #[arg(long)]
        password_stdin: bool,
        /// Volume names.
        #[arg(required = true, help = NAME_ARG_HELP)]
        names: Vec<String>,
    },
    /// Unmounts volumes and removes their mount directories.
    #[command(visible_alias = "unmount")]
    Umount {
        /// Unmount every mounted volume.
        #[arg(long, conflicts_with = "names")]
        all: bool,
        /// Volume names.
        #[arg(required_unless_present = "all", help = NAME_ARG_HELP)]
        names: Vec<String>,
    },
    /// Lists volumes with type and mount status.
    #[command(visible_alias = "ls")]
    List {
        /// Include entries of unknown type.
        #[arg(long)]
        all: bool,
        /// Print JSON output.
        #[arg(long)]
        json: bool,
    },
    /// Removes empty leftover directories under the mount root.
    Cleanup {
        /// Remove without asking.
        #[arg(long)]
        yes: bool,
    },
    /// Checks registry integrity and reconciles it with the volumes root.
    Verify {
        /// Print JSON output.
        #[arg(long)]
        json: bool,
    },
    /// Explains a stable error code with recovery guidance.
    #[command(after_help = EXPLAIN_COMMAND_AFTER_HELP)]
    Explain {
        /// Error code from stderr (for example: `E301`).
        #[arg(help = ERROR_CODE_ARG_HELP)]
        code: String,
    },
    /// Prints a freshly generated password.
    Passgen {
        /// Password length; defaults to `passgen.length` from config.
        #[arg(long)]
        length: Option<usize>,
    },
}

/// Volume type argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VolumeTypeArg {
    /// gocryptfs directory.
    Gocryptfs,
    /// VeraCrypt container.
    Veracrypt,
}

impl From<VolumeTypeArg> for BackendKind {
    fn from(value: VolumeTypeArg) -> Self {
        match value {
            VolumeTypeArg::Gocryptfs => BackendKind::Gocryptfs,
            VolumeTypeArg::Veracrypt => BackendKind::Veracrypt,
        }
    }
}

/// Error output format argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ErrorFormatArg {
    /// `error[E301]: ...` lines.
    Text,
    /// One JSON object per error.
    Json,
}

/// Executes CLI command and returns process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    commands::run(cli)
}

/// Renders an error for stderr with its stable code.
pub fn render_error(error: &CryptainerError, format: ErrorFormatArg) -> String {
    let code = classify_error_code(error);
    match format {
        ErrorFormatArg::Text => format!("error[{code}]: {error}"),
        ErrorFormatArg::Json => serde_json::json!({
            "error": {
                "code": code,
                "message": error.to_string(),
            }
        })
        .to_string(),
    }
}

#[cfg(test)]
mod unit_tests {
    use clap::{CommandFactory, Parser};

    use super::{render_error, Cli, Command, ErrorFormatArg, VolumeTypeArg};
    use crate::error::CryptainerError;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn create_accepts_short_flags() {
        let cli = Cli::parse_from(["cryptainer", "create", "-t", "veracrypt", "-s", "2G", "-a", "box.hc"]);
        match cli.command {
            Command::Create {
                volume_type,
                size,
                auto_mount,
                name,
                ..
            } => {
                assert_eq!(volume_type, VolumeTypeArg::Veracrypt);
                assert_eq!(size.as_deref(), Some("2G"));
                assert!(auto_mount);
                assert_eq!(name, "box.hc");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn umount_requires_names_or_all() {
        assert!(Cli::try_parse_from(["cryptainer", "umount"]).is_err());
        assert!(Cli::try_parse_from(["cryptainer", "umount", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["cryptainer", "umount", "--all", "box"]).is_err());
    }

    #[test]
    fn mount_store_and_stdin_conflict() {
        assert!(
            Cli::try_parse_from(["cryptainer", "mount", "--use-store", "--password-stdin", "box"])
                .is_err()
        );
    }

    #[test]
    fn render_error_includes_code() {
        let error = CryptainerError::NotMounted("box".to_owned()).for_volume("box");
        assert!(render_error(&error, ErrorFormatArg::Text).starts_with("error[E302]: "));
        let json: serde_json::Value =
            serde_json::from_str(&render_error(&error, ErrorFormatArg::Json)).unwrap();
        assert_eq!(json["error"]["code"], "E302");
    }

    #[test]
    fn help_mentions_error_code_format() {
        let help = Cli::command()
            .find_subcommand_mut("explain")
            .unwrap()
            .render_long_help()
            .to_string();
        assert!(help.contains("error[E301]"));
    }
}
