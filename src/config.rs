use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{CryptainerError, Result},
    fs_secure::{ensure_private_dir, write_private_file_atomic},
    paths::VolumePaths,
    secrets::{
        pass::DEFAULT_STORE_PREFIX,
        passgen::{DEFAULT_PASSWORD_LENGTH, MIN_PASSWORD_LENGTH},
    },
};

const CONFIG_VERSION_V1: u32 = 1;

/// Default config file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Default config directory under the home directory.
pub const DEFAULT_CONFIG_DIR: &str = ".cryptainer";
/// Environment variable selecting the config file.
pub const CONFIG_ENV_VAR: &str = "CRYPTAINER_CONFIG";

const DEFAULT_CONFIG_TEMPLATE: &str = r#"version = 1

[volumes]
# Directory holding encrypted volumes (gocryptfs directories, VeraCrypt containers).
# volumes_dir = "~/volumes"
# Directory under which volumes are mounted, one subdirectory per volume.
# mount_dir = "~/mnt"

[passgen]
length = 30

[store]
prefix = "cryptainer"

[misc]
auto_cleanup = false
"#;

/// Source used to select the effective config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigSource {
    /// Selected via `--config` CLI flag.
    Flag,
    /// Selected via `CRYPTAINER_CONFIG` environment variable.
    Env,
    /// Default location under the home directory.
    Default,
}

/// Resolved config selection before parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigSelection {
    /// Source used for selection.
    pub source: ConfigSource,
    /// Selected path; may not exist yet for the default source.
    pub path: PathBuf,
}

/// Raw TOML shape for one `config.toml` file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CryptainerConfigFile {
    /// Schema version.
    pub version: u32,
    /// Volume and mount roots.
    #[serde(default)]
    pub volumes: VolumesConfigFile,
    /// Password generator defaults.
    #[serde(default)]
    pub passgen: PassgenConfigFile,
    /// Secret store settings.
    #[serde(default)]
    pub store: StoreConfigFile,
    /// Miscellaneous switches.
    #[serde(default)]
    pub misc: MiscConfigFile,
}

/// Raw `[volumes]` section from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VolumesConfigFile {
    /// Volumes root.
    pub volumes_dir: Option<String>,
    /// Mount root.
    pub mount_dir: Option<String>,
}

/// Raw `[passgen]` section from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PassgenConfigFile {
    /// Generated password length.
    pub length: Option<usize>,
}

/// Raw `[store]` section from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StoreConfigFile {
    /// Entry prefix inside the password store.
    pub prefix: Option<String>,
}

/// Raw `[misc]` section from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MiscConfigFile {
    /// Remove residual mount directories without asking.
    pub auto_cleanup: Option<bool>,
}

/// Effective configuration with resolved paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptainerConfig {
    /// Config file this was loaded from.
    pub source_path: PathBuf,
    /// Directory holding the config, registry, and audit log.
    pub config_dir: PathBuf,
    /// Volumes root, if configured.
    pub volumes_dir: Option<PathBuf>,
    /// Mount root, if configured.
    pub mount_dir: Option<PathBuf>,
    /// Generated password length.
    pub passgen_length: usize,
    /// Secret store entry prefix.
    pub store_prefix: String,
    /// Automatic residual directory cleanup.
    pub auto_cleanup: bool,
}

impl CryptainerConfig {
    /// Built-in defaults for a config file that does not exist.
    pub fn defaults_for(source_path: impl AsRef<Path>) -> Result<Self> {
        let source_path = absolutize_path(source_path.as_ref(), &std::env::current_dir()?);
        Ok(Self {
            config_dir: parent_of(&source_path),
            source_path,
            volumes_dir: None,
            mount_dir: None,
            passgen_length: DEFAULT_PASSWORD_LENGTH,
            store_prefix: DEFAULT_STORE_PREFIX.to_owned(),
            auto_cleanup: false,
        })
    }

    /// Loads and validates a config file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let absolute_path = absolutize_path(path.as_ref(), &std::env::current_dir()?);
        if !absolute_path.exists() {
            return Err(CryptainerError::InvalidInput(format!(
                "config file does not exist: {}",
                absolute_path.display()
            )));
        }

        let raw = fs::read_to_string(&absolute_path)?;
        Self::parse_from_str(&raw, &absolute_path)
    }

    /// Parses config text as if it were read from `source_path`.
    pub fn parse_from_str(raw: &str, source_path: impl AsRef<Path>) -> Result<Self> {
        let parsed = toml::from_str::<CryptainerConfigFile>(raw).map_err(|error| {
            CryptainerError::InvalidInput(format!("invalid config TOML: {error}"))
        })?;
        build_config(parsed, source_path.as_ref())
    }

    /// Resolves the volume layout, applying CLI overrides.
    ///
    /// Both roots must be configured, exist as directories, and differ.
    pub fn volume_paths(
        &self,
        volumes_override: Option<&Path>,
        mount_override: Option<&Path>,
        cwd: &Path,
    ) -> Result<VolumePaths> {
        let volumes_dir = pick_root(
            volumes_override,
            self.volumes_dir.as_deref(),
            "volumes.volumes_dir",
            &self.source_path,
            cwd,
        )?;
        let mount_dir = pick_root(
            mount_override,
            self.mount_dir.as_deref(),
            "volumes.mount_dir",
            &self.source_path,
            cwd,
        )?;
        if volumes_dir == mount_dir {
            return Err(CryptainerError::InvalidInput(format!(
                "volumes_dir and mount_dir must differ: {}",
                volumes_dir.display()
            )));
        }
        Ok(VolumePaths::new(volumes_dir, mount_dir, &self.config_dir))
    }
}

/// Selects the config file: `--config`, then `CRYPTAINER_CONFIG`, then the default.
pub fn resolve_config_path(
    explicit_path: Option<&Path>,
    env_path: Option<&str>,
    home: Option<&Path>,
    cwd: impl AsRef<Path>,
) -> Result<ConfigSelection> {
    let cwd = cwd.as_ref();
    if let Some(path) = explicit_path {
        return Ok(ConfigSelection {
            source: ConfigSource::Flag,
            path: absolutize_path(path, cwd),
        });
    }

    if let Some(value) = env_path {
        if value.trim().is_empty() {
            return Err(CryptainerError::InvalidInput(format!(
                "{CONFIG_ENV_VAR} cannot be empty"
            )));
        }
        return Ok(ConfigSelection {
            source: ConfigSource::Env,
            path: absolutize_path(Path::new(value), cwd),
        });
    }

    let home = home.ok_or_else(|| {
        CryptainerError::InvalidInput(
            "cannot locate home directory; pass --config or set CRYPTAINER_CONFIG".to_owned(),
        )
    })?;
    Ok(ConfigSelection {
        source: ConfigSource::Default,
        path: home.join(DEFAULT_CONFIG_DIR).join(CONFIG_FILE_NAME),
    })
}

/// Template written when the default config file is missing.
pub fn default_config_template() -> &'static str {
    DEFAULT_CONFIG_TEMPLATE
}

/// Writes the default template to `path`, creating a private config directory.
pub fn write_default_config(path: &Path) -> Result<()> {
    ensure_private_dir(&parent_of(path))?;
    write_private_file_atomic(path, DEFAULT_CONFIG_TEMPLATE.as_bytes())
}

fn build_config(raw: CryptainerConfigFile, source_path: &Path) -> Result<CryptainerConfig> {
    if raw.version != CONFIG_VERSION_V1 {
        return Err(CryptainerError::InvalidInput(format!(
            "unsupported config version {} (expected {CONFIG_VERSION_V1})",
            raw.version
        )));
    }

    let source_path = absolutize_path(source_path, &std::env::current_dir()?);
    let source_dir = parent_of(&source_path);

    let volumes_dir = raw
        .volumes
        .volumes_dir
        .as_deref()
        .map(|value| resolve_path_value(value, &source_dir, "volumes.volumes_dir"))
        .transpose()?;
    let mount_dir = raw
        .volumes
        .mount_dir
        .as_deref()
        .map(|value| resolve_path_value(value, &source_dir, "volumes.mount_dir"))
        .transpose()?;

    let passgen_length = raw.passgen.length.unwrap_or(DEFAULT_PASSWORD_LENGTH);
    if passgen_length < MIN_PASSWORD_LENGTH {
        return Err(CryptainerError::InvalidInput(format!(
            "passgen.length must be at least {MIN_PASSWORD_LENGTH}"
        )));
    }

    let store_prefix = raw
        .store
        .prefix
        .unwrap_or_else(|| DEFAULT_STORE_PREFIX.to_owned());
    if store_prefix.trim().is_empty() || store_prefix.starts_with('/') {
        return Err(CryptainerError::InvalidInput(
            "store.prefix must be a non-empty relative entry path".to_owned(),
        ));
    }

    Ok(CryptainerConfig {
        config_dir: source_dir,
        source_path,
        volumes_dir,
        mount_dir,
        passgen_length,
        store_prefix,
        auto_cleanup: raw.misc.auto_cleanup.unwrap_or(false),
    })
}

fn pick_root(
    override_path: Option<&Path>,
    configured: Option<&Path>,
    label: &str,
    source_path: &Path,
    cwd: &Path,
) -> Result<PathBuf> {
    let candidate = match (override_path, configured) {
        (Some(path), _) => absolutize_path(path, cwd),
        (None, Some(path)) => path.to_path_buf(),
        (None, None) => {
            return Err(CryptainerError::InvalidInput(format!(
                "{label} is not configured; set it in {}",
                source_path.display()
            )))
        }
    };
    if !candidate.is_dir() {
        return Err(CryptainerError::InvalidInput(format!(
            "{label} is not an existing directory: {}",
            candidate.display()
        )));
    }
    Ok(candidate)
}

fn resolve_path_value(value: &str, source_dir: &Path, label: &str) -> Result<PathBuf> {
    if value.trim().is_empty() {
        return Err(CryptainerError::InvalidInput(format!(
            "{label} cannot be empty"
        )));
    }

    let expanded = shellexpand::full(value).map_err(|error| {
        CryptainerError::InvalidInput(format!("{label}: cannot expand `{value}`: {error}"))
    })?;
    let expanded = PathBuf::from(expanded.into_owned());
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        source_dir.join(expanded)
    };

    if let Ok(canonical) = fs::canonicalize(&absolute) {
        return Ok(canonical);
    }
    Ok(normalize_path(&absolute))
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn normalize_path(path: &Path) -> PathBuf {
    let is_absolute = path.is_absolute();
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() && !is_absolute {
                    normalized.push("..");
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    if normalized.as_os_str().is_empty() {
        if is_absolute {
            PathBuf::from(std::path::MAIN_SEPARATOR.to_string())
        } else {
            PathBuf::from(".")
        }
    } else {
        normalized
    }
}

fn absolutize_path(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&cwd.join(path))
    }
}
