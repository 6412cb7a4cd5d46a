use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    audit::{AuditEvent, AuditLog},
    error::{CryptainerError, Result},
    paths::VolumePaths,
    registry::{TypeResolution, VolumeRegistry},
    secrets::{passgen::PasswordGenerator, SecretPrompt, SecretSource, SecretStore},
    types::{BackendKind, SecretValue, VolumeName, VolumeType},
};

use super::{
    backend::{CreateRequest, MountRequest, VolumeBackend},
    cleanup::{sweep_mount_root, AutoApprove, CleanupDecider, CleanupReport},
    gocryptfs::GocryptfsBackend,
    mount_table::{MountSnapshot, MountStatus, MountTable},
    veracrypt::{validate_container_name, VeracryptBackend},
};

/// One adapter per backend kind.
pub struct Backends {
    /// gocryptfs adapter.
    pub gocryptfs: Box<dyn VolumeBackend>,
    /// VeraCrypt adapter.
    pub veracrypt: Box<dyn VolumeBackend>,
}

impl Backends {
    /// Adapters that call the system binaries.
    pub fn system() -> Self {
        Self {
            gocryptfs: Box::new(GocryptfsBackend::new()),
            veracrypt: Box::new(VeracryptBackend::new()),
        }
    }

    fn select(&self, kind: BackendKind) -> &dyn VolumeBackend {
        match kind {
            BackendKind::Gocryptfs => self.gocryptfs.as_ref(),
            BackendKind::Veracrypt => self.veracrypt.as_ref(),
        }
    }
}

/// Parameters for [`VolumeController::create`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Backend that owns the new volume.
    pub kind: BackendKind,
    /// Requested volume name; validated by the controller.
    pub name: String,
    /// Caller-supplied secret; generated when absent.
    pub secret: Option<SecretValue>,
    /// Container size, accepted only by sized backends.
    pub size: Option<String>,
    /// Mount right after creation.
    pub auto_mount: bool,
    /// Upsert the secret into the secret store.
    pub store_secret: bool,
}

impl CreateOptions {
    /// Options with a generated secret, default size and no follow-up steps.
    pub fn new(kind: BackendKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            secret: None,
            size: None,
            auto_mount: false,
            store_secret: false,
        }
    }
}

/// Result of an optional follow-up step after create.
#[derive(Debug)]
pub enum StepOutcome {
    /// Step was not requested.
    Skipped,
    /// Step completed.
    Succeeded,
    /// Step failed; creation itself still stands.
    Failed(CryptainerError),
}

impl StepOutcome {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => StepOutcome::Succeeded,
            Err(error) => StepOutcome::Failed(error),
        }
    }
}

/// Outcome of a successful create.
#[derive(Debug)]
pub struct CreateOutcome {
    /// Volume name.
    pub name: VolumeName,
    /// Owning backend.
    pub kind: BackendKind,
    /// Artifact location.
    pub storage_path: PathBuf,
    /// Mount location.
    pub mount_path: PathBuf,
    /// Secret generated by the controller, when none was supplied.
    pub generated_secret: Option<SecretValue>,
    /// Secret store upsert.
    pub stored: StepOutcome,
    /// Auto-mount.
    pub mounted: StepOutcome,
}

/// Outcome of a successful mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOutcome {
    /// Volume name.
    pub name: VolumeName,
    /// Owning backend.
    pub kind: BackendKind,
    /// Mount location.
    pub mount_path: PathBuf,
}

/// Outcome of a successful unmount.
#[derive(Debug)]
pub struct UnmountOutcome {
    /// Volume name.
    pub name: VolumeName,
    /// Owning backend.
    pub kind: BackendKind,
    /// Former mount location, now removed.
    pub mount_path: PathBuf,
    /// Post-unmount sweep, when automatic cleanup is enabled.
    pub cleanup: Option<CleanupReport>,
}

/// One listed volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeEntry {
    /// Volume name.
    pub name: VolumeName,
    /// Resolved type.
    #[serde(rename = "type")]
    pub volume_type: VolumeType,
    /// Live mount status.
    pub status: MountStatus,
    /// Artifact location.
    pub storage_path: PathBuf,
}

/// Volume listing plus the mount table warning, if any.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeListing {
    /// Entries sorted by name.
    pub volumes: Vec<VolumeEntry>,
    /// Set when mount status could not be determined.
    pub warning: Option<String>,
}

/// Registry record contradicted by structural detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleRecord {
    /// Volume name.
    pub name: VolumeName,
    /// Backend in the registry.
    pub recorded: BackendKind,
    /// Backend found on disk.
    pub detected: BackendKind,
}

/// Volume detected on disk without a registry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnregisteredVolume {
    /// Volume name.
    pub name: VolumeName,
    /// Backend found on disk.
    pub detected: BackendKind,
}

/// Registry reconciliation report.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    /// Registry file.
    pub registry_path: PathBuf,
    /// Integrity tag matches the entries.
    pub integrity_ok: bool,
    /// Records whose type disagrees with detection.
    pub stale: Vec<StaleRecord>,
    /// Registered names with no storage entry.
    pub missing_storage: Vec<VolumeName>,
    /// Detected volumes with no record.
    pub unregistered: Vec<UnregisteredVolume>,
}

impl VerifyReport {
    /// Returns true when nothing needs attention.
    pub fn is_clean(&self) -> bool {
        self.integrity_ok
            && self.stale.is_empty()
            && self.missing_storage.is_empty()
            && self.unregistered.is_empty()
    }
}

/// Coordinator for volume lifecycle operations.
pub struct VolumeController {
    paths: VolumePaths,
    registry: VolumeRegistry,
    backends: Backends,
    mount_table: Box<dyn MountTable>,
    audit_log: AuditLog,
    password_generator: PasswordGenerator,
    secret_store: Option<Box<dyn SecretStore>>,
    secret_prompt: Option<Box<dyn SecretPrompt>>,
    auto_cleanup: bool,
}

impl VolumeController {
    /// Constructs a controller and loads the registry.
    pub fn new(
        paths: VolumePaths,
        backends: Backends,
        mount_table: Box<dyn MountTable>,
        audit_log: AuditLog,
    ) -> Result<Self> {
        let registry = VolumeRegistry::load_or_create(&paths)?;
        Ok(Self {
            paths,
            registry,
            backends,
            mount_table,
            audit_log,
            password_generator: PasswordGenerator::default(),
            secret_store: None,
            secret_prompt: None,
            auto_cleanup: false,
        })
    }

    /// Uses `generator` for secrets created without a caller value.
    pub fn with_password_generator(mut self, generator: PasswordGenerator) -> Self {
        self.password_generator = generator;
        self
    }

    /// Enables [`SecretSource::Store`] and store upserts on create.
    pub fn with_secret_store(mut self, store: Box<dyn SecretStore>) -> Self {
        self.secret_store = Some(store);
        self
    }

    /// Enables [`SecretSource::Prompt`].
    pub fn with_secret_prompt(mut self, prompt: Box<dyn SecretPrompt>) -> Self {
        self.secret_prompt = Some(prompt);
        self
    }

    /// Sweeps the mount root automatically after every unmount.
    pub fn with_auto_cleanup(mut self, enabled: bool) -> Self {
        self.auto_cleanup = enabled;
        self
    }

    /// Path layout.
    pub fn paths(&self) -> &VolumePaths {
        &self.paths
    }

    /// Loaded registry.
    pub fn registry(&self) -> &VolumeRegistry {
        &self.registry
    }

    /// Creates, registers, and optionally stores and mounts a new volume.
    pub fn create(&mut self, options: CreateOptions) -> Result<CreateOutcome> {
        let name = VolumeName::new(&options.name)?;
        self.create_named(&name, options)
            .map_err(|error| error.for_volume(name.as_str()))
    }

    fn create_named(&mut self, name: &VolumeName, options: CreateOptions) -> Result<CreateOutcome> {
        let kind = options.kind;
        if options.size.is_some() && !kind.accepts_size() {
            return Err(CryptainerError::InvalidInput(format!(
                "{kind} volumes do not take a size"
            )));
        }
        if options.store_secret && self.secret_store.is_none() {
            return Err(CryptainerError::InvalidInput(
                "no secret store is configured".to_owned(),
            ));
        }

        let storage_path = self.paths.storage_path(name);
        if fs::symlink_metadata(&storage_path).is_ok() {
            return Err(CryptainerError::AlreadyExists(format!(
                "volume `{name}` at {}",
                storage_path.display()
            )));
        }
        if kind == BackendKind::Veracrypt {
            validate_container_name(name.as_str())?;
        }

        let (secret, generated) = match options.secret {
            Some(secret) if secret.is_empty() => {
                return Err(CryptainerError::InvalidInput("secret is empty".to_owned()))
            }
            Some(secret) => (secret, false),
            None => (self.password_generator.generate(), true),
        };

        self.backends.select(kind).create(
            &CreateRequest {
                storage_path: storage_path.clone(),
                size: options.size,
            },
            &secret,
        )?;
        if let Err(error) = self.registry.register(name, kind) {
            discard_storage(kind, &storage_path);
            return Err(error);
        }
        tracing::info!(volume = %name, backend = %kind, "volume created");
        self.audit_log.record(AuditEvent::VolumeCreated {
            volume: name.clone(),
            backend: kind,
        });

        let stored = match (&self.secret_store, options.store_secret) {
            (Some(store), true) => StepOutcome::from_result(store.upsert(name, kind.as_str(), &secret)),
            _ => StepOutcome::Skipped,
        };
        if let StepOutcome::Failed(error) = &stored {
            tracing::warn!(volume = %name, %error, "storing volume secret failed");
        }

        let mounted = if options.auto_mount {
            let snapshot = self.mount_table.refresh();
            StepOutcome::from_result(
                self.mount_resolved(name, kind, &snapshot, &secret)
                    .map(|_| ()),
            )
        } else {
            StepOutcome::Skipped
        };
        if let StepOutcome::Failed(error) = &mounted {
            tracing::warn!(volume = %name, %error, "auto-mount after create failed");
        }

        Ok(CreateOutcome {
            name: name.clone(),
            kind,
            mount_path: self.paths.mount_path(name),
            storage_path,
            generated_secret: generated.then_some(secret),
            stored,
            mounted,
        })
    }

    /// Mounts `name` with a secret from exactly one `source`.
    pub fn mount(&mut self, name: &str, source: SecretSource) -> Result<MountOutcome> {
        let name = VolumeName::new(name)?;
        self.mount_named(&name, source)
            .map_err(|error| error.for_volume(name.as_str()))
    }

    fn mount_named(&mut self, name: &VolumeName, source: SecretSource) -> Result<MountOutcome> {
        let snapshot = self.mount_table.refresh();
        let kind = self.resolve_backend(name)?;

        let mount_path = self.paths.mount_path(name);
        if let (true, Some(live)) = snapshot.is_mounted(&mount_path) {
            return Err(CryptainerError::AlreadyMounted {
                name: name.to_string(),
                mount_path: live,
            });
        }

        let secret = self.resolve_secret(name, source)?;
        self.mount_resolved(name, kind, &snapshot, &secret)
    }

    fn mount_resolved(
        &self,
        name: &VolumeName,
        kind: BackendKind,
        snapshot: &MountSnapshot,
        secret: &SecretValue,
    ) -> Result<MountOutcome> {
        if let Some(warning) = snapshot.warning() {
            tracing::warn!(volume = %name, %warning, "mounting without a mount table snapshot");
        }
        let mount_path = self.paths.mount_path(name);
        self.backends.select(kind).mount(
            &MountRequest {
                storage_path: self.paths.storage_path(name),
                mount_path: mount_path.clone(),
            },
            secret,
        )?;
        tracing::info!(volume = %name, backend = %kind, mount_path = %mount_path.display(), "volume mounted");
        self.audit_log.record(AuditEvent::VolumeMounted {
            volume: name.clone(),
            backend: kind,
            mount_path: mount_path.clone(),
        });
        Ok(MountOutcome {
            name: name.clone(),
            kind,
            mount_path,
        })
    }

    /// Unmounts `name` and removes its mount directory.
    pub fn unmount(&mut self, name: &str) -> Result<UnmountOutcome> {
        let name = VolumeName::new(name)?;
        self.unmount_named(&name)
            .map_err(|error| error.for_volume(name.as_str()))
    }

    fn unmount_named(&mut self, name: &VolumeName) -> Result<UnmountOutcome> {
        let snapshot = self.mount_table.refresh();
        let kind = self.resolve_backend(name)?;

        let mount_path = self.paths.mount_path(name);
        if snapshot.is_degraded() {
            tracing::warn!(volume = %name, "mount table unavailable; delegating to backend");
        } else if !snapshot.is_mounted(&mount_path).0 {
            return Err(CryptainerError::NotMounted(name.to_string()));
        }

        self.backends.select(kind).unmount(&mount_path)?;
        tracing::info!(volume = %name, backend = %kind, "volume unmounted");
        self.audit_log.record(AuditEvent::VolumeUnmounted {
            volume: name.clone(),
            backend: kind,
        });

        let cleanup = if self.auto_cleanup {
            match self.cleanup(&mut AutoApprove) {
                Ok(report) => Some(report),
                Err(error) => {
                    tracing::warn!(%error, "post-unmount cleanup failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(UnmountOutcome {
            name: name.clone(),
            kind,
            mount_path,
            cleanup,
        })
    }

    /// Lists volumes under the volumes root with live status, sorted by name.
    pub fn list(&mut self, show_unknown: bool) -> Result<VolumeListing> {
        let snapshot = self.mount_table.refresh();
        let mut volumes = Vec::new();
        for name in self.storage_names()? {
            let resolution = self.registry.resolve(&name);
            self.refresh_if_stale(&name, resolution);
            let volume_type = resolution.effective();
            if volume_type.is_unknown() && !show_unknown {
                continue;
            }
            volumes.push(VolumeEntry {
                status: snapshot.status(&self.paths.mount_path(&name)),
                storage_path: self.paths.storage_path(&name),
                name,
                volume_type,
            });
        }
        Ok(VolumeListing {
            volumes,
            warning: snapshot.warning().map(str::to_owned),
        })
    }

    /// Names of known volumes that are currently mounted.
    pub fn mounted_names(&mut self) -> Result<Vec<VolumeName>> {
        Ok(self
            .list(false)?
            .volumes
            .into_iter()
            .filter(|entry| entry.status.is_mounted())
            .map(|entry| entry.name)
            .collect())
    }

    /// Names of known volumes confirmed not mounted.
    pub fn unmounted_names(&mut self) -> Result<Vec<VolumeName>> {
        Ok(self
            .list(false)?
            .volumes
            .into_iter()
            .filter(|entry| entry.status == MountStatus::NotMounted)
            .map(|entry| entry.name)
            .collect())
    }

    /// Sweeps residual empty directories under the mount root.
    pub fn cleanup(&self, decider: &mut dyn CleanupDecider) -> Result<CleanupReport> {
        let snapshot = self.mount_table.refresh();
        sweep_mount_root(self.paths.mount_root(), &snapshot, decider, &self.audit_log)
    }

    /// Reconciles the registry against the volumes root without modifying it.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut stale = Vec::new();
        let mut unregistered = Vec::new();
        for name in self.storage_names()? {
            let resolution = self.registry.resolve(&name);
            match (resolution.recorded, resolution.detected.backend()) {
                (Some(recorded), Some(detected)) if recorded != detected => {
                    stale.push(StaleRecord {
                        name,
                        recorded,
                        detected,
                    });
                }
                (None, Some(detected)) => unregistered.push(UnregisteredVolume { name, detected }),
                _ => {}
            }
        }
        let missing_storage = self
            .registry
            .names()
            .filter(|name| fs::symlink_metadata(self.paths.storage_path(name)).is_err())
            .cloned()
            .collect();

        Ok(VerifyReport {
            registry_path: self.registry.path().to_path_buf(),
            integrity_ok: self.registry.verify_integrity(),
            stale,
            missing_storage,
            unregistered,
        })
    }

    fn resolve_backend(&mut self, name: &VolumeName) -> Result<BackendKind> {
        let resolution = self.registry.resolve(name);
        self.refresh_if_stale(name, resolution);
        resolution
            .effective()
            .backend()
            .ok_or_else(|| CryptainerError::TypeUnknown(name.to_string()))
    }

    fn refresh_if_stale(&mut self, name: &VolumeName, resolution: TypeResolution) {
        if !resolution.is_stale() {
            return;
        }
        let Some(detected) = resolution.detected.backend() else {
            return;
        };
        match self.registry.register(name, detected) {
            Ok(()) => {
                tracing::info!(volume = %name, backend = %detected, "registry record refreshed");
                self.audit_log.record(AuditEvent::RegistryRefreshed {
                    volume: name.clone(),
                    previous: resolution.recorded,
                    detected,
                });
            }
            Err(error) => {
                tracing::warn!(volume = %name, %error, "failed to refresh registry record");
            }
        }
    }

    fn resolve_secret(&self, name: &VolumeName, source: SecretSource) -> Result<SecretValue> {
        let secret = match source {
            SecretSource::Value(secret) => secret,
            SecretSource::Prompt => {
                let prompt = self.secret_prompt.as_ref().ok_or_else(|| {
                    CryptainerError::SecretSourceFailure("no interactive prompt available".to_owned())
                })?;
                prompt.prompt_secret(name, false)?
            }
            SecretSource::Store => {
                let store = self.secret_store.as_ref().ok_or_else(|| {
                    CryptainerError::SecretSourceFailure("no secret store is configured".to_owned())
                })?;
                match store.lookup(name) {
                    Ok(Some(secret)) => secret,
                    Ok(None) => {
                        return Err(CryptainerError::SecretSourceFailure(format!(
                            "no store entry for `{name}`"
                        )))
                    }
                    Err(error @ CryptainerError::SecretSourceFailure(_)) => return Err(error),
                    Err(error) => {
                        return Err(CryptainerError::SecretSourceFailure(error.to_string()))
                    }
                }
            }
        };
        if secret.is_empty() {
            return Err(CryptainerError::SecretSourceFailure("secret is empty".to_owned()));
        }
        Ok(secret)
    }

    fn storage_names(&self) -> Result<Vec<VolumeName>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.paths.volumes_root())? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(raw) = file_name.to_str() else {
                tracing::debug!(entry = ?file_name, "skipping non-UTF-8 entry in volumes root");
                continue;
            };
            match VolumeName::new(raw) {
                Ok(name) => names.push(name),
                Err(error) => tracing::debug!(entry = raw, %error, "skipping entry in volumes root"),
            }
        }
        names.sort();
        Ok(names)
    }
}

fn discard_storage(kind: BackendKind, storage_path: &Path) {
    let removal = match kind {
        BackendKind::Gocryptfs => fs::remove_dir_all(storage_path),
        BackendKind::Veracrypt => fs::remove_file(storage_path),
    };
    match removal {
        Ok(()) => tracing::warn!(
            path = %storage_path.display(),
            "registry write failed; removed new volume storage"
        ),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => tracing::warn!(
            path = %storage_path.display(),
            %error,
            "registry write failed and new volume storage could not be removed"
        ),
    }
}
