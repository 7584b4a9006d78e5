// ABOUTME: Materializes artifacts into private, integrity-checked directories.
// ABOUTME: The returned guard wipes the directory on every exit path.

mod error;
mod layout;
mod wipe;

pub use error::{StageError, StageErrorKind};
pub use layout::{COMPOSE_FILES, find_chart_root, find_compose_file};
pub use wipe::wipe_dir;

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{Artifact, BackendKind, ENV_DOCUMENT, VALUES_DOCUMENT};
use crate::types::ArtifactId;

use error::{ExtractSnafu, IntegritySnafu, WorkspaceSnafu, WriteSnafu};

const PAYLOAD_FILE: &str = "artifact.bundle";
const BUNDLE_DIR: &str = "bundle";
const SIDE_DIR: &str = "side";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Writes artifacts below a base directory.
#[derive(Debug, Clone)]
pub struct Stager {
    base_dir: PathBuf,
    secure_wipe: bool,
}

impl Stager {
    pub fn new(base_dir: impl Into<PathBuf>, secure_wipe: bool) -> Self {
        Self {
            base_dir: base_dir.into(),
            secure_wipe,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Stage `artifact` into a fresh directory.
    ///
    /// The checksum is verified before anything is extracted. Blocking; call
    /// from `spawn_blocking` inside async code.
    pub fn stage(&self, artifact: &Artifact) -> Result<StagedArtifact, StageError> {
        let dir = self.base_dir.join(format!(
            "drydock-{}-{}",
            artifact.id.short(),
            &Uuid::new_v4().simple().to_string()[..8]
        ));
        create_private_dir(&self.base_dir, &dir)?;

        // From here on the guard owns the directory, so any early return wipes it.
        let mut staged = StagedArtifact {
            dir: dir.clone(),
            root: dir.clone(),
            compose_file: None,
            side_documents: BTreeMap::new(),
            artifact_id: artifact.id,
            version: artifact.version.clone(),
            backend_kind: artifact.backend_kind,
            secure_wipe: self.secure_wipe,
            cleaned: false,
        };

        let payload_path = dir.join(PAYLOAD_FILE);
        fs::write(&payload_path, &artifact.payload).context(WriteSnafu {
            path: payload_path.clone(),
        })?;

        verify_checksum(&payload_path, &artifact.checksum)?;
        debug!(artifact = %artifact.id, "checksum verified");

        let bundle_dir = dir.join(BUNDLE_DIR);
        fs::create_dir(&bundle_dir).context(WorkspaceSnafu {
            path: bundle_dir.clone(),
        })?;
        extract(&payload_path, &bundle_dir)?;

        match artifact.backend_kind {
            BackendKind::Helm => {
                staged.root = find_chart_root(&bundle_dir)?;
            }
            BackendKind::Compose => {
                let compose_file = find_compose_file(&bundle_dir)?;
                staged.root = compose_file
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| bundle_dir.clone());
                staged.compose_file = Some(compose_file);
            }
        }

        for (name, content) in &artifact.side_documents {
            let path = side_document_path(&staged, name)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context(WorkspaceSnafu {
                    path: parent.to_path_buf(),
                })?;
            }
            fs::write(&path, content).context(WriteSnafu { path: path.clone() })?;
            staged.side_documents.insert(name.clone(), path);
        }

        info!(
            artifact = %artifact.id,
            version = %artifact.version,
            dir = %dir.display(),
            "artifact staged"
        );
        Ok(staged)
    }
}

/// A staged artifact on local disk.
///
/// Dropping it wipes the staging directory; [`StagedArtifact::cleanup`] does
/// the same but reports errors.
#[derive(Debug)]
pub struct StagedArtifact {
    dir: PathBuf,
    root: PathBuf,
    compose_file: Option<PathBuf>,
    side_documents: BTreeMap<String, PathBuf>,
    artifact_id: ArtifactId,
    version: String,
    backend_kind: BackendKind,
    secure_wipe: bool,
    cleaned: bool,
}

impl StagedArtifact {
    /// Top-level staging directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Chart directory for Helm, compose project directory for Compose.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compose_file(&self) -> Option<&Path> {
        self.compose_file.as_deref()
    }

    pub fn side_document(&self, name: &str) -> Option<&Path> {
        self.side_documents.get(name).map(PathBuf::as_path)
    }

    pub fn values_file(&self) -> Option<&Path> {
        self.side_document(VALUES_DOCUMENT)
    }

    pub fn env_file(&self) -> Option<&Path> {
        self.side_document(ENV_DOCUMENT)
    }

    pub fn artifact_id(&self) -> ArtifactId {
        self.artifact_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend_kind
    }

    /// Wipe the staging directory now.
    pub fn cleanup(mut self) -> io::Result<()> {
        self.cleaned = true;
        wipe_dir(&self.dir, self.secure_wipe)
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        if let Err(e) = wipe_dir(&self.dir, self.secure_wipe) {
            warn!(dir = %self.dir.display(), "failed to wipe staging directory: {}", e);
        }
    }
}

/// Compare the file's SHA-256 with the recorded checksum.
///
/// Accepts an optional `sha256:` prefix and any letter case.
fn verify_checksum(path: &Path, expected: &str) -> Result<(), StageError> {
    let mut file = File::open(path).context(WriteSnafu {
        path: path.to_path_buf(),
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).context(WriteSnafu {
        path: path.to_path_buf(),
    })?;
    let actual = hex::encode(hasher.finalize());

    let expected = normalize_checksum(expected);
    if actual != expected {
        return IntegritySnafu { expected, actual }.fail();
    }
    Ok(())
}

fn normalize_checksum(raw: &str) -> String {
    let trimmed = raw.trim();
    let digest = trimmed
        .strip_prefix("sha256:")
        .or_else(|| trimmed.strip_prefix("SHA256:"))
        .unwrap_or(trimmed);
    digest.to_ascii_lowercase()
}

/// Unpack a gzip-compressed or plain tar archive into `dest`.
fn extract(archive: &Path, dest: &Path) -> Result<(), StageError> {
    let mut magic = [0u8; 2];
    let is_gzip = File::open(archive)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| magic == GZIP_MAGIC)
        .unwrap_or(false);

    let file = File::open(archive).context(ExtractSnafu)?;
    if is_gzip {
        unpack(tar::Archive::new(GzDecoder::new(file)), dest)
    } else {
        unpack(tar::Archive::new(file), dest)
    }
}

fn unpack<R: Read>(mut archive: tar::Archive<R>, dest: &Path) -> Result<(), StageError> {
    archive.set_preserve_permissions(false);
    for entry in archive.entries().context(ExtractSnafu)? {
        let mut entry = entry.context(ExtractSnafu)?;
        let path = entry.path().context(ExtractSnafu)?.into_owned();
        // unpack_in refuses absolute paths and `..` components and reports
        // that by returning false.
        if !entry.unpack_in(dest).context(ExtractSnafu)? {
            return Err(StageError::UnsafeEntry { entry: path });
        }
    }
    Ok(())
}

fn side_document_path(staged: &StagedArtifact, name: &str) -> Result<PathBuf, StageError> {
    match name {
        VALUES_DOCUMENT => Ok(staged.dir.join("values.yaml")),
        ENV_DOCUMENT => Ok(staged.root.join(".env")),
        other => {
            let valid = !other.is_empty()
                && !other.starts_with('.')
                && other
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
            if !valid {
                return Err(StageError::SideDocumentName {
                    name: other.to_string(),
                });
            }
            Ok(staged.dir.join(SIDE_DIR).join(other))
        }
    }
}

#[cfg(unix)]
fn create_private_dir(base: &Path, dir: &Path) -> Result<(), StageError> {
    use std::os::unix::fs::DirBuilderExt;

    fs::create_dir_all(base).context(WorkspaceSnafu {
        path: base.to_path_buf(),
    })?;
    fs::DirBuilder::new()
        .mode(0o700)
        .create(dir)
        .context(WorkspaceSnafu {
            path: dir.to_path_buf(),
        })
}

#[cfg(not(unix))]
fn create_private_dir(base: &Path, dir: &Path) -> Result<(), StageError> {
    fs::create_dir_all(base).context(WorkspaceSnafu {
        path: base.to_path_buf(),
    })?;
    fs::create_dir(dir).context(WorkspaceSnafu {
        path: dir.to_path_buf(),
    })
}
