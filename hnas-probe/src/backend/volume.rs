//! References to volume files stored on the array.
//!
//! The NFS driver keeps every volume and snapshot as a plain file named
//! after its id, somewhere like
//! `/mnt/lb/evs12/fs-by-name/FS-TestCG/nfs_cinder/volume-8aa...`.

use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::error::{BackendError, Result};
use super::hnas_backend::HnasBackend;

/// Root under which the management host mounts every EVS filesystem
pub const VOLUME_SEARCH_ROOT: &str = "/mnt/lb";
/// Prefix given to file names of unmanaged volumes
pub const UNMANAGED_PREFIX: &str = "unmanage-";

const FS_BY_NAME: &str = "fs-by-name/";
const GIB: f64 = (1u64 << 30) as f64;

/// Where a volume file lives, in host and SSC terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeLocation {
    /// Path on the management host
    pub unix_path: String,
    /// HNAS filesystem holding the file
    pub fs_name: String,
    /// Path of the file inside its filesystem, as SSC sees it
    pub ssc_path: String,
}

impl VolumeLocation {
    /// Split a `/mnt/lb/.../fs-by-name/<fs>/<path>` path.
    pub fn from_path(path: &str) -> Option<Self> {
        let (_, rest) = path.split_once(FS_BY_NAME)?;
        let (fs_name, inner) = rest.split_once('/')?;
        if fs_name.is_empty() || inner.is_empty() {
            return None;
        }
        Some(Self {
            unix_path: path.to_string(),
            fs_name: fs_name.to_string(),
            ssc_path: format!("/{}", inner),
        })
    }
}

/// Pick the volume file out of `find` output.
///
/// Only paths reached through `fs-by-name` count; the same file also shows
/// up under the numeric filesystem directories.
pub fn find_volume_location(find_output: &str, uuid: &str) -> Result<VolumeLocation> {
    let mut found: Option<VolumeLocation> = None;
    for path in find_output.lines().map(str::trim) {
        let Some(location) = VolumeLocation::from_path(path) else {
            continue;
        };
        if let Some(first) = &found {
            return Err(BackendError::DuplicateVolume {
                first: first.unix_path.clone(),
                second: location.unix_path,
            });
        }
        found = Some(location);
    }
    found.ok_or_else(|| BackendError::VolumeNotFound(uuid.to_string()))
}

fn with_unmanaged_prefix(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, file)) => format!("{}/{}{}", dir, UNMANAGED_PREFIX, file),
        None => format!("{}{}", UNMANAGED_PREFIX, path),
    }
}

/// A volume or snapshot file on an HNAS backend.
#[derive(Debug)]
pub struct VolumeReference<'a> {
    backend: &'a HnasBackend,
    uuid: Uuid,
    evs_id: String,
    location: VolumeLocation,
}

impl<'a> VolumeReference<'a> {
    pub(crate) async fn locate(backend: &'a HnasBackend, uuid: Uuid, evs_id: String) -> Result<Self> {
        let location = Self::search(backend, &uuid).await?;
        Ok(Self {
            backend,
            uuid,
            evs_id,
            location,
        })
    }

    async fn search(backend: &HnasBackend, uuid: &Uuid) -> Result<VolumeLocation> {
        let id = uuid.to_string();
        let output = backend
            .client()
            .permissive_find(VOLUME_SEARCH_ROOT, &format!("*{}", id))
            .await?;
        let location = find_volume_location(&output, &id)?;
        debug!(volume = %id, path = %location.unix_path, "Located volume file");
        Ok(location)
    }

    /// Search the array again, e.g. after the driver renamed the file.
    pub async fn refresh(&mut self) -> Result<()> {
        self.location = Self::search(self.backend, &self.uuid).await?;
        Ok(())
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    pub fn evs_id(&self) -> &str {
        &self.evs_id
    }

    pub fn location(&self) -> &VolumeLocation {
        &self.location
    }

    pub fn unix_path(&self) -> &str {
        &self.location.unix_path
    }

    pub fn fs_name(&self) -> &str {
        &self.location.fs_name
    }

    pub fn ssc_path(&self) -> &str {
        &self.location.ssc_path
    }

    /// NFS URL cinder accepts when managing this file into service `svc_idx`,
    /// e.g. `172.24.49.34:/nfs_cinder/volume-8aa...`.
    ///
    /// Built from the last located path; call [`refresh`](Self::refresh)
    /// first if the file may have moved.
    pub fn nfs_url(&self, svc_idx: usize) -> Result<String> {
        let service = self.backend.service(svc_idx)?;
        let relative = self
            .location
            .unix_path
            .rsplit(service.export_path.as_str())
            .next()
            .unwrap_or_default()
            .trim_start_matches('/');
        Ok(format!("{}/{}", service.hdp.trim_end_matches('/'), relative))
    }

    /// Predict the rename the driver applies when unmanaging the volume.
    pub fn mark_as_unmanaged(&mut self) {
        self.location.unix_path = with_unmanaged_prefix(&self.location.unix_path);
        self.location.ssc_path = with_unmanaged_prefix(&self.location.ssc_path);
    }

    /// First `num_bytes` bytes of the file.
    pub async fn first_bytes(&self, num_bytes: usize) -> Result<String> {
        let command = format!("dd if={} bs=1 count={}", self.unix_path(), num_bytes);
        self.backend.client().exec_command(&command, true).await
    }

    /// Whether `ls` lists the file. Errors from the array are returned as is.
    pub async fn exists(&self) -> Result<bool> {
        let output = self
            .backend
            .client()
            .exec_command(&format!("ls {}", self.unix_path()), false)
            .await?;
        Ok(!output.trim().is_empty())
    }

    pub async fn size_bytes(&self) -> Result<u64> {
        let output = self
            .backend
            .client()
            .exec_command(&format!("stat -c %s {}", self.unix_path()), false)
            .await?;
        output
            .trim()
            .parse::<u64>()
            .map_err(|_| BackendError::InvalidOutput(format!("invalid file size: {}", output.trim())))
    }

    pub async fn size_gib(&self) -> Result<f64> {
        Ok(self.size_bytes().await? as f64 / GIB)
    }

    /// Delete the file through SSC, bypassing cinder.
    #[instrument(skip(self), fields(volume = %self.uuid))]
    pub async fn rm_via_ssc(&self) -> Result<String> {
        info!(path = %self.ssc_path(), "Deleting volume file via ssc");
        self.backend
            .ssc_rm(&self.evs_id, self.fs_name(), self.ssc_path(), true)
            .await
    }
}
