use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::client::HnasClient;
use super::error::{BackendError, Result};
use super::volume::VolumeReference;
use crate::config::{BackendConfig, HnasConfig, split_hdp};
use crate::remote::CommandRunner;
use crate::retry::{RetryOutcome, RetryPolicy, retry};
use crate::ssc::EvsRecord;

/// A volume file together with the backend holding it.
pub type LocatedVolume<'a> = (&'a HnasBackend, VolumeReference<'a>);

/// One HNAS service of a backend: a cinder pool backed by an NFS export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub pool_name: String,
    /// Export URL as given to the driver, e.g. `172.24.49.21:/nfs_cinder`
    pub hdp: String,
    /// Address of the EVS serving the export
    pub evs_ip: String,
    /// Export path without the leading slash, e.g. `nfs_cinder`
    pub export_path: String,
}

impl Service {
    pub fn new(pool_name: &str, hdp: &str) -> Result<Self> {
        let (evs_ip, export_path) = split_hdp(hdp)
            .ok_or_else(|| BackendError::InvalidArgument(format!("invalid hdp '{}'", hdp)))?;
        Ok(Self {
            pool_name: pool_name.to_string(),
            hdp: hdp.to_string(),
            evs_ip: evs_ip.to_string(),
            export_path: export_path.to_string(),
        })
    }
}

/// A cinder backend living on an HNAS array.
///
/// Holds the shell client to the array together with the services
/// configured for the backend and the EVS serving each of them.
pub struct HnasBackend {
    name: String,
    volume_backend_name: Option<String>,
    cinder_manage_host: String,
    services: Vec<Service>,
    evs: Vec<EvsRecord>,
    client: Arc<HnasClient>,
}

impl fmt::Debug for HnasBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HnasBackend")
            .field("name", &self.name)
            .field("services", &self.services)
            .field("evs", &self.evs.iter().map(|e| e.id.as_str()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl HnasBackend {
    /// Build a backend from its config section and resolve its EVS.
    #[instrument(skip(config, cinder_manage_host, runner))]
    pub async fn connect(
        name: &str,
        config: &BackendConfig,
        cinder_manage_host: &str,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let services = config
            .services()
            .iter()
            .map(|(pool, hdp)| Service::new(pool, hdp))
            .collect::<Result<Vec<_>>>()?;
        if services.is_empty() {
            return Err(BackendError::NoSuchService(0));
        }

        let client = Arc::new(HnasClient::new(runner, config.hnas_password.clone()));
        let ips: Vec<String> = services.iter().map(|s| s.evs_ip.clone()).collect();
        let evs = client.evs_by_ip(&ips).await?;

        info!(
            backend = name,
            services = services.len(),
            evs = ?evs.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            "HNAS backend ready"
        );

        Ok(Self {
            name: name.to_string(),
            volume_backend_name: config.volume_backend_name.clone(),
            cinder_manage_host: cinder_manage_host.to_string(),
            services,
            evs,
            client,
        })
    }

    /// Connect every enabled backend, using `connector` to open the shell
    /// channel for each one.
    pub async fn from_config<F>(config: &HnasConfig, connector: F) -> Result<Vec<Self>>
    where
        F: Fn(&BackendConfig) -> Arc<dyn CommandRunner>,
    {
        let mut backends = Vec::new();
        for (name, backend) in config.enabled_backends()? {
            let runner = connector(backend);
            backends.push(
                Self::connect(name, backend, &config.hnas.cinder_manage_host, runner).await?,
            );
        }
        Ok(backends)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn volume_backend_name(&self) -> Option<&str> {
        self.volume_backend_name.as_deref()
    }

    pub fn client(&self) -> &Arc<HnasClient> {
        &self.client
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn service(&self, svc_idx: usize) -> Result<&Service> {
        self.services
            .get(svc_idx)
            .ok_or(BackendError::NoSuchService(svc_idx))
    }

    /// EVS id serving service `svc_idx`.
    pub fn evs_id(&self, svc_idx: usize) -> Result<&str> {
        self.evs
            .get(svc_idx)
            .map(|evs| evs.id.as_str())
            .ok_or(BackendError::NoSuchService(svc_idx))
    }

    /// Cinder host string for managing volumes into `svc_idx`:
    /// `<manage host>@<backend>#<pool>`.
    pub fn manage_host(&self, svc_idx: usize) -> Result<String> {
        let service = self.service(svc_idx)?;
        Ok(format!(
            "{}@{}#{}",
            self.cinder_manage_host, self.name, service.pool_name
        ))
    }

    /// Locate the backing file of a volume or snapshot.
    pub async fn volume_reference(&self, uuid: &str, svc_idx: usize) -> Result<VolumeReference<'_>> {
        let uuid = Uuid::parse_str(uuid)
            .map_err(|e| BackendError::InvalidArgument(format!("invalid volume id '{}': {}", uuid, e)))?;
        let evs_id = self.evs_id(svc_idx)?.to_string();
        VolumeReference::locate(self, uuid, evs_id).await
    }

    /// Look for a volume in each backend in turn, for service `svc_idx`.
    ///
    /// Backends that do not hold the volume are skipped. Other lookup
    /// errors are skipped too, but the last one is returned when no
    /// backend holds the volume.
    #[instrument(skip(backends), fields(backends = backends.len()))]
    pub async fn find_volume<'a>(
        backends: &'a [HnasBackend],
        uuid: &str,
        svc_idx: usize,
    ) -> Result<Option<LocatedVolume<'a>>> {
        let mut last_error = None;
        for backend in backends {
            match backend.volume_reference(uuid, svc_idx).await {
                Ok(volume) => {
                    debug!(backend = %backend.name, path = %volume.unix_path(), "Volume found");
                    return Ok(Some((backend, volume)));
                }
                Err(BackendError::VolumeNotFound(_)) => {}
                Err(e @ BackendError::InvalidArgument(_)) => return Err(e),
                Err(e) => {
                    debug!(backend = %backend.name, error = %e, "Volume lookup failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Poll every backend until one of them holds the volume.
    ///
    /// With an `expect_failure` policy this instead polls until no backend
    /// holds it any more.
    pub async fn locate_in_any<'a>(
        backends: &'a [HnasBackend],
        uuid: &str,
        svc_idx: usize,
        policy: &RetryPolicy,
    ) -> Result<RetryOutcome<Option<LocatedVolume<'a>>>> {
        Uuid::parse_str(uuid)
            .map_err(|e| BackendError::InvalidArgument(format!("invalid volume id '{}': {}", uuid, e)))?;
        Ok(retry("volume_in_any_backend", policy, move || {
            Self::find_volume(backends, uuid, svc_idx)
        })
        .await)
    }

    /// SSC prefix selecting EVS `evs_id` and filesystem `fs_name`.
    pub fn ssc_file_cmd_prefix(evs_id: &str, fs_name: &str) -> String {
        format!("vn {} && selectfs {}", evs_id, fs_name)
    }

    /// Remove a file through SSC.
    #[instrument(skip(self))]
    pub async fn ssc_rm(&self, evs_id: &str, fs_name: &str, path: &str, force: bool) -> Result<String> {
        let rm = if force {
            format!("rm -f {}", path)
        } else {
            format!("rm {}", path)
        };
        let commands = [Self::ssc_file_cmd_prefix(evs_id, fs_name), rm];
        debug!(evs_id, fs_name, path, "Removing file via ssc");
        self.client.ssc(&commands.join(" && ")).await
    }

    /// `ls` the iSCSI logical unit file of a volume.
    pub async fn ls_iscsi_volume(&self, evs_id: &str, fs_name: &str, volume_id: &str) -> Result<String> {
        let commands = [
            Self::ssc_file_cmd_prefix(evs_id, fs_name),
            "cd /.cinder".to_string(),
            format!("ls -liah volume-{}.iscsi", volume_id),
        ];
        self.client.ssc(&commands.join(" && ")).await
    }

    /// `ls` every file in the cinder directory mentioning `volume_id`.
    pub async fn ls_volume(&self, evs_id: &str, fs_name: &str, volume_id: &str) -> Result<String> {
        let commands = [
            Self::ssc_file_cmd_prefix(evs_id, fs_name),
            "cd /.cinder".to_string(),
            format!("ls -liah *{}*", volume_id),
        ];
        self.client.ssc(&commands.join(" && ")).await
    }
}
