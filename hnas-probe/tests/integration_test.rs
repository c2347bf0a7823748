//! Integration tests for hnas-probe
//!
//! These tests drive the backend, volume and limit helpers against a
//! scripted shell instead of a real array. Commands are matched by
//! substring and answered from a queue, so state changes on the array
//! (a file appearing or going away) can be played back in order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use hnas_probe::backend::{BackendError, HnasBackend};
use hnas_probe::config::{BackendConfig, HnasConfig};
use hnas_probe::limit::SscLimitTester;
use hnas_probe::remote::{self, CommandRunner, RemoteError};
use hnas_probe::retry::{RetryOutcome, RetryPolicy, retry};

const VOLUME_ID: &str = "8aa1b3e2-4c1d-4f7e-9b1a-0c2d3e4f5a6b";

const CONFIG: &str = r#"
[hnas]
enabled_backends = ["hnas-nfs"]
cinder_manage_host = "controller"

[backends.hnas-nfs]
volume_backend_name = "hnas_nfs"
hnas_mgmt_ip0 = "172.24.44.15"
hnas_username = "supervisor"
hnas_password = "supervisor"
hnas_svc0_hdp = "172.24.49.34:/nfs_cinder"
hnas_svc0_pool_name = "default"
hnas_svc1_hdp = "172.24.49.21:/nfs_cinder2"
hnas_svc1_pool_name = "gold"
"#;

const EVS_LIST: &str = "\
EVS ID  Label    IP Address
------  -------  ------------
1       evs-a    172.24.49.21
                 172.24.49.22
12      evs-b    172.24.49.34
";

const TWO_BACKENDS: &str = r#"
[hnas]
enabled_backends = ["hnas-a", "hnas-b"]
cinder_manage_host = "controller"

[backends.hnas-a]
hnas_mgmt_ip0 = "172.24.44.15"
hnas_username = "supervisor"
hnas_svc0_hdp = "172.24.49.34:/nfs_cinder"
hnas_svc0_pool_name = "default"

[backends.hnas-b]
hnas_mgmt_ip0 = "172.24.44.16"
hnas_username = "supervisor"
hnas_svc0_hdp = "172.24.49.34:/nfs_cinder"
hnas_svc0_pool_name = "default"
"#;

// ============================================================================
// Scripted shell
// ============================================================================

type Reply = Result<String, String>;

/// Answers commands from per-pattern queues. The last reply of a queue
/// is repeated once the queue is drained.
#[derive(Default)]
struct ScriptedShell {
    rules: Mutex<Vec<(String, VecDeque<Reply>)>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedShell {
    fn new() -> Self {
        Self::default().on("evs list", &[EVS_LIST])
    }

    fn on(self, pattern: &str, replies: &[&str]) -> Self {
        let replies = replies.iter().map(|r| Ok(r.to_string())).collect();
        self.rules.lock().unwrap().push((pattern.to_string(), replies));
        self
    }

    fn fail_on(self, pattern: &str, stderr: &str) -> Self {
        let replies = VecDeque::from([Err(stderr.to_string())]);
        self.rules.lock().unwrap().push((pattern.to_string(), replies));
        self
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn count(&self, pattern: &str) -> usize {
        self.seen().iter().filter(|c| c.contains(pattern)).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedShell {
    async fn execute(&self, command: &str) -> remote::Result<String> {
        self.seen.lock().unwrap().push(command.to_string());

        let mut rules = self.rules.lock().unwrap();
        let reply = rules
            .iter_mut()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .and_then(|(_, replies)| {
                if replies.len() > 1 {
                    replies.pop_front()
                } else {
                    replies.front().cloned()
                }
            })
            .unwrap_or_else(|| Err(format!("bash: unexpected command: {}", command)));

        reply.map_err(|stderr| RemoteError::CommandFailed {
            command: command.to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr,
        })
    }
}

fn volume_paths() -> String {
    format!(
        "/mnt/lb/evs12/fs/1025/nfs_cinder/volume-{id}\n\
         /mnt/lb/evs12/fs-by-name/FS-TestCG/nfs_cinder/volume-{id}\n",
        id = VOLUME_ID
    )
}

async fn backend_with(shell: Arc<ScriptedShell>) -> HnasBackend {
    let config = HnasConfig::from_toml_str(CONFIG).unwrap();
    let mut backends = HnasBackend::from_config(&config, |_: &BackendConfig| {
        shell.clone() as Arc<dyn CommandRunner>
    })
    .await
    .unwrap();
    assert_eq!(backends.len(), 1);
    backends.remove(0)
}

// ============================================================================
// Backend Tests
// ============================================================================

/// Test that services are matched to the EVS serving their address
#[tokio::test]
async fn test_backend_resolves_evs_per_service() {
    let shell = Arc::new(ScriptedShell::new());
    let backend = backend_with(shell.clone()).await;

    assert_eq!(backend.name(), "hnas-nfs");
    assert_eq!(backend.volume_backend_name(), Some("hnas_nfs"));
    assert_eq!(backend.evs_id(0).unwrap(), "12");
    assert_eq!(backend.evs_id(1).unwrap(), "1");
    assert_eq!(backend.manage_host(1).unwrap(), "controller@hnas-nfs#gold");
    assert!(matches!(
        backend.manage_host(2),
        Err(BackendError::NoSuchService(2))
    ));

    assert_eq!(
        shell.seen()[0],
        "sudo -k && echo 'supervisor' | sudo -S su supervisor -c \
         'ssc -u supervisor localhost \"evs list\"'"
    );
}

/// Test that a service whose address no EVS owns fails the connection
#[tokio::test]
async fn test_backend_with_unknown_evs_ip() {
    let config = HnasConfig::from_toml_str(&CONFIG.replace("172.24.49.21", "10.9.9.9")).unwrap();
    let shell = Arc::new(ScriptedShell::new());
    let err = HnasBackend::from_config(&config, |_: &BackendConfig| {
        shell.clone() as Arc<dyn CommandRunner>
    })
    .await
    .unwrap_err();
    assert!(matches!(err, BackendError::EvsNotFound(ref ip) if ip == "10.9.9.9"));
}

/// Test that an unreachable SSC surfaces as a remote error
#[tokio::test]
async fn test_backend_when_ssc_fails() {
    let config = HnasConfig::from_toml_str(CONFIG).unwrap();
    let shell = Arc::new(ScriptedShell::default().fail_on("evs list", "Failed to connect"));
    let err = HnasBackend::from_config(&config, |_: &BackendConfig| {
        shell.clone() as Arc<dyn CommandRunner>
    })
    .await
    .unwrap_err();
    assert!(matches!(err, BackendError::Remote(_)));
    assert!(!err.to_string().contains("'supervisor' |"));
}

/// Test the SSC listings of the cinder directory
#[tokio::test]
async fn test_ls_volume_commands() {
    let shell = Arc::new(ScriptedShell::new().on("ls -liah", &["-rw-r--r-- 1 root root 1G volume-1"]));
    let backend = backend_with(shell.clone()).await;

    backend.ls_volume("12", "FS-TestCG", VOLUME_ID).await.unwrap();
    backend.ls_iscsi_volume("12", "FS-TestCG", VOLUME_ID).await.unwrap();

    let listings: Vec<String> = shell
        .seen()
        .into_iter()
        .filter(|c| c.contains("ls -liah"))
        .collect();
    assert_eq!(listings.len(), 2);
    assert!(listings[0].contains(&format!(
        "vn 12 && selectfs FS-TestCG && cd /.cinder && ls -liah *{VOLUME_ID}*"
    )));
    assert!(listings[1].contains(&format!("ls -liah volume-{VOLUME_ID}.iscsi")));
}

// ============================================================================
// Volume Reference Tests
// ============================================================================

/// Test locating a volume file and deriving its other names
#[tokio::test]
async fn test_locate_volume() {
    let shell = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[volume_paths().as_str()]));
    let backend = backend_with(shell.clone()).await;

    let volume = backend.volume_reference(VOLUME_ID, 0).await.unwrap();
    assert_eq!(volume.fs_name(), "FS-TestCG");
    assert_eq!(volume.evs_id(), "12");
    assert_eq!(
        volume.unix_path(),
        format!("/mnt/lb/evs12/fs-by-name/FS-TestCG/nfs_cinder/volume-{VOLUME_ID}")
    );
    assert_eq!(
        volume.ssc_path(),
        format!("/nfs_cinder/volume-{VOLUME_ID}")
    );
    assert_eq!(
        volume.nfs_url(0).unwrap(),
        format!("172.24.49.34:/nfs_cinder/volume-{VOLUME_ID}")
    );

    assert!(
        shell
            .seen()
            .contains(&format!("find /mnt/lb -name '*{VOLUME_ID}'"))
    );
}

/// Test that ids which are not UUIDs never reach the array
#[tokio::test]
async fn test_locate_rejects_bad_id() {
    let shell = Arc::new(ScriptedShell::new());
    let backend = backend_with(shell.clone()).await;

    let err = backend
        .volume_reference("volume; rm -rf /", 0)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidArgument(_)));
    assert_eq!(shell.count("find"), 0);
}

/// Test that a missing volume is reported by id
#[tokio::test]
async fn test_locate_missing_volume() {
    let shell = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[""]));
    let backend = backend_with(shell).await;

    let err = backend.volume_reference(VOLUME_ID, 0).await.unwrap_err();
    assert!(matches!(err, BackendError::VolumeNotFound(ref id) if id == VOLUME_ID));
}

/// Test deleting a volume file through SSC
#[tokio::test]
async fn test_rm_via_ssc() {
    let shell = Arc::new(
        ScriptedShell::new()
            .on("find /mnt/lb", &[volume_paths().as_str()])
            .on("rm -f", &[""]),
    );
    let backend = backend_with(shell.clone()).await;
    let volume = backend.volume_reference(VOLUME_ID, 0).await.unwrap();
    volume.rm_via_ssc().await.unwrap();

    let rm = shell.seen().into_iter().find(|c| c.contains("rm -f")).unwrap();
    assert_eq!(
        rm,
        format!(
            "sudo -k && echo 'supervisor' | sudo -S su supervisor -c \
             'ssc -u supervisor localhost \"vn 12 && selectfs FS-TestCG && \
             rm -f /nfs_cinder/volume-{VOLUME_ID}\"'"
        )
    );
}

/// Test the rename expected after unmanaging, then finding the renamed file
#[tokio::test]
async fn test_unmanage_and_refresh() {
    let renamed = format!(
        "/mnt/lb/evs12/fs-by-name/FS-TestCG/nfs_cinder/unmanage-volume-{VOLUME_ID}\n"
    );
    let shell = Arc::new(
        ScriptedShell::new().on("find /mnt/lb", &[volume_paths().as_str(), renamed.as_str()]),
    );
    let backend = backend_with(shell).await;
    let mut volume = backend.volume_reference(VOLUME_ID, 0).await.unwrap();

    volume.mark_as_unmanaged();
    let predicted = volume.location().clone();
    assert_eq!(
        predicted.ssc_path,
        format!("/nfs_cinder/unmanage-volume-{VOLUME_ID}")
    );

    volume.refresh().await.unwrap();
    assert_eq!(volume.location(), &predicted);
    assert_eq!(
        volume.nfs_url(0).unwrap(),
        format!("172.24.49.34:/nfs_cinder/unmanage-volume-{VOLUME_ID}")
    );
}

/// Test reading the size of a volume file
#[tokio::test]
async fn test_volume_size() {
    let shell = Arc::new(
        ScriptedShell::new()
            .on("find /mnt/lb", &[volume_paths().as_str()])
            .on("stat -c %s", &["2147483648\n"]),
    );
    let backend = backend_with(shell).await;
    let volume = backend.volume_reference(VOLUME_ID, 0).await.unwrap();

    assert_eq!(volume.size_bytes().await.unwrap(), 2 * 1024 * 1024 * 1024);
    assert!((volume.size_gib().await.unwrap() - 2.0).abs() < f64::EPSILON);
}

// ============================================================================
// Polling Tests
// ============================================================================

/// Test polling until a deleted volume file no longer shows up
#[tokio::test]
async fn test_wait_until_file_gone() {
    let shell = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[volume_paths().as_str()]));
    let backend = backend_with(shell.clone()).await;
    let volume = backend.volume_reference(VOLUME_ID, 0).await.unwrap();

    let path = format!("{}\n", volume.unix_path());
    shell
        .rules
        .lock()
        .unwrap()
        .push(("ls /mnt/lb".to_string(), VecDeque::from([
            Ok(path.clone()),
            Ok(path),
            Ok(String::new()),
        ])));

    let policy = RetryPolicy::expect_failure()
        .with_retries(5)
        .with_wait(Duration::ZERO);
    let outcome = retry("volume_file_exists", &policy, || volume.exists()).await;

    assert_eq!(outcome, RetryOutcome::Matched(false));
    assert_eq!(shell.count("ls /mnt/lb"), 3);
}

/// Test that a failing existence check counts as gone when absence is expected
#[tokio::test]
async fn test_wait_until_gone_on_error() {
    let shell = Arc::new(
        ScriptedShell::new()
            .on("find /mnt/lb", &[volume_paths().as_str()])
            .fail_on("ls /mnt/lb", "ls: cannot access: No such file or directory"),
    );
    let backend = backend_with(shell.clone()).await;
    let volume = backend.volume_reference(VOLUME_ID, 0).await.unwrap();

    let policy = RetryPolicy::expect_failure().with_wait(Duration::ZERO);
    let outcome = retry("volume_file_exists", &policy, || volume.exists()).await;
    assert_eq!(outcome, RetryOutcome::ProbeFailed);
    assert_eq!(shell.count("ls /mnt/lb"), 1);
}

/// Test polling until a volume shows up on the array
#[tokio::test]
async fn test_wait_until_volume_appears() {
    let shell = Arc::new(
        ScriptedShell::new().on("find /mnt/lb", &["", "", volume_paths().as_str()]),
    );
    let backend = backend_with(shell.clone()).await;

    let policy = RetryPolicy::expect_success()
        .with_retries(4)
        .with_wait(Duration::ZERO);
    let backend = &backend;
    let outcome = retry("volume_located", &policy, move || async move {
        backend.volume_reference(VOLUME_ID, 0).await.map(Some)
    })
    .await;

    let volume = outcome.into_last().flatten().unwrap();
    assert_eq!(volume.fs_name(), "FS-TestCG");
    assert_eq!(shell.count("find /mnt/lb"), 3);
}

// ============================================================================
// Cross-Backend Tests
// ============================================================================

/// Connect `hnas-a` to shell `a` and `hnas-b` to shell `b`.
async fn two_backends(a: Arc<ScriptedShell>, b: Arc<ScriptedShell>) -> Vec<HnasBackend> {
    let config = HnasConfig::from_toml_str(TWO_BACKENDS).unwrap();
    HnasBackend::from_config(&config, |backend: &BackendConfig| {
        let shell = if backend.hnas_mgmt_ip0.to_string() == "172.24.44.16" {
            b.clone()
        } else {
            a.clone()
        };
        shell as Arc<dyn CommandRunner>
    })
    .await
    .unwrap()
}

/// Test that a volume is found on whichever backend holds it
#[tokio::test]
async fn test_find_volume_in_second_backend() {
    let a = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[""]));
    let b = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[volume_paths().as_str()]));
    let backends = two_backends(a.clone(), b.clone()).await;

    let (backend, volume) = HnasBackend::find_volume(&backends, VOLUME_ID, 0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(backend.name(), "hnas-b");
    assert_eq!(volume.fs_name(), "FS-TestCG");
    assert_eq!(a.count("find /mnt/lb"), 1);
    assert_eq!(b.count("find /mnt/lb"), 1);
}

/// Test that the first backend holding the volume wins
#[tokio::test]
async fn test_find_volume_stops_at_first_match() {
    let a = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[volume_paths().as_str()]));
    let b = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[volume_paths().as_str()]));
    let backends = two_backends(a, b.clone()).await;

    let (backend, _) = HnasBackend::find_volume(&backends, VOLUME_ID, 0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(backend.name(), "hnas-a");
    assert_eq!(b.count("find /mnt/lb"), 0);
}

/// Test that a volume held by no backend is not an error
#[tokio::test]
async fn test_find_volume_nowhere() {
    let a = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[""]));
    let b = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[""]));
    let backends = two_backends(a, b).await;

    assert!(HnasBackend::find_volume(&backends, VOLUME_ID, 0).await.unwrap().is_none());
}

/// Test that a failing lookup is reported when no backend has the volume
#[tokio::test]
async fn test_find_volume_reports_lookup_errors() {
    let duplicates = format!(
        "/mnt/lb/evs12/fs-by-name/FS-A/nfs_cinder/volume-{id}\n\
         /mnt/lb/evs12/fs-by-name/FS-B/nfs_cinder/volume-{id}\n",
        id = VOLUME_ID
    );
    let a = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[duplicates.as_str()]));
    let b = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[""]));
    let backends = two_backends(a, b.clone()).await;

    let err = HnasBackend::find_volume(&backends, VOLUME_ID, 0).await.unwrap_err();
    assert!(matches!(err, BackendError::DuplicateVolume { .. }));
    assert_eq!(b.count("find /mnt/lb"), 1);

    let err = HnasBackend::find_volume(&backends, "not-a-uuid", 0).await.unwrap_err();
    assert!(matches!(err, BackendError::InvalidArgument(_)));
}

/// Test polling every backend until the volume shows up on one of them
#[tokio::test]
async fn test_locate_in_any_waits_for_volume() {
    let a = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[""]));
    let b = Arc::new(
        ScriptedShell::new().on("find /mnt/lb", &["", "", volume_paths().as_str()]),
    );
    let backends = two_backends(a.clone(), b.clone()).await;

    let policy = RetryPolicy::expect_success()
        .with_retries(4)
        .with_wait(Duration::ZERO);
    let outcome = HnasBackend::locate_in_any(&backends, VOLUME_ID, 0, &policy)
        .await
        .unwrap();

    let (backend, volume) = outcome.into_last().flatten().unwrap();
    assert_eq!(backend.name(), "hnas-b");
    assert_eq!(volume.evs_id(), "12");
    assert_eq!(a.count("find /mnt/lb"), 3);
    assert_eq!(b.count("find /mnt/lb"), 3);
}

/// Test polling until no backend holds the volume any more
#[tokio::test]
async fn test_locate_in_any_until_gone() {
    let a = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[""]));
    let b = Arc::new(ScriptedShell::new().on("find /mnt/lb", &[volume_paths().as_str(), ""]));
    let backends = two_backends(a, b.clone()).await;

    let policy = RetryPolicy::expect_failure()
        .with_retries(3)
        .with_wait(Duration::ZERO);
    let outcome = HnasBackend::locate_in_any(&backends, VOLUME_ID, 0, &policy)
        .await
        .unwrap();
    assert!(matches!(outcome, RetryOutcome::Matched(None)));
    assert_eq!(b.count("find /mnt/lb"), 2);
}

/// Test that a bad id is rejected before any backend is polled
#[tokio::test]
async fn test_locate_in_any_rejects_bad_id() {
    let a = Arc::new(ScriptedShell::new());
    let b = Arc::new(ScriptedShell::new());
    let backends = two_backends(a.clone(), b.clone()).await;

    let err = HnasBackend::locate_in_any(&backends, "volume-1", 0, &RetryPolicy::expect_success())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidArgument(_)));
    assert_eq!(a.count("find") + b.count("find"), 0);
}

// ============================================================================
// SSC Limit Tests
// ============================================================================

/// Test closing held connections when the ssc processes are already gone
#[tokio::test(start_paused = true)]
async fn test_limit_tester_against_backend() {
    let shell = Arc::new(
        ScriptedShell::new()
            .on("ps -ef", &["4242\n"])
            .fail_on("kill -15 4242", "kill: (4242) - No such process"),
    );
    let backend = backend_with(shell.clone()).await;

    // The scripted shell answers `sleep 60` at once, so every open fails
    let mut tester = SscLimitTester::new(Arc::clone(backend.client()), 2);
    assert_eq!(tester.open_connections().await.unwrap(), 0);
    assert_eq!(tester.pids(), ["4242"]);

    tester.close_connections().await.unwrap();
    assert_eq!(shell.count("kill -15 4242"), 1);
}
