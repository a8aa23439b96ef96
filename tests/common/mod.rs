//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a full [`AppContext`] over
//! throwaway temp directories and a scripted stand-in for the encoder
//! binary. The [`with_server`] constructor starts Axum on a random port for
//! HTTP-level testing.

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use uuid::Uuid;

use recast::config::Config;
use recast::invoker::TranscodeInvoker;
use recast::queue::JobQueue;
use recast::registry::{Job, JobRegistry, JobStatus};
use recast::server::{create_router, AppContext};
use recast::staging::StagingStore;
use recast::store::DurableStore;
use recast::worker::{CancelRegistry, WorkerPool};

/// Scripted encoder behaviours standing in for ffmpeg.
#[derive(Clone, Copy)]
pub enum FakeEncoder {
    /// Copies the input to the output path and exits 0.
    Copy,
    /// Sleeps far longer than any test timeout; used to exercise the
    /// timeout and cancellation paths.
    Hang,
    /// Like `Hang`, but records its pid beside the script first so a test
    /// can check the process is gone afterwards.
    HangWithPid,
    /// Exits non-zero with a stderr line ffmpeg prints for unreadable input.
    RejectInput,
    /// Exits non-zero with unrecognised stderr.
    Crash,
}

impl FakeEncoder {
    fn script(self) -> &'static str {
        match self {
            // The input follows "-i"; the output is the final argument.
            FakeEncoder::Copy => {
                "#!/bin/sh\n\
                 input=\"\"\n\
                 prev=\"\"\n\
                 last=\"\"\n\
                 for a in \"$@\"; do\n\
                   if [ \"$prev\" = \"-i\" ]; then input=\"$a\"; fi\n\
                   prev=\"$a\"\n\
                   last=\"$a\"\n\
                 done\n\
                 cp \"$input\" \"$last\"\n"
            }
            FakeEncoder::Hang => "#!/bin/sh\nsleep 30\n",
            // exec replaces the shell, so the recorded pid is the process
            // the invoker actually kills.
            FakeEncoder::HangWithPid => {
                "#!/bin/sh\n\
                 echo $$ > \"$(dirname \"$0\")/encoder.pid\"\n\
                 exec sleep 30\n"
            }
            FakeEncoder::RejectInput => {
                "#!/bin/sh\n\
                 echo 'Invalid data found when processing input' >&2\n\
                 exit 1\n"
            }
            FakeEncoder::Crash => "#!/bin/sh\necho 'Segmentation fault' >&2\nexit 139\n",
        }
    }

    /// Write the behaviour as an executable script and return its path.
    pub fn install(self, dir: &Path) -> PathBuf {
        let path = dir.join("fake-encoder");
        fs::write(&path, self.script()).expect("failed to write fake encoder");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
                .expect("failed to chmod fake encoder");
        }
        path
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`] backed by temp
/// directories. Worker tasks are only spawned when requested, so admission
/// tests can hold jobs in Queued indefinitely.
pub struct TestHarness {
    pub ctx: AppContext,
    pub pool: Option<WorkerPool>,
    tmp: TempDir,
}

impl TestHarness {
    /// Default config, scripted copy encoder, no workers.
    pub fn new() -> Self {
        Self::build(Config::default(), FakeEncoder::Copy, 0)
    }

    /// Custom config, scripted copy encoder, no workers.
    pub fn with_config(config: Config) -> Self {
        Self::build(config, FakeEncoder::Copy, 0)
    }

    /// Default config with `workers` worker tasks pulling from the queue.
    pub fn with_workers(workers: usize) -> Self {
        Self::build(Config::default(), FakeEncoder::Copy, workers)
    }

    /// Full control over config, encoder behaviour, and worker count.
    pub fn build(mut config: Config, encoder: FakeEncoder, workers: usize) -> Self {
        let tmp = TempDir::new().expect("failed to create temp dir");
        config.storage.staging_root = tmp.path().join("staging");
        config.storage.output_root = tmp.path().join("converted");
        config.encoder.program = encoder.install(tmp.path()).display().to_string();

        let registry = JobRegistry::new(config.storage.state_file.clone());
        let staging = Arc::new(
            StagingStore::new(&config.storage.staging_root, config.storage.max_staging_bytes)
                .expect("failed to create staging store"),
        );
        let store = Arc::new(
            DurableStore::new(&config.storage.output_root)
                .expect("failed to create durable store"),
        );
        let queue = Arc::new(JobQueue::new(
            config.jobs.max_queue_depth,
            config.jobs.max_input_bytes,
        ));
        let cancels = CancelRegistry::default();
        let invoker = Arc::new(TranscodeInvoker::from_config(
            &config.encoder,
            config.jobs.convert_timeout(),
        ));

        let pool = (workers > 0).then(|| {
            WorkerPool::start(
                workers,
                registry.clone(),
                queue.clone(),
                staging.clone(),
                store.clone(),
                invoker,
                cancels.clone(),
            )
        });

        let ctx = AppContext {
            registry,
            queue,
            staging,
            store,
            cancels,
            config: Arc::new(config),
        };

        Self { ctx, pool, tmp }
    }

    /// Root of the harness's scratch directory, where the fake encoder
    /// script (and anything it writes beside itself) lives.
    pub fn dir(&self) -> &Path {
        self.tmp.path()
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(workers: usize) -> (Self, SocketAddr) {
        Self::with_server_config(Config::default(), FakeEncoder::Copy, workers).await
    }

    /// Start an Axum server with custom config and encoder behaviour.
    pub async fn with_server_config(
        config: Config,
        encoder: FakeEncoder,
        workers: usize,
    ) -> (Self, SocketAddr) {
        let harness = Self::build(config, encoder, workers);
        let app = create_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Submit raw bytes through the full admission path with the configured
    /// default encode parameters.
    pub async fn submit(&self, name: &str, data: &[u8]) -> Job {
        let params = self.ctx.config.encoder.default_params();
        self.ctx
            .submit(name, data, params)
            .await
            .expect("submission was rejected")
    }

    /// Poll the registry until the job reaches `status` or the deadline
    /// passes.
    pub async fn wait_for_status(&self, id: Uuid, status: JobStatus, deadline: Duration) -> Job {
        let start = std::time::Instant::now();
        loop {
            let job = self.ctx.registry.get(id).expect("job disappeared");
            if job.status == status {
                return job;
            }
            assert!(
                start.elapsed() < deadline,
                "job {id} stuck in {:?} waiting for {status:?} (error: {:?})",
                job.status,
                job.error
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until the job reaches any terminal status.
    pub async fn wait_for_terminal(&self, id: Uuid, deadline: Duration) -> Job {
        let start = std::time::Instant::now();
        loop {
            let job = self.ctx.registry.get(id).expect("job disappeared");
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                start.elapsed() < deadline,
                "job {id} never reached a terminal status (last: {:?})",
                job.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
