//! Wrapper around the `minio` server binary to run ephemeral instances of S3-compatible object
//! storage for testing
use crate::Result;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use color_eyre::eyre::eyre;
use duct::Handle;
use once_cell::sync::Lazy;
use rand::prelude::*;
use regex::Regex;
use std::{
    net::{SocketAddr, TcpListener},
    path::PathBuf,
    sync::{Arc, Weak},
    time::Duration,
};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::debug;
use which::which;

const ACCESS_KEY: &str = "minioadmin";
const SECRET_KEY: &str = "minioadmin";
const REGION: &str = "us-east-1";

pub struct MinioServer {
    #[allow(dead_code)] // Never read, but the data dir must live as long as the server
    temp_dir: TempDir,
    handle: Handle,
    endpoint: SocketAddr,
}

impl MinioServer {
    /// Whether a minio binary can be found.  Tests that need minio can skip themselves if not.
    pub fn is_available() -> bool {
        Self::find_minio().is_ok()
    }

    /// Get the shared server instance, starting one if no test is currently using it.
    ///
    /// Starting minio takes a while, so tests share one server as long as any of them holds a
    /// reference to it.
    pub async fn get() -> Result<Arc<Self>> {
        // A tokio mutex, because the lock is held while the server starts
        static INSTANCE: Lazy<Mutex<Weak<MinioServer>>> = Lazy::new(|| Mutex::new(Weak::new()));

        let mut instance = INSTANCE.lock().await;

        let server = match instance.upgrade() {
            Some(server) => server,
            None => {
                let server = Arc::new(Self::start().await?);
                *instance = Arc::downgrade(&server);

                server
            }
        };

        debug!(endpoint = %server.endpoint, "Using minio server");

        server.wait_for_service_start().await?;

        Ok(server)
    }

    /// Start a new minio server on a free local port.
    ///
    /// The binary is taken from the `MINIO_PATH` env var if set, otherwise from the `PATH`.
    pub async fn start() -> Result<Self> {
        let path = Self::find_minio()?;
        let endpoint = Self::random_endpoint()?;
        let temp_dir = Self::temp_data_dir()?;

        let handle = duct::cmd!(
            path,
            "server",
            temp_dir.path(),
            "--address",
            endpoint.to_string(),
            "--quiet"
        )
        .start()?;

        let server = Self {
            temp_dir,
            handle,
            endpoint,
        };

        debug!(endpoint = %server.endpoint, "Waiting for minio to start");
        server.wait_for_service_start().await?;
        debug!(endpoint = %server.endpoint, "Minio started");

        Ok(server)
    }

    /// The S3 API endpoint URL where the server is listening
    pub fn endpoint_url(&self) -> url::Url {
        format!("http://{}/", self.endpoint)
            .parse()
            .expect("BUG: socket address is always a valid URL host")
    }

    /// A `fileop` config that points at this server
    pub fn config(&self) -> fileop::Config {
        fileop::Config {
            access_key: Some(ACCESS_KEY.to_string()),
            secret_key: Some(SECRET_KEY.to_string()),
            s3_endpoint: Some(self.endpoint_url()),
            region: Some(REGION.to_string()),
            ..fileop::Config::default()
        }
    }

    /// An S3 client for this server, for setting up and checking test data
    pub async fn aws_client(&self) -> Result<aws_sdk_s3::Client> {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(REGION))
            .credentials_provider(Credentials::from_keys(ACCESS_KEY, SECRET_KEY, None))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .endpoint_url(self.endpoint_url().to_string())
            .force_path_style(true)
            .build();

        Ok(aws_sdk_s3::Client::from_conf(s3_config))
    }

    /// Make a new bucket for a test.
    ///
    /// A random prefix is added to the name so tests sharing the server don't collide.
    pub async fn create_bucket(&self, bucket: impl AsRef<str>) -> Result<String> {
        // Bucket names are at most 63 characters of letters, digits, `.` and `-`
        static INVALID_CHARS: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"[^0-9a-zA-Z\.\-]+").unwrap());

        let bucket = INVALID_CHARS.replace_all(bucket.as_ref(), "-").to_lowercase();
        let bucket = &bucket[..bucket.len().min(63 - 9)];
        let bucket = format!("{:08x}-{bucket}", rand::thread_rng().next_u32());

        debug!(%bucket, "Creating bucket");

        let client = self.aws_client().await?;
        client.create_bucket().bucket(&bucket).send().await?;

        // Bucket creation isn't always visible right away
        let policy = again::RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_secs(1));

        if let Err(e) = policy
            .retry(|| client.head_bucket().bucket(&bucket).send())
            .await
        {
            return Err(eyre!(
                "The bucket {bucket} is not accessible even after it was created.  Last error was:\n{e}"
            ));
        }

        Ok(bucket)
    }

    pub async fn put_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> Result<()> {
        self.aws_client()
            .await?
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data.into()))
            .send()
            .await?;

        Ok(())
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let response = self
            .aws_client()
            .await?
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;

        Ok(response.body.collect().await?.into_bytes())
    }

    /// Keys of every object in the bucket, sorted
    pub async fn list_keys(&self, bucket: &str) -> Result<Vec<String>> {
        let response = self
            .aws_client()
            .await?
            .list_objects_v2()
            .bucket(bucket)
            .send()
            .await?;

        let mut keys = response
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect::<Vec<_>>();
        keys.sort();

        Ok(keys)
    }

    /// Wait until the server answers requests, or give up
    async fn wait_for_service_start(&self) -> Result<()> {
        // Startup can be very slow on CI machines
        let policy = again::RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_secs(1));

        let client = self.aws_client().await?;

        policy
            .retry(|| client.list_buckets().send())
            .await
            .map_err(|e| eyre!("The minio server didn't come online in the allowed time.  The last ListBuckets error was:\n{e}"))?;

        Ok(())
    }

    fn find_minio() -> Result<PathBuf> {
        std::env::var_os("MINIO_PATH")
            .map(PathBuf::from)
            .or_else(|| which("minio").ok())
            .ok_or_else(|| eyre!("Unable to find `minio`; set the MINIO_PATH env var or put the minio executable in your PATH"))
    }

    /// A free address on localhost for minio to listen on
    fn random_endpoint() -> Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        Ok(addr)
    }

    /// Minio refuses to keep its data on `tmpfs`, which is where `/tmp` lives on most Linux
    /// systems, so the data dir is made in the home directory instead
    fn temp_data_dir() -> Result<TempDir> {
        let home = dirs::home_dir().ok_or_else(|| eyre!("Unable to determine home directory"))?;

        Ok(tempfile::tempdir_in(home)?)
    }
}

impl Drop for MinioServer {
    fn drop(&mut self) {
        debug!(pids = ?self.handle.pids(), "Killing minio process(es)");

        if let Err(e) = self.handle.kill() {
            eprintln!("Error killing minio process: {e}");
        }
    }
}
