//! MinIO testcontainer for exercising `S3ObjectStore` against a real
//! S3-compatible API.
//!
//! One container is shared by every test in a binary. Each test gets its own
//! bucket, so listings and deletes never see another test's objects.

use std::time::Duration;

use anyhow::{Context, Result};
use archiver_core::config::StorageConfig;
use archiver_core::kernel::S3ObjectStore;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::minio::MinIO;
use tokio::sync::OnceCell;
use uuid::Uuid;

// Default MinIO credentials
const ACCESS_KEY: &str = "minioadmin";
const SECRET_KEY: &str = "minioadmin";
const REGION: &str = "us-east-1";

/// Root prefix used by every test store, so key joining is exercised too
pub const ROOT_PREFIX: &str = "archive";

struct SharedStorage {
    endpoint: String,
    _minio: ContainerAsync<MinIO>,
}

static SHARED_STORAGE: OnceCell<SharedStorage> = OnceCell::const_new();

impl SharedStorage {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let minio = MinIO::default()
            .start()
            .await
            .context("Failed to start MinIO container")?;

        let host = minio.get_host().await?.to_string();
        let port = minio.get_host_port_ipv4(9000).await?;

        Ok(Self {
            endpoint: format!("http://{}:{}", host, port),
            _minio: minio,
        })
    }

    async fn get() -> &'static Self {
        SHARED_STORAGE
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared MinIO container")
            })
            .await
    }
}

/// A fresh bucket on the shared MinIO, wrapped in the production store.
pub struct StorageHarness {
    pub store: S3ObjectStore,
    pub bucket: String,
    /// Base URL of the S3 API, also usable as an arbitrary HTTP server
    pub endpoint: String,
}

impl AsyncTestContext for StorageHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create storage harness")
    }
}

impl StorageHarness {
    pub async fn new() -> Result<Self> {
        let shared = SharedStorage::get().await;
        let bucket = format!("archiver-{}", Uuid::new_v4().simple());

        let config = StorageConfig {
            endpoint: Some(shared.endpoint.clone()),
            region: REGION.to_string(),
            access_key_id: ACCESS_KEY.to_string(),
            secret_access_key: SECRET_KEY.to_string(),
            bucket: bucket.clone(),
            root_prefix: ROOT_PREFIX.to_string(),
        };

        create_bucket(&config).await?;

        let store = S3ObjectStore::from_config(&config, Duration::from_secs(10))
            .await
            .context("Failed to create object store")?;

        Ok(Self {
            store,
            bucket,
            endpoint: shared.endpoint.clone(),
        })
    }

    /// Anonymous URL of an object; the bucket is private so this never succeeds
    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}/{}", self.endpoint, self.bucket, ROOT_PREFIX, key)
    }
}

async fn create_bucket(config: &StorageConfig) -> Result<()> {
    let credentials = Credentials::new(
        &config.access_key_id,
        &config.secret_access_key,
        None,
        None,
        "archiver-tests",
    );

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials);
    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;

    let client = aws_sdk_s3::Client::from_conf(
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build(),
    );

    client
        .create_bucket()
        .bucket(&config.bucket)
        .send()
        .await
        .context("Failed to create test bucket")?;

    Ok(())
}
