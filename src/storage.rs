use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::primitives::ByteStream;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, PoisonError, RwLock};

/// File name of the archive stored for every (unit, task definition) pair.
pub const PACKAGE_FILE_NAME: &str = "numbas_test.zip";

// 1. PackageStore Contract
/// PackageStore
///
/// Abstract contract for reading and writing uploaded Numbas test archives. The
/// S3 client is used against MinIO locally and any S3-compatible endpoint in
/// production; the mock keeps archives in memory for tests.
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Creates the configured bucket if it does not exist yet. Only called locally.
    async fn ensure_bucket_exists(&self);

    async fn put_package(&self, key: &str, bytes: Vec<u8>) -> Result<(), String>;

    /// `Ok(None)` when no object is stored under `key`.
    async fn get_package(&self, key: &str) -> Result<Option<Vec<u8>>, String>;
}

// 2. The Real Implementation (S3/MinIO)
/// S3PackageStore
///
/// `force_path_style(true)` is required for MinIO.
#[derive(Clone)]
pub struct S3PackageStore {
    client: s3::Client,
    bucket_name: String,
}

impl S3PackageStore {
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
        }
    }
}

#[async_trait]
impl PackageStore for S3PackageStore {
    async fn ensure_bucket_exists(&self) {
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!("create_bucket skipped: {:?}", e);
        }
    }

    async fn put_package(&self, key: &str, bytes: Vec<u8>) -> Result<(), String> {
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .content_type("application/zip")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn get_package(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error().is_some_and(|err| err.is_no_such_key()) {
                    return Ok(None);
                }
                return Err(e.to_string());
            }
        };

        let body = output.body.collect().await.map_err(|e| e.to_string())?;
        Ok(Some(body.into_bytes().to_vec()))
    }
}

// 3. The Mock Implementation (For Tests)
/// MockPackageStore
///
/// Keeps archives in a map keyed by object key.
#[derive(Default)]
pub struct MockPackageStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    /// When true, every operation returns a simulated failure.
    pub should_fail: bool,
}

impl MockPackageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

#[async_trait]
impl PackageStore for MockPackageStore {
    async fn ensure_bucket_exists(&self) {}

    async fn put_package(&self, key: &str, bytes: Vec<u8>) -> Result<(), String> {
        if self.should_fail {
            return Err("Mock Storage Error: Simulation requested".to_string());
        }
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sanitize_key(key), bytes);
        Ok(())
    }

    async fn get_package(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        if self.should_fail {
            return Err("Mock Storage Error: Simulation requested".to_string());
        }
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&sanitize_key(key))
            .cloned())
    }
}

/// PackageState
///
/// The type used to share package storage across the application state.
pub type PackageState = Arc<dyn PackageStore>;

/// sanitize_key
///
/// Drops empty, `.` and `..` segments so a client-supplied path cannot walk
/// outside its prefix.
pub fn sanitize_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Keeps only ASCII alphanumerics, `-` and `_`.
pub fn sanitize_unit_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Object key of the archive for a unit's task definition.
pub fn package_key(unit_code: &str, task_definition_id: i64) -> String {
    format!(
        "numbas/{}/{}/{}",
        sanitize_unit_code(unit_code),
        task_definition_id,
        PACKAGE_FILE_NAME
    )
}

/// read_entry
///
/// Reads the named entry out of an archive. `Ok(None)` when the entry is absent;
/// `Err` when the archive itself is unreadable.
pub fn read_entry(archive: &[u8], name: &str) -> Result<Option<Vec<u8>>, String> {
    let name = sanitize_key(name);
    let mut archive = zip::ZipArchive::new(Cursor::new(archive)).map_err(|e| e.to_string())?;
    let mut entry = match archive.by_name(&name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let mut contents = Vec::new();
    entry.read_to_end(&mut contents).map_err(|e| e.to_string())?;
    Ok(Some(contents))
}
