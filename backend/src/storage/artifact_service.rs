use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::future::Future;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

const GOOGLE_DRIVE_DOWNLOAD: &str = "https://drive.google.com/uc";
const PROGRESS_STEP: u64 = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Model artifact {0} is missing and no remote source is configured")]
    NoSource(PathBuf),
    #[error("Invalid artifact URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Artifact download failed: {0}")]
    Download(String),
    #[error("Failed to write artifact: {0}")]
    Write(#[from] io::Error),
    #[error("Artifact I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Artifact checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Where a missing artifact is fetched from.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactSource {
    Url(Url),
    GoogleDrive(String),
}

impl ArtifactSource {
    pub fn download_url(&self) -> Result<Url, ArtifactError> {
        match self {
            ArtifactSource::Url(url) => Ok(url.clone()),
            ArtifactSource::GoogleDrive(file_id) => {
                let mut url = Url::parse(GOOGLE_DRIVE_DOWNLOAD)?;
                url.query_pairs_mut()
                    .append_pair("export", "download")
                    .append_pair("id", file_id)
                    .append_pair("confirm", "t");
                Ok(url)
            }
        }
    }
}

/// Streams a remote artifact into `sink`, returning the number of bytes written.
pub trait ArtifactFetcher: Send + Sync {
    fn fetch<W: Write + Send>(
        &self,
        url: &Url,
        sink: &mut W,
    ) -> impl Future<Output = Result<u64, ArtifactError>> + Send;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ArtifactError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("plantdx/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ArtifactError::Download(e.to_string()))?;
        Ok(Self { client })
    }
}

impl ArtifactFetcher for HttpFetcher {
    async fn fetch<W: Write + Send>(&self, url: &Url, sink: &mut W) -> Result<u64, ArtifactError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ArtifactError::Download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtifactError::Download(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }

        // Drive answers quota and permission problems with an HTML page and a 200.
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/html"));
        if is_html {
            return Err(ArtifactError::Download(format!(
                "{} returned an HTML page instead of the model artifact \
                 (check the file id, sharing settings or download quota)",
                url
            )));
        }

        let total = response.content_length();
        let mut written: u64 = 0;
        let mut next_report = PROGRESS_STEP;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ArtifactError::Download(e.to_string()))?
        {
            sink.write_all(&chunk)?;
            written += chunk.len() as u64;
            if written >= next_report {
                match total {
                    Some(total) => log::info!("Downloaded {} of {} bytes", written, total),
                    None => log::info!("Downloaded {} bytes", written),
                }
                next_report += PROGRESS_STEP;
            }
        }

        if written == 0 {
            return Err(ArtifactError::Download(format!("{} returned an empty body", url)));
        }
        Ok(written)
    }
}

/// Makes sure the model artifact exists locally before it is loaded.
pub struct ArtifactService<F = HttpFetcher> {
    fetcher: F,
    source: Option<ArtifactSource>,
    sha256: Option<String>,
}

impl<F: ArtifactFetcher> ArtifactService<F> {
    pub fn new(fetcher: F, source: Option<ArtifactSource>, sha256: Option<String>) -> Self {
        Self {
            fetcher,
            source,
            sha256,
        }
    }

    /// Runs once during startup, before the server accepts requests; file
    /// writes here are plain blocking `std::fs` calls.
    pub async fn ensure_present(&self, path: &Path) -> Result<PathBuf, ArtifactError> {
        let exists = path.try_exists().map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if exists {
            log::info!("Model artifact already present at {}", path.display());
            if let Some(expected) = &self.sha256 {
                let actual = file_sha256(path)?;
                check_digest(path, expected, actual)?;
            }
            return Ok(path.to_path_buf());
        }

        let source = self
            .source
            .as_ref()
            .ok_or_else(|| ArtifactError::NoSource(path.to_path_buf()))?;
        let url = source.download_url()?;
        log::info!(
            "Model artifact missing, downloading {} to {}",
            url,
            path.display()
        );

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let part_path = partial_path(path);
        let saved = match self.download_to(&url, path, &part_path).await {
            Ok(bytes) => fs::rename(&part_path, path)
                .map(|()| bytes)
                .map_err(|source| ArtifactError::Io {
                    path: path.to_path_buf(),
                    source,
                }),
            Err(e) => Err(e),
        };
        match saved {
            Ok(bytes) => {
                log::info!("Saved model artifact ({} bytes) to {}", bytes, path.display());
                Ok(path.to_path_buf())
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&part_path) {
                    if cleanup.kind() != io::ErrorKind::NotFound {
                        log::warn!(
                            "Failed to remove partial download {}: {}",
                            part_path.display(),
                            cleanup
                        );
                    }
                }
                Err(e)
            }
        }
    }

    // Startup only: blocking writes never share a worker with request handlers.
    async fn download_to(
        &self,
        url: &Url,
        path: &Path,
        part_path: &Path,
    ) -> Result<u64, ArtifactError> {
        let file = File::create(part_path).map_err(|source| ArtifactError::Io {
            path: part_path.to_path_buf(),
            source,
        })?;
        let mut writer = HashingWriter::new(BufWriter::new(file));
        let bytes = self.fetcher.fetch(url, &mut writer).await?;
        let actual = writer.finish()?;

        if let Some(expected) = &self.sha256 {
            check_digest(path, expected, actual)?;
        }
        Ok(bytes)
    }
}

fn file_sha256(path: &Path) -> Result<String, ArtifactError> {
    let io_error = |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_error)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(io_error)?;
    Ok(hex::encode(hasher.finalize()))
}

fn check_digest(path: &Path, expected: &str, actual: String) -> Result<(), ArtifactError> {
    if actual.eq_ignore_ascii_case(expected) {
        return Ok(());
    }
    Err(ArtifactError::ChecksumMismatch {
        path: path.to_path_buf(),
        expected: expected.to_string(),
        actual,
    })
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!("{}.{}.part", name, Uuid::new_v4()))
}

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(mut self) -> io::Result<String> {
        self.inner.flush()?;
        Ok(hex::encode(self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
