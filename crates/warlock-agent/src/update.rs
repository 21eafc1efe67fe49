//! Agent self-update.
//!
//! Downloads a release tarball, unpacks it over the install directory and
//! restarts the agent's systemd unit. Release tarballs carry one leading
//! directory (`warlock-agent-1.2.3/...`), which is stripped.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use futures::StreamExt;
use tar::Archive;
use tracing::{debug, info};
use warlock_protocol::UpdateRequest;

use crate::executor::{CommandDescriptor, CommandExecutor, ExecError};

/// Largest accepted download (200 MiB).
pub const MAX_DOWNLOAD_SIZE: u64 = 200 * 1024 * 1024;

/// Largest total unpacked size; gzip bomb guard.
const MAX_EXTRACTED_SIZE: u64 = 1024 * 1024 * 1024;

/// Maximum entries in one release tarball.
const MAX_ENTRY_COUNT: usize = 10_000;

/// Deadline for the restart command.
pub const RESTART_TIMEOUT: Duration = Duration::from_secs(5);

/// Overall HTTP timeout for the download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors from the self-updater.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// The download URL is not `http` or `https`.
    #[error("Invalid download URL: {0}")]
    InvalidUrl(String),

    /// The HTTP request failed.
    #[error("Download failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Download failed with HTTP {0}")]
    Status(u16),

    /// The release is larger than [`MAX_DOWNLOAD_SIZE`].
    #[error("Release too large: {size} bytes exceeds the {limit} byte limit")]
    TooLarge {
        /// Observed size.
        size: u64,
        /// Limit.
        limit: u64,
    },

    /// The archive is malformed or exceeds the unpack limits.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// An entry would land outside the install directory.
    #[error("Unsafe path in release archive: {0}")]
    PathTraversal(String),

    /// An entry is neither a regular file nor a directory.
    #[error("Unsafe entry type {entry_type} in release archive: {path}")]
    UnsafeEntryType {
        /// Tar entry type.
        entry_type: String,
        /// Entry path.
        path: String,
    },

    /// The restart command failed.
    #[error("Restart failed: {0}")]
    Restart(#[from] ExecError),
}

/// Installs releases into a directory and restarts a systemd unit.
#[derive(Debug, Clone)]
pub struct Updater {
    http: reqwest::Client,
    install_dir: PathBuf,
    service_name: String,
}

impl Updater {
    /// Updater for `install_dir`, restarting `service_name`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Http`] if the HTTP client cannot be built.
    pub fn new(install_dir: PathBuf, service_name: String) -> Result<Self, UpdateError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("warlock-agent/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            install_dir,
            service_name,
        })
    }

    /// Directory releases are unpacked into.
    #[must_use]
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Download and unpack the release named by `request`.
    ///
    /// Does not restart; see [`Updater::restart`].
    ///
    /// # Errors
    ///
    /// Returns an [`UpdateError`] if the download or extraction fails.
    pub async fn install(&self, request: &UpdateRequest) -> Result<usize, UpdateError> {
        info!(version = %request.version, url = %request.download_url, "Downloading agent update");
        let bytes = self.download(&request.download_url).await?;
        debug!(bytes = bytes.len(), "Release downloaded");

        let dest = self.install_dir.clone();
        let unpacked = tokio::task::spawn_blocking(move || extract_release(&bytes, &dest))
            .await
            .map_err(|e| UpdateError::Extraction(format!("extraction task failed: {e}")))??;
        info!(
            version = %request.version,
            files = unpacked,
            dir = %self.install_dir.display(),
            "Agent update unpacked"
        );
        Ok(unpacked)
    }

    /// Restart the agent's unit through `executor`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Restart`] if `systemctl` cannot be run.
    pub async fn restart(&self, executor: &CommandExecutor) -> Result<(), UpdateError> {
        let command = format!("systemctl restart {}", self.service_name);
        info!(command = %command, "Restarting agent");
        executor
            .execute_uncached(&CommandDescriptor::new(command, RESTART_TIMEOUT))
            .await?;
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        let parsed =
            url::Url::parse(url).map_err(|e| UpdateError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(UpdateError::InvalidUrl(url.to_owned()));
        }

        let response = self.http.get(parsed).send().await?;
        if !response.status().is_success() {
            return Err(UpdateError::Status(response.status().as_u16()));
        }
        if let Some(len) = response.content_length()
            && len > MAX_DOWNLOAD_SIZE
        {
            return Err(UpdateError::TooLarge {
                size: len,
                limit: MAX_DOWNLOAD_SIZE,
            });
        }
        download_with_limit(response, MAX_DOWNLOAD_SIZE).await
    }
}

async fn download_with_limit(
    response: reqwest::Response,
    max_size: u64,
) -> Result<Vec<u8>, UpdateError> {
    let capacity =
        usize::try_from(response.content_length().unwrap_or(0).min(max_size)).unwrap_or(0);
    let mut bytes = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        bytes.extend_from_slice(&chunk?);
        let current_size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if current_size > max_size {
            return Err(UpdateError::TooLarge {
                size: current_size,
                limit: max_size,
            });
        }
    }
    Ok(bytes)
}

/// Unpack a gzip tarball into `dest`, dropping the first path component of
/// every entry. Returns the number of files written.
///
/// # Errors
///
/// Returns an [`UpdateError`] for malformed archives, absolute or `..`
/// paths, links and device entries, or archives over the size limits.
pub fn extract_release(data: &[u8], dest: &Path) -> Result<usize, UpdateError> {
    std::fs::create_dir_all(dest)
        .map_err(|e| UpdateError::Extraction(format!("failed to create {}: {e}", dest.display())))?;

    let mut archive = Archive::new(GzDecoder::new(data));
    let mut entry_count = 0_usize;
    let mut files = 0_usize;
    let mut total_size: u64 = 0;

    let entries = archive
        .entries()
        .map_err(|e| UpdateError::Extraction(format!("failed to read archive entries: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| {
            UpdateError::Extraction(format!("failed to read archive entry: {e}"))
        })?;

        entry_count = entry_count.saturating_add(1);
        if entry_count > MAX_ENTRY_COUNT {
            return Err(UpdateError::Extraction(format!(
                "archive exceeds maximum entry count ({MAX_ENTRY_COUNT})"
            )));
        }

        let entry_path = entry
            .path()
            .map_err(|e| UpdateError::Extraction(format!("failed to read entry path: {e}")))?
            .into_owned();

        let entry_type = entry.header().entry_type();
        if matches!(
            entry_type,
            tar::EntryType::XHeader | tar::EntryType::XGlobalHeader | tar::EntryType::GNULongName
        ) {
            continue;
        }
        if !matches!(entry_type, tar::EntryType::Regular | tar::EntryType::Directory) {
            return Err(UpdateError::UnsafeEntryType {
                entry_type: format!("{entry_type:?}"),
                path: entry_path.display().to_string(),
            });
        }

        total_size = total_size.saturating_add(
            entry
                .header()
                .size()
                .map_err(|e| UpdateError::Extraction(format!("failed to read entry size: {e}")))?,
        );
        if total_size > MAX_EXTRACTED_SIZE {
            return Err(UpdateError::Extraction(format!(
                "archive exceeds maximum extracted size ({MAX_EXTRACTED_SIZE} bytes)"
            )));
        }

        validate_entry_path(&entry_path)?;
        let Some(stripped) = strip_first_component(&entry_path) else {
            // The leading directory itself.
            continue;
        };
        let target = dest.join(stripped);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                UpdateError::Extraction(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        entry.unpack(&target).map_err(|e| {
            UpdateError::Extraction(format!("failed to unpack {}: {e}", entry_path.display()))
        })?;
        if entry_type == tar::EntryType::Regular {
            files = files.saturating_add(1);
        }
    }

    if files == 0 {
        return Err(UpdateError::Extraction("archive contains no files".into()));
    }
    Ok(files)
}

fn validate_entry_path(path: &Path) -> Result<(), UpdateError> {
    let escapes = path.is_absolute()
        || path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
    if escapes {
        return Err(UpdateError::PathTraversal(path.display().to_string()));
    }
    Ok(())
}

/// `a/b/c` becomes `b/c`; `a` and `a/` become `None`.
fn strip_first_component(path: &Path) -> Option<PathBuf> {
    let rest: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .skip(1)
        .collect();
    (!rest.as_os_str().is_empty()).then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
        for (path, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            builder.append_data(&mut header, path, *body).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    /// Tarball whose single entry has a raw, unvalidated name.
    fn raw_tarball(name: &str, entry_type: tar::EntryType) -> Vec<u8> {
        let mut header = tar::Header::new_gnu();
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_size(0);
        header.set_mode(0o644);
        header.set_entry_type(entry_type);
        header.set_cksum();
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
        builder.append(&header, std::io::empty()).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn strips_leading_directory() {
        let dest = tempfile::tempdir().unwrap();
        let data = tarball(&[
            ("warlock-agent-1.2.0/agent.js", b"console.log(1)"),
            ("warlock-agent-1.2.0/lib/util.js", b"x"),
        ]);

        let files = extract_release(&data, dest.path()).unwrap();

        assert_eq!(files, 2);
        assert_eq!(
            std::fs::read(dest.path().join("agent.js")).unwrap(),
            b"console.log(1)"
        );
        assert!(dest.path().join("lib/util.js").is_file());
        assert!(!dest.path().join("warlock-agent-1.2.0").exists());
    }

    #[test]
    fn overwrites_existing_install() {
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(dest.path().join("agent.js"), "old").unwrap();
        let data = tarball(&[("pkg/agent.js", b"new")]);

        extract_release(&data, dest.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.path().join("agent.js")).unwrap(),
            "new"
        );
    }

    #[test]
    fn rejects_parent_traversal() {
        let dest = tempfile::tempdir().unwrap();
        let data = raw_tarball("pkg/../../escape", tar::EntryType::Regular);
        let err = extract_release(&data, dest.path()).unwrap_err();
        assert!(matches!(err, UpdateError::PathTraversal(_)), "{err}");
    }

    #[test]
    fn rejects_symlinks() {
        let dest = tempfile::tempdir().unwrap();
        let data = raw_tarball("pkg/link", tar::EntryType::Symlink);
        let err = extract_release(&data, dest.path()).unwrap_err();
        assert!(matches!(err, UpdateError::UnsafeEntryType { .. }), "{err}");
    }

    #[test]
    fn rejects_garbage() {
        let dest = tempfile::tempdir().unwrap();
        assert!(matches!(
            extract_release(b"not a tarball", dest.path()),
            Err(UpdateError::Extraction(_))
        ));
    }

    #[test]
    fn strip_component_edge_cases() {
        assert_eq!(
            strip_first_component(Path::new("a/b/c")),
            Some(PathBuf::from("b/c"))
        );
        assert_eq!(strip_first_component(Path::new("a/")), None);
        assert_eq!(
            strip_first_component(Path::new("./a/b")),
            Some(PathBuf::from("b"))
        );
    }

    #[tokio::test]
    async fn non_http_url_is_rejected() {
        let dest = tempfile::tempdir().unwrap();
        let updater =
            Updater::new(dest.path().to_path_buf(), "warlock-agent".into()).unwrap();
        let err = updater
            .install(&UpdateRequest {
                version: "9.9.9".into(),
                download_url: "file:///etc/passwd".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::InvalidUrl(_)));
    }
}
