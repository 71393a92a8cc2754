//! HTTP downloads and archive extraction used to provision WeMod and its prefix.

use std::{
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::{Component, Path, PathBuf},
    time::Duration,
};

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use ureq::Agent;
use zip::ZipArchive;

use crate::process::CancellationToken;

const USER_AGENT: &str = concat!("wemod-launcher/", env!("CARGO_PKG_VERSION"));

/// Bounds establishing the connection and receiving the response head. The body itself may
/// take as long as it needs.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: ureq::Error,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download of {url} was cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    /// The HTTP status the server answered with, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Http {
    agent: Agent,
    cancel: CancellationToken,
}

impl Http {
    pub fn new(cancel: CancellationToken) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .timeout_recv_response(Some(RESPONSE_TIMEOUT))
            .build()
            .into();

        Self { agent, cancel }
    }

    fn get(&self, url: &str) -> Result<ureq::http::Response<ureq::Body>, FetchError> {
        debug!(url, "GET");

        self.agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|error| match error {
                ureq::Error::StatusCode(status) => FetchError::Status {
                    url: url.to_string(),
                    status,
                },
                source => FetchError::Transport {
                    url: url.to_string(),
                    source,
                },
            })
    }

    pub fn json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self.get(url)?;

        serde_json::from_reader(response.into_body().into_reader()).map_err(|source| {
            FetchError::Decode {
                url: url.to_string(),
                source,
            }
        })
    }

    /// Stream the body of `url` into `destination`, replacing it. Returns the number of bytes
    /// written.
    ///
    /// The cancellation token is checked between chunks; a cancelled download removes the
    /// partial file.
    pub fn download(&self, url: &str, destination: &Path) -> Result<u64, FetchError> {
        let cancelled = || FetchError::Cancelled {
            url: url.to_string(),
        };

        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }

        let response = self.get(url)?;
        let write_error = |source| FetchError::Write {
            path: destination.to_path_buf(),
            source,
        };

        let mut reader = response.into_body().into_reader();
        let mut file = File::create(destination).map_err(write_error)?;
        let mut buffer = vec![0; CHUNK_SIZE];
        let mut written = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                drop(file);
                if let Err(error) = fs::remove_file(destination) {
                    warn!(%error, path = %destination.display(), "failed to remove partial download");
                }

                return Err(cancelled());
            }

            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    return Err(FetchError::Transport {
                        url: url.to_string(),
                        source: ureq::Error::Io(error),
                    });
                }
            };

            file.write_all(&buffer[..read]).map_err(write_error)?;
            written += read as u64;
        }

        file.flush().map_err(write_error)?;

        info!(url, destination = %destination.display(), bytes = written, "downloaded");
        Ok(written)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to open archive {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive entry {name:?} would be extracted outside of the destination")]
    UnsafePath { name: String },

    #[error("failed to extract {}: {source}", path.display())]
    Extract {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("extraction of {} was cancelled", path.display())]
    Cancelled { path: PathBuf },
}

/// Extract the entries of `archive` accepted by `filter` into `destination`.
///
/// Entry names are normalised to forward slashes before they're filtered. An entry that would
/// land outside `destination` aborts the extraction, as does cancelling `cancel` between
/// entries. Returns the number of extracted entries.
pub fn extract_zip(
    archive: &Path,
    destination: &Path,
    filter: impl Fn(&str) -> bool,
    cancel: &CancellationToken,
) -> Result<usize, ArchiveError> {
    let file = File::open(archive).map_err(|source| ArchiveError::Open {
        path: archive.to_path_buf(),
        source,
    })?;

    let mut zip = ZipArchive::new(BufReader::new(file))?;
    let mut extracted = 0;

    for index in 0..zip.len() {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled {
                path: archive.to_path_buf(),
            });
        }

        let mut entry = zip.by_index(index)?;
        let name = entry.name().replace('\\', "/");

        if !filter(&name) {
            continue;
        }

        let relative = sanitize_entry_name(&name).ok_or_else(|| ArchiveError::UnsafePath {
            name: name.clone(),
        })?;
        let target = destination.join(relative);
        let extract_error = |source| ArchiveError::Extract {
            path: target.clone(),
            source,
        };

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(extract_error)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(extract_error)?;
            }

            let mut out = File::create(&target).map_err(extract_error)?;
            io::copy(&mut entry, &mut out).map_err(extract_error)?;

            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;

                fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))
                    .map_err(extract_error)?;
            }
        }

        extracted += 1;
    }

    debug!(archive = %archive.display(), extracted, "extracted archive");
    Ok(extracted)
}

/// Relative path of an archive entry, or `None` if it's absolute or climbs out with `..`.
fn sanitize_entry_name(name: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();

    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }

    (!relative.as_os_str().is_empty()).then_some(relative)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{fs::File, io::Write, path::Path};

    use assert_fs::{TempDir, prelude::*};
    use pretty_assertions::assert_eq;
    use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

    use super::{ArchiveError, FetchError, Http, extract_zip, sanitize_entry_name};
    use crate::process::CancellationToken;

    /// Write a zip holding `entries`; names ending in `/` become directories.
    pub(crate) fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        for (name, contents) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(contents.as_bytes()).unwrap();
            }
        }

        zip.finish().unwrap();
    }

    #[test]
    fn sanitizes_entry_names() {
        assert_eq!(
            Some(Path::new("lib/net48/WeMod.exe").to_path_buf()),
            sanitize_entry_name("./lib/net48/WeMod.exe")
        );
        assert_eq!(None, sanitize_entry_name("../outside"));
        assert_eq!(None, sanitize_entry_name("/etc/passwd"));
        assert_eq!(None, sanitize_entry_name(""));
    }

    #[test]
    fn extracts_filtered_entries() {
        let dir = TempDir::new().unwrap();
        let archive = dir.child("setup.zip");
        write_zip(
            archive.path(),
            &[
                ("lib/", ""),
                ("lib/net48/", ""),
                ("lib/net48/WeMod.exe", "exe"),
                ("lib\\net48\\resources.pak", "pak"),
                ("Update.exe", "update"),
            ],
        );
        let out = dir.child("out");

        let count = extract_zip(
            archive.path(),
            out.path(),
            |name| name.starts_with("lib/net"),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(3, count);
        out.child("lib/net48/WeMod.exe").assert("exe");
        out.child("lib/net48/resources.pak").assert("pak");
        assert!(!out.child("Update.exe").exists());
    }

    #[test]
    fn rejects_entries_escaping_destination() {
        let dir = TempDir::new().unwrap();
        let archive = dir.child("evil.zip");
        write_zip(archive.path(), &[("../evil.txt", "boom")]);

        let error = extract_zip(
            archive.path(),
            dir.child("out").path(),
            |_| true,
            &CancellationToken::new(),
        )
        .unwrap_err();

        assert!(matches!(error, ArchiveError::UnsafePath { .. }));
        assert!(!dir.child("evil.txt").exists());
    }

    #[test]
    fn missing_archive_is_reported() {
        let dir = TempDir::new().unwrap();

        let error = extract_zip(
            dir.child("missing.zip").path(),
            dir.path(),
            |_| true,
            &CancellationToken::new(),
        )
        .unwrap_err();

        assert!(matches!(error, ArchiveError::Open { .. }));
    }

    #[test]
    fn cancelled_extraction_stops_before_next_entry() {
        let dir = TempDir::new().unwrap();
        let archive = dir.child("prefix.zip");
        write_zip(archive.path(), &[("pfx/system.reg", "reg"), ("pfx/user.reg", "reg")]);
        let out = dir.child("out");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = extract_zip(archive.path(), out.path(), |_| true, &cancel).unwrap_err();

        assert!(matches!(error, ArchiveError::Cancelled { .. }));
        assert!(!out.child("pfx/system.reg").exists());
    }

    #[test]
    fn cancelled_download_is_not_started() {
        let dir = TempDir::new().unwrap();
        let destination = dir.child("prefix.zip");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = Http::new(cancel)
            .download("http://127.0.0.1:9/prefix.zip", destination.path())
            .unwrap_err();

        assert!(matches!(error, FetchError::Cancelled { .. }));
        assert_eq!(None, error.status());
        assert!(!destination.exists());
    }
}
