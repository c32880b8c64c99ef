//! Content-addressed download cache for the geolocation databases.
//!
//! Databases are published as gzipped MMDB files with pinned SHA-256
//! checksums of the compressed bytes. The cache verifies by hash, not
//! by locking: a partial or tampered file simply fails verification
//! and is downloaded again.

use crate::httpx::{self, HttpDoer};
use common::error::AssetError;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Base URL the assets are published under.
pub const BASE_URL: &str = "https://github.com/measurement-kit/generic-assets/releases/";

const ASN_DATABASE_NAME: &str = "asn.mmdb.gz";
const COUNTRY_DATABASE_NAME: &str = "country.mmdb.gz";

#[derive(Debug, Clone)]
struct Asset {
    /// URL path relative to [`BASE_URL`].
    url_path: String,

    /// SHA-256 of the compressed bytes, lowercase hex.
    sha256: String,
}

impl Asset {
    fn file_name(&self) -> &str {
        self.url_path
            .rsplit('/')
            .next()
            .unwrap_or(self.url_path.as_str())
    }
}

fn all_assets() -> Vec<Asset> {
    vec![
        Asset {
            url_path: format!("download/20190327/{ASN_DATABASE_NAME}"),
            sha256: "6fcae12937b383e1f067e14d1eb728a75a360279df8240517ac70ef6d401c2be"
                .to_string(),
        },
        Asset {
            url_path: format!("download/20190327/{COUNTRY_DATABASE_NAME}"),
            sha256: "d0a499d15506c54111217f30af9dfd11476ded076c55a3e28a73715c890b5d66"
                .to_string(),
        },
    ]
}

fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Whether the cached file exists and matches the pinned checksum.
async fn cache_valid(filename: &Path, asset: &Asset) -> bool {
    match tokio::fs::read(filename).await {
        Ok(data) => checksum(&data) == asset.sha256,
        Err(_) => false,
    }
}

async fn fetch(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
    asset: &Asset,
) -> Result<Vec<u8>, AssetError> {
    let url = format!("{}{}", BASE_URL, asset.url_path);
    let data = httpx::get(doer, token, &url)
        .await
        .map_err(|source| AssetError::DownloadFailed {
            name: asset.file_name().to_string(),
            source,
        })?;
    if checksum(&data) != asset.sha256 {
        return Err(AssetError::HashMismatch {
            name: asset.file_name().to_string(),
        });
    }
    Ok(data)
}

/// Write `data` at `filename` atomically with owner-only permissions.
fn write_atomic(destdir: &Path, filename: &Path, data: &[u8]) -> Result<(), AssetError> {
    let io_err = |source| AssetError::Io {
        path: filename.display().to_string(),
        source,
    };
    let mut temp = tempfile::NamedTempFile::new_in(destdir).map_err(io_err)?;
    temp.write_all(data).map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(io_err)?;
    }
    temp.persist(filename)
        .map_err(|e| AssetError::Io {
            path: filename.display().to_string(),
            source: e.error,
        })?;
    Ok(())
}

/// Make sure one asset is cached at its target path.
async fn save(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
    destdir: &Path,
    asset: &Asset,
) -> Result<(), AssetError> {
    let filename = destdir.join(asset.file_name());
    if cache_valid(&filename, asset).await {
        debug!(asset = asset.file_name(), "asset already cached");
        return Ok(());
    }
    let data = match fetch(doer, token, asset).await {
        Ok(data) => data,
        // A checksum mismatch may be a garbled transfer: retry once,
        // then propagate.
        Err(AssetError::HashMismatch { .. }) => fetch(doer, token, asset).await?,
        Err(e) => return Err(e),
    };
    write_atomic(destdir, &filename, &data)
}

/// Ensure all geolocation databases are present in `destdir`.
///
/// Idempotent: files whose checksum already matches are not fetched
/// again.
pub async fn download(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
    destdir: &Path,
) -> Result<(), AssetError> {
    let io_err = |source| AssetError::Io {
        path: destdir.display().to_string(),
        source,
    };
    tokio::fs::create_dir_all(destdir).await.map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(destdir, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(io_err)?;
    }
    for asset in &all_assets() {
        save(doer, token, destdir, asset).await?;
    }
    Ok(())
}

/// Path of the cached ASN database under `destdir`.
pub fn asn_database_path(destdir: &Path) -> PathBuf {
    destdir.join(ASN_DATABASE_NAME)
}

/// Path of the cached country database under `destdir`.
pub fn country_database_path(destdir: &Path) -> PathBuf {
    destdir.join(COUNTRY_DATABASE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDoer;

    fn test_asset(payload: &[u8]) -> Asset {
        Asset {
            url_path: "download/20190327/test.mmdb.gz".to_string(),
            sha256: checksum(payload),
        }
    }

    #[tokio::test]
    async fn test_save_downloads_verifies_and_writes() {
        let payload = b"pretend this is a gzipped mmdb";
        let asset = test_asset(payload);
        let doer = FakeDoer::new().on("test.mmdb.gz", payload.to_vec());
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();

        save(&doer, &token, dir.path(), &asset).await.unwrap();
        let written = std::fs::read(dir.path().join("test.mmdb.gz")).unwrap();
        assert_eq!(written, payload);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("test.mmdb.gz"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let payload = b"cached database bytes";
        let asset = test_asset(payload);
        let doer = FakeDoer::new().on("test.mmdb.gz", payload.to_vec());
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();

        save(&doer, &token, dir.path(), &asset).await.unwrap();
        assert_eq!(doer.request_count(), 1);
        save(&doer, &token, dir.path(), &asset).await.unwrap();
        // hash matched locally, so the second run makes no request
        assert_eq!(doer.request_count(), 1);
    }

    #[tokio::test]
    async fn test_corrupted_cache_entry_is_replaced() {
        let payload = b"authentic bytes";
        let asset = test_asset(payload);
        let doer = FakeDoer::new().on("test.mmdb.gz", payload.to_vec());
        let dir = tempfile::tempdir().unwrap();
        let filename = dir.path().join("test.mmdb.gz");
        std::fs::write(&filename, b"tampered").unwrap();
        let token = CancellationToken::new();

        save(&doer, &token, dir.path(), &asset).await.unwrap();
        assert_eq!(doer.request_count(), 1);
        assert_eq!(std::fs::read(&filename).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_persistent_hash_mismatch_propagates() {
        let asset = test_asset(b"expected bytes");
        let doer = FakeDoer::new().on("test.mmdb.gz", b"wrong bytes".to_vec());
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();

        let err = save(&doer, &token, dir.path(), &asset).await.unwrap_err();
        assert!(matches!(err, AssetError::HashMismatch { .. }));
        // one retry after the first mismatch
        assert_eq!(doer.request_count(), 2);
        assert!(!dir.path().join("test.mmdb.gz").exists());
    }

    #[tokio::test]
    async fn test_download_failure_propagates() {
        let doer = FakeDoer::new().on_transport_error("generic-assets");
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let err = download(&doer, &token, dir.path()).await.unwrap_err();
        assert!(matches!(err, AssetError::DownloadFailed { .. }));
    }

    #[test]
    fn test_database_paths() {
        let destdir = Path::new("/work");
        assert_eq!(
            asn_database_path(destdir),
            PathBuf::from("/work/asn.mmdb.gz")
        );
        assert_eq!(
            country_database_path(destdir),
            PathBuf::from("/work/country.mmdb.gz")
        );
    }
}
