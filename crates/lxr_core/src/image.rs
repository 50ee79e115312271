//! Template image availability.

use std::collections::BTreeSet;
use std::sync::Arc;

use lxr_runner::{parse_catalog, parse_image_list, CatalogEntry, HostTools};
use tracing::{debug, info};

use crate::config::ImageReference;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Catalog section holding the distribution base images.
pub const SYSTEM_SECTION: &str = "system";

/// What [`ImageManager::ensure_present`] had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredImage {
    pub image: ImageReference,
    pub downloaded: bool,
}

/// Queries and fills the host's template storages.
#[derive(Clone)]
pub struct ImageManager {
    tools: Arc<dyn HostTools>,
}

impl ImageManager {
    pub fn new(tools: Arc<dyn HostTools>) -> Self {
        Self { tools }
    }

    /// Fully qualified keys of the templates cached in `storage`.
    pub async fn list_local(&self, storage: &str) -> OrchestratorResult<BTreeSet<String>> {
        let table = self
            .tools
            .image_list(storage)
            .await
            .map_err(OrchestratorError::ImageQueryFailed)?;
        let images = parse_image_list(&table).map_err(OrchestratorError::ImageQueryFailed)?;
        Ok(images.into_iter().map(|image| image.key).collect())
    }

    /// Templates offered by the online catalog in `section`.
    pub async fn list_online(&self, section: &str) -> OrchestratorResult<Vec<CatalogEntry>> {
        let table = self
            .tools
            .image_list_online(section)
            .await
            .map_err(OrchestratorError::ImageQueryFailed)?;
        parse_catalog(&table).map_err(OrchestratorError::ImageQueryFailed)
    }

    /// Make sure `template` is cached in `storage`, downloading it if needed.
    ///
    /// A failed download is not retried.
    pub async fn ensure_present(
        &self,
        storage: &str,
        template: &str,
    ) -> OrchestratorResult<EnsuredImage> {
        let image = ImageReference::new(storage, template);
        let key = image.key();

        if self.list_local(storage).await?.contains(&key) {
            debug!("Image {} already present", key);
            return Ok(EnsuredImage {
                image,
                downloaded: false,
            });
        }

        info!("Image {} not cached, downloading", key);
        self.tools
            .image_download(storage, template)
            .await
            .map_err(|source| OrchestratorError::ImageDownloadFailed {
                image: key.clone(),
                source,
            })?;

        Ok(EnsuredImage {
            image,
            downloaded: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxr_runner::MockHost;

    #[tokio::test]
    async fn test_ensure_present_skips_cached_image() {
        let host = MockHost::new().with_local_image("local", "debian-12-standard.tar.zst");
        let images = ImageManager::new(Arc::new(host.clone()));

        let ensured = images
            .ensure_present("local", "debian-12-standard.tar.zst")
            .await
            .unwrap();

        assert!(!ensured.downloaded);
        assert_eq!(ensured.image.key(), "local:vztmpl/debian-12-standard.tar.zst");
        assert!(!host.was_called("image_download"));
    }

    #[tokio::test]
    async fn test_ensure_present_downloads_once() {
        let host = MockHost::new();
        let images = ImageManager::new(Arc::new(host.clone()));

        let first = images.ensure_present("local", "alpine.tar.xz").await.unwrap();
        let second = images.ensure_present("local", "alpine.tar.xz").await.unwrap();

        assert!(first.downloaded);
        assert!(!second.downloaded);
        assert_eq!(host.get_method_calls("image_download").len(), 1);
    }

    #[tokio::test]
    async fn test_image_in_other_storage_does_not_count() {
        let host = MockHost::new().with_local_image("nfs", "alpine.tar.xz");
        let images = ImageManager::new(Arc::new(host.clone()));

        let ensured = images.ensure_present("local", "alpine.tar.xz").await.unwrap();
        assert!(ensured.downloaded);
    }

    #[tokio::test]
    async fn test_download_failure_is_fatal() {
        let host = MockHost::new().fail_on("image_download", None);
        let images = ImageManager::new(Arc::new(host.clone()));

        let err = images.ensure_present("local", "alpine.tar.xz").await.unwrap_err();
        match err {
            OrchestratorError::ImageDownloadFailed { image, .. } => {
                assert_eq!(image, "local:vztmpl/alpine.tar.xz")
            }
            other => panic!("Expected ImageDownloadFailed, got {:?}", other),
        }
        assert_eq!(host.get_method_calls("image_download").len(), 1);
    }

    #[tokio::test]
    async fn test_list_online_filters_section() {
        let host = MockHost::new()
            .with_catalog_entry(SYSTEM_SECTION, "debian-12-standard.tar.zst")
            .with_catalog_entry("turnkeylinux", "turnkey-gitea.tar.gz");
        let images = ImageManager::new(Arc::new(host));

        let entries = images.list_online(SYSTEM_SECTION).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].template, "debian-12-standard.tar.zst");
    }
}
