use std::path::PathBuf;

use anyhow::{Context, Result};
use image::ImageFormat;
use tracing::debug;

use crate::llm::media::decode_image;

#[derive(Debug, Clone)]
pub struct PageImage {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
    job_id: String,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>, job_id: &str) -> Self {
        ImageStore {
            dir: dir.into(),
            job_id: job_id.to_string(),
        }
    }

    fn path_for(&self, label: &str) -> PathBuf {
        self.dir
            .join(format!("storybook_img_{}_{}.png", self.job_id, label))
    }

    pub async fn save_master(&self, bytes: Vec<u8>) -> Result<PageImage> {
        self.save(bytes, "master_reference").await
    }

    pub async fn save_page(&self, index: usize, bytes: Vec<u8>) -> Result<PageImage> {
        self.save(bytes, &index.to_string()).await
    }

    async fn save(&self, bytes: Vec<u8>, label: &str) -> Result<PageImage> {
        let path = self.path_for(label);
        let target = path.clone();
        let dir = self.dir.clone();
        let (png, width, height) = tokio::task::spawn_blocking(move || -> Result<_> {
            let decoded = decode_image(&bytes)?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            decoded
                .image
                .save_with_format(&target, ImageFormat::Png)
                .with_context(|| format!("Failed to write {}", target.display()))?;
            let png = std::fs::read(&target)?;
            Ok((png, decoded.width, decoded.height))
        })
        .await??;
        debug!("Saved page image {} ({}x{})", path.display(), width, height);
        Ok(PageImage {
            path,
            bytes: png,
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::png_bytes;

    #[tokio::test]
    async fn saves_master_and_pages_with_job_scoped_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::new(dir.path().join("nested"), "job42");

        let master = store.save_master(png_bytes(6, 4, [9, 9, 9])).await.expect("master");
        assert!(master.path.ends_with("storybook_img_job42_master_reference.png"));
        assert_eq!((master.width, master.height), (6, 4));
        assert!(master.path.exists());

        let page = store.save_page(3, png_bytes(2, 2, [1, 1, 1])).await.expect("page");
        assert!(page.path.ends_with("storybook_img_job42_3.png"));
        assert_eq!(page.bytes, std::fs::read(&page.path).expect("read"));
    }

    #[tokio::test]
    async fn rejects_bytes_that_are_not_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::new(dir.path(), "job");
        assert!(store.save_page(1, b"nope".to_vec()).await.is_err());
    }
}
