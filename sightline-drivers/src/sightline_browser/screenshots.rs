//! Screenshot compression and on-disk retention.
use anyhow::{Context, Result};
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use sightline_common::ScreenshotConfig;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const JPEG_MEDIA_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    dir: PathBuf,
    max_files: usize,
    max_age: Duration,
    quality: u8,
}

/// A compressed screenshot ready to hand to the model.
#[derive(Debug, Clone)]
pub struct StoredShot {
    pub base64: String,
    pub path: Option<PathBuf>,
}

impl ScreenshotStore {
    pub fn new(config: &ScreenshotConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            max_files: config.max_files,
            max_age: Duration::from_secs(config.max_age_secs),
            quality: config.jpeg_quality.clamp(1, 100),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-encode `png` as JPEG, write it to the screenshot directory and
    /// prune old files. A failed write still returns the encoded image.
    pub async fn save(&self, png: Vec<u8>) -> Result<StoredShot> {
        let quality = self.quality;
        let jpeg = tokio::task::spawn_blocking(move || compress(&png, quality))
            .await
            .context("screenshot encoder task panicked")??;
        let base64 = base64::engine::general_purpose::STANDARD.encode(&jpeg);

        let path = self.dir.join(format!(
            "screenshot-{}-{}.jpg",
            sightline_common::now_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));
        let written = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&path, &jpeg).await
        }
        .await;

        let path = match written {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "browser.screenshot.write_failed");
                None
            }
        };

        let dir = self.dir.clone();
        let (max_files, max_age) = (self.max_files, self.max_age);
        match tokio::task::spawn_blocking(move || {
            enforce_retention(&dir, max_files, max_age, SystemTime::now())
        })
        .await
        {
            Ok(Ok(removed)) if removed > 0 => {
                tracing::debug!(removed, "browser.screenshot.pruned")
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "browser.screenshot.prune_failed"),
            _ => {}
        }

        Ok(StoredShot { base64, path })
    }
}

/// Decode any supported image and encode it as RGB JPEG.
pub fn compress(bytes: &[u8], quality: u8) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("screenshot is not a decodable image")?;
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&rgb, rgb.width(), rgb.height(), image::ColorType::Rgb8)
        .context("jpeg encoding failed")?;
    Ok(out)
}

/// Delete screenshots older than `max_age`, then keep only the newest
/// `max_files`. Returns how many files were removed.
pub fn enforce_retention(
    dir: &Path,
    max_files: usize,
    max_age: Duration,
    now: SystemTime,
) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut shots: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_shot = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e, "jpg" | "jpeg" | "png"));
        if !is_shot {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        shots.push((modified, path));
    }

    let mut removed = 0;
    shots.sort_by(|a, b| b.0.cmp(&a.0));
    for (i, (modified, path)) in shots.iter().enumerate() {
        let expired = now
            .duration_since(*modified)
            .map(|age| age > max_age)
            .unwrap_or(false);
        if expired || i >= max_files {
            std::fs::remove_file(path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, RgbaImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([200, 30, 30, 128]),
        ));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageOutputFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn compress_produces_jpeg_without_alpha() {
        let jpeg = compress(&png(64, 48), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn retention_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("s{i}.jpg")), b"x").unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        let removed =
            enforce_retention(dir.path(), 3, Duration::from_secs(3600), SystemTime::now()).unwrap();
        assert_eq!(removed, 2);
        assert!(!dir.path().join("s0.jpg").exists());
        assert!(dir.path().join("s4.jpg").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn retention_drops_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.jpg"), b"x").unwrap();
        let later = SystemTime::now() + Duration::from_secs(7200);
        let removed = enforce_retention(dir.path(), 10, Duration::from_secs(3600), later).unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn save_writes_a_file_and_returns_base64() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenshotStore::new(&ScreenshotConfig {
            dir: dir.path().join("shots"),
            ..ScreenshotConfig::default()
        });
        let shot = store.save(png(10, 10)).await.unwrap();
        assert!(!shot.base64.is_empty());
        assert!(shot.path.unwrap().exists());
    }
}
