use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use image::{DynamicImage, ImageFormat, RgbaImage};
use reqwest::blocking::Client;

use crate::config::Backend;
use crate::error::AgentResult;
use crate::logger;

pub const BUCKET: &str = "screenshots";

/// Where screenshots and templates are published.
pub trait ObjectStore: Send {
    /// Store `png` at `path` (overwriting) and return its public URL.
    fn upload_png(&self, path: &str, png: &[u8]) -> AgentResult<String>;
}

pub fn encode_png(image: &RgbaImage) -> AgentResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image.clone()).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// UTC stamp used in object names: `20240501_101500`.
pub fn timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Encode and upload in one go.
pub fn upload_image(store: &dyn ObjectStore, path: &str, image: &RgbaImage) -> AgentResult<String> {
    let png = encode_png(image)?;
    let url = store.upload_png(path, &png)?;
    logger::info_p("store", &format!("uploaded {} ({} bytes)", path, png.len()));
    Ok(url)
}

/// Supabase storage bucket.
pub struct SupabaseStorage {
    client: Client,
    url: String,
    key: String,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(backend: &Backend) -> AgentResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            url: backend.url.clone(),
            key: backend.key.clone(),
            bucket: BUCKET.to_string(),
        })
    }

    pub fn public_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.url, self.bucket, path)
    }
}

impl ObjectStore for SupabaseStorage {
    fn upload_png(&self, path: &str, png: &[u8]) -> AgentResult<String> {
        self.client
            .post(format!("{}/storage/v1/object/{}/{}", self.url, self.bucket, path))
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
            .header("Content-Type", "image/png")
            .header("x-upsert", "true")
            .body(png.to_vec())
            .send()?
            .error_for_status()?;
        Ok(self.public_url(path))
    }
}

/// Writes objects under a local directory; used when no backend is involved.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }
}

impl ObjectStore for LocalStore {
    fn upload_png(&self, path: &str, png: &[u8]) -> AgentResult<String> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, png)?;
        let absolute = fs::canonicalize(&target).unwrap_or(target);
        Ok(format!("file://{}", absolute.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn local_store_writes_decodable_png() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let img = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]));

        let url = upload_image(&store, "u1/debug/shot.png", &img).unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("shot.png"));

        let back = image::open(dir.path().join("u1/debug/shot.png")).unwrap().to_rgba8();
        assert_eq!(back.dimensions(), (4, 3));
        assert_eq!(back.get_pixel(2, 2), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn public_url_layout() {
        let backend = Backend { url: "https://abc.supabase.co".into(), key: "k".into() };
        let store = SupabaseStorage::new(&backend).unwrap();
        assert_eq!(
            store.public_url("u1/20240501_101500.png"),
            "https://abc.supabase.co/storage/v1/object/public/screenshots/u1/20240501_101500.png"
        );
    }

    #[test]
    fn timestamp_shape() {
        let ts = timestamp();
        assert_eq!(ts.len(), 15);
        assert_eq!(&ts[8..9], "_");
    }
}
