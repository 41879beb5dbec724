//! S3 object store
//!
//! Product imagery lives at `{site}/{product_id}/{product_id}-{index}.jpg`,
//! forced to JPEG. Key naming is a pure function of (site, product id,
//! index), which is what makes uploads idempotent: a HEAD on the target key
//! decides reuse before any byte moves.

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde::Deserialize;
use tracing::debug;

pub const PRODUCT_JPEG_QUALITY: u8 = 85;
pub const THUMBNAIL_JPEG_QUALITY: u8 = 80;
pub const THUMBNAIL_MAX_DIMENSION: u32 = 300;

/// S3 credentials file format.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Credentials {
    #[serde(rename = "accessKey")]
    pub access_key: String,
    #[serde(rename = "secretKey")]
    pub secret_key: String,
    #[serde(rename = "bucketName")]
    pub bucket_name: String,
    pub region: String,
}

impl S3Credentials {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read S3 credentials {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Malformed S3 credentials {}", path.display()))
    }
}

#[derive(Clone)]
pub struct ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
}

impl ObjectStore {
    pub fn new(credentials: &S3Credentials) -> Self {
        let provider = Credentials::new(
            credentials.access_key.clone(),
            credentials.secret_key.clone(),
            None,
            None,
            "milivault-credentials-file",
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(credentials.region.clone()))
            .credentials_provider(provider)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: credentials.bucket_name.clone(),
            region: credentials.region.clone(),
        }
    }

    pub fn from_credentials_file(path: &Path) -> Result<Self> {
        Ok(Self::new(&S3Credentials::load(path)?))
    }

    /// Key for the k-th image of a product. Pure function of its inputs.
    pub fn object_key(site: &str, product_id: i64, index: usize) -> String {
        format!("{site}/{product_id}/{product_id}-{index}.jpg")
    }

    pub fn thumbnail_key(site: &str, product_id: i64) -> String {
        format!("{site}/{product_id}/{product_id}-thumb.jpg")
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("s3://{}/{key}", self.bucket)
    }

    pub fn https_url(&self, key: &str) -> String {
        format!("https://{}.s3.{}.amazonaws.com/{key}", self.bucket, self.region)
    }

    /// Translate a stored `s3://` URL back to a fetchable HTTPS URL.
    pub fn https_url_from_object_url(&self, object_url: &str) -> String {
        match object_url.strip_prefix(&format!("s3://{}/", self.bucket)) {
            Some(key) => self.https_url(key),
            None => object_url.to_string(),
        }
    }

    pub async fn object_exists(&self, key: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match result {
            Ok(_) => {
                debug!("Object {key} already present");
                Ok(true)
            }
            Err(e) => {
                if e.as_service_error().map(|s| s.is_not_found()).unwrap_or(false) {
                    Ok(false)
                } else {
                    Err(e).with_context(|| format!("HEAD failed for {key}"))
                }
            }
        }
    }

    pub async fn upload_jpeg(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("image/jpeg")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("Upload failed for {key}"))?;
        debug!("Uploaded {key}");
        Ok(())
    }
}

/// Decode any supported format and re-encode as RGB JPEG at the product
/// quality setting.
pub fn encode_product_jpeg(raw: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(raw).context("Image did not decode")?;
    encode_jpeg(&decoded, PRODUCT_JPEG_QUALITY)
}

/// Downscale to the thumbnail bounding box and encode.
pub fn encode_thumbnail_jpeg(raw: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(raw).context("Image did not decode")?;
    let small = decoded.thumbnail(THUMBNAIL_MAX_DIMENSION, THUMBNAIL_MAX_DIMENSION);
    encode_jpeg(&small, THUMBNAIL_JPEG_QUALITY)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut out), quality);
    rgb.write_with_encoder(encoder).context("JPEG encode failed")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Property 3: two runs produce identical keys for the same inputs.
    #[test]
    fn object_keys_are_pure_functions_of_inputs() {
        assert_eq!(
            ObjectStore::object_key("EXAMPLE_MILITARIA", 4711, 1),
            "EXAMPLE_MILITARIA/4711/4711-1.jpg"
        );
        assert_eq!(
            ObjectStore::object_key("EXAMPLE_MILITARIA", 4711, 1),
            ObjectStore::object_key("EXAMPLE_MILITARIA", 4711, 1)
        );
        assert_eq!(
            ObjectStore::thumbnail_key("EXAMPLE_MILITARIA", 4711),
            "EXAMPLE_MILITARIA/4711/4711-thumb.jpg"
        );
    }

    #[test]
    fn url_round_trip_between_s3_and_https() {
        let store = ObjectStore::new(&S3Credentials {
            access_key: "k".into(),
            secret_key: "s".into(),
            bucket_name: "vault-images".into(),
            region: "ap-southeast-2".into(),
        });
        let key = ObjectStore::object_key("SITE", 9, 2);
        assert_eq!(store.object_url(&key), "s3://vault-images/SITE/9/9-2.jpg");
        assert_eq!(
            store.https_url_from_object_url("s3://vault-images/SITE/9/9-2.jpg"),
            "https://vault-images.s3.ap-southeast-2.amazonaws.com/SITE/9/9-2.jpg"
        );
    }

    #[test]
    fn encode_round_trip_produces_jpeg() {
        // Tiny synthetic image through the full transcode path.
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            640,
            480,
            image::Rgb([120, 80, 40]),
        ));
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let jpeg = encode_product_jpeg(&png).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let thumb = encode_thumbnail_jpeg(&png).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert!(decoded.width() <= THUMBNAIL_MAX_DIMENSION);
        assert!(decoded.height() <= THUMBNAIL_MAX_DIMENSION);
    }
}
