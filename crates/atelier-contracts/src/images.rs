use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// A self-contained encoded raster image, carried as a
/// `data:<mime>;base64,<payload>` string.
///
/// Produced by the compositor and by file uploads, consumed as a base-image
/// input; the pipeline never inspects the pixels, only passes the value
/// through intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedImage(String);

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8], mime: &str) -> Self {
        Self(format!("data:{};base64,{}", mime, BASE64.encode(bytes)))
    }

    /// Reads a file and encodes it, guessing the mime type from the
    /// extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image file {}", path.display()))?;
        Ok(Self::from_bytes(&bytes, guess_image_mime(path)))
    }

    /// Accepts an already-encoded data URL, rejecting anything that does not
    /// carry a base64 payload.
    pub fn from_data_url(value: impl Into<String>) -> Result<Self> {
        let image = Self(value.into());
        image.decode()?;
        Ok(image)
    }

    pub fn as_data_url(&self) -> &str {
        &self.0
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.0
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
            .map(|(mime, _)| mime)
    }

    /// Splits the value back into its mime type and raw bytes.
    pub fn decode(&self) -> Result<(String, Vec<u8>)> {
        let rest = self
            .0
            .strip_prefix("data:")
            .context("encoded image is not a data url")?;
        let (mime, payload) = rest
            .split_once(";base64,")
            .context("encoded image is missing a base64 payload")?;
        let bytes = BASE64
            .decode(payload)
            .context("encoded image payload is not valid base64")?;
        Ok((mime.to_string(), bytes))
    }
}

impl fmt::Display for EncodedImage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

fn guess_image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::EncodedImage;

    #[test]
    fn from_bytes_round_trips() -> anyhow::Result<()> {
        let image = EncodedImage::from_bytes(b"pixels", "image/png");
        assert!(image.as_data_url().starts_with("data:image/png;base64,"));
        assert_eq!(image.mime_type(), Some("image/png"));

        let (mime, bytes) = image.decode()?;
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"pixels");
        Ok(())
    }

    #[test]
    fn from_path_guesses_mime_from_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("base.jpg");
        std::fs::write(&path, b"jpeg-bytes")?;

        let image = EncodedImage::from_path(&path)?;
        assert_eq!(image.mime_type(), Some("image/jpeg"));
        assert_eq!(image.decode()?.1, b"jpeg-bytes");
        Ok(())
    }

    #[test]
    fn from_path_reports_missing_file() {
        let result = EncodedImage::from_path(Path::new("/nonexistent/base.png"));
        assert!(result.is_err());
    }

    #[test]
    fn from_data_url_rejects_malformed_values() {
        assert!(EncodedImage::from_data_url("not a data url").is_err());
        assert!(EncodedImage::from_data_url("data:image/png;base64,@@@").is_err());
        assert!(EncodedImage::from_data_url("data:image/png,plain").is_err());
    }
}
