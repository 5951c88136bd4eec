use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

use crate::error::UploadError;

const DATA_URI_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64";
const MAX_FILENAME_LEN: usize = 255;

/// Image types accepted for upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageMime {
    /// Parse the part after `image/`
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype.to_ascii_lowercase().as_str() {
            "png" => Some(ImageMime::Png),
            "jpeg" | "jpg" => Some(ImageMime::Jpeg),
            "gif" => Some(ImageMime::Gif),
            "webp" => Some(ImageMime::Webp),
            _ => None,
        }
    }

    pub fn from_extension(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        Self::from_subtype(ext)
    }

    /// Identify an image from its leading magic bytes
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(ImageMime::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageMime::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(ImageMime::Gif)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageMime::Webp)
        } else {
            None
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageMime::Png => "image/png",
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Gif => "image/gif",
            ImageMime::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageMime::Png => "png",
            ImageMime::Jpeg => "jpg",
            ImageMime::Gif => "gif",
            ImageMime::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageMime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// A decoded, type-checked upload body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime: ImageMime,
    pub bytes: Vec<u8>,
}

/// Decode a `data:image/<type>;base64,...` URI (or bare base64) into image bytes.
///
/// The declared type must be on the allow-list and agree with the content's
/// magic bytes. `max_bytes` caps the decoded size.
pub fn parse_image_payload(input: &str, max_bytes: usize) -> Result<ImagePayload, UploadError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(UploadError::MissingImage);
    }

    let (declared, encoded) = match input.strip_prefix(DATA_URI_PREFIX) {
        Some(rest) => {
            let (header, data) = rest.split_once(',').ok_or_else(|| UploadError::InvalidPayload {
                details: "data URI has no ',' separator".to_string(),
            })?;
            let mime = header
                .strip_suffix(BASE64_MARKER)
                .ok_or_else(|| UploadError::InvalidPayload {
                    details: "data URI is not base64 encoded".to_string(),
                })?;
            let declared = mime
                .strip_prefix("image/")
                .and_then(ImageMime::from_subtype)
                .ok_or_else(|| UploadError::UnsupportedMime {
                    mime: mime.to_string(),
                })?;
            (Some(declared), data)
        }
        None => (None, input),
    };

    let encoded: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    // Reject before allocating the decoded buffer
    let estimated = encoded.len() / 4 * 3;
    if estimated > max_bytes + 2 {
        return Err(UploadError::TooLarge {
            size: estimated,
            limit: max_bytes,
        });
    }

    let bytes = BASE64_STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| UploadError::InvalidPayload {
            details: format!("base64 decode failed: {}", e),
        })?;

    if bytes.is_empty() {
        return Err(UploadError::MissingImage);
    }
    if bytes.len() > max_bytes {
        return Err(UploadError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }

    let sniffed = ImageMime::sniff(&bytes);
    let mime = match (declared, sniffed) {
        (Some(declared), Some(sniffed)) if declared != sniffed => {
            return Err(UploadError::InvalidPayload {
                details: format!("declared {} but content is {}", declared, sniffed),
            })
        }
        (_, Some(sniffed)) => sniffed,
        (_, None) => {
            return Err(UploadError::InvalidPayload {
                details: "content is not a recognised image".to_string(),
            })
        }
    };

    Ok(ImagePayload { mime, bytes })
}

/// `photo-<ISO-8601 timestamp with ':' and '.' replaced by '-'>.<ext>`
pub fn default_filename(now: DateTime<Utc>, mime: ImageMime) -> String {
    let stamp = now
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("photo-{}.{}", stamp, mime.extension())
}

/// Use the requested filename if it is a safe single path component whose
/// extension matches the image type, otherwise fall back to a timestamped
/// default when none was given.
pub fn resolve_filename(
    requested: Option<&str>,
    mime: ImageMime,
    now: DateTime<Utc>,
) -> Result<String, UploadError> {
    let name = match requested.map(str::trim) {
        None | Some("") => return Ok(default_filename(now, mime)),
        Some(name) => name,
    };

    let unsafe_name = name.len() > MAX_FILENAME_LEN
        || name.starts_with('.')
        || name.contains("..")
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);

    // Objects are served by extension, so it must name the decoded type
    let mismatched = ImageMime::from_extension(name) != Some(mime);

    if unsafe_name || mismatched {
        return Err(UploadError::InvalidFilename {
            filename: name.to_string(),
        });
    }

    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn data_uri(mime: &str, bytes: &[u8]) -> String {
        format!("data:{};base64,{}", mime, BASE64_STANDARD.encode(bytes))
    }

    #[test]
    fn test_parses_data_uri() {
        let payload = parse_image_payload(&data_uri("image/png", PNG_HEADER), 1024).unwrap();
        assert_eq!(payload.mime, ImageMime::Png);
        assert_eq!(payload.bytes, PNG_HEADER);
    }

    #[test]
    fn test_bare_base64_is_sniffed() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];
        let payload = parse_image_payload(&BASE64_STANDARD.encode(jpeg), 1024).unwrap();
        assert_eq!(payload.mime, ImageMime::Jpeg);
    }

    #[test]
    fn test_jpg_alias_accepted() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xDB];
        let payload = parse_image_payload(&data_uri("image/jpg", &jpeg), 1024).unwrap();
        assert_eq!(payload.mime, ImageMime::Jpeg);
    }

    #[test]
    fn test_rejects_unsupported_mime() {
        let err = parse_image_payload(&data_uri("image/svg+xml", b"<svg/>"), 1024).unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedMime { mime } if mime == "image/svg+xml"));

        let err = parse_image_payload(&data_uri("text/plain", b"hi"), 1024).unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedMime { .. }));
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        assert!(matches!(
            parse_image_payload("   ", 1024),
            Err(UploadError::MissingImage)
        ));
        assert!(matches!(
            parse_image_payload("data:image/png;base64", 1024),
            Err(UploadError::InvalidPayload { .. })
        ));
        assert!(matches!(
            parse_image_payload("data:image/png,rawbytes", 1024),
            Err(UploadError::InvalidPayload { .. })
        ));
        assert!(matches!(
            parse_image_payload("data:image/png;base64,!!!notbase64", 1024),
            Err(UploadError::InvalidPayload { .. })
        ));
        assert!(matches!(
            parse_image_payload(&data_uri("image/png", b"not really a png"), 1024),
            Err(UploadError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_rejects_mismatched_content() {
        let err = parse_image_payload(&data_uri("image/gif", PNG_HEADER), 1024).unwrap_err();
        match err {
            UploadError::InvalidPayload { details } => {
                assert_eq!(details, "declared image/gif but content is image/png")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_size_cap() {
        let mut big = PNG_HEADER.to_vec();
        big.resize(4096, 0);

        let err = parse_image_payload(&data_uri("image/png", &big), 1024).unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { limit: 1024, .. }));

        // Exactly at the limit is fine
        assert!(parse_image_payload(&data_uri("image/png", &big), 4096).is_ok());
    }

    #[test]
    fn test_webp_and_gif_sniffing() {
        assert_eq!(ImageMime::sniff(b"GIF89a...."), Some(ImageMime::Gif));
        assert_eq!(
            ImageMime::sniff(b"RIFF\x10\0\0\0WEBPVP8 "),
            Some(ImageMime::Webp)
        );
        assert_eq!(ImageMime::sniff(b"RIFF"), None);
    }

    #[test]
    fn test_default_filename_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::milliseconds(123);
        assert_eq!(
            default_filename(now, ImageMime::Jpeg),
            "photo-2024-03-09T14-05-07-123Z.jpg"
        );
        assert_eq!(
            resolve_filename(None, ImageMime::Png, now).unwrap(),
            "photo-2024-03-09T14-05-07-123Z.png"
        );
        assert_eq!(
            resolve_filename(Some(""), ImageMime::Png, now).unwrap(),
            "photo-2024-03-09T14-05-07-123Z.png"
        );
    }

    #[test]
    fn test_unsafe_filenames_rejected() {
        let now = Utc::now();
        for name in ["../etc/passwd", "a/b.png", "a\\b.png", ".hidden.png", "bad\n.png"] {
            assert!(
                matches!(
                    resolve_filename(Some(name), ImageMime::Png, now),
                    Err(UploadError::InvalidFilename { .. })
                ),
                "{name} should be rejected"
            );
        }
        assert_eq!(
            resolve_filename(Some("winner.png"), ImageMime::Png, now).unwrap(),
            "winner.png"
        );
    }

    #[test]
    fn test_filename_extension_must_match_image() {
        let now = Utc::now();
        for name in ["winner.jpg", "winner.html", "winner"] {
            assert!(
                matches!(
                    resolve_filename(Some(name), ImageMime::Png, now),
                    Err(UploadError::InvalidFilename { .. })
                ),
                "{name} should be rejected for a png"
            );
        }
        assert_eq!(
            resolve_filename(Some("winner.JPEG"), ImageMime::Jpeg, now).unwrap(),
            "winner.JPEG"
        );
        assert_eq!(
            resolve_filename(Some("winner.jpg"), ImageMime::Jpeg, now).unwrap(),
            "winner.jpg"
        );
    }

    #[test]
    fn test_extension_lookup() {
        assert_eq!(ImageMime::from_extension("a.JPEG"), Some(ImageMime::Jpeg));
        assert_eq!(ImageMime::from_extension("a.webp"), Some(ImageMime::Webp));
        assert_eq!(ImageMime::from_extension("noext"), None);
    }
}
