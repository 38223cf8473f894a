use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use thiserror::Error;

const ACCEPTED_MEDIA_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/jpg"];
const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please select an image file first.")]
    NoFile,
    #[error("Invalid file type. Please upload a PNG, JPG, or JPEG image.")]
    InvalidType,
    #[error("File is too large. Maximum size is {}.", format_limit(.max_bytes))]
    TooLarge { max_bytes: usize },
}

/// Whole MiB and KiB limits read the way the page advertises them; anything
/// else is printed exactly.
fn format_limit(bytes: &usize) -> String {
    let bytes = *bytes;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{}KB", bytes / KIB)
    } else {
        format!("{} bytes", bytes)
    }
}

/// A file handed over by the picker or the drop zone, not yet checked.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub name: String,
    pub media_type: Option<String>,
    pub bytes: Bytes,
}

/// An accepted upload. Cloning is cheap, the payload is reference counted.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedImage {
    pub name: String,
    pub media_type: String,
    pub size: usize,
    pub bytes: Bytes,
}

impl SelectedImage {
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, STANDARD.encode(&self.bytes))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageValidator {
    max_bytes: usize,
}

impl ImageValidator {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn too_large(&self) -> ValidationError {
        ValidationError::TooLarge {
            max_bytes: self.max_bytes,
        }
    }

    /// Type is checked before size, so an oversized text file reports the
    /// type problem.
    pub fn validate(&self, file: CandidateFile) -> Result<SelectedImage, ValidationError> {
        let media_type = file
            .media_type
            .as_deref()
            .and_then(normalize_media_type)
            .ok_or(ValidationError::InvalidType)?;

        if file.bytes.len() > self.max_bytes {
            return Err(self.too_large());
        }

        Ok(SelectedImage {
            name: file.name,
            media_type,
            size: file.bytes.len(),
            bytes: file.bytes,
        })
    }
}

fn normalize_media_type(raw: &str) -> Option<String> {
    let essence = raw.split(';').next()?.trim().to_ascii_lowercase();
    ACCEPTED_MEDIA_TYPES
        .contains(&essence.as_str())
        .then_some(essence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(media_type: Option<&str>, size: usize) -> CandidateFile {
        CandidateFile {
            name: "chest.png".into(),
            media_type: media_type.map(str::to_string),
            bytes: Bytes::from(vec![0u8; size]),
        }
    }

    #[test]
    fn accepts_each_supported_media_type() {
        let validator = ImageValidator::new(10 * MIB);
        for media_type in ["image/png", "image/jpeg", "image/jpg", "IMAGE/PNG"] {
            let image = validator.validate(candidate(Some(media_type), 16)).unwrap();
            assert_eq!(image.size, 16);
            assert_eq!(image.media_type, media_type.to_ascii_lowercase());
        }
    }

    #[test]
    fn rejects_unsupported_or_missing_media_type() {
        let validator = ImageValidator::new(10 * MIB);
        for media_type in [Some("image/gif"), Some("application/pdf"), Some(""), None] {
            assert_eq!(
                validator.validate(candidate(media_type, 16)),
                Err(ValidationError::InvalidType)
            );
        }
    }

    #[test]
    fn size_limit_is_inclusive() {
        let validator = ImageValidator::new(10 * MIB);
        assert!(validator.validate(candidate(Some("image/png"), 10 * MIB)).is_ok());

        let err = validator
            .validate(candidate(Some("image/png"), 10 * MIB + 1))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::TooLarge {
                max_bytes: 10 * MIB
            }
        );
        assert_eq!(err.to_string(), "File is too large. Maximum size is 10MB.");
    }

    #[test]
    fn limits_off_mib_boundaries_are_not_rounded_down() {
        let message = |max_bytes| ValidationError::TooLarge { max_bytes }.to_string();

        assert_eq!(message(5_000_000), "File is too large. Maximum size is 5000000 bytes.");
        assert_eq!(message(512 * KIB), "File is too large. Maximum size is 512KB.");
        assert_eq!(message(3 * MIB), "File is too large. Maximum size is 3MB.");
        assert_eq!(message(100), "File is too large. Maximum size is 100 bytes.");
    }

    #[test]
    fn type_is_checked_before_size() {
        let validator = ImageValidator::new(4);
        assert_eq!(
            validator.validate(candidate(Some("text/plain"), 64)),
            Err(ValidationError::InvalidType)
        );
    }

    #[test]
    fn data_uri_embeds_media_type_and_payload() {
        let image = SelectedImage {
            name: "a.jpg".into(),
            media_type: "image/jpeg".into(),
            size: 3,
            bytes: Bytes::from_static(b"abc"),
        };
        assert_eq!(image.to_data_uri(), "data:image/jpeg;base64,YWJj");
    }
}
