use crate::error::ValidationError;

pub const ACCEPTED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// A chest X-ray picked by the user, not yet sent anywhere.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Check type and size before anything touches the network or the store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.bytes.is_empty() {
            return Err(ValidationError::MissingFile);
        }
        let content_type = self.content_type.trim().to_ascii_lowercase();
        if !ACCEPTED_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(ValidationError::UnsupportedType(self.content_type.clone()));
        }
        if self.size() > MAX_UPLOAD_BYTES {
            return Err(ValidationError::TooLarge(self.size()));
        }
        Ok(())
    }
}
