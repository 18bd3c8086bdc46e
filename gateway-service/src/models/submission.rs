use axum::body::Bytes;

/// One uploaded evidence file as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(file_name: Option<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name,
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Lowercased extension of the client-supplied file name, if any.
    pub fn extension(&self) -> Option<String> {
        self.file_name
            .as_deref()
            .and_then(|name| std::path::Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

/// A face burst plus a voice clip submitted for a single verification.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub ip_address: Option<String>,
    pub images: Vec<UploadedFile>,
    pub audio: Option<UploadedFile>,
}
