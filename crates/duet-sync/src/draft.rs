use bytes::Bytes;

/// A file picked for sending, held in memory until the upload.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingFile {
    pub name: String,
    /// May be empty when the platform could not detect it.
    pub mime: String,
    pub bytes: Bytes,
}

impl OutgoingFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// What the user is about to send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub text: String,
    pub file: Option<OutgoingFile>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file: None,
        }
    }

    pub fn with_file(mut self, file: OutgoingFile) -> Self {
        self.file = Some(file);
        self
    }

    /// Text to store on the message. Whitespace-only text counts as none.
    pub fn message_text(&self) -> Option<String> {
        let trimmed = self.text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.message_text().is_none() && self.file.is_none()
    }
}

/// Local preview of a picked image, shown before it is uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPreview {
    pub name: String,
    pub mime: String,
    pub bytes: Bytes,
}

impl LocalPreview {
    /// Only images get a preview.
    pub fn for_file(file: &OutgoingFile) -> Option<Self> {
        file.is_image().then(|| Self {
            name: file.name.clone(),
            mime: file.mime.clone(),
            bytes: file.bytes.clone(),
        })
    }
}

/// A draft handed back after a failed send so the input can be restored.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredDraft {
    pub draft: Draft,
    pub preview: Option<LocalPreview>,
}

impl From<Draft> for RestoredDraft {
    fn from(draft: Draft) -> Self {
        let preview = draft.file.as_ref().and_then(LocalPreview::for_file);
        Self { draft, preview }
    }
}
