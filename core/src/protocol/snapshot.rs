//! Clipboard snapshot: every representation of one copy event

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::constants::{MIME_TYPE_HTML, MIME_TYPE_PNG, MIME_TYPE_TEXT};

/// One representation of clipboard content, tagged with its MIME kind.
///
/// Kinds outside the known set are legal and are carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClipItem {
    pub kind: String,
    #[serde(with = "crate::serde_utils::base64_bytes")]
    pub data: Vec<u8>,
}

impl ClipItem {
    pub fn new(kind: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
        }
    }

    /// Whether this kind is one the clipboard backends know how to apply
    pub fn is_known_kind(&self) -> bool {
        matches!(
            self.kind.as_str(),
            MIME_TYPE_TEXT | MIME_TYPE_HTML | MIME_TYPE_PNG
        )
    }
}

/// One logical clipboard capture. Item order is capture order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Snapshot {
    items: Vec<ClipItem>,
}

impl Snapshot {
    pub fn new(items: Vec<ClipItem>) -> Self {
        Self { items }
    }

    /// Convenience for the common single plain-text capture
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![ClipItem::new(MIME_TYPE_TEXT, text.into().into_bytes())])
    }

    pub fn push(&mut self, kind: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.items.push(ClipItem::new(kind, data));
    }

    pub fn items(&self) -> &[ClipItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// First payload of the given kind
    pub fn get(&self, kind: &str) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|item| item.kind == kind)
            .map(|item| item.data.as_slice())
    }

    /// Plain text representation, if any
    pub fn plain_text(&self) -> Option<String> {
        self.get(MIME_TYPE_TEXT)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// SHA256 over kinds and payloads, for cheap change detection
    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for item in &self.items {
            hasher.update((item.kind.len() as u32).to_be_bytes());
            hasher.update(item.kind.as_bytes());
            hasher.update((item.data.len() as u32).to_be_bytes());
            hasher.update(&item.data);
        }
        hasher.finalize().into()
    }
}

impl From<Vec<ClipItem>> for Snapshot {
    fn from(items: Vec<ClipItem>) -> Self {
        Self::new(items)
    }
}
