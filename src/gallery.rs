use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GalleryEntry {
    pub reference: String,
    pub saved_at: DateTime<Utc>,
}

/// Saved posters in drop order. A reference already present is not stored twice.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// Returns `true` when the reference was new and got appended.
    pub fn save(&mut self, reference: impl Into<String>) -> bool {
        let reference = reference.into();
        if reference.is_empty() || self.contains(&reference) {
            return false;
        }
        self.entries.push(GalleryEntry { reference, saved_at: Utc::now() });
        true
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.entries.iter().any(|e| e.reference == reference)
    }

    pub fn get(&self, index: usize) -> Option<&GalleryEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// File name for the n-th saved poster (0-based index, 1-based name).
pub fn download_name(index: usize) -> String {
    format!("poster-design-{}.png", index + 1)
}
