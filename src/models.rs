use bytes::Bytes;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::{codec, gallery::Gallery, history::History};

/// Base64 payload plus media type, the shape every image takes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    pub data: String,
    pub media_type: String,
}

impl EncodedImage {
    pub fn new(data: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self { data: data.into(), media_type: media_type.into() }
    }
}

/// One generated or edited poster. Immutable: new states are new artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    image: EncodedImage,
}

impl Artifact {
    pub(crate) fn new(image: EncodedImage) -> Self {
        Self { image }
    }

    /// A user-supplied poster taken as the starting point for direct editing.
    pub fn from_upload(image: EncodedImage) -> Self {
        Self { image }
    }

    pub fn data(&self) -> &str { &self.image.data }

    pub fn media_type(&self) -> &str { &self.image.media_type }

    pub fn image(&self) -> &EncodedImage { &self.image }

    /// Encoded reference used for drag-to-gallery and display.
    pub fn data_url(&self) -> String {
        codec::data_url(&self.image)
    }
}

/// Ephemeral display reference for an input that is not yet part of history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PreviewHandle(String);

impl PreviewHandle {
    fn for_input(id: Uuid) -> Self {
        Self(format!("/api/previews/{id}"))
    }
}

#[derive(Debug, Clone)]
pub struct ImageInput {
    pub id: Uuid,
    pub raw: Bytes,
    pub media_type: String,
    pub preview: PreviewHandle,
}

impl ImageInput {
    /// Validates the bytes through the codec so unreadable files are rejected at selection time.
    pub fn new(raw: impl Into<Bytes>) -> Result<Self, crate::error::EncodingError> {
        let raw = raw.into();
        let media_type = codec::detect_media_type(&raw)?;
        let id = Uuid::new_v4();
        Ok(Self { id, raw, media_type, preview: PreviewHandle::for_input(id) })
    }

    pub fn view(&self, slot: Slot) -> InputView {
        InputView {
            id: self.id,
            slot,
            media_type: self.media_type.clone(),
            size: self.raw.len(),
            preview_url: self.preview.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Product,
    Reference,
    Logo,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputView {
    pub id: Uuid,
    pub slot: Slot,
    pub media_type: String,
    pub size: usize,
    pub preview_url: PreviewHandle,
}

/// Images picked by the user for the next suggestion or generation.
#[derive(Debug, Clone, Default)]
pub struct InputSlots {
    products: Vec<ImageInput>,
    reference: Option<ImageInput>,
    logo: Option<ImageInput>,
}

impl InputSlots {
    pub fn add_product(&mut self, input: ImageInput) -> InputView {
        let view = input.view(Slot::Product);
        self.products.push(input);
        view
    }

    pub fn remove_product(&mut self, id: Uuid) -> bool {
        let before = self.products.len();
        self.products.retain(|p| p.id != id);
        self.products.len() != before
    }

    /// Replaces the reference image; the superseded one is returned so its preview is gone.
    pub fn set_reference(&mut self, input: ImageInput) -> Option<ImageInput> {
        self.reference.replace(input)
    }

    pub fn clear_reference(&mut self) -> Option<ImageInput> {
        self.reference.take()
    }

    pub fn set_logo(&mut self, input: ImageInput) -> Option<ImageInput> {
        self.logo.replace(input)
    }

    pub fn clear_logo(&mut self) -> Option<ImageInput> {
        self.logo.take()
    }

    pub fn products(&self) -> &[ImageInput] { &self.products }

    pub fn reference(&self) -> Option<&ImageInput> { self.reference.as_ref() }

    pub fn logo(&self) -> Option<&ImageInput> { self.logo.as_ref() }

    pub fn find(&self, id: Uuid) -> Option<&ImageInput> {
        self.products
            .iter()
            .chain(self.reference.iter())
            .chain(self.logo.iter())
            .find(|input| input.id == id)
    }

    pub fn views(&self) -> Vec<InputView> {
        let mut views: Vec<InputView> = self.products.iter().map(|p| p.view(Slot::Product)).collect();
        views.extend(self.reference.iter().map(|r| r.view(Slot::Reference)));
        views.extend(self.logo.iter().map(|l| l.view(Slot::Logo)));
        views
    }

    pub fn clear(&mut self) {
        self.products.clear();
        self.reference = None;
        self.logo = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "9:16")]
    Portrait916,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape169,
    #[serde(rename = "3:4")]
    Portrait34,
    #[serde(rename = "4:3")]
    Landscape43,
}

impl AspectRatio {
    #[cfg(test)]
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Portrait916,
        AspectRatio::Square,
        AspectRatio::Landscape169,
        AspectRatio::Portrait34,
        AspectRatio::Landscape43,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Portrait916 => "9:16",
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape169 => "16:9",
            AspectRatio::Portrait34 => "3:4",
            AspectRatio::Landscape43 => "4:3",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptSuggestion {
    pub product_images: Vec<EncodedImage>,
    pub hint: String,
    pub reference_image: Option<EncodedImage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosterGeneration {
    pub product_images: Vec<Artifact>,
    pub concept: String,
    pub aspect_ratio: AspectRatio,
    pub reference_image: Option<EncodedImage>,
    pub logo_image: Option<EncodedImage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosterEdit {
    pub base: Artifact,
    pub instruction: String,
}

/// One per user-facing operation; built per action, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationRequest {
    ConceptSuggestion(ConceptSuggestion),
    PosterGeneration(PosterGeneration),
    PosterEdit(PosterEdit),
}

// --- HTTP payloads ---

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SuggestRequest {
    #[serde(default)]
    pub hint: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SuggestResponse {
    pub concept: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeneratePosterRequest {
    pub concept: String,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EditPosterRequest {
    pub instruction: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GallerySaveRequest {
    #[serde(default)]
    pub reference: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct PosterView {
    pub poster: Option<String>,
    pub media_type: Option<String>,
    pub can_undo: bool,
    pub can_redo: bool,
}

/// Per-process working state: one user, one session.
#[derive(Debug, Default)]
pub struct Session {
    pub inputs: InputSlots,
    pub history: History<Artifact>,
    pub gallery: Gallery,
}

impl Session {
    pub fn poster_view(&self) -> PosterView {
        let current = self.history.current();
        PosterView {
            poster: current.map(Artifact::data_url),
            media_type: current.map(|a| a.media_type().to_string()),
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        }
    }

    /// Start over: empties history and input slots, keeps the gallery.
    pub fn start_over(&mut self) {
        self.history.reset();
        self.inputs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::png_bytes;
    use pretty_assertions::assert_eq;

    #[test]
    fn aspect_ratio_uses_colon_notation() {
        let json = serde_json::to_string(&AspectRatio::ALL).unwrap();
        assert_eq!(json, r#"["9:16","1:1","16:9","3:4","4:3"]"#);
        let parsed: AspectRatio = serde_json::from_str(r#""4:3""#).unwrap();
        assert_eq!(parsed, AspectRatio::Landscape43);
        assert!(serde_json::from_str::<AspectRatio>(r#""2:1""#).is_err());
    }

    #[test]
    fn superseded_reference_releases_its_preview() {
        let mut slots = InputSlots::default();
        let first = ImageInput::new(png_bytes()).unwrap();
        let first_id = first.id;
        assert!(slots.set_reference(first).is_none());
        let second = ImageInput::new(png_bytes()).unwrap();
        let replaced = slots.set_reference(second).unwrap();
        assert_eq!(replaced.id, first_id);
        assert!(slots.find(first_id).is_none());
    }

    #[test]
    fn removing_product_keeps_order_of_the_rest() {
        let mut slots = InputSlots::default();
        let ids: Vec<Uuid> = (0..3)
            .map(|_| slots.add_product(ImageInput::new(png_bytes()).unwrap()).id)
            .collect();
        assert!(slots.remove_product(ids[1]));
        assert!(!slots.remove_product(ids[1]));
        let remaining: Vec<Uuid> = slots.products().iter().map(|p| p.id).collect();
        assert_eq!(remaining, vec![ids[0], ids[2]]);
    }

    #[test]
    fn corrupt_input_is_rejected_at_selection() {
        assert!(ImageInput::new(b"definitely not an image".to_vec()).is_err());
    }

    #[test]
    fn start_over_keeps_gallery() {
        let mut session = Session::default();
        let artifact = Artifact::new(EncodedImage::new("AAAA", "image/png"));
        session.history.write(artifact.clone(), crate::history::WriteMode::ReplaceAll);
        session.gallery.save(artifact.data_url());
        session.inputs.add_product(ImageInput::new(png_bytes()).unwrap());

        session.start_over();

        assert_eq!(session.poster_view(), PosterView { poster: None, media_type: None, can_undo: false, can_redo: false });
        assert!(session.inputs.products().is_empty());
        assert_eq!(session.gallery.len(), 1);
    }
}
