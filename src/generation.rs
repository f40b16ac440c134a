//! Generation client: builds the ordered multi-part requests for each operation and turns
//! backend results into artifacts or concept text.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::{
    codec,
    error::{GenerationError, Stage},
    gemini::{first_image_part, response_text, GeminiError, RequestPart, ResponsePart},
    models::{Artifact, ConceptSuggestion, EncodedImage, GenerationRequest, PosterEdit, PosterGeneration},
};

const STYLE_REPLICATION_PROMPT: &str = "You are an expert prompt writer for an image generation AI.
1. Analyze the reference image for its artistic style, composition, mood, and color palette.
2. Analyze the product image(s) to understand the subject.
3. Read the user's idea: \"{hint}\".
4. Your task is to generate a new, detailed prompt for the image generation AI. This prompt should instruct the AI to create a poster that:
   - Replicates the artistic style (e.g., photorealistic, illustrative), mood (e.g., dark, vibrant), and color scheme of the reference image.
   - Features the product from the product image(s) as the main subject.
   - Incorporates the user's idea as the central theme or modification.
The final output MUST be only the generated prompt itself, which will serve as a creative concept. It should be a detailed phrase or sentence. Do not add any extra explanations or conversational text.";

const EXPAND_HINT_PROMPT: &str = "Analyze the following product image(s) and the user's initial idea: \"{hint}\". Based on these, expand the idea into a more detailed and compelling concept for a marketing poster. The final concept MUST be approximately 100 to 150 characters long. For example, if the idea is 'summer vibe', you might suggest 'Experience the crisp, refreshing taste of summer with our all-natural citrus soda.'";

const ORIGINAL_CONCEPT_PROMPT: &str = "Analyze the following product image(s). Based on the product, its style, and potential audience, generate a creative and compelling concept for a marketing poster. The concept MUST be a detailed phrase or sentence, approximately 100 to 150 characters long. Be descriptive and inspiring.";

const REFERENCE_STYLE_LABEL: &str = "Reference image for style inspiration:";
const PRODUCT_TO_INCLUDE_LABEL: &str = "Product image to include:";

const REMOVE_BACKGROUND_INSTRUCTION: &str =
    "Remove the background completely, keeping only the main product. Make the background transparent.";

const PRODUCT_IMAGE_LABEL: &str =
    "This is a product image with a transparent background to be included in the poster.";
const POSTER_REFERENCE_LABEL: &str = "Use this reference image for style, color, and mood inspiration:";
const LOGO_INSTRUCTION: &str = "CRITICAL INSTRUCTION: You MUST apply the following brand logo as a realistic sticker or branding element onto any packaging or serving container depicted in the image (e.g., bottles, boxes, cans, cups). The logo's placement should look natural and be clearly visible. It is crucial that the logo is NOT placed anywhere else, such as on the main product if it's not packaged, or floating in the background. Do not omit the logo.";

/// Which kind of output a request expects; picks the model on the backend side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRequest {
    pub stage: Stage,
    pub output: OutputKind,
    pub parts: Vec<RequestPart>,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate_content(&self, request: &BackendRequest) -> Result<Vec<ResponsePart>, GeminiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConceptPrompt {
    StyleReplication,
    ExpandHint,
    Original,
}

impl ConceptPrompt {
    /// A reference only counts when a hint is given too.
    pub fn select(hint: &str, has_reference: bool) -> Self {
        match (hint.trim().is_empty(), has_reference) {
            (false, true) => ConceptPrompt::StyleReplication,
            (false, false) => ConceptPrompt::ExpandHint,
            (true, _) => ConceptPrompt::Original,
        }
    }
}

pub fn concept_parts(request: &ConceptSuggestion) -> (ConceptPrompt, Vec<RequestPart>) {
    let hint = request.hint.trim();
    let variant = ConceptPrompt::select(hint, request.reference_image.is_some());
    let mut parts = Vec::with_capacity(2 * request.product_images.len() + 3);

    match (variant, &request.reference_image) {
        (ConceptPrompt::StyleReplication, Some(reference)) => {
            parts.push(RequestPart::text(STYLE_REPLICATION_PROMPT.replace("{hint}", hint)));
            parts.push(RequestPart::text(REFERENCE_STYLE_LABEL));
            parts.push(RequestPart::image(reference));
            for image in &request.product_images {
                parts.push(RequestPart::text(PRODUCT_TO_INCLUDE_LABEL));
                parts.push(RequestPart::image(image));
            }
        }
        (ConceptPrompt::ExpandHint, _) | (ConceptPrompt::StyleReplication, None) => {
            parts.push(RequestPart::text(EXPAND_HINT_PROMPT.replace("{hint}", hint)));
            parts.extend(request.product_images.iter().map(RequestPart::image));
        }
        (ConceptPrompt::Original, _) => {
            parts.push(RequestPart::text(ORIGINAL_CONCEPT_PROMPT));
            parts.extend(request.product_images.iter().map(RequestPart::image));
        }
    }
    (variant, parts)
}

pub fn background_removal_parts(image: &EncodedImage) -> Vec<RequestPart> {
    vec![RequestPart::image(image), RequestPart::text(REMOVE_BACKGROUND_INSTRUCTION)]
}

pub fn poster_parts(request: &PosterGeneration) -> Vec<RequestPart> {
    let mut parts = vec![RequestPart::text(format!(
        "Create a dynamic and eye-catching poster with an aspect ratio of {}. The creative concept is: \"{}\". Place the following product(s) naturally within the generated scene.",
        request.aspect_ratio, request.concept.trim()
    ))];

    for product in &request.product_images {
        parts.push(RequestPart::text(PRODUCT_IMAGE_LABEL));
        parts.push(RequestPart::image(product.image()));
    }

    if let Some(reference) = &request.reference_image {
        parts.push(RequestPart::text(POSTER_REFERENCE_LABEL));
        parts.push(RequestPart::image(reference));
    }

    if let Some(logo) = &request.logo_image {
        parts.push(RequestPart::text(LOGO_INSTRUCTION));
        parts.push(RequestPart::image(logo));
    }

    parts
}

pub fn edit_parts(request: &PosterEdit) -> Vec<RequestPart> {
    vec![RequestPart::image(request.base.image()), RequestPart::text(request.instruction.trim())]
}

impl GenerationRequest {
    pub fn stage(&self) -> Stage {
        match self {
            GenerationRequest::ConceptSuggestion(_) => Stage::Suggest,
            GenerationRequest::PosterGeneration(_) => Stage::PosterGeneration,
            GenerationRequest::PosterEdit(_) => Stage::Edit,
        }
    }

    pub fn to_backend(&self) -> BackendRequest {
        let (output, parts) = match self {
            GenerationRequest::ConceptSuggestion(r) => (OutputKind::Text, concept_parts(r).1),
            GenerationRequest::PosterGeneration(r) => (OutputKind::Image, poster_parts(r)),
            GenerationRequest::PosterEdit(r) => (OutputKind::Image, edit_parts(r)),
        };
        BackendRequest { stage: self.stage(), output, parts }
    }
}

/// Four round trips to the generation backend. No retries: a failure surfaces immediately.
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    pub async fn suggest_concept(&self, request: ConceptSuggestion) -> Result<String, GenerationError> {
        let (variant, _) = concept_parts(&request);
        info!("💡 Suggesting concept ({:?} prompt) from {} product image(s)", variant, request.product_images.len());
        let backend_request = GenerationRequest::ConceptSuggestion(request).to_backend();
        let parts = self.call(&backend_request).await?;
        response_text(&parts).ok_or_else(|| {
            error!("❌ Concept suggestion returned no text");
            GenerationError::new(Stage::Suggest, "no text returned")
        })
    }

    pub async fn remove_background(&self, image: &EncodedImage) -> Result<Artifact, GenerationError> {
        let request = BackendRequest {
            stage: Stage::BackgroundRemoval,
            output: OutputKind::Image,
            parts: background_removal_parts(image),
        };
        self.request_image(&request).await
    }

    pub async fn generate_poster(&self, request: PosterGeneration) -> Result<Artifact, GenerationError> {
        info!(
            "🎨 Composing {} poster with {} product image(s), reference: {}, logo: {}",
            request.aspect_ratio,
            request.product_images.len(),
            request.reference_image.is_some(),
            request.logo_image.is_some()
        );
        self.request_image(&GenerationRequest::PosterGeneration(request).to_backend()).await
    }

    pub async fn edit_poster(&self, request: PosterEdit) -> Result<Artifact, GenerationError> {
        self.request_image(&GenerationRequest::PosterEdit(request).to_backend()).await
    }

    async fn call(&self, request: &BackendRequest) -> Result<Vec<ResponsePart>, GenerationError> {
        self.backend.generate_content(request).await.map_err(|e| {
            error!("❌ {} request failed: {}", request.stage, e);
            GenerationError::new(request.stage, e.to_string())
        })
    }

    async fn request_image(&self, request: &BackendRequest) -> Result<Artifact, GenerationError> {
        let parts = self.call(request).await?;
        match first_image_part(&parts) {
            Some(image) if !image.data.is_ascii() => {
                error!("❌ {} returned a malformed image payload", request.stage);
                Err(GenerationError::new(request.stage, "malformed image payload"))
            }
            Some(image) => {
                info!("✅ {} returned image: {}", request.stage, codec::preview(&image.data));
                Ok(Artifact::new(image.clone()))
            }
            None => {
                error!("❌ {} returned no image", request.stage);
                Err(GenerationError::new(request.stage, "no image returned"))
            }
        }
    }
}
