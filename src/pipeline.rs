use bytes::Bytes;
use futures_util::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, info};

use crate::{
    codec,
    error::FlowError,
    generation::GenerationClient,
    history::WriteMode,
    models::{
        Artifact, ConceptSuggestion, ImageInput, InputSlots, AspectRatio, PosterEdit, PosterGeneration,
        PosterView, Session,
    },
};

/// Where the single in-flight flow currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FlowState {
    Idle,
    Suggesting,
    AnalyzingImages { count: usize },
    Composing,
    Editing,
    Done,
    Failed { message: String },
}

impl FlowState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            FlowState::Suggesting | FlowState::AnalyzingImages { .. } | FlowState::Composing | FlowState::Editing
        )
    }

    /// Progress text for the UI; advisory only.
    pub fn label(&self) -> Option<String> {
        match self {
            FlowState::Suggesting => Some("Dreaming up a concept...".to_string()),
            FlowState::AnalyzingImages { count } => Some(format!("Analyzing {count} product image(s)...")),
            FlowState::Composing => Some("Crafting your poster vision...".to_string()),
            FlowState::Editing => Some("Applying your creative edits...".to_string()),
            FlowState::Idle | FlowState::Done | FlowState::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusView {
    pub loading: bool,
    #[serde(flatten)]
    pub state: FlowState,
    pub message: Option<String>,
}

/// Cooperative `isLoading` gate: at most one flow runs at a time.
#[derive(Debug)]
pub struct LoadingGate {
    state: Mutex<FlowState>,
}

impl Default for LoadingGate {
    fn default() -> Self {
        Self { state: Mutex::new(FlowState::Idle) }
    }
}

impl LoadingGate {
    pub fn begin(&self, state: FlowState) -> Result<FlowTicket<'_>, FlowError> {
        let mut current = self.state.lock();
        if current.is_active() {
            return Err(FlowError::Busy);
        }
        *current = state;
        Ok(FlowTicket { gate: self, finished: false })
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().is_active()
    }

    /// Fails with `Busy` while a flow is outstanding.
    pub fn ensure_idle(&self) -> Result<(), FlowError> {
        if self.is_busy() { Err(FlowError::Busy) } else { Ok(()) }
    }

    pub fn snapshot(&self) -> FlowState {
        self.state.lock().clone()
    }

    pub fn status(&self) -> StatusView {
        let state = self.snapshot();
        let message = match &state {
            FlowState::Failed { message } => Some(message.clone()),
            other => other.label(),
        };
        StatusView { loading: state.is_active(), state, message }
    }
}

pub struct FlowTicket<'a> {
    gate: &'a LoadingGate,
    finished: bool,
}

impl FlowTicket<'_> {
    pub fn advance(&self, state: FlowState) {
        info!("⏳ {}", state.label().unwrap_or_default());
        *self.gate.state.lock() = state;
    }

    pub fn finish<T>(mut self, result: &Result<T, FlowError>) {
        let next = match result {
            Ok(_) => FlowState::Done,
            Err(e) => {
                error!("❌ Flow failed: {}", e);
                FlowState::Failed { message: e.user_message() }
            }
        };
        *self.gate.state.lock() = next;
        self.finished = true;
    }
}

impl Drop for FlowTicket<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.gate.state.lock() = FlowState::Idle;
        }
    }
}

/// Inputs of a new generation, captured from the slots when the user presses generate.
#[derive(Debug, Clone)]
pub struct GenerateInput {
    pub product_images: Vec<ImageInput>,
    pub concept: String,
    pub aspect_ratio: AspectRatio,
    pub reference_image: Option<ImageInput>,
    pub logo_image: Option<ImageInput>,
}

impl GenerateInput {
    pub fn from_slots(slots: &InputSlots, concept: String, aspect_ratio: AspectRatio) -> Self {
        Self {
            product_images: slots.products().to_vec(),
            concept,
            aspect_ratio,
            reference_image: slots.reference().cloned(),
            logo_image: slots.logo().cloned(),
        }
    }
}

fn encode_optional(input: Option<&ImageInput>) -> Result<Option<crate::models::EncodedImage>, FlowError> {
    Ok(input.map(|i| codec::encode(&i.raw)).transpose()?)
}

/// Sequences codec and generation calls and commits results to the session history.
pub struct Pipeline {
    client: GenerationClient,
    gate: LoadingGate,
}

impl Pipeline {
    pub fn new(client: GenerationClient) -> Self {
        Self { client, gate: LoadingGate::default() }
    }

    pub fn gate(&self) -> &LoadingGate {
        &self.gate
    }

    /// Suggest flow. Never touches history; errors are returned after being reported.
    pub async fn suggest(
        &self,
        product_images: Vec<ImageInput>,
        hint: String,
        reference_image: Option<ImageInput>,
    ) -> Result<String, FlowError> {
        if product_images.is_empty() {
            return Err(FlowError::invalid("Upload at least one product image to get a suggestion."));
        }
        let ticket = self.gate.begin(FlowState::Suggesting)?;
        let result = async {
            let encoded = product_images
                .iter()
                .map(|i| codec::encode(&i.raw))
                .collect::<Result<Vec<_>, _>>()?;
            let reference = encode_optional(reference_image.as_ref())?;
            let concept = self
                .client
                .suggest_concept(ConceptSuggestion { product_images: encoded, hint, reference_image: reference })
                .await?;
            Ok::<_, FlowError>(concept)
        }
        .await;
        ticket.finish(&result);
        result
    }

    /// Generate flow: background removal for every product, then composition.
    /// A successful poster replaces the whole history.
    pub async fn generate(&self, session: &RwLock<Session>, input: GenerateInput) -> Result<PosterView, FlowError> {
        if input.product_images.is_empty() {
            return Err(FlowError::invalid("Upload at least one product image."));
        }
        if input.concept.trim().is_empty() {
            return Err(FlowError::invalid("Describe a concept for your poster."));
        }
        let ticket = self.gate.begin(FlowState::AnalyzingImages { count: input.product_images.len() })?;
        let result = self.run_generate(&ticket, input).await.map(|poster| {
            let mut guard = session.write();
            guard.history.write(poster, WriteMode::ReplaceAll);
            guard.poster_view()
        });
        ticket.finish(&result);
        result
    }

    async fn run_generate(&self, ticket: &FlowTicket<'_>, input: GenerateInput) -> Result<Artifact, FlowError> {
        info!("🚀 Analyzing {} product image(s)", input.product_images.len());
        let removals = input.product_images.iter().map(|image| async move {
            let encoded = codec::encode(&image.raw)?;
            let artifact = self.client.remove_background(&encoded).await?;
            Ok::<_, FlowError>(artifact)
        });
        let product_images = try_join_all(removals).await?;

        ticket.advance(FlowState::Composing);
        let reference_image = encode_optional(input.reference_image.as_ref())?;
        let logo_image = encode_optional(input.logo_image.as_ref())?;
        let poster = self
            .client
            .generate_poster(PosterGeneration {
                product_images,
                concept: input.concept,
                aspect_ratio: input.aspect_ratio,
                reference_image,
                logo_image,
            })
            .await?;
        Ok(poster)
    }

    /// Edit flow: branches history from the cursor. Without a current poster nothing happens.
    pub async fn edit(&self, session: &RwLock<Session>, instruction: String) -> Result<PosterView, FlowError> {
        if instruction.trim().is_empty() {
            return Err(FlowError::invalid("Describe the edit you want to make."));
        }
        let ticket = self.gate.begin(FlowState::Editing)?;
        let current = session.read().history.current().cloned();
        let Some(base) = current else {
            info!("No poster to edit; ignoring edit request");
            drop(ticket);
            return Ok(session.read().poster_view());
        };
        let result = self
            .client
            .edit_poster(PosterEdit { base, instruction })
            .await
            .map_err(FlowError::from)
            .map(|edited| {
                let mut guard = session.write();
                guard.history.write(edited, WriteMode::Branch);
                guard.poster_view()
            });
        ticket.finish(&result);
        result
    }

    /// Direct-edit mode: a user-supplied poster starts a fresh history.
    pub fn upload_for_editing(&self, session: &RwLock<Session>, raw: Bytes) -> Result<PosterView, FlowError> {
        self.gate.ensure_idle()?;
        let encoded = codec::encode(&raw)?;
        info!("📥 Poster uploaded for direct editing ({})", encoded.media_type);
        let mut guard = session.write();
        guard.history.write(Artifact::from_upload(encoded), WriteMode::ReplaceAll);
        Ok(guard.poster_view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{GenerationError, Stage},
        gemini::{GeminiError, RequestPart, ResponsePart},
        generation::testing::{echo_response, ScriptedBackend},
        models::EncodedImage,
    };
    use pretty_assertions::assert_eq;
    use std::{io::Cursor, sync::Arc};

    fn png(width: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, 1, image::Rgba([10, 20, 30, 255]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn product(width: u32) -> ImageInput {
        ImageInput::new(png(width)).unwrap()
    }

    fn b64(input: &ImageInput) -> String {
        codec::encode(&input.raw).unwrap().data
    }

    fn pipeline_with(backend: Arc<ScriptedBackend>) -> Pipeline {
        Pipeline::new(GenerationClient::new(backend))
    }

    fn seeded_session(values: &[&str]) -> RwLock<Session> {
        let mut session = Session::default();
        for v in values {
            session.history.write(Artifact::new(EncodedImage::new(*v, "image/png")), WriteMode::Branch);
        }
        RwLock::new(session)
    }

    fn history_data(session: &RwLock<Session>) -> (Vec<String>, isize) {
        let guard = session.read();
        let data = guard.history.entries().iter().map(|a| a.data().to_string()).collect();
        (data, guard.history.index())
    }

    fn input(products: Vec<ImageInput>) -> GenerateInput {
        GenerateInput {
            product_images: products,
            concept: "Citrus soda on a beach".into(),
            aspect_ratio: AspectRatio::Portrait916,
            reference_image: None,
            logo_image: None,
        }
    }

    #[tokio::test]
    async fn generate_replaces_history_and_feeds_removed_backgrounds_in_order() {
        let backend = Arc::new(ScriptedBackend::echo());
        let pipeline = pipeline_with(backend.clone());
        let session = seeded_session(&["old-a", "old-b"]);
        let products = vec![product(1), product(2), product(3)];
        let expected: Vec<String> = products.iter().map(|p| format!("nobg:{}", b64(p))).collect();

        let view = pipeline.generate(&session, input(products)).await.unwrap();

        assert_eq!(history_data(&session), (vec!["poster".to_string()], 0));
        assert_eq!(view.poster.as_deref(), Some("data:image/png;base64,poster"));
        assert!(!view.can_undo && !view.can_redo);

        let compose = backend.calls_for(Stage::PosterGeneration);
        assert_eq!(compose.len(), 1);
        let sent: Vec<String> = compose[0].parts.iter().filter_map(RequestPart::as_image).map(|i| i.data.clone()).collect();
        assert_eq!(sent, expected);
        assert_eq!(pipeline.gate().snapshot(), FlowState::Done);
    }

    #[tokio::test]
    async fn removal_results_keep_input_order_when_completion_order_differs() {
        let products = vec![product(1), product(2), product(3)];
        let first = b64(&products[0]);
        let backend = Arc::new(ScriptedBackend::echo().with_yields(move |request| {
            let is_first = request.parts.iter().filter_map(RequestPart::as_image).any(|i| i.data == first);
            if request.stage == Stage::BackgroundRemoval && is_first { 25 } else { 0 }
        }));
        let pipeline = pipeline_with(backend.clone());
        let session = RwLock::new(Session::default());
        let expected: Vec<String> = products.iter().map(|p| format!("nobg:{}", b64(p))).collect();

        pipeline.generate(&session, input(products)).await.unwrap();

        let compose = &backend.calls_for(Stage::PosterGeneration)[0];
        let sent: Vec<String> = compose.parts.iter().filter_map(RequestPart::as_image).map(|i| i.data.clone()).collect();
        assert_eq!(sent, expected);
    }

    #[tokio::test]
    async fn failed_removal_of_second_image_aborts_before_composing() {
        let products = vec![product(1), product(2), product(3)];
        let second = b64(&products[1]);
        let backend = Arc::new(ScriptedBackend::new(move |request| {
            let hits_second = request.parts.iter().filter_map(RequestPart::as_image).any(|i| i.data == second);
            if request.stage == Stage::BackgroundRemoval && hits_second {
                Ok(vec![ResponsePart::Text("I can't do that".into())])
            } else {
                Ok(vec![echo_response(request)])
            }
        }));
        let pipeline = pipeline_with(backend.clone());
        let session = seeded_session(&["a", "b", "c"]);
        session.write().history.undo();

        let err = pipeline.generate(&session, input(products)).await.unwrap_err();

        assert!(matches!(
            &err,
            FlowError::Generation(GenerationError { stage: Stage::BackgroundRemoval, .. })
        ));
        assert_eq!(err.user_message(), "Failed to remove background. Please try again.");
        assert!(backend.calls_for(Stage::PosterGeneration).is_empty());
        assert_eq!(history_data(&session), (vec!["a".to_string(), "b".to_string(), "c".to_string()], 1));
        assert_eq!(
            pipeline.gate().snapshot(),
            FlowState::Failed { message: "Failed to remove background. Please try again.".into() }
        );
    }

    #[tokio::test]
    async fn unreadable_logo_fails_at_encode_time_without_composing() {
        let backend = Arc::new(ScriptedBackend::echo());
        let pipeline = pipeline_with(backend.clone());
        let session = RwLock::new(Session::default());
        let mut request = input(vec![product(1)]);
        let mut logo = product(4);
        logo.raw = Bytes::from_static(b"corrupted");
        request.logo_image = Some(logo);

        let err = pipeline.generate(&session, request).await.unwrap_err();

        assert!(matches!(err, FlowError::Encoding(_)));
        assert!(backend.calls_for(Stage::PosterGeneration).is_empty());
        assert!(session.read().history.is_empty());
    }

    #[tokio::test]
    async fn generate_forwards_reference_and_logo() {
        let backend = Arc::new(ScriptedBackend::echo());
        let pipeline = pipeline_with(backend.clone());
        let session = RwLock::new(Session::default());
        let mut request = input(vec![product(1)]);
        let reference = product(7);
        let logo = product(8);
        let (ref_data, logo_data) = (b64(&reference), b64(&logo));
        request.reference_image = Some(reference);
        request.logo_image = Some(logo);

        pipeline.generate(&session, request).await.unwrap();

        let compose = &backend.calls_for(Stage::PosterGeneration)[0];
        let images: Vec<String> = compose.parts.iter().filter_map(RequestPart::as_image).map(|i| i.data.clone()).collect();
        assert_eq!(images.len(), 3);
        assert_eq!(images[1], ref_data);
        assert_eq!(images[2], logo_data);
    }

    #[tokio::test]
    async fn generate_validates_inputs() {
        let backend = Arc::new(ScriptedBackend::echo());
        let pipeline = pipeline_with(backend.clone());
        let session = RwLock::new(Session::default());

        let err = pipeline.generate(&session, input(vec![])).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidInput(_)));

        let mut blank = input(vec![product(1)]);
        blank.concept = "   ".into();
        assert!(matches!(pipeline.generate(&session, blank).await, Err(FlowError::InvalidInput(_))));
        assert!(backend.calls().is_empty());
        assert_eq!(pipeline.gate().snapshot(), FlowState::Idle);
    }

    #[tokio::test]
    async fn edit_branches_from_cursor() {
        let backend = Arc::new(ScriptedBackend::echo());
        let pipeline = pipeline_with(backend.clone());
        let session = seeded_session(&["A", "B", "C"]);
        session.write().history.undo();

        let view = pipeline.edit(&session, "add snow".into()).await.unwrap();

        assert_eq!(history_data(&session), (vec!["A".to_string(), "B".to_string(), "edit:add snow".to_string()], 2));
        assert!(view.can_undo);
        assert!(!view.can_redo);
        let edit = &backend.calls_for(Stage::Edit)[0];
        assert_eq!(edit.parts[0].as_image().map(|i| i.data.as_str()), Some("B"));
    }

    #[tokio::test]
    async fn edit_without_poster_is_a_noop() {
        let backend = Arc::new(ScriptedBackend::echo());
        let pipeline = pipeline_with(backend.clone());
        let session = RwLock::new(Session::default());

        let view = pipeline.edit(&session, "brighter".into()).await.unwrap();

        assert_eq!(view.poster, None);
        assert!(backend.calls().is_empty());
        assert_eq!(pipeline.gate().snapshot(), FlowState::Idle);
    }

    #[tokio::test]
    async fn edit_picks_its_base_only_after_taking_the_gate() {
        let backend = Arc::new(ScriptedBackend::echo());
        let pipeline = pipeline_with(backend.clone());
        let session = RwLock::new(Session::default());

        let ticket = pipeline.gate().begin(FlowState::Composing).unwrap();
        assert!(matches!(pipeline.edit(&session, "brighter".into()).await, Err(FlowError::Busy)));
        assert_eq!(pipeline.gate().snapshot(), FlowState::Composing);
        drop(ticket);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_edit_payload_fails_the_edit_stage() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        let _guard = tracing::subscriber::set_default(subscriber);
        let backend = Arc::new(ScriptedBackend::new(|_| {
            Ok(vec![ResponsePart::Image(EncodedImage::new(format!("a{}", "é".repeat(60)), "image/png"))])
        }));
        let pipeline = pipeline_with(backend);
        let session = seeded_session(&["A"]);

        let err = pipeline.edit(&session, "add glitter".into()).await.unwrap_err();

        assert_eq!(err.user_message(), "Failed to edit poster. Please try a different instruction.");
        assert!(matches!(pipeline.gate().snapshot(), FlowState::Failed { .. }));
        assert_eq!(history_data(&session), (vec!["A".to_string()], 0));
    }

    #[tokio::test]
    async fn failed_edit_leaves_history_untouched() {
        let backend = Arc::new(ScriptedBackend::new(|_| Err(GeminiError::Http("timeout".into()))));
        let pipeline = pipeline_with(backend);
        let session = seeded_session(&["A", "B"]);

        let err = pipeline.edit(&session, "make it pop".into()).await.unwrap_err();

        assert_eq!(err.user_message(), "Failed to edit poster. Please try a different instruction.");
        assert_eq!(history_data(&session), (vec!["A".to_string(), "B".to_string()], 1));
    }

    #[tokio::test]
    async fn second_flow_is_rejected_while_one_is_outstanding() {
        let backend = Arc::new(ScriptedBackend::echo());
        let pipeline = pipeline_with(backend.clone());
        let session = seeded_session(&["A"]);

        let ticket = pipeline.gate().begin(FlowState::Editing).unwrap();
        assert!(pipeline.gate().status().loading);
        assert!(matches!(pipeline.edit(&session, "x".into()).await, Err(FlowError::Busy)));
        assert!(matches!(pipeline.suggest(vec![product(1)], String::new(), None).await, Err(FlowError::Busy)));
        assert!(matches!(pipeline.upload_for_editing(&session, Bytes::from(png(2))), Err(FlowError::Busy)));
        drop(ticket);

        assert_eq!(pipeline.gate().snapshot(), FlowState::Idle);
        assert!(backend.calls().is_empty());
        pipeline.edit(&session, "x".into()).await.unwrap();
    }

    #[tokio::test]
    async fn suggest_returns_text_and_leaves_history_alone() {
        let backend = Arc::new(ScriptedBackend::echo());
        let pipeline = pipeline_with(backend.clone());

        let concept = pipeline.suggest(vec![product(1)], "retro".into(), None).await.unwrap();

        assert_eq!(concept, "A bold summer concept");
        let call = &backend.calls()[0];
        assert_eq!(call.stage, Stage::Suggest);
        assert!(call.parts[0].as_text().unwrap().contains("\"retro\""));
    }

    #[tokio::test]
    async fn suggest_failure_is_returned_to_caller() {
        let backend = Arc::new(ScriptedBackend::new(|_| Err(GeminiError::Other("quota".into()))));
        let pipeline = pipeline_with(backend);

        let err = pipeline.suggest(vec![product(1)], String::new(), None).await.unwrap_err();

        assert_eq!(err.user_message(), "Failed to generate a concept. Please try again.");
        assert!(!pipeline.gate().is_busy());
    }

    #[tokio::test]
    async fn uploaded_poster_starts_fresh_history() {
        let pipeline = pipeline_with(Arc::new(ScriptedBackend::echo()));
        let session = seeded_session(&["A", "B"]);

        let view = pipeline.upload_for_editing(&session, Bytes::from(png(3))).unwrap();

        assert_eq!(session.read().history.len(), 1);
        assert!(view.poster.unwrap().starts_with("data:image/png;base64,"));
        assert!(pipeline.upload_for_editing(&session, Bytes::from_static(b"nope")).is_err());
        assert_eq!(session.read().history.len(), 1);
    }

    #[test]
    fn progress_labels() {
        assert_eq!(FlowState::AnalyzingImages { count: 2 }.label().as_deref(), Some("Analyzing 2 product image(s)..."));
        assert_eq!(FlowState::Composing.label().as_deref(), Some("Crafting your poster vision..."));
        assert_eq!(FlowState::Done.label(), None);
        let status = serde_json::to_value(LoadingGate::default().status()).unwrap();
        assert_eq!(status, serde_json::json!({ "loading": false, "state": "idle", "message": null }));
    }
}
