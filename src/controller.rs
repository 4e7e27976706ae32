use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{encoder::SourceImage, gemini::{EditError, ImageEditor}, models::SessionView};

pub const DEFAULT_INSTRUCTION: &str =
    "Make the man look like a pirate, standing on the deck of a ship with a sunset in the background.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    ImageSelected,
    /// Only entered with an image and a non-blank instruction in hand.
    Submitting,
    Succeeded,
    Failed(String),
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ImageSelected => "image_selected",
            Self::Submitting => "submitting",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("Please upload an image first.")] MissingImage,
    #[error("Please enter a text prompt describing your edit.")] EmptyPrompt,
    #[error("An edit is already in progress.")] Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub data_uri: String,
    pub generated_at: DateTime<Utc>,
}

/// Whether the submit control should be enabled.
pub fn submit_enabled(has_image: bool, prompt_non_empty: bool, is_submitting: bool) -> bool {
    !is_submitting && has_image && prompt_non_empty
}

/// Inputs captured when a submission is accepted. `attempt` ties the outcome back to it.
#[derive(Debug, Clone)]
pub struct Submission {
    pub attempt: u64,
    pub image: SourceImage,
    pub instruction: String,
}

#[derive(Debug)]
pub struct Controller {
    state: WorkflowState,
    source: Option<SourceImage>,
    instruction: String,
    result: Option<GenerationResult>,
    notice: Option<String>,
    attempt: u64,
    updated_at: DateTime<Utc>,
}

impl Default for Controller {
    fn default() -> Self { Self::new(DEFAULT_INSTRUCTION) }
}

impl Controller {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            state: WorkflowState::Idle,
            source: None,
            instruction: instruction.into(),
            result: None,
            notice: None,
            attempt: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn state(&self) -> &WorkflowState { &self.state }

    pub fn source(&self) -> Option<&SourceImage> { self.source.as_ref() }

    pub fn instruction(&self) -> &str { &self.instruction }

    pub fn result(&self) -> Option<&GenerationResult> { self.result.as_ref() }

    pub fn is_loading(&self) -> bool { self.state == WorkflowState::Submitting }

    pub fn can_submit(&self) -> bool {
        submit_enabled(self.source.is_some(), !self.instruction.trim().is_empty(), self.is_loading())
    }

    /// The latest validation notice wins over the reason of a failed attempt.
    pub fn error(&self) -> Option<&str> {
        if let Some(notice) = self.notice.as_deref() {
            return Some(notice);
        }
        match &self.state {
            WorkflowState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Replaces the current image and drops any previous result and error.
    /// Refused while a submission is in flight.
    pub fn select_image(&mut self, image: SourceImage) -> Result<(), ControllerError> {
        if self.is_loading() {
            warn!("🚫 Ignoring image selection while an edit is in progress");
            return Err(ControllerError::Busy);
        }
        info!("🖼️ Selected image '{}' ({})", image.name(), image.mime());
        self.source = Some(image);
        self.result = None;
        self.notice = None;
        self.state = WorkflowState::ImageSelected;
        self.touch();
        Ok(())
    }

    pub fn set_instruction(&mut self, instruction: impl Into<String>) {
        self.instruction = instruction.into();
        self.touch();
    }

    pub fn begin_submission(&mut self) -> Result<Submission, ControllerError> {
        if self.is_loading() {
            return Err(ControllerError::Busy);
        }
        let image = match self.source.clone() {
            None => return Err(self.reject(ControllerError::MissingImage)),
            Some(_) if self.instruction.trim().is_empty() => return Err(self.reject(ControllerError::EmptyPrompt)),
            Some(image) => image,
        };

        self.attempt += 1;
        self.notice = None;
        self.result = None;
        self.state = WorkflowState::Submitting;
        self.touch();
        info!("🚀 Submission #{} accepted for '{}'", self.attempt, image.name());

        Ok(Submission { attempt: self.attempt, image, instruction: self.instruction.clone() })
    }

    /// Records the outcome of `attempt`. Returns false if it no longer applies.
    pub fn complete_submission(&mut self, attempt: u64, outcome: Result<String, EditError>) -> bool {
        if self.state != WorkflowState::Submitting || attempt != self.attempt {
            warn!("⚠️ Discarding outcome of stale submission #{} (current #{})", attempt, self.attempt);
            return false;
        }
        match outcome {
            Ok(data_uri) => {
                info!("✅ Submission #{} succeeded", attempt);
                self.result = Some(GenerationResult { data_uri, generated_at: Utc::now() });
                self.state = WorkflowState::Succeeded;
            }
            Err(e) => {
                error!("❌ Submission #{} failed: {}", attempt, e);
                self.result = None;
                self.state = WorkflowState::Failed(e.to_string());
            }
        }
        self.touch();
        true
    }

    pub fn view(&self, id: Uuid, created_at: DateTime<Utc>) -> SessionView {
        SessionView {
            id,
            state: self.state.name().to_string(),
            has_image: self.source.is_some(),
            image_name: self.source.as_ref().map(|s| s.name().to_string()),
            image_mime: self.source.as_ref().map(|s| s.mime()),
            image_size: self.source.as_ref().and_then(|s| s.size()),
            image_preview: self.source.as_ref().and_then(|s| s.preview_uri()),
            prompt: self.instruction.clone(),
            result: self.result.as_ref().map(|r| r.data_uri.clone()),
            result_generated_at: self.result.as_ref().map(|r| r.generated_at),
            error: self.error().map(String::from),
            is_loading: self.is_loading(),
            can_submit: self.can_submit(),
            created_at,
            updated_at: self.updated_at,
        }
    }

    /// Surfaces a validation error without leaving the current state.
    fn reject(&mut self, err: ControllerError) -> ControllerError {
        info!("✋ Submission rejected: {}", err);
        self.notice = Some(err.to_string());
        self.touch();
        err
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

/// One user's editing session: a controller plus the editor it submits to.
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    controller: Arc<Mutex<Controller>>,
    editor: Arc<dyn ImageEditor>,
}

impl Session {
    pub fn new(editor: Arc<dyn ImageEditor>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            controller: Arc::new(Mutex::new(Controller::default())),
            editor,
        }
    }

    pub fn view(&self) -> SessionView {
        self.controller.lock().view(self.id, self.created_at)
    }

    pub fn select_image(&self, image: SourceImage) -> Result<SessionView, ControllerError> {
        let mut guard = self.controller.lock();
        guard.select_image(image)?;
        Ok(guard.view(self.id, self.created_at))
    }

    pub fn set_instruction(&self, instruction: impl Into<String>) -> SessionView {
        let mut guard = self.controller.lock();
        guard.set_instruction(instruction);
        guard.view(self.id, self.created_at)
    }

    /// Runs one submission to completion. The edit runs on its own task so the
    /// outcome is recorded even if the caller stops waiting.
    pub async fn submit(&self) -> Result<SessionView, ControllerError> {
        let submission = self.controller.lock().begin_submission()?;
        let attempt = submission.attempt;

        let controller = self.controller.clone();
        let editor = self.editor.clone();
        let task = tokio::spawn(async move {
            let outcome = editor.generate_edit(&submission.image, &submission.instruction).await;
            controller.lock().complete_submission(submission.attempt, outcome);
        });

        if let Err(e) = task.await {
            error!("❌ Edit task for submission #{} did not finish: {}", attempt, e);
            self.controller
                .lock()
                .complete_submission(attempt, Err(EditError::Transport("the edit task was aborted".into())));
        }
        Ok(self.view())
    }
}
