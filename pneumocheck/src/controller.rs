use crate::image::{CandidateFile, ImageValidator, SelectedImage, ValidationError};
use crate::prediction::{PredictionResult, PredictionServiceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred during prediction.";

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error(transparent)]
    Prediction(#[from] PredictionServiceError),
    #[error("An unknown error occurred during prediction.")]
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestState {
    Idle,
    Validating,
    Submitting,
    Succeeded(PredictionResult),
    Failed(String),
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Idle => "idle",
            RequestState::Validating => "validating",
            RequestState::Submitting => "submitting",
            RequestState::Succeeded(_) => "succeeded",
            RequestState::Failed(_) => "failed",
        }
    }
}

/// Work handed out when a file is accepted: the preview is rendered away
/// from the event handler and attached afterwards.
#[derive(Debug)]
pub struct PreviewJob {
    generation: u64,
    image: SelectedImage,
}

impl PreviewJob {
    pub fn render(self) -> RenderedPreview {
        RenderedPreview {
            generation: self.generation,
            data_uri: self.image.to_data_uri(),
        }
    }
}

#[derive(Debug)]
pub struct RenderedPreview {
    generation: u64,
    data_uri: String,
}

/// Proof that a submission was started. Its outcome only lands if nothing
/// newer happened on the controller in the meantime.
#[derive(Debug)]
pub struct SubmissionTicket {
    generation: u64,
    image: SelectedImage,
}

impl SubmissionTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn image(&self) -> &SelectedImage {
        &self.image
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultView {
    pub predicted_class: String,
    pub confidence: String,
}

/// What the page renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerView {
    pub state: String,
    pub file_name: Option<String>,
    pub preview: Option<String>,
    pub result: Option<ResultView>,
    pub error: Option<String>,
    pub can_submit: bool,
}

/// Upload, validate and submit state for one page.
///
/// Every user choice and every submission bumps `generation`; late
/// previews and late prediction outcomes carrying an older generation are
/// dropped. `in_flight` tracks the outbound call itself, which keeps running
/// after a newer selection, so at most one request per page is ever open.
#[derive(Debug)]
pub struct PredictorController {
    validator: ImageValidator,
    selected: Option<SelectedImage>,
    preview: Option<String>,
    state: RequestState,
    generation: u64,
    in_flight: Option<u64>,
}

impl PredictorController {
    pub fn new(validator: ImageValidator) -> Self {
        Self {
            validator,
            selected: None,
            preview: None,
            state: RequestState::Idle,
            generation: 0,
            in_flight: None,
        }
    }

    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn selected(&self) -> Option<&SelectedImage> {
        self.selected.as_ref()
    }

    pub fn can_submit(&self) -> bool {
        self.selected.is_some() && self.in_flight.is_none()
    }

    /// Entry point shared by the file picker and the drop zone.
    ///
    /// `None` means the event carried no file and nothing changes. A chosen
    /// file always replaces the current selection: on success with the new
    /// image, on rejection with nothing.
    pub fn select(
        &mut self,
        candidate: Option<CandidateFile>,
    ) -> Result<Option<PreviewJob>, ValidationError> {
        let Some(candidate) = candidate else {
            return Ok(None);
        };

        self.state = RequestState::Validating;
        self.generation += 1;
        self.preview = None;

        match self.validator.validate(candidate) {
            Ok(image) => {
                tracing::debug!(file_name = %image.name, size = image.size, "Image accepted");
                self.selected = Some(image.clone());
                self.state = RequestState::Idle;
                Ok(Some(PreviewJob {
                    generation: self.generation,
                    image,
                }))
            }
            Err(e) => Err(self.reject(e)),
        }
    }

    /// A chosen file that never made it to validation, e.g. an upload cut
    /// off by the transport, is rejected like any other invalid choice.
    pub fn reject(&mut self, error: ValidationError) -> ValidationError {
        tracing::debug!(reason = %error, "Image rejected");
        self.generation += 1;
        self.selected = None;
        self.preview = None;
        self.state = RequestState::Failed(error.to_string());
        error
    }

    pub fn attach_preview(&mut self, preview: RenderedPreview) -> bool {
        if preview.generation != self.generation || self.selected.is_none() {
            return false;
        }
        self.preview = Some(preview.data_uri);
        true
    }

    /// `Ok(None)` while a request is already in flight, even one whose
    /// outcome will be discarded.
    pub fn begin_submission(&mut self) -> Result<Option<SubmissionTicket>, ValidationError> {
        if self.in_flight.is_some() {
            return Ok(None);
        }

        let Some(image) = self.selected.clone() else {
            self.state = RequestState::Failed(ValidationError::NoFile.to_string());
            return Err(ValidationError::NoFile);
        };

        self.generation += 1;
        self.in_flight = Some(self.generation);
        self.state = RequestState::Submitting;

        Ok(Some(SubmissionTicket {
            generation: self.generation,
            image,
        }))
    }

    /// Returns whether the outcome was applied.
    pub fn complete_submission(
        &mut self,
        generation: u64,
        outcome: Result<PredictionResult, SubmissionError>,
    ) -> bool {
        if self.in_flight == Some(generation) {
            self.in_flight = None;
        }

        if generation != self.generation || self.state != RequestState::Submitting {
            tracing::debug!(
                generation,
                current = self.generation,
                "Discarding stale prediction outcome"
            );
            return false;
        }

        self.state = match outcome {
            Ok(result) => RequestState::Succeeded(result),
            Err(e) => RequestState::Failed(failure_message(&e)),
        };
        true
    }

    pub fn view(&self) -> ControllerView {
        let (result, error) = match &self.state {
            RequestState::Succeeded(result) => (
                Some(ResultView {
                    predicted_class: result.predicted_class.to_string(),
                    confidence: result.formatted_confidence(),
                }),
                None,
            ),
            RequestState::Failed(message) => (None, Some(message.clone())),
            _ => (None, None),
        };

        ControllerView {
            state: self.state.as_str().to_string(),
            file_name: self.selected.as_ref().map(|image| image.name.clone()),
            preview: self.preview.clone(),
            result,
            error,
            can_submit: self.can_submit(),
        }
    }
}

fn failure_message(error: &SubmissionError) -> String {
    let message = error.to_string();
    if message.trim().is_empty() {
        UNKNOWN_ERROR_MESSAGE.to_string()
    } else {
        message
    }
}
