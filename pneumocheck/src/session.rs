use crate::config::SessionConfig;
use crate::controller::{ControllerView, PredictorController, SubmissionError};
use crate::image::{CandidateFile, ImageValidator, ValidationError};
use crate::prediction::Predictor;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Applied,
    AlreadySubmitting,
    Rejected(ValidationError),
    /// The outcome arrived after a newer selection and was dropped.
    Discarded,
}

/// One open page. The controller lock is never held across an await.
#[derive(Debug, Clone)]
pub struct Session {
    controller: Arc<Mutex<PredictorController>>,
}

impl Session {
    fn new(validator: ImageValidator) -> Self {
        Self {
            controller: Arc::new(Mutex::new(PredictorController::new(validator))),
        }
    }

    pub fn view(&self) -> ControllerView {
        self.controller.lock().view()
    }

    pub async fn select(
        &self,
        candidate: Option<CandidateFile>,
    ) -> Result<ControllerView, ValidationError> {
        let job = self.controller.lock().select(candidate)?;

        if let Some(job) = job {
            match tokio::task::spawn_blocking(move || job.render()).await {
                Ok(preview) => {
                    self.controller.lock().attach_preview(preview);
                }
                Err(e) => tracing::warn!("Preview rendering failed: {:?}", e),
            }
        }

        Ok(self.view())
    }

    /// For a chosen file that could not be read in full.
    pub fn reject(&self, error: ValidationError) -> ControllerView {
        let mut controller = self.controller.lock();
        controller.reject(error);
        controller.view()
    }

    /// Runs at most one prediction for this page. The outbound call lives on
    /// its own task so a dropped HTTP connection does not cancel it.
    #[instrument(skip(self, predictor))]
    pub async fn submit(&self, predictor: Arc<dyn Predictor>) -> Submission {
        let ticket = match self.controller.lock().begin_submission() {
            Ok(Some(ticket)) => ticket,
            Ok(None) => return Submission::AlreadySubmitting,
            Err(e) => return Submission::Rejected(e),
        };

        let generation = ticket.generation();
        let controller = self.controller.clone();
        let task = tokio::spawn(async move {
            let outcome = predictor
                .predict(ticket.image())
                .await
                .map_err(SubmissionError::from);
            if let Err(ref e) = outcome {
                tracing::error!("Prediction failed: {}", e);
            }
            controller.lock().complete_submission(generation, outcome)
        });

        let applied = match task.await {
            Ok(applied) => applied,
            Err(e) => {
                tracing::error!("Prediction task aborted: {:?}", e);
                self.controller
                    .lock()
                    .complete_submission(generation, Err(SubmissionError::Unknown))
            }
        };

        if applied {
            Submission::Applied
        } else {
            Submission::Discarded
        }
    }
}

#[derive(Debug)]
struct Entry {
    session: Session,
    last_seen: Instant,
}

/// Open pages keyed by id. A page normally says goodbye with a DELETE, but
/// that request is best effort, so idle entries are also swept and the
/// total is capped.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Entry>>,
    validator: ImageValidator,
    idle_timeout: Duration,
    sweep_interval: Duration,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(max_image_bytes: usize, config: &SessionConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            validator: ImageValidator::new(max_image_bytes),
            idle_timeout: config.get_idle_timeout(),
            sweep_interval: config.get_sweep_interval().max(Duration::from_secs(1)),
            max_sessions: config.max_sessions.max(1),
        }
    }

    pub fn validator(&self) -> &ImageValidator {
        &self.validator
    }

    pub fn create(&self) -> (Uuid, Session) {
        self.create_at(Instant::now())
    }

    fn create_at(&self, now: Instant) -> (Uuid, Session) {
        let id = Uuid::new_v4();
        let session = Session::new(self.validator);

        let mut sessions = self.sessions.lock();
        self.evict_expired(&mut sessions, now);
        while sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| *id)
            else {
                break;
            };
            sessions.remove(&oldest);
            tracing::info!(
                id = %oldest,
                "Session limit reached, dropping least recently used"
            );
        }
        sessions.insert(
            id,
            Entry {
                session: session.clone(),
                last_seen: now,
            },
        );
        drop(sessions);

        tracing::debug!(%id, "Session opened");
        (id, session)
    }

    /// Looking a session up counts as activity.
    pub fn get(&self, id: &Uuid) -> Option<Session> {
        self.get_at(id, Instant::now())
    }

    fn get_at(&self, id: &Uuid, now: Instant) -> Option<Session> {
        let mut sessions = self.sessions.lock();
        let entry = sessions.get_mut(id)?;
        entry.last_seen = now;
        Some(entry.session.clone())
    }

    /// In-flight work for a removed session finishes against a controller
    /// nobody can read any more.
    pub fn remove(&self, id: &Uuid) -> bool {
        let removed = self.sessions.lock().remove(id).is_some();
        if removed {
            tracing::debug!(%id, "Session closed");
        }
        removed
    }

    /// Returns how many sessions were dropped.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    fn evict_idle_at(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.lock();
        self.evict_expired(&mut sessions, now)
    }

    fn evict_expired(&self, sessions: &mut HashMap<Uuid, Entry>, now: Instant) -> usize {
        let before = sessions.len();
        let idle_timeout = self.idle_timeout;
        sessions.retain(|_, entry| now.saturating_duration_since(entry.last_seen) < idle_timeout);
        before - sessions.len()
    }

    /// Periodically forgets idle sessions until shutdown.
    pub fn run_sweeper(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = self.evict_idle();
                        if evicted > 0 {
                            tracing::info!(evicted, "Evicted idle sessions");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Session sweeper received shutdown signal");
                        break;
                    }
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
