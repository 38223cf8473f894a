#![allow(dead_code)]

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
    Router,
};
use parking_lot::Mutex;
use pneumocheck::{
    config::{
        Config, LogLevel, PredictionServiceConfig, ServerConfig, SessionConfig, UploadConfig,
    },
    controller::ControllerView,
    prediction::{PredictionService, Predictor},
    server::HttpServer,
};
use reqwest::multipart::{Form, Part};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::broadcast};

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n fake chest x-ray";
pub const PNEUMONIA_87_5: &str = r#"{"predicted_class":"PNEUMONIA","confidence":87.5}"#;

#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
}

#[derive(Clone)]
struct StubState {
    status: StatusCode,
    body: String,
    delay: Duration,
    hits: Arc<AtomicUsize>,
    uploads: Arc<Mutex<Vec<ReceivedUpload>>>,
}

/// Stands in for the remote inference server.
pub struct InferenceStub {
    pub url: String,
    hits: Arc<AtomicUsize>,
    uploads: Arc<Mutex<Vec<ReceivedUpload>>>,
}

impl InferenceStub {
    pub async fn start(status: StatusCode, body: &str) -> Self {
        Self::start_with_delay(status, body, Duration::ZERO).await
    }

    pub async fn start_with_delay(status: StatusCode, body: &str, delay: Duration) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let uploads = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            status,
            body: body.to_string(),
            delay,
            hits: hits.clone(),
            uploads: uploads.clone(),
        };

        let router = Router::new()
            .route("/predict", post(stub_predict))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            url: format!("http://{}/predict", addr),
            hits,
            uploads,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<ReceivedUpload> {
        self.uploads.lock().clone()
    }
}

async fn stub_predict(
    State(state): State<StubState>,
    mut multipart: Multipart,
) -> (StatusCode, String) {
    state.hits.fetch_add(1, Ordering::SeqCst);

    while let Ok(Some(field)) = multipart.next_field().await {
        let upload = ReceivedUpload {
            field: field.name().unwrap_or_default().to_string(),
            file_name: field.file_name().map(str::to_string),
            content_type: field.content_type().map(str::to_string),
            size: 0,
        };
        let size = field.bytes().await.map(|b| b.len()).unwrap_or(0);
        state.uploads.lock().push(ReceivedUpload { size, ..upload });
    }

    tokio::time::sleep(state.delay).await;
    (state.status, state.body.clone())
}

pub fn test_config(prediction_url: &str, max_bytes: usize) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        log_level: LogLevel::Debug,
        prediction_service: PredictionServiceConfig {
            url: prediction_url.to_string(),
        },
        upload: UploadConfig { max_bytes },
        sessions: SessionConfig::default(),
    }
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    _shutdown: broadcast::Sender<()>,
}

pub async fn spawn_app(prediction_url: &str) -> TestApp {
    let config = test_config(prediction_url, 10 * 1024 * 1024);
    let predictor: Arc<dyn Predictor> =
        Arc::new(PredictionService::new(&config.prediction_service).unwrap());
    let server = HttpServer::new(predictor, &config).await.unwrap();
    let address = format!("http://{}", server.local_addr().unwrap());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    server.run(shutdown_rx).await.unwrap();

    TestApp {
        address,
        client: reqwest::Client::new(),
        _shutdown: shutdown_tx,
    }
}

impl TestApp {
    pub async fn create_session(&self) -> String {
        let response = self
            .client
            .post(format!("{}/api/sessions", self.address))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);

        let created: serde_json::Value = response.json().await.unwrap();
        created["id"].as_str().unwrap().to_string()
    }

    pub async fn upload(
        &self,
        session: &str,
        file_name: &str,
        media_type: &str,
        bytes: Vec<u8>,
    ) -> reqwest::Response {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(media_type)
            .unwrap();
        self.post_form(session, Form::new().part("file", part)).await
    }

    /// What a browser posts when the picker is closed without a choice.
    pub async fn upload_nothing(&self, session: &str) -> reqwest::Response {
        let part = Part::bytes(Vec::new()).file_name("");
        self.post_form(session, Form::new().part("file", part)).await
    }

    async fn post_form(&self, session: &str, form: Form) -> reqwest::Response {
        self.client
            .post(format!("{}/api/sessions/{}/image", self.address, session))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    pub async fn predict(&self, session: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/api/sessions/{}/predict", self.address, session))
            .send()
            .await
            .unwrap()
    }

    pub async fn view(&self, session: &str) -> ControllerView {
        self.client
            .get(format!("{}/api/sessions/{}", self.address, session))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}
