use axum::response::{Html, Redirect};

const PREDICT_PAGE: &str = include_str!("../../static/index.html");

pub async fn redirect_to_predict() -> Redirect {
    Redirect::temporary("/predict")
}

pub async fn predict_page() -> Html<&'static str> {
    Html(PREDICT_PAGE)
}
