//! Page Routes
//!
//! The chat page and the small htmx helper endpoints it calls.
//!
//! - GET / - Chat page
//! - GET /scroll - Empty anchor used to scroll the chat room
//! - GET /sleep - Holds the typing indicator open, then clears it
//! - GET /typing - Fragment that sends a typing notice over the socket
//! - GET /changescreen - Screen name form

use axum::{extract::State, response::Html};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

const HOME_PAGE: &str = "home.html";

/// GET /
pub async fn home(State(state): State<Arc<AppState>>) -> ApiResult<Html<String>> {
    let path = state.config.static_dir.join(HOME_PAGE);
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Ok(Html(page)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound(format!("{}", path.display())))
        }
        Err(e) => Err(ApiError::Io(e)),
    }
}

/// GET /scroll
pub async fn scroll() -> Html<&'static str> {
    Html("")
}

/// GET /sleep
pub async fn sleep(State(state): State<Arc<AppState>>) -> Html<&'static str> {
    tokio::time::sleep(state.config.typing_indicator()).await;
    Html("")
}

/// GET /typing
pub async fn typing() -> Html<&'static str> {
    Html(r##"<div hx-trigger="load" hx-include="#typing" ws-send></div>"##)
}

/// GET /changescreen
pub async fn change_screen() -> Html<&'static str> {
    Html(
        r#"<form id="screenname" ws-send style="float: right; display: inline-flex;">
	Name: <input name="screenname" type="text" autofocus style="margin-right: 1.1em;">
</form>"#,
    )
}
