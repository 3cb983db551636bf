//! Outbound Encoding
//!
//! Turns a [`ChatMessage`] into the text a particular session receives.
//! The default is the plain JSON wire format; the `htmx` format renders
//! out-of-band swap fragments for the bundled chat page.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use super::messages::ChatMessage;

/// Trailing fragments that reset the input box and re-arm the typing indicator
const CHAT_LINE_TAIL: &str = concat!(
    r##"<div hx-get="/scroll" hx-target="#chat_room" hx-swap="beforebegin scroll:#chat_room:bottom" hx-trigger="load"></div></div>"##,
    r##"<input id="chatinput" name="chatinput" autocomplete="off" autofocus hx-select-oob="#chatinput" hx-swap="none scroll:#chat_room:bottom">"##,
    r##"<div id="chatloading" class="htmx-indicator" hx-swap-oob="outerHTML"><p>Someone is typing...</p></div>"##,
);

const PEER_TYPING: &str = concat!(
    r##"<div id="chatloading" hx-swap-oob="beforebegin">"##,
    r##"<div hx-trigger="load" hx-get="/sleep" hx-target="#chatloading" hx-indicator="#chatloading" hx-swap="beforebegin"></div>"##,
    r##"<div hx-get="/scroll" hx-target="#chat_room" hx-swap="beforebegin scroll:#chat_room:bottom" hx-trigger="load"></div>"##,
    r##"</div>"##,
);

/// How outbound messages are encoded for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundFormat {
    /// `{"Sender": ..., "Message": ...}`
    #[default]
    Json,
    /// HTML fragments for the htmx websocket extension
    Htmx,
}

impl OutboundFormat {
    /// Encode `message` as seen by the session identified by `viewer`.
    ///
    /// Returns `None` when nothing should be sent to this viewer.
    pub fn encode(&self, message: &ChatMessage, viewer: &str) -> Option<String> {
        match self {
            OutboundFormat::Json => match serde_json::to_string(message) {
                Ok(json) => Some(json),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize chat message");
                    None
                }
            },
            OutboundFormat::Htmx => render_htmx(message, viewer),
        }
    }
}

impl FromStr for OutboundFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutboundFormat::Json),
            "htmx" => Ok(OutboundFormat::Htmx),
            other => Err(format!("unknown outbound format '{}'", other)),
        }
    }
}

impl fmt::Display for OutboundFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundFormat::Json => f.write_str("json"),
            OutboundFormat::Htmx => f.write_str("htmx"),
        }
    }
}

fn render_htmx(message: &ChatMessage, viewer: &str) -> Option<String> {
    let own = message.sender == viewer;

    if message.is_typing() {
        // A user never sees their own typing indicator
        return if own { None } else { Some(PEER_TYPING.to_string()) };
    }

    let who = if own {
        "You".to_string()
    } else {
        escape_html(&message.sender)
    };

    Some(format!(
        r#"<div id="chatloading" hx-swap-oob="beforebegin"><p><strong>{}</strong>: {}</p>{}"#,
        who,
        escape_html(&message.body),
        CHAT_LINE_TAIL
    ))
}

/// Escape text for interpolation into HTML element content or attributes
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
