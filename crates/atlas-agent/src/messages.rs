//! Inbound chat messages and the uploaded-file registry.

use std::collections::BTreeMap;
use std::path::Path;

use atlas_llm::Message;
use serde::{Deserialize, Serialize};

const TABULAR_CONTENT_TYPES: &[&str] = &[
    "text/csv",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAttachment {
    pub name: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(
        default,
        alias = "experimental_attachments",
        alias = "experimentalAttachments"
    )]
    pub attachments: Vec<ClientAttachment>,
}

impl ClientMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            attachments: Vec::new(),
        }
    }
}

/// Flatten client messages into generation messages.
///
/// Only `user` and `assistant` turns survive. The URL of every `text/*`
/// attachment is appended to the turn's text; other attachments are dropped
/// here and reach the tools through [`extract_files`] instead.
pub fn normalize_messages(messages: &[ClientMessage]) -> Vec<Message> {
    messages
        .iter()
        .filter_map(|message| {
            let mut text = message.content.clone();
            for attachment in &message.attachments {
                if attachment.content_type.starts_with("text") {
                    text.push_str(&attachment.url);
                }
            }
            let text = text.trim();
            match message.role.as_str() {
                "user" => Some(Message::user(text)),
                "assistant" => Some(Message::assistant(text)),
                _ => None,
            }
        })
        .collect()
}

/// Map tabular attachments to their stored copies under `upload_dir`.
///
/// Attachment names are reduced to their final path component, and entries
/// whose stored file is missing are skipped.
pub fn extract_files(messages: &[ClientMessage], upload_dir: &Path) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    for attachment in messages.iter().flat_map(|message| &message.attachments) {
        if !TABULAR_CONTENT_TYPES.contains(&attachment.content_type.as_str()) {
            continue;
        }
        let Some(name) = Path::new(&attachment.name)
            .file_name()
            .and_then(|name| name.to_str())
        else {
            continue;
        };
        let path = upload_dir.join(name);
        if path.is_file() {
            files.insert(name.to_string(), path.to_string_lossy().into_owned());
        } else {
            tracing::debug!(%name, path = %path.display(), "attachment has no stored copy");
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_llm::Role;
    use serde_json::json;

    fn attachment(name: &str, content_type: &str, url: &str) -> ClientAttachment {
        ClientAttachment {
            name: name.to_string(),
            content_type: content_type.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn deserializes_experimental_attachments() {
        let message: ClientMessage = serde_json::from_value(json!({
            "role": "user",
            "content": "look",
            "experimental_attachments": [
                {"name": "a.csv", "contentType": "text/csv", "url": "http://x/a.csv"}
            ]
        }))
        .expect("message");
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].content_type, "text/csv");

        let bare: ClientMessage =
            serde_json::from_value(json!({"role": "assistant"})).expect("message");
        assert!(bare.content.is_empty() && bare.attachments.is_empty());
    }

    #[test]
    fn normalizer_keeps_user_and_assistant_and_inlines_text_urls() {
        let mut with_files = ClientMessage::user("  summarize ");
        with_files.attachments = vec![
            attachment("notes.txt", "text/plain", "http://host/notes.txt"),
            attachment("logo.png", "image/png", "http://host/logo.png"),
        ];
        let messages = vec![
            ClientMessage {
                role: "system".into(),
                content: "ignored".into(),
                attachments: vec![],
            },
            with_files,
            ClientMessage {
                role: "tool".into(),
                content: "{}".into(),
                attachments: vec![],
            },
            ClientMessage {
                role: "assistant".into(),
                content: "ok".into(),
                attachments: vec![],
            },
        ];

        let normalized = normalize_messages(&messages);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].role, Role::User);
        assert_eq!(normalized[0].text(), "summarize http://host/notes.txt");
        assert_eq!(normalized[1].role, Role::Assistant);
        assert_eq!(normalized[1].text(), "ok");
    }

    #[test]
    fn extract_files_requires_tabular_type_and_stored_copy() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("scores.csv"), b"a,b\n1,2\n").expect("write");
        std::fs::write(dir.path().join("notes.txt"), b"hi").expect("write");

        let mut message = ClientMessage::user("analyze");
        message.attachments = vec![
            attachment("../../scores.csv", "text/csv", "http://host/scores.csv"),
            attachment("missing.csv", "text/csv", "http://host/missing.csv"),
            attachment("notes.txt", "text/plain", "http://host/notes.txt"),
        ];

        let files = extract_files(&[message], dir.path());
        assert_eq!(files.len(), 1);
        let stored = files.get("scores.csv").expect("scores registered");
        assert!(stored.ends_with("scores.csv"));
    }
}
