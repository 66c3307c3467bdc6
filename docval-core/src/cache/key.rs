//! Request fingerprints

use crate::protocol::TaskType;
use crate::providers::adapter::TaskRequest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable fingerprint of the semantically relevant part of a request
///
/// Covers the task type, the whitespace-normalized request text and the
/// context fields that change the answer: working directory, current step
/// and created files. Environment, history and metadata are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(request: &TaskRequest<'_>) -> Self {
        let task = request.task_type();
        let context = request.context();

        let mut hasher = Sha256::new();
        feed(&mut hasher, task.as_str().as_bytes());
        for text in request.content() {
            feed(&mut hasher, normalize(text).as_bytes());
        }
        feed(&mut hasher, context.working_directory.as_bytes());
        feed(&mut hasher, &context.current_step.to_le_bytes());
        feed(&mut hasher, &(context.created_files.len() as u64).to_le_bytes());
        for file in &context.created_files {
            feed(&mut hasher, file.as_bytes());
        }

        let digest = hasher.finalize();
        Self(format!("{}:{}", task.as_str(), hex(&digest[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Task encoded in the key prefix
    pub fn task(&self) -> Option<TaskType> {
        let prefix = self.0.split(':').next()?;
        TaskType::ALL.into_iter().find(|task| task.as_str() == prefix)
    }

    /// File-system safe form of the key
    pub fn file_stem(&self) -> String {
        self.0.replace(':', "-")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Length-prefixed so adjacent fields cannot run together
fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Trim and collapse whitespace runs; case is significant
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TutorialContext;

    fn key(context: &TutorialContext, instruction: &str) -> CacheKey {
        CacheKey::for_request(&TaskRequest::ParseInstruction {
            context,
            instruction,
        })
    }

    #[test]
    fn test_key_format() {
        let k = key(&TutorialContext::default(), "ls");
        assert!(k.as_str().starts_with("parse_instruction:"));
        assert_eq!(k.as_str().len(), "parse_instruction:".len() + 32);
        assert_eq!(k.task(), Some(TaskType::ParseInstruction));
        assert!(!k.file_stem().contains(':'));
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let context = TutorialContext::new("/app");
        assert_eq!(key(&context, "  run   npm\ninstall "), key(&context, "run npm install"));
        assert_ne!(key(&context, "Run npm install"), key(&context, "run npm install"));
    }

    #[test]
    fn test_field_boundaries_matter() {
        let a = TutorialContext::new("/app").with_file("ab");
        let b = TutorialContext::new("/app").with_file("a").with_file("b");
        assert_ne!(key(&a, "x"), key(&b, "x"));
    }

    #[test]
    fn test_task_type_separates_keys() {
        let context = TutorialContext::default();
        let interpret = CacheKey::for_request(&TaskRequest::InterpretError {
            context: &context,
            error_message: "x",
        });
        assert_ne!(key(&context, "x"), interpret);
    }
}
