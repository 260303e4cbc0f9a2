//! Inference worker: one author in, one parsed result (or a backend failure) out.

use serde::Deserialize;

use crate::backend::{BackendError, ChatBackend};
use crate::extract::extract_json_object;
use crate::prompt::gender_prompt;
use crate::types::{Gender, InferenceResult, NamePair};

/// Fields the model is asked to return; names are echoed back but the
/// dispatched pair stays authoritative.
#[derive(Debug, Default, Deserialize)]
struct AuthorFields {
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// `{"author": {...}}` as requested, or the same fields at top level
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Nested { author: AuthorFields },
    Flat(AuthorFields),
}

/// Ask the backend about one author.
///
/// Malformed replies become `Gender::Unknown` results; only transport or
/// envelope failures are errors. Never retries.
pub async fn infer<B: ChatBackend>(
    backend: &B,
    pair: &NamePair,
) -> Result<InferenceResult, BackendError> {
    let prompt = gender_prompt(pair);
    let reply = backend.complete(&prompt).await?;
    Ok(parse_reply(pair, &reply.content))
}

/// Turn raw model text into a result for `pair`.
pub fn parse_reply(pair: &NamePair, text: &str) -> InferenceResult {
    let key = pair.key();
    let Some(span) = extract_json_object(text) else {
        log::warn!("{key}: no JSON object in response");
        return InferenceResult::unparsed(pair);
    };

    let fields = match serde_json::from_str::<Envelope>(span) {
        Ok(Envelope::Nested { author }) => author,
        Ok(Envelope::Flat(fields)) => fields,
        Err(e) => {
            log::warn!("{key}: invalid JSON in response: {e}");
            return InferenceResult::unparsed(pair);
        }
    };

    let reasoning = fields.reasoning.unwrap_or_default();
    let gender = match fields.gender.as_deref().map(Gender::from_label) {
        Some(Some(gender)) => gender,
        Some(None) | None => {
            log::warn!(
                "{key}: unrecognized gender label {:?}",
                fields.gender.as_deref().unwrap_or("")
            );
            Gender::Unknown
        }
    };
    InferenceResult::new(pair, gender, reasoning)
}
