//! Deciding whether the model should keep talking after a text-only turn.

use colloquy_model::{Message, ModelRequest, Role};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::Error;
use crate::config::RetryOptions;
use crate::model_client::ModelClient;
use crate::prompts::NEXT_SPEAKER_PROMPT;
use crate::retry::{no_fallback, with_retry};
use crate::transcript::Transcript;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum NextSpeaker {
    User,
    Model,
}

#[derive(Deserialize)]
struct NextSpeakerResponse {
    reasoning: String,
    next_speaker: NextSpeaker,
}

fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "reasoning": {
                "type": "string",
                "description": "Brief explanation justifying the 'next_speaker' choice based *strictly* on the applicable rule and the content/structure of the preceding turn."
            },
            "next_speaker": {
                "type": "string",
                "enum": ["user", "model"],
                "description": "Who should speak next based *only* on the preceding turn and the decision rules."
            }
        },
        "required": ["reasoning", "next_speaker"]
    })
}

/// Asks the model who speaks next.
///
/// Returns `None` when the transcript doesn't end with a non-empty model
/// message or the answer doesn't fit the schema.
pub(crate) async fn check_next_speaker(
    client: &ModelClient,
    retry: &RetryOptions,
    model: &str,
    transcript: &Transcript,
) -> Result<Option<NextSpeaker>, Error> {
    match transcript.messages().last() {
        Some(msg) if msg.role == Role::Model && !msg.is_empty() => {}
        _ => return Ok(None),
    }

    let mut messages = transcript.messages().to_vec();
    messages.push(Message::user_text(NEXT_SPEAKER_PROMPT));
    let req = ModelRequest {
        model: model.to_owned(),
        messages,
        config: Default::default(),
        tools: vec![],
    };
    let schema = response_schema();
    let value = with_retry(retry, &mut (), |_| client.generate_json(&req, &schema), no_fallback).await?;

    match serde_json::from_value::<NextSpeakerResponse>(value) {
        Ok(resp) => {
            debug!(next_speaker = ?resp.next_speaker, "{}", resp.reasoning);
            Ok(Some(resp.next_speaker))
        }
        Err(err) => {
            warn!("unexpected next speaker answer: {err}");
            Ok(None)
        }
    }
}
