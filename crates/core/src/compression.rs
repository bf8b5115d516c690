//! Replacing a long transcript by a model-written snapshot.

use colloquy_model::{GenerationConfig, Message, ModelRequest};

use crate::Error;
use crate::config::RetryOptions;
use crate::environment::EnvironmentContext;
use crate::event::CompressionRecord;
use crate::model_client::ModelClient;
use crate::prompts::{COMPRESSION_REQUEST, COMPRESSION_SYSTEM_PROMPT, SNAPSHOT_PREAMBLE};
use crate::retry::{no_fallback, with_retry};

pub(crate) struct Compressor<'a> {
    pub client: &'a ModelClient,
    pub retry: &'a RetryOptions,
    pub model: &'a str,
    /// Fraction of `context_window` above which compression is due.
    pub threshold: f64,
    pub context_window: u64,
    /// Restated in front of the snapshot.
    pub environment: Option<&'a EnvironmentContext>,
}

impl Compressor<'_> {
    /// Summarizes `messages` if they are over the threshold or `force` is
    /// set.
    ///
    /// Returns the compressed transcript, or `None` if nothing should
    /// change. A snapshot that is not smaller than the original is
    /// discarded.
    pub async fn compress(
        &self,
        messages: &[Message],
        force: bool,
    ) -> Result<Option<(Vec<Message>, CompressionRecord)>, Error> {
        if messages.is_empty() {
            return Ok(None);
        }

        let original_token_count = self.count_tokens(messages).await?;
        let limit = (self.threshold * self.context_window as f64) as u64;
        if !force && original_token_count <= limit {
            trace!("{original_token_count} tokens, below the limit of {limit}");
            return Ok(None);
        }
        debug!(force, "compressing {original_token_count} tokens");

        let mut summary_messages = messages.to_vec();
        summary_messages.push(Message::user_text(COMPRESSION_REQUEST));
        let req = ModelRequest {
            model: self.model.to_owned(),
            messages: summary_messages,
            config: GenerationConfig {
                system_instruction: Some(COMPRESSION_SYSTEM_PROMPT.trim().to_owned()),
                ..Default::default()
            },
            tools: vec![],
        };
        let resp = with_retry(self.retry, &mut (), |_| self.client.generate(&req), no_fallback).await?;
        let snapshot = resp.text.trim();
        if snapshot.is_empty() {
            warn!("model returned an empty snapshot");
            return Ok(None);
        }

        let preamble = match self.environment {
            Some(environment) => format!("{}\n\n{SNAPSHOT_PREAMBLE}", environment.describe()),
            None => SNAPSHOT_PREAMBLE.to_owned(),
        };
        let compressed = vec![Message::user_text(preamble), Message::model_text(snapshot)];
        let new_token_count = self.count_tokens(&compressed).await?;
        if new_token_count >= original_token_count {
            warn!(
                "discarding a snapshot of {new_token_count} tokens, \
                 the transcript has {original_token_count}"
            );
            return Ok(None);
        }
        Ok(Some((compressed, CompressionRecord {
            original_token_count,
            new_token_count,
        })))
    }

    async fn count_tokens(&self, messages: &[Message]) -> Result<u64, Error> {
        with_retry(
            self.retry,
            &mut (),
            |_| self.client.count_tokens(self.model, messages),
            no_fallback,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use colloquy_model::ModelCapabilities;
    use colloquy_test_model::TestModelProvider;

    use super::*;

    fn history() -> Vec<Message> {
        vec![
            Message::user_text("a".repeat(2_000)),
            Message::model_text("b".repeat(2_000)),
        ]
    }

    fn compressor(client: &ModelClient) -> Compressor<'_> {
        static RETRY: RetryOptions = RetryOptions {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: 0.0,
        };
        Compressor {
            client,
            retry: &RETRY,
            model: "test",
            threshold: 0.7,
            context_window: 1_000,
            environment: None,
        }
    }

    #[tokio::test]
    async fn test_below_threshold() {
        let model_provider = TestModelProvider::default();
        let client = ModelClient::new(model_provider.clone());
        let messages = vec![Message::user_text("short")];
        let result = compressor(&client).compress(&messages, false).await.unwrap();
        assert!(result.is_none());
        assert!(model_provider.generate_requests().is_empty());
    }

    #[tokio::test]
    async fn test_over_threshold() {
        let model_provider = TestModelProvider::default();
        model_provider.add_generate_response("<state_snapshot>goal</state_snapshot>");
        let client = ModelClient::new(model_provider.clone());

        let (messages, record) = compressor(&client)
            .compress(&history(), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.original_token_count, 1_000);
        assert!(record.new_token_count < record.original_token_count);
        assert_eq!(messages[0].text(), SNAPSHOT_PREAMBLE);
        assert_eq!(messages[1].text(), "<state_snapshot>goal</state_snapshot>");

        let requests = model_provider.generate_requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tools.is_empty());
        assert_eq!(
            requests[0].messages.last().map(Message::text),
            Some(COMPRESSION_REQUEST.to_owned())
        );
    }

    #[tokio::test]
    async fn test_environment_is_restated() {
        let model_provider = TestModelProvider::default();
        model_provider.add_generate_response("<state_snapshot>goal</state_snapshot>");
        let client = ModelClient::new(model_provider);
        let environment = EnvironmentContext {
            working_dir: "/work".into(),
            date: "Monday, October 19, 2026".to_owned(),
            platform: "linux".to_owned(),
            full_context: None,
        };
        let compressor = Compressor {
            environment: Some(&environment),
            ..compressor(&client)
        };

        let (messages, _) = compressor.compress(&history(), true).await.unwrap().unwrap();
        assert_eq!(messages.len(), 2);
        let preamble = messages[0].text();
        assert!(preamble.starts_with(&environment.describe()));
        assert!(preamble.ends_with(SNAPSHOT_PREAMBLE));
    }

    #[tokio::test]
    async fn test_larger_snapshot_is_discarded() {
        let mut model_provider = TestModelProvider::default();
        model_provider.set_capabilities(ModelCapabilities {
            token_counting: true,
            ..Default::default()
        });
        model_provider.add_token_count(500);
        model_provider.add_token_count(600);
        model_provider.add_generate_response("a very long snapshot");
        let client = ModelClient::new(model_provider);

        let result = compressor(&client).compress(&history(), true).await.unwrap();
        assert!(result.is_none());
    }
}
