//! A simple program demonstrates how to use `colloquy` as a library.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;

use colloquy::core::{AgentConfig, AgentEvent, CancellationToken, TurnOutcome};
use colloquy::{GeminiSettings, OpenAISettings, ProviderSettings, SessionBuilder, Settings};
use serde_json::Value;
use tokio::io::{self, AsyncBufReadExt};
use tokio::signal;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = match settings_from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };
    let builder = match SessionBuilder::from_settings(settings) {
        Ok(builder) => builder,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };
    let mut builder = builder
        .with_system_prompt(include_str!("./system_prompt.md").replace("{{HOST_OS}}", host_os()))
        .on_fallback(|current, fallback| {
            eprintln!("{current} is rate limited, switching to {fallback}");
            true
        });
    if let Ok(dir) = env::current_dir() {
        builder = builder.with_working_dir(dir);
    }
    let mut session = builder.build();

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/reset" => {
                session.reset();
                println!("Started a new conversation.");
                continue;
            }
            "/compress" => {
                match session.compress(&CancellationToken::new()).await {
                    Ok(Some(record)) => println!(
                        "Compressed from {} to {} tokens.",
                        record.original_token_count, record.new_token_count
                    ),
                    Ok(None) => println!("Nothing to compress."),
                    Err(err) => eprintln!("{err}"),
                }
                continue;
            }
            "/usage" => {
                let usage = session.agent().usage();
                println!(
                    "{} input tokens, {} output tokens with {}",
                    usage.input_tokens,
                    usage.output_tokens,
                    session.agent().model()
                );
                continue;
            }
            _ => {}
        }

        // Ctrl-C cancels the running message instead of quitting.
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            }
        });

        let mut printer = Printer::default();
        let outcome = session
            .send_message(line.trim(), &cancel, |event| printer.print(event))
            .await;
        printer.end_text();
        watcher.abort();

        match outcome {
            TurnOutcome::IterationLimitReached => {
                println!("Stopped after too many tool calls, send a message to go on.");
            }
            TurnOutcome::Failed(err) => debug!("message failed: {err:?}"),
            _ => {}
        }
    }
}

/// Prints events as plain lines, streaming text as it arrives.
#[derive(Default)]
struct Printer {
    in_text: bool,
}

impl Printer {
    fn end_text(&mut self) {
        if self.in_text {
            println!();
            self.in_text = false;
        }
    }

    fn print(&mut self, event: AgentEvent) {
        if let AgentEvent::Content(text) = &event {
            print!("{text}");
            std::io::stdout().flush().ok();
            self.in_text = true;
            return;
        }

        self.end_text();
        match event {
            AgentEvent::Content(_) => {}
            AgentEvent::ToolCallRequest(call) => {
                println!("[{}] {}", call.name, Value::Object(call.args));
            }
            AgentEvent::ToolCallResponse(response) => match response.error {
                Some(err) => eprintln!("[{}] {err}", response.name),
                None => println!("[{}] {}", response.name, response.result_display),
            },
            AgentEvent::ChatCompressed(record) => println!(
                "Compressed the conversation from {} to {} tokens.",
                record.original_token_count, record.new_token_count
            ),
            AgentEvent::UserCancelled => println!("Cancelled."),
            AgentEvent::Error(message) => eprintln!("{message}"),
            AgentEvent::MaxSessionTurnsReached => {
                println!("This session is over its turn limit, /reset to start over.");
            }
        }
    }
}

fn settings_from_env() -> Result<Settings, String> {
    let mut agent = AgentConfig::default();
    let provider = match env::var("COLLOQUY_PROVIDER").as_deref() {
        Ok("gemini") | Err(_) => ProviderSettings::Gemini(GeminiSettings {
            api_key: env::var("GEMINI_API_KEY").ok(),
            access_token: env::var("GOOGLE_ACCESS_TOKEN").ok(),
            base_url: env::var("GEMINI_BASE_URL").ok(),
            embedding_model: None,
        }),
        Ok("openai") => {
            let Ok(api_key) = env::var("OPENAI_API_KEY") else {
                return Err("OPENAI_API_KEY environment variable is not set".to_owned());
            };
            agent.model = "gpt-4o".to_owned();
            agent.fallback_model = "gpt-4o-mini".to_owned();
            ProviderSettings::OpenAI(OpenAISettings {
                api_key,
                base_url: env::var("OPENAI_BASE_URL").ok(),
                embedding_model: None,
            })
        }
        Ok(other) => return Err(format!("unknown provider `{other}`")),
    };
    if let Ok(model) = env::var("COLLOQUY_MODEL") {
        agent.model = model;
    }
    Ok(Settings { provider, agent })
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}

#[inline]
fn host_os() -> &'static str {
    match env::consts::OS {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        _ => "some other OS",
    }
}
