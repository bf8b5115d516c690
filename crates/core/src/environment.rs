use std::path::PathBuf;

use colloquy_model::Message;

use crate::prompts::ENVIRONMENT_ACK;

/// Situational context given to the model before the first user message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentContext {
    /// The directory the user works in.
    pub working_dir: PathBuf,
    /// Today's date, in any human-readable form.
    pub date: String,
    /// The operating system.
    pub platform: String,
    /// Optional extra context, e.g. the contents of relevant files.
    pub full_context: Option<String>,
}

impl EnvironmentContext {
    /// Renders the context as a user message and a model acknowledgement.
    pub fn to_messages(&self) -> [Message; 2] {
        [
            Message::user_text(self.describe()),
            Message::model_text(ENVIRONMENT_ACK),
        ]
    }

    /// Describes the context from the user's point of view.
    pub fn describe(&self) -> String {
        let mut text = format!(
            "This is the context of our session.\n\
             Today's date is {}.\n\
             My operating system is: {}\n\
             I'm currently working in the directory: {}",
            self.date,
            self.platform,
            self.working_dir.display(),
        );
        if let Some(full_context) = self.full_context.as_deref().filter(|c| !c.is_empty()) {
            text.push_str("\n\nHere is the full context of the working directory:\n\n");
            text.push_str(full_context);
        }
        text
    }
}
