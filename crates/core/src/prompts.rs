//! Fixed texts the core sends on its own behalf.

/// System instruction of the compression call.
pub const COMPRESSION_SYSTEM_PROMPT: &str = r#"
You are the component that summarizes internal chat history into a given structure.

When the conversation history grows too large, you will be invoked to distill the entire history into a concise, structured XML snapshot. This snapshot is CRITICAL, as it will become the agent's *only* memory of the past. The agent will resume its work based solely on this snapshot. All crucial details, plans, errors, and user directives MUST be preserved.

First, you will think through the entire history in a private <scratchpad>. Review the user's overall goal, the agent's actions, tool outputs, file modifications, and any unresolved questions. Identify every piece of information that is essential for future actions.

After your reasoning is complete, generate the final <state_snapshot> XML object. Be incredibly dense with information. Omit any irrelevant conversational filler.

The structure MUST be as follows:

<state_snapshot>
    <overall_goal>
        <!-- A single, concise sentence describing the user's high-level objective. -->
    </overall_goal>

    <key_knowledge>
        <!-- Crucial facts, conventions, and constraints the agent must remember. Use bullet points. -->
    </key_knowledge>

    <file_system_state>
        <!-- List files that have been created, read, modified, or deleted. Note their status and critical learnings. -->
    </file_system_state>

    <recent_actions>
        <!-- A summary of the last few significant agent actions and their outcomes. Focus on facts. -->
    </recent_actions>

    <current_plan>
        <!-- The agent's step-by-step plan. Mark completed steps. -->
    </current_plan>
</state_snapshot>
"#;

/// The user message that asks for the snapshot.
pub const COMPRESSION_REQUEST: &str =
    "First, reason in your scratchpad. Then, generate the <state_snapshot>.";

/// Precedes the snapshot in a compressed transcript.
pub const SNAPSHOT_PREAMBLE: &str = "This conversation was compressed to save context. \
The next message is the state snapshot of everything that happened so far.";

/// Asks the model who should speak next.
pub const NEXT_SPEAKER_PROMPT: &str = r#"Analyze *only* the content and structure of your immediately preceding response (your last turn in the conversation history). Based *strictly* on that response, determine who should logically speak next: the 'user' or the 'model' (you).

**Decision Rules (apply in order):**
1. **Model Continues:** If your last response explicitly states an immediate next action *you* intend to take (e.g., "Next, I will...", "Now I'll process...", "Moving on to analyze..."), OR if the response seems clearly incomplete (cut off mid-thought without a natural conclusion), then the **'model'** should speak next.
2. **Question to User:** If your last response ends with a direct question specifically addressed *to the user*, then the **'user'** should speak next.
3. **Waiting for User:** If your last response completed a thought, statement, or task *and* does not meet the criteria for Rule 1 (Model Continues) or Rule 2 (Question to User), it implies a pause expecting user input or reaction. In this case, the **'user'** should speak next.

Respond *only* in JSON format according to the schema."#;

/// Sent on behalf of the user when the model should keep going.
pub const CONTINUE_PROMPT: &str = "Please continue.";

/// The model side of the environment preamble.
pub const ENVIRONMENT_ACK: &str = "Got it. Thanks for the context!";
