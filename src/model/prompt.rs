//! Prompt template for the classifier collaborator.
//!
//! The model sees only what the engine hands it: the state summary, the
//! exploration summary (visited places only), recent stored dialog, the text
//! waiting to be labelled and the active objective. It answers with one JSON
//! object.

use crate::model::api::ChatMessage;
use crate::model::classifier::ClassifierRequest;
use crate::shaping::dialog::truncate;

const CLASSIFIER_SYSTEM_PROMPT: &str = r#"You are a reward-shaping advisor for a reinforcement learning agent playing a Pokemon game.

Judge whether the agent is making meaningful progress and suggest a reward multiplier between 0.3 and 2.0:
- above 1.0 when the agent is pursuing a clear goal or just made progress,
- 1.0 for ordinary exploration,
- below 1.0 when the agent is stuck, idling or wandering in circles.

You also label the NEW DIALOG (if any):
- "useful": true only if the text tells the player where to go or what to do next.
- "category": one of "farewell", "ambient", "quest", "story", "system".
- "milestone_hint": the identifier of the place or event the text points at (e.g. "ROUTE_101"), or null.

Only reason about places listed in the exploration summary or named in dialog. Do not invent map names.

Respond with a single JSON object and nothing else:
{
  "multiplier": 1.2,
  "objective": "find_prof_birch",
  "reason": "NPC asked the player to check on the professor",
  "dialog": {"useful": true, "category": "quest", "milestone_hint": "ROUTE_101"}
}
Use null for "objective" when there is no clear goal, and omit "dialog" when there is no new dialog."#;

/// Build the classifier prompt for one lifecycle evaluation.
pub fn classifier_prompt(request: &ClassifierRequest) -> Vec<ChatMessage> {
    let history = if request.dialog_history.is_empty() {
        "  (none)".to_string()
    } else {
        request
            .dialog_history
            .iter()
            .map(|e| {
                format!(
                    "  [step {}] ({}) {}",
                    e.step,
                    e.category.as_str(),
                    truncate(&e.text, 200)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let new_dialog = match &request.current_dialog {
        Some(text) => truncate(text, 300),
        None => "(none)".to_string(),
    };

    let objective = match &request.active_objective {
        Some(record) => format!(
            "{} (milestone: {}, active since step {}, started on {})",
            record.name,
            record.milestone_id.as_deref().unwrap_or("none"),
            record.created_step,
            record.initial_map
        ),
        None => "(none)".to_string(),
    };

    let user = format!(
        "## Game State\n{}\n\n## Exploration\n{}\n\n## Recent Dialog\n{history}\n\n## New Dialog\n{new_dialog}\n\n## Active Objective\n{objective}\n\nReturn your judgement as a JSON object.",
        request.state, request.exploration
    );

    vec![
        ChatMessage::system(CLASSIFIER_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ]
}
