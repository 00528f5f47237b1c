use serde::{Deserialize, Serialize};

use crate::config::MAX_HISTORY_TURNS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "bot")]
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The most recent `max_turns` (at most five) turns, oldest first.
pub fn recent_turns(history: &[Turn], max_turns: usize) -> &[Turn] {
    let keep = max_turns.min(MAX_HISTORY_TURNS);
    &history[history.len().saturating_sub(keep)..]
}

/// Lays out one prompt with fixed section labels. Empty history or context
/// leaves the label in place with nothing under it.
pub fn build_prompt(
    preamble: &str,
    context: &[String],
    history: &[Turn],
    question: &str,
    max_turns: usize,
) -> String {
    let mut history_str = String::new();
    for turn in recent_turns(history, max_turns) {
        let speaker = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        history_str.push_str(&format!("{}: {}\n", speaker, turn.content));
    }
    let context_str = context.join("\n");

    format!(
        "{}\n\nConversation history:\n{}\nContext:\n{}\n\nQuestion: {}\nAnswer as a helpful analytics expert:\n",
        preamble.trim(),
        history_str,
        context_str,
        question.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_keep_every_section() {
        let prompt = build_prompt("Be useful.", &[], &[], "What is CTR?", 5);
        assert_eq!(
            prompt,
            "Be useful.\n\nConversation history:\n\nContext:\n\n\nQuestion: What is CTR?\nAnswer as a helpful analytics expert:\n"
        );
    }

    #[test]
    fn only_the_last_five_turns_are_rendered() {
        let history: Vec<Turn> = (0..7)
            .map(|i| if i % 2 == 0 { Turn::user(format!("q{}", i)) } else { Turn::assistant(format!("a{}", i)) })
            .collect();
        let prompt = build_prompt("p", &[], &history, "next", 10);
        assert!(!prompt.contains("q0"));
        assert!(!prompt.contains("a1"));
        assert!(prompt.contains("User: q2\nAssistant: a3\nUser: q4\nAssistant: a5\nUser: q6\n"));
    }

    #[test]
    fn context_chunks_are_listed_in_order() {
        let ctx = vec!["first".to_string(), "second".to_string()];
        let prompt = build_prompt("p", &ctx, &[], "q", 5);
        assert!(prompt.contains("Context:\nfirst\nsecond\n\nQuestion: q"));
    }

    #[test]
    fn bot_is_accepted_as_assistant() {
        let turn: Turn = serde_json::from_str(r#"{"role":"bot","content":"hi"}"#).unwrap();
        assert_eq!(turn.role, Role::Assistant);
        assert!(serde_json::from_str::<Turn>(r#"{"role":"system","content":"x"}"#).is_err());
    }
}
