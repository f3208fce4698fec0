//! Textual reasoning markers.
//!
//! Models prompted in the Thought / Action / PAUSE / Observation style ask
//! for an action by writing `Action: <Name>[<argument>]` followed by
//! `PAUSE`, and finish with `Answer: ...`.

use regex_lite::Regex;

const ACTION_PATTERN: &str = r"Action:\s*(\w+)\[(.*?)\]";
const ACTION_LEAD: &str = "Action:";
const PAUSE: &str = "PAUSE";
const ANSWER: &str = "Answer:";

/// An action request parsed from model text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMarker {
    pub name: String,
    /// The bracketed text, verbatim
    pub argument: String,
}

/// Whether the model has paused to wait for an observation.
pub fn is_paused(text: &str) -> bool {
    text.contains(PAUSE)
}

/// Whether the text carries a final answer.
pub fn has_final_answer(text: &str) -> bool {
    text.contains(ANSWER)
}

/// The first `Action: Name[argument]` marker in `text`, if any.
pub fn find_action(text: &str) -> Option<ActionMarker> {
    let re = Regex::new(ACTION_PATTERN).ok()?;
    let caps = re.captures(text)?;
    Some(ActionMarker {
        name: caps.get(1)?.as_str().to_string(),
        argument: caps.get(2)?.as_str().to_string(),
    })
}

/// A paused action request: `PAUSE` present and a marker found.
pub fn paused_action(text: &str) -> Option<ActionMarker> {
    if is_paused(text) { find_action(text) } else { None }
}

/// How much of `text` can be shown before the round resolves: everything
/// ahead of the first `Action:`, minus a trailing fragment that could still
/// grow into one.
pub fn relay_boundary(text: &str) -> usize {
    if let Some(at) = text.find(ACTION_LEAD) {
        return at;
    }
    let partial = (1..ACTION_LEAD.len())
        .rev()
        .find(|&n| text.ends_with(&ACTION_LEAD[..n]))
        .unwrap_or(0);
    text.len() - partial
}
