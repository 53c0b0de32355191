//! Story rounds and their chapter labels.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{StoryError, StoryResult};

/// Number of rounds in a game.
pub const MAX_ROUNDS: usize = 8;

/// Chapter label, one per round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chapter {
    /// Round 0.
    Opening,
    /// Round 1.
    RisingAction,
    /// Round 2.
    Conflict,
    /// Round 3.
    KeyDecision,
    /// Round 4.
    Development,
    /// Round 5.
    Climax,
    /// Round 6.
    ApproachingEnd,
    /// Round 7.
    Finale,
}

impl Chapter {
    /// All chapters in round order.
    pub const ALL: [Chapter; MAX_ROUNDS] = [
        Chapter::Opening,
        Chapter::RisingAction,
        Chapter::Conflict,
        Chapter::KeyDecision,
        Chapter::Development,
        Chapter::Climax,
        Chapter::ApproachingEnd,
        Chapter::Finale,
    ];

    /// Chapter for a 0-based round number.
    pub fn from_round(round: u8) -> Option<Self> {
        Self::ALL.get(usize::from(round)).copied()
    }

    /// Looks a chapter up by its label.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label.trim())
    }

    /// 0-based round number of this chapter.
    pub fn round(self) -> u8 {
        self as u8
    }

    /// The label shown to players and expected from the model.
    pub fn label(self) -> &'static str {
        match self {
            Chapter::Opening => "故事的开端",
            Chapter::RisingAction => "情节推进",
            Chapter::Conflict => "矛盾产生",
            Chapter::KeyDecision => "关键决策",
            Chapter::Development => "情节发展",
            Chapter::Climax => "高潮冲突",
            Chapter::ApproachingEnd => "结局逼近",
            Chapter::Finale => "最终结局",
        }
    }
}

impl std::fmt::Display for Chapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Chapter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Chapter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Chapter::from_label(&label)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown chapter label: {}", label)))
    }
}

/// One parsed story beat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// 0-based round number, assigned by the game.
    pub round: u8,
    /// Chapter label for `round`.
    pub chapter: Chapter,
    /// Narrative text (80 characters by contract).
    pub content: String,
    /// Options offered to the player (three by contract).
    pub choices: Vec<String>,
}

impl RoundRecord {
    /// Builds a record for `round` from the object the model produced.
    ///
    /// The model's own `round` and `chapter` fields are not trusted; the
    /// chapter always follows from `round`. Missing `content` or `choice`
    /// fields become empty values.
    pub fn from_object(round: u8, object: &Value) -> StoryResult<Self> {
        let chapter = Chapter::from_round(round).ok_or_else(|| {
            StoryError::validation_param(format!("round {} is past the final chapter", round), "round")
        })?;

        let fields = object.as_object().ok_or_else(|| StoryError::Parse {
            message: "model reply is not a JSON object".to_string(),
            fragment: object.to_string(),
        })?;

        if let Some(reported) = reported_round(object) {
            if reported != i64::from(round) && reported != i64::from(round) + 1 {
                tracing::debug!(reported, assigned = round, "model reported an unexpected round");
            }
        }

        let content = fields
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let choices = fields
            .get("choice")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            round,
            chapter,
            content,
            choices,
        })
    }
}

/// The model sends `round` as either a string or a number.
fn reported_round(object: &Value) -> Option<i64> {
    match object.get("round")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
