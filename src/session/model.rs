//! Session, participant and user documents.

use crate::error::StoreError;
use crate::types::{DocumentId, Fields, Timestamp};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// One card of the estimate deck.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Estimate {
    Zero,
    Half,
    One,
    Two,
    Three,
    Five,
    Eight,
    /// "?"
    Unknown,
    /// "∞"
    Infinite,
    /// "☕"
    NeedsBreak,
}

impl Estimate {
    /// The full deck in display order.
    pub const ALL: [Estimate; 10] = [
        Estimate::Zero,
        Estimate::Half,
        Estimate::One,
        Estimate::Two,
        Estimate::Three,
        Estimate::Five,
        Estimate::Eight,
        Estimate::Unknown,
        Estimate::Infinite,
        Estimate::NeedsBreak,
    ];

    /// Numeric value for numbered cards.
    pub fn points(&self) -> Option<f64> {
        match self {
            Estimate::Zero => Some(0.0),
            Estimate::Half => Some(0.5),
            Estimate::One => Some(1.0),
            Estimate::Two => Some(2.0),
            Estimate::Three => Some(3.0),
            Estimate::Five => Some(5.0),
            Estimate::Eight => Some(8.0),
            Estimate::Unknown | Estimate::Infinite | Estimate::NeedsBreak => None,
        }
    }

    /// Symbolic name used when persisting non-numeric cards.
    pub fn symbol(&self) -> Option<&'static str> {
        match self {
            Estimate::Unknown => Some("unknown"),
            Estimate::Infinite => Some("infinite"),
            Estimate::NeedsBreak => Some("needs-break"),
            _ => None,
        }
    }

    /// What the card shows.
    pub fn glyph(&self) -> &'static str {
        match self {
            Estimate::Zero => "0",
            Estimate::Half => "0.5",
            Estimate::One => "1",
            Estimate::Two => "2",
            Estimate::Three => "3",
            Estimate::Five => "5",
            Estimate::Eight => "8",
            Estimate::Unknown => "?",
            Estimate::Infinite => "∞",
            Estimate::NeedsBreak => "☕",
        }
    }

    fn from_points(points: f64) -> Option<Self> {
        Estimate::ALL
            .into_iter()
            .find(|e| e.points() == Some(points))
    }

    /// Parse a persisted value: a deck number, a symbolic name or a glyph.
    pub fn from_value(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .and_then(Self::from_points)
                .ok_or_else(|| StoreError::InvalidArgument(format!("{} is not on the deck", n))),
            Value::String(s) => s.parse(),
            other => Err(StoreError::InvalidArgument(format!(
                "estimate must be a number or symbol, got {}",
                other
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match (self.symbol(), self) {
            (Some(symbol), _) => Value::from(symbol),
            (None, Estimate::Half) => Value::from(0.5),
            (None, e) => Value::from(e.points().unwrap_or_default() as i64),
        }
    }
}

impl FromStr for Estimate {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Estimate::ALL
            .into_iter()
            .find(|e| e.glyph() == s || e.symbol() == Some(s))
            .ok_or_else(|| StoreError::InvalidArgument(format!("unknown estimate {:?}", s)))
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glyph())
    }
}

impl Serialize for Estimate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match (self.symbol(), self) {
            (Some(symbol), _) => serializer.serialize_str(symbol),
            (None, Estimate::Half) => serializer.serialize_f64(0.5),
            (None, e) => serializer.serialize_i64(e.points().unwrap_or_default() as i64),
        }
    }
}

impl<'de> Deserialize<'de> for Estimate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Estimate::from_value(&value).map_err(D::Error::custom)
    }
}

/// A user's membership in a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// User id.
    pub id: String,

    /// Current estimate; `None` before voting or after a reset.
    #[serde(default)]
    pub number: Option<Estimate>,

    /// Observers do not vote and are hidden from the vote board.
    #[serde(default)]
    pub observer: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<String>,

    /// Fields this crate does not interpret, carried through rewrites.
    #[serde(flatten)]
    pub extra: Fields,
}

impl Participant {
    /// A voting participant holding the initial `0` card.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            number: Some(Estimate::Zero),
            observer: false,
            bg_color: None,
            extra: Fields::new(),
        }
    }

    pub fn with_bg_color(mut self, color: impl Into<String>) -> Self {
        self.bg_color = Some(color.into());
        self
    }

    /// Whether a real vote has been cast. The initial `0` card does not count.
    pub fn has_voted(&self) -> bool {
        matches!(self.number, Some(e) if e != Estimate::Zero)
    }
}

/// One planning poker round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: DocumentId,

    pub session_name: String,

    #[serde(default)]
    pub reveal: bool,

    /// Server-assigned; absent only on documents written outside `create`.
    #[serde(default)]
    pub created_at: Option<Timestamp>,

    /// Join order.
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// How a participant's card is shown to a given viewer.
#[derive(Clone, Debug, PartialEq)]
pub enum CardFace {
    /// The estimate is visible (revealed, or the viewer's own card).
    Shown(Option<Estimate>),
    /// Only whether a vote was cast is disclosed.
    Hidden { voted: bool },
}

/// One entry of the vote board.
#[derive(Clone, Debug, PartialEq)]
pub struct VoteCard {
    pub participant_id: String,
    pub face: CardFace,
}

/// Listing data for a session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSummary {
    pub id: DocumentId,
    pub name: String,
    pub participant_count: usize,
    pub created_at: Option<Timestamp>,
}

impl Session {
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn has_participant(&self, id: &str) -> bool {
        self.participant(id).is_some()
    }

    /// Non-observer participants in join order.
    pub fn voters(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| !p.observer)
    }

    /// Whether every voter has cast a vote.
    pub fn all_voted(&self) -> bool {
        self.voters().all(Participant::has_voted)
    }

    /// Cards as `viewer` may see them.
    ///
    /// Until `reveal`, only the viewer's own estimate is shown; everyone
    /// else's card discloses just whether they voted.
    pub fn vote_board(&self, viewer: &str) -> Vec<VoteCard> {
        self.voters()
            .map(|p| VoteCard {
                participant_id: p.id.clone(),
                face: if self.reveal || p.id == viewer {
                    CardFace::Shown(p.number)
                } else {
                    CardFace::Hidden {
                        voted: p.has_voted(),
                    }
                },
            })
            .collect()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.session_name.clone(),
            participant_count: self.participants.len(),
            created_at: self.created_at,
        }
    }
}

/// An account document. Owned by the auth subsystem.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: DocumentId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub href: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(reveal: bool, participants: Value) -> Session {
        serde_json::from_value(json!({
            "id": "s1",
            "sessionName": "Sprint 12",
            "reveal": reveal,
            "participants": participants,
        }))
        .unwrap()
    }

    #[test]
    fn test_estimate_wire_forms() {
        let encoded: Vec<Value> = Estimate::ALL.iter().map(|e| serde_json::to_value(e).unwrap()).collect();
        assert_eq!(
            Value::Array(encoded),
            json!([0, 0.5, 1, 2, 3, 5, 8, "unknown", "infinite", "needs-break"])
        );
        for e in Estimate::ALL {
            assert_eq!(e.to_value(), serde_json::to_value(e).unwrap());
        }
    }

    #[test]
    fn test_estimate_accepts_glyphs_and_floats() {
        let parsed: Vec<Estimate> =
            serde_json::from_value(json!(["?", "∞", "☕", 5.0, 0.5, "needs-break"])).unwrap();
        assert_eq!(
            parsed,
            vec![
                Estimate::Unknown,
                Estimate::Infinite,
                Estimate::NeedsBreak,
                Estimate::Five,
                Estimate::Half,
                Estimate::NeedsBreak
            ]
        );

        assert!(serde_json::from_value::<Estimate>(json!(13)).is_err());
        assert!(serde_json::from_value::<Estimate>(json!(true)).is_err());
        assert!(matches!("13".parse::<Estimate>(), Err(StoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_participant_defaults_and_extra_fields() {
        let p: Participant = serde_json::from_value(json!({"id": "u2", "voted": true})).unwrap();
        assert_eq!(p.number, None);
        assert!(!p.observer);
        assert_eq!(p.extra.get("voted"), Some(&json!(true)));

        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back, json!({"id": "u2", "number": null, "observer": false, "voted": true}));
    }

    #[test]
    fn test_vote_board_hides_until_reveal() {
        let s = session(
            false,
            json!([
                {"id": "u1", "number": 5},
                {"id": "u2", "number": 0},
                {"id": "u3", "number": 3, "observer": true},
            ]),
        );

        let board = s.vote_board("u2");
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].face, CardFace::Hidden { voted: true });
        assert_eq!(board[1].face, CardFace::Shown(Some(Estimate::Zero)));
        assert!(!s.all_voted());

        let revealed = Session { reveal: true, ..s };
        let board = revealed.vote_board("u2");
        assert_eq!(board[0].face, CardFace::Shown(Some(Estimate::Five)));
    }

    #[test]
    fn test_summary_and_membership() {
        let s = session(false, json!([{"id": "u1", "number": 1}, {"id": "u2", "observer": true}]));
        assert!(s.has_participant("u2"));
        assert!(!s.has_participant("u9"));
        assert!(s.all_voted());

        let summary = s.summary();
        assert_eq!(summary.name, "Sprint 12");
        assert_eq!(summary.participant_count, 2);
        assert_eq!(summary.created_at, None);
    }
}
