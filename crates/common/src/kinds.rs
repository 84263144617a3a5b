//! Closed kind enums. Wire form is `snake_case`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A string did not name any variant of a kind enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownKind {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! kind_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($label:literal) {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownKind;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownKind {
                        kind: $label,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

kind_enum!(
    /// What sort of happening a timeline event records.
    EventType("event type") {
        Political => "political",
        Conflict => "conflict",
        Discovery => "discovery",
        Disaster => "disaster",
        Cultural => "cultural",
        Economic => "economic",
        Personal => "personal",
        #[default]
        Other => "other",
    }
);

kind_enum!(
    /// Narrative role of a story beat.
    BeatType("beat type") {
        #[default]
        Narration => "narration",
        Dialogue => "dialogue",
        Action => "action",
        Description => "description",
        Transition => "transition",
    }
);

kind_enum!(
    /// How a World relates its stories to the objective timeline.
    ChronologyMode("chronology mode") {
        /// Stories follow the objective timeline in order.
        #[default]
        Linear => "linear",
        /// Stories may jump around the timeline.
        Nonlinear => "nonlinear",
        /// Stories are anchored to events but not to a global order.
        Anchored => "anchored",
    }
);

kind_enum!(
    /// Who produced a beat's content.
    GeneratedBy("beat author") {
        #[default]
        User => "user",
        Ai => "ai",
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_parses_back() {
        for kind in EventType::ALL {
            assert_eq!(kind.as_str().parse::<EventType>().unwrap(), *kind);
        }
        for kind in BeatType::ALL {
            assert_eq!(kind.as_str().parse::<BeatType>().unwrap(), *kind);
        }
        for kind in ChronologyMode::ALL {
            assert_eq!(kind.as_str().parse::<ChronologyMode>().unwrap(), *kind);
        }
    }

    #[test]
    fn defaults_are_the_neutral_variants() {
        assert_eq!(EventType::default(), EventType::Other);
        assert_eq!(BeatType::default(), BeatType::Narration);
        assert_eq!(ChronologyMode::default(), ChronologyMode::Linear);
        assert_eq!(GeneratedBy::default(), GeneratedBy::User);
    }

    #[test]
    fn unknown_kind_is_reported() {
        let err = "meteor".parse::<EventType>().unwrap_err();
        assert_eq!(err.kind, "event type");
        assert_eq!(err.value, "meteor");
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&GeneratedBy::Ai).unwrap();
        assert_eq!(json, "\"ai\"");
        let mode: ChronologyMode = serde_json::from_str("\"nonlinear\"").unwrap();
        assert_eq!(mode, ChronologyMode::Nonlinear);
    }
}
