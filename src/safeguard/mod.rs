//! Component C — SAFEGUARD Gate. A state-free per-request decision function:
//! no I/O, no mutable state, pure on `(tool, caller_confidence)`.

use serde::{Deserialize, Serialize};

/// Classification levels, least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    /// Read-only / discovery.
    L0,
    /// Minor mutation.
    L1,
    /// Moderate mutation.
    L2,
    /// Sensitive mutation — always routed through the approval queue.
    L3,
    /// Forbidden — no queue path exists.
    L4,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::L0 => "L0",
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::L3 => "L3",
            Self::L4 => "L4",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The minimum confidence an L1 call must carry to be auto-allowed.
const L1_CONFIDENCE_THRESHOLD: u8 = 80;

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub level: Level,
    pub reason: String,
    pub requires_human: bool,
    /// Present when the caller should re-check at a different confidence,
    /// not when they should open an approval (that only applies to L3).
    pub approval_hint: Option<String>,
}

impl Decision {
    fn allow(level: Level, reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            level,
            reason: reason.into(),
            requires_human: false,
            approval_hint: None,
        }
    }

    fn block(level: Level, reason: impl Into<String>, approval_hint: Option<String>) -> Self {
        Self {
            allowed: false,
            level,
            reason: reason.into(),
            requires_human: true,
            approval_hint,
        }
    }
}

/// `decide(tool, caller_confidence) -> Decision`. Pure: identical inputs
/// always yield identical output (spec.md §8's universal invariant).
///
/// When `enabled` is false every operation maps to L0 regardless of its
/// registered level (the global SAFEGUARD disable switch).
pub fn decide(level: Level, confidence: u8, enabled: bool) -> Decision {
    if !enabled {
        return Decision::allow(Level::L0, "SAFEGUARD disabled: treated as L0");
    }

    match level {
        Level::L0 => Decision::allow(level, "read-only / discovery"),
        Level::L1 => {
            if confidence >= L1_CONFIDENCE_THRESHOLD {
                Decision::allow(level, "minor mutation, confidence above threshold")
            } else {
                Decision::block(
                    level,
                    format!(
                        "minor mutation requires confidence >= {L1_CONFIDENCE_THRESHOLD}, got {confidence}"
                    ),
                    Some("re-check at higher confidence".to_string()),
                )
            }
        }
        Level::L2 => Decision::allow(level, "moderate mutation, logged and notified out-of-band"),
        Level::L3 => Decision::block(
            level,
            "sensitive mutation always requires human approval",
            None,
        ),
        Level::L4 => Decision::block(level, "forbidden: no approval path exists", None),
    }
}
