//! Per-request timing map: stage names to elapsed seconds and derived rates,
//! plus the odd non-numeric flag (`throttled`).

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde::ser::SerializeMap;

/// Populated by the coordinator as stages complete. Fully populated on
/// success, partially populated on failure — whatever ran before the
/// failing stage is preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timing {
    values: BTreeMap<String, f64>,
    flags: BTreeMap<String, bool>,
}

impl Timing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `seconds` elapsed for `stage` (also used for derived rates
    /// like `llm_tokens_per_second`).
    pub fn set(&mut self, stage: &str, seconds: f64) {
        self.values.insert(stage.to_owned(), seconds);
    }

    /// Record a boolean flag, e.g. `throttled`.
    pub fn set_flag(&mut self, flag: &str) {
        self.flags.insert(flag.to_owned(), true);
    }

    #[must_use]
    pub fn get(&self, stage: &str) -> Option<f64> {
        self.values.get(stage).copied()
    }

    #[must_use]
    pub fn flag(&self, flag: &str) -> bool {
        self.flags.get(flag).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn stages(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

impl Serialize for Timing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + self.flags.len()))?;
        for (k, v) in &self.values {
            map.serialize_entry(k, v)?;
        }
        for (k, v) in &self.flags {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> serde::Deserialize<'de> for Timing {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: BTreeMap<String, serde_json::Value> = serde::Deserialize::deserialize(deserializer)?;
        let mut timing = Timing::new();
        for (k, v) in raw {
            match v {
                serde_json::Value::Bool(b) if b => timing.flags.insert(k, true),
                serde_json::Value::Number(n) => {
                    timing.values.insert(k, n.as_f64().unwrap_or(0.0));
                    None
                }
                _ => None,
            };
        }
        Ok(timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partially_populated_timing_keeps_only_completed_stages() {
        let mut timing = Timing::new();
        timing.set("asr", 1.2);
        assert_eq!(timing.get("asr"), Some(1.2));
        assert_eq!(timing.get("llm"), None);
    }

    #[test]
    fn flags_round_trip_through_json() {
        let mut timing = Timing::new();
        timing.set("asr", 0.5);
        timing.set_flag("throttled");
        let json = serde_json::to_string(&timing).expect("serialize");
        let back: Timing = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.get("asr"), Some(0.5));
        assert!(back.flag("throttled"));
    }
}
