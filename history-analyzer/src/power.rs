//! Low power state (`Dpss`) records
//!
//! The device reports cumulative counters for every low power hardware state
//! since boot:
//!
//! ```text
//! state_1 name=XO_shutdown time=5000 count=12 voter_1 name=APSS time=1200 count=4 voter_2 name=MPSS time=300 count=1
//! ```
//!
//! [`PowerStateTracker`] turns consecutive sightings into per-window deltas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inconsistencies in power state records
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PowerStateError {
    #[error("malformed power state field {0:?}")]
    MalformedField(String),

    #[error("power state field {0:?} appears before any state_ token")]
    OrphanField(String),

    #[error("power state {0:?} has no name")]
    MissingName(String),

    #[error("power state mismatch: {left} vs {right}")]
    StateMismatch { left: String, right: String },

    #[error("voter count mismatch for {state}: {left} vs {right}")]
    VoterCountMismatch { state: String, left: usize, right: usize },

    #[error("voter mismatch for {state}: {left} vs {right}")]
    VoterMismatch {
        state: String,
        left: String,
        right: String,
    },
}

/// A voter that kept the system out of a low power state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    pub name: String,
    pub time_ms: i64,
    pub count: i64,
}

/// One low power state with its voters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerState {
    pub name: String,
    pub level: i32,
    pub time_ms: i64,
    pub count: i64,
    pub voters: Vec<Voter>,
}

enum Target {
    State,
    Voter,
}

fn parse_number<T: std::str::FromStr>(token: &str, value: &str) -> Result<T, PowerStateError> {
    value
        .parse()
        .map_err(|_| PowerStateError::MalformedField(token.to_string()))
}

/// Parse every record in a `Dpss` value
pub fn parse_power_states(input: &str) -> Result<Vec<PowerState>, PowerStateError> {
    let mut states: Vec<PowerState> = Vec::new();
    let mut target = Target::State;

    for token in input.split_whitespace().map(|t| t.trim_matches('"')) {
        if token.is_empty() {
            continue;
        }
        if let Some(level) = token.strip_prefix("state_") {
            states.push(PowerState {
                level: parse_number(token, level)?,
                ..Default::default()
            });
            target = Target::State;
            continue;
        }

        let Some(state) = states.last_mut() else {
            return Err(PowerStateError::OrphanField(token.to_string()));
        };
        if token.starts_with("voter_") {
            state.voters.push(Voter::default());
            target = Target::Voter;
            continue;
        }

        let (field, value) = token
            .split_once('=')
            .ok_or_else(|| PowerStateError::MalformedField(token.to_string()))?;
        match (&target, field) {
            (Target::State, "name") => state.name = value.to_string(),
            (Target::State, "time") => state.time_ms = parse_number(token, value)?,
            (Target::State, "count") => state.count = parse_number(token, value)?,
            (Target::Voter, _) => {
                let Some(voter) = state.voters.last_mut() else {
                    return Err(PowerStateError::OrphanField(token.to_string()));
                };
                match field {
                    "name" => voter.name = value.to_string(),
                    "time" => voter.time_ms = parse_number(token, value)?,
                    "count" => voter.count = parse_number(token, value)?,
                    _ => return Err(PowerStateError::MalformedField(token.to_string())),
                }
            }
            _ => return Err(PowerStateError::MalformedField(token.to_string())),
        }
    }

    if let Some(unnamed) = states.iter().find(|s| s.name.is_empty()) {
        return Err(PowerStateError::MissingName(format!("state_{}", unnamed.level)));
    }
    Ok(states)
}

impl PowerState {
    fn identity(&self) -> String {
        format!("state_{} {}", self.level, self.name)
    }

    fn sorted_voters(&self) -> Vec<&Voter> {
        let mut voters: Vec<&Voter> = self.voters.iter().collect();
        voters.sort_by(|a, b| a.name.cmp(&b.name));
        voters
    }

    /// `self - other`, voters paired by name
    ///
    /// Both records must describe the same state (level, name and voter set).
    pub fn subtract(&self, other: &PowerState) -> Result<PowerState, PowerStateError> {
        if self.level != other.level || self.name != other.name {
            return Err(PowerStateError::StateMismatch {
                left: self.identity(),
                right: other.identity(),
            });
        }
        if self.voters.len() != other.voters.len() {
            return Err(PowerStateError::VoterCountMismatch {
                state: self.name.clone(),
                left: self.voters.len(),
                right: other.voters.len(),
            });
        }

        let voters = self
            .sorted_voters()
            .into_iter()
            .zip(other.sorted_voters())
            .map(|(a, b)| {
                if a.name != b.name {
                    return Err(PowerStateError::VoterMismatch {
                        state: self.name.clone(),
                        left: a.name.clone(),
                        right: b.name.clone(),
                    });
                }
                Ok(Voter {
                    name: a.name.clone(),
                    time_ms: a.time_ms - b.time_ms,
                    count: a.count - b.count,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PowerState {
            name: self.name.clone(),
            level: self.level,
            time_ms: self.time_ms - other.time_ms,
            count: self.count - other.count,
            voters,
        })
    }

    /// Add another window's delta into this aggregate, merging voters by name
    pub fn accumulate(&mut self, delta: &PowerState) {
        self.time_ms += delta.time_ms;
        self.count += delta.count;
        for voter in &delta.voters {
            match self.voters.iter_mut().find(|v| v.name == voter.name) {
                Some(existing) => {
                    existing.time_ms += voter.time_ms;
                    existing.count += voter.count;
                }
                None => self.voters.push(voter.clone()),
            }
        }
    }
}

/// Result of one sighting of a known power state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerStateDelta {
    /// Change since the previous sighting
    pub window: PowerState,
    /// Change since the state was first seen
    pub since_first: PowerState,
}

/// Cumulative power state counters for the current boot
#[derive(Debug, Clone, Default)]
pub struct PowerStateTracker {
    cumulative: BTreeMap<String, PowerState>,
    initial: BTreeMap<String, PowerState>,
}

impl PowerStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting. The first sighting of a state only sets its
    /// baselines and yields `None`.
    pub fn observe(&mut self, current: PowerState) -> Result<Option<PowerStateDelta>, PowerStateError> {
        let Some(previous) = self.cumulative.get(&current.name) else {
            self.initial.insert(current.name.clone(), current.clone());
            self.cumulative.insert(current.name.clone(), current);
            return Ok(None);
        };

        let delta = current.subtract(previous).and_then(|window| {
            let since_first = match self.initial.get(&current.name) {
                Some(initial) => current.subtract(initial)?,
                None => window.clone(),
            };
            Ok(PowerStateDelta { window, since_first })
        });
        if delta.is_err() {
            // The voter set changed; count from this sighting on
            self.initial.insert(current.name.clone(), current.clone());
        }
        self.cumulative.insert(current.name.clone(), current);
        delta.map(Some)
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }
}
