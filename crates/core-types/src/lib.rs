use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod entities;

pub use entities::{
    BreedingEvent, Farm, Group, GroupScoped, LambingRecord, OperationalEvent, ScanningEvent,
    ScopedEntity,
};

/// Raw record as delivered by the persistence layer, decoded lazily by the engine.
pub type Document = serde_json::Value;

/// Shared error type for the engine crates.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlockError {
    #[error("transport error on {scope}: {message}")]
    Transport { scope: String, message: String },
    #[error("decode error in {scope}: {message}")]
    Decode { scope: String, message: String },
    #[error("insufficient data for group {group}")]
    InsufficientData { group: String },
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("cancelled")]
    Cancelled,
    #[error("{message}")]
    Message { message: String },
}

impl FlockError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    pub fn transport(scope: &ScopeKey, message: impl Into<String>) -> Self {
        Self::Transport {
            scope: scope.to_string(),
            message: message.into(),
        }
    }

    pub fn decode(scope: &ScopeKey, message: impl Into<String>) -> Self {
        Self::Decode {
            scope: scope.to_string(),
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    /// Fault bucket used for diagnostics; `None` for errors that are not soft faults.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            Self::Transport { .. } => Some(FaultKind::Transport),
            Self::Decode { .. } => Some(FaultKind::Decode),
            Self::InsufficientData { .. } => Some(FaultKind::InsufficientData),
            Self::InvariantViolation(_) => Some(FaultKind::InvariantViolation),
            Self::Cancelled | Self::Message { .. } => None,
        }
    }
}

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(OwnerId);
string_id!(FarmId);
string_id!(GroupId);
string_id!(EventId);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Owner,
    Farm,
    Group,
}

impl ScopeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeLevel::Owner => "owner",
            ScopeLevel::Farm => "farm",
            ScopeLevel::Group => "group",
        }
    }
}

/// Identifies a subscription domain: an owner, optionally narrowed to a farm and a group.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
    pub owner: OwnerId,
    pub farm: Option<FarmId>,
    pub group: Option<GroupId>,
}

impl ScopeKey {
    pub fn owner(owner: OwnerId) -> Self {
        Self {
            owner,
            farm: None,
            group: None,
        }
    }

    pub fn farm(owner: OwnerId, farm: FarmId) -> Self {
        Self {
            owner,
            farm: Some(farm),
            group: None,
        }
    }

    pub fn group(owner: OwnerId, farm: FarmId, group: GroupId) -> Self {
        Self {
            owner,
            farm: Some(farm),
            group: Some(group),
        }
    }

    pub fn level(&self) -> ScopeLevel {
        match (&self.farm, &self.group) {
            (_, Some(_)) => ScopeLevel::Group,
            (Some(_), None) => ScopeLevel::Farm,
            (None, None) => ScopeLevel::Owner,
        }
    }

    /// Scope of the enclosing level, `None` at owner level.
    pub fn parent(&self) -> Option<ScopeKey> {
        match self.level() {
            ScopeLevel::Owner => None,
            ScopeLevel::Farm => Some(ScopeKey::owner(self.owner.clone())),
            ScopeLevel::Group => Some(Self {
                owner: self.owner.clone(),
                farm: self.farm.clone(),
                group: None,
            }),
        }
    }

    pub fn child_group(&self, group: GroupId) -> Option<ScopeKey> {
        let farm = self.farm.clone()?;
        if self.group.is_some() {
            return None;
        }
        Some(ScopeKey::group(self.owner.clone(), farm, group))
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner={}", self.owner)?;
        if let Some(farm) = &self.farm {
            write!(f, " farm={farm}")?;
        }
        if let Some(group) = &self.group {
            write!(f, " group={group}")?;
        }
        Ok(())
    }
}

/// Flattened collection that is coalesced and published as one unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePoint {
    Farms,
    Groups,
    Events,
}

impl MergePoint {
    pub const ALL: [MergePoint; 3] = [MergePoint::Farms, MergePoint::Groups, MergePoint::Events];

    pub fn as_str(self) -> &'static str {
        match self {
            MergePoint::Farms => "farms",
            MergePoint::Groups => "groups",
            MergePoint::Events => "events",
        }
    }

    /// Scope level whose node snapshots feed this merge point.
    pub fn level(self) -> ScopeLevel {
        match self {
            MergePoint::Farms => ScopeLevel::Owner,
            MergePoint::Groups => ScopeLevel::Farm,
            MergePoint::Events => ScopeLevel::Group,
        }
    }

    /// Merge point fed by subscriptions at `level`.
    pub fn for_level(level: ScopeLevel) -> Self {
        match level {
            ScopeLevel::Owner => MergePoint::Farms,
            ScopeLevel::Farm => MergePoint::Groups,
            ScopeLevel::Group => MergePoint::Events,
        }
    }
}

impl fmt::Display for MergePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Transport,
    Decode,
    InsufficientData,
    InvariantViolation,
}

impl FaultKind {
    pub const ALL: [FaultKind; 4] = [
        FaultKind::Transport,
        FaultKind::Decode,
        FaultKind::InsufficientData,
        FaultKind::InvariantViolation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::Transport => "transport",
            FaultKind::Decode => "decode",
            FaultKind::InsufficientData => "insufficient_data",
            FaultKind::InvariantViolation => "invariant_violation",
        }
    }
}

/// Non-fatal error signal surfaced to consumers for a single scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaultSignal {
    pub kind: FaultKind,
    pub scope: Option<ScopeKey>,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

impl FaultSignal {
    pub fn new(kind: FaultKind, scope: Option<ScopeKey>, message: impl Into<String>) -> Self {
        Self {
            kind,
            scope,
            message: message.into(),
            recorded_at: Utc::now(),
        }
    }

    pub fn from_error(scope: Option<ScopeKey>, error: &FlockError) -> Option<Self> {
        error
            .fault_kind()
            .map(|kind| Self::new(kind, scope, error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_levels_follow_populated_fields() {
        let owner = OwnerId::from("owner-1");
        let farm = FarmId::from("farm-1");
        let group = GroupId::from("group-1");

        let owner_scope = ScopeKey::owner(owner.clone());
        let farm_scope = ScopeKey::farm(owner.clone(), farm.clone());
        let group_scope = farm_scope.child_group(group.clone()).unwrap();

        assert_eq!(owner_scope.level(), ScopeLevel::Owner);
        assert_eq!(farm_scope.level(), ScopeLevel::Farm);
        assert_eq!(group_scope.level(), ScopeLevel::Group);
        assert_eq!(group_scope.parent(), Some(farm_scope.clone()));
        assert_eq!(farm_scope.parent(), Some(owner_scope.clone()));
        assert!(owner_scope.child_group(group).is_none());
        assert_eq!(
            group_scope.to_string(),
            "owner=owner-1 farm=farm-1 group=group-1"
        );
    }

    #[test]
    fn fault_signal_only_for_soft_faults() {
        let scope = ScopeKey::owner(OwnerId::from("o"));
        let transport = FlockError::transport(&scope, "offline");
        let signal = FaultSignal::from_error(Some(scope.clone()), &transport).unwrap();
        assert_eq!(signal.kind, FaultKind::Transport);
        assert!(signal.message.contains("offline"));

        assert!(FaultSignal::from_error(None, &FlockError::Cancelled).is_none());
        assert!(FaultSignal::from_error(None, &FlockError::new("plain")).is_none());
    }
}
