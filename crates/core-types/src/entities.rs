use std::cmp::Ordering;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventId, FarmId, GroupId, OwnerId};

/// Entity that can be flattened into a published view.
pub trait ScopedEntity: Clone + Send + Sync + Serialize + 'static {
    fn entity_id(&self) -> &str;

    /// Value of the field the collection is ordered by, rendered for signatures.
    fn ordering_key(&self) -> String;

    /// Canonical display order of the collection.
    fn canonical_cmp(&self, other: &Self) -> Ordering;
}

/// Entity that belongs to exactly one seasonal group.
pub trait GroupScoped {
    fn group_id(&self) -> &GroupId;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Farm {
    pub id: FarmId,
    pub owner_id: OwnerId,
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
}

impl ScopedEntity for Farm {
    fn entity_id(&self) -> &str {
        self.id.as_str()
    }

    fn ordering_key(&self) -> String {
        self.name.clone()
    }

    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub farm_id: FarmId,
    pub name: String,
    #[serde(default)]
    pub breed: Option<String>,
    pub start_date: DateTime<Utc>,
}

impl Group {
    pub fn season_year(&self) -> i32 {
        self.start_date.year()
    }
}

impl ScopedEntity for Group {
    fn entity_id(&self) -> &str {
        self.id.as_str()
    }

    fn ordering_key(&self) -> String {
        self.start_date.to_rfc3339()
    }

    // most recent season first
    fn canonical_cmp(&self, other: &Self) -> Ordering {
        other
            .start_date
            .cmp(&self.start_date)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreedingEvent {
    pub id: EventId,
    pub group_id: GroupId,
    pub farm_id: FarmId,
    pub created_at: DateTime<Utc>,
    pub number_of_ewes_mated: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanningEvent {
    pub id: EventId,
    pub group_id: GroupId,
    pub farm_id: FarmId,
    pub created_at: DateTime<Utc>,
    pub ewes_scanned: u32,
    pub ewes_pregnant: u32,
    #[serde(default)]
    pub ewes_with_singles: u32,
    #[serde(default)]
    pub ewes_with_twins: u32,
    #[serde(default)]
    pub ewes_with_triplets: u32,
}

impl ScanningEvent {
    pub fn scanned_fetuses(&self) -> u64 {
        u64::from(self.ewes_with_singles)
            + u64::from(self.ewes_with_twins) * 2
            + u64::from(self.ewes_with_triplets) * 3
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LambingRecord {
    pub id: EventId,
    pub group_id: GroupId,
    pub farm_id: FarmId,
    pub created_at: DateTime<Utc>,
    pub ewes_lambed: u32,
    pub lambs_born: u32,
    #[serde(default)]
    pub mortality: u32,
}

macro_rules! group_event {
    ($ty:ty) => {
        impl GroupScoped for $ty {
            fn group_id(&self) -> &GroupId {
                &self.group_id
            }
        }

        impl ScopedEntity for $ty {
            fn entity_id(&self) -> &str {
                self.id.as_str()
            }

            fn ordering_key(&self) -> String {
                self.created_at.to_rfc3339()
            }

            fn canonical_cmp(&self, other: &Self) -> Ordering {
                other
                    .created_at
                    .cmp(&self.created_at)
                    .then_with(|| self.id.cmp(&other.id))
            }
        }
    };
}

group_event!(BreedingEvent);
group_event!(ScanningEvent);
group_event!(LambingRecord);

/// Raw operational event recorded against a group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OperationalEvent {
    Breeding(BreedingEvent),
    Scanning(ScanningEvent),
    Lambing(LambingRecord),
}

impl OperationalEvent {
    pub fn id(&self) -> &EventId {
        match self {
            OperationalEvent::Breeding(event) => &event.id,
            OperationalEvent::Scanning(event) => &event.id,
            OperationalEvent::Lambing(event) => &event.id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            OperationalEvent::Breeding(event) => event.created_at,
            OperationalEvent::Scanning(event) => event.created_at,
            OperationalEvent::Lambing(event) => event.created_at,
        }
    }

    pub fn farm_id(&self) -> &FarmId {
        match self {
            OperationalEvent::Breeding(event) => &event.farm_id,
            OperationalEvent::Scanning(event) => &event.farm_id,
            OperationalEvent::Lambing(event) => &event.farm_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OperationalEvent::Breeding(_) => "breeding",
            OperationalEvent::Scanning(_) => "scanning",
            OperationalEvent::Lambing(_) => "lambing",
        }
    }
}

impl GroupScoped for OperationalEvent {
    fn group_id(&self) -> &GroupId {
        match self {
            OperationalEvent::Breeding(event) => &event.group_id,
            OperationalEvent::Scanning(event) => &event.group_id,
            OperationalEvent::Lambing(event) => &event.group_id,
        }
    }
}

impl ScopedEntity for OperationalEvent {
    fn entity_id(&self) -> &str {
        self.id().as_str()
    }

    fn ordering_key(&self) -> String {
        self.created_at().to_rfc3339()
    }

    // most recently created first
    fn canonical_cmp(&self, other: &Self) -> Ordering {
        other
            .created_at()
            .cmp(&self.created_at())
            .then_with(|| self.id().cmp(other.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn operational_event_decodes_from_tagged_document() {
        let doc = json!({
            "kind": "scanning",
            "id": "scan-1",
            "groupId": "group-1",
            "farmId": "farm-1",
            "createdAt": "2024-03-01T09:00:00Z",
            "ewesScanned": 100,
            "ewesPregnant": 90,
            "ewesWithSingles": 40,
            "ewesWithTwins": 45,
            "ewesWithTriplets": 5
        });
        let event: OperationalEvent = serde_json::from_value(doc).unwrap();
        match &event {
            OperationalEvent::Scanning(scan) => assert_eq!(scan.scanned_fetuses(), 145),
            other => panic!("unexpected variant {other:?}"),
        }
        assert_eq!(event.group_id().as_str(), "group-1");
        assert_eq!(event.kind(), "scanning");
    }

    #[test]
    fn groups_order_most_recent_season_first() {
        let older = Group {
            id: GroupId::from("a"),
            farm_id: FarmId::from("f"),
            name: "2023".into(),
            breed: None,
            start_date: Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap(),
        };
        let newer = Group {
            id: GroupId::from("b"),
            start_date: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            ..older.clone()
        };
        let mut groups = vec![older.clone(), newer.clone()];
        groups.sort_by(|a, b| a.canonical_cmp(b));
        assert_eq!(groups[0].id, newer.id);
        assert_eq!(newer.season_year(), 2024);
    }
}
