use std::collections::BTreeMap;

use flockview_core_types::{
    BreedingEvent, GroupId, GroupScoped, LambingRecord, OperationalEvent, ScanningEvent,
};

use crate::model::AggregateTotals;

/// Raw events of one group, split by kind.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupEvents {
    pub breeding: Vec<BreedingEvent>,
    pub scanning: Vec<ScanningEvent>,
    pub lambing: Vec<LambingRecord>,
}

impl GroupEvents {
    pub fn push(&mut self, event: OperationalEvent) {
        match event {
            OperationalEvent::Breeding(event) => self.breeding.push(event),
            OperationalEvent::Scanning(event) => self.scanning.push(event),
            OperationalEvent::Lambing(event) => self.lambing.push(event),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.breeding.is_empty() && self.scanning.is_empty() && self.lambing.is_empty()
    }

    pub fn totals(&self) -> AggregateTotals {
        aggregate(&self.breeding, &self.scanning, &self.lambing)
    }
}

/// Sums raw event fields. Never fails: an empty breeding list simply yields
/// `ewes_mated == 0`, which consumers must treat as insufficient data.
pub fn aggregate(
    breeding: &[BreedingEvent],
    scanning: &[ScanningEvent],
    lambing: &[LambingRecord],
) -> AggregateTotals {
    let mut totals = AggregateTotals::default();

    for event in breeding {
        totals.ewes_mated += u64::from(event.number_of_ewes_mated);
    }

    for event in scanning {
        totals.ewes_scanned += u64::from(event.ewes_scanned);
        totals.ewes_pregnant += u64::from(event.ewes_pregnant);
        totals.ewes_with_singles += u64::from(event.ewes_with_singles);
        totals.ewes_with_twins += u64::from(event.ewes_with_twins);
        totals.ewes_with_triplets += u64::from(event.ewes_with_triplets);
        // per-event derived field, summed
        totals.scanned_fetuses += event.scanned_fetuses();
    }

    for record in lambing {
        totals.ewes_lambed += u64::from(record.ewes_lambed);
        totals.lambs_born += u64::from(record.lambs_born);
        totals.mortality += u64::from(record.mortality);
    }

    totals.lambs_alive = totals.lambs_born.saturating_sub(totals.mortality);
    totals
}

/// Aggregates a mixed event list, ignoring nothing: callers pre-filter by group.
pub fn aggregate_events<'a, I>(events: I) -> AggregateTotals
where
    I: IntoIterator<Item = &'a OperationalEvent>,
{
    let mut grouped = GroupEvents::default();
    for event in events {
        grouped.push(event.clone());
    }
    grouped.totals()
}

/// Splits a flattened event view into per-group buckets.
pub fn partition_by_group<'a, I>(events: I) -> BTreeMap<GroupId, GroupEvents>
where
    I: IntoIterator<Item = &'a OperationalEvent>,
{
    let mut buckets: BTreeMap<GroupId, GroupEvents> = BTreeMap::new();
    for event in events {
        buckets
            .entry(event.group_id().clone())
            .or_default()
            .push(event.clone());
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flockview_core_types::{EventId, FarmId};

    fn breeding(group: &str, mated: u32) -> OperationalEvent {
        OperationalEvent::Breeding(BreedingEvent {
            id: EventId::new(),
            group_id: GroupId::from(group),
            farm_id: FarmId::from("farm"),
            created_at: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
            number_of_ewes_mated: mated,
        })
    }

    fn scanning(group: &str, singles: u32, twins: u32, triplets: u32) -> OperationalEvent {
        OperationalEvent::Scanning(ScanningEvent {
            id: EventId::new(),
            group_id: GroupId::from(group),
            farm_id: FarmId::from("farm"),
            created_at: Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap(),
            ewes_scanned: singles + twins + triplets + 5,
            ewes_pregnant: singles + twins + triplets,
            ewes_with_singles: singles,
            ewes_with_twins: twins,
            ewes_with_triplets: triplets,
        })
    }

    fn lambing(group: &str, lambed: u32, born: u32, mortality: u32) -> OperationalEvent {
        OperationalEvent::Lambing(LambingRecord {
            id: EventId::new(),
            group_id: GroupId::from(group),
            farm_id: FarmId::from("farm"),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            ewes_lambed: lambed,
            lambs_born: born,
            mortality,
        })
    }

    #[test]
    fn sums_fields_across_events() {
        let events = vec![
            breeding("g", 400),
            breeding("g", 410),
            scanning("g", 100, 200, 10),
            scanning("g", 50, 100, 5),
            lambing("g", 300, 450, 20),
            lambing("g", 380, 440, 30),
        ];
        let totals = aggregate_events(&events);
        assert_eq!(totals.ewes_mated, 810);
        assert_eq!(totals.ewes_pregnant, 465);
        assert_eq!(totals.ewes_scanned, 475);
        assert_eq!(totals.scanned_fetuses, 100 + 400 + 30 + 50 + 200 + 15);
        assert_eq!(totals.ewes_lambed, 680);
        assert_eq!(totals.lambs_born, 890);
        assert_eq!(totals.mortality, 50);
        assert_eq!(totals.lambs_alive, 840);
        assert!(totals.has_breeding_data());
    }

    #[test]
    fn missing_breeding_events_leave_mated_at_zero() {
        let events = vec![scanning("g", 10, 10, 0), lambing("g", 15, 25, 2)];
        let totals = aggregate_events(&events);
        assert_eq!(totals.ewes_mated, 0);
        assert!(!totals.has_breeding_data());
        assert_eq!(totals.lambs_alive, 23);
    }

    #[test]
    fn mortality_above_births_does_not_underflow() {
        let totals = aggregate_events(&[lambing("g", 1, 2, 5)]);
        assert_eq!(totals.lambs_alive, 0);
    }

    #[test]
    fn partitions_events_per_group() {
        let events = vec![breeding("a", 10), breeding("b", 20), lambing("a", 5, 8, 1)];
        let buckets = partition_by_group(&events);
        assert_eq!(buckets.len(), 2);
        let a = &buckets[&GroupId::from("a")];
        assert_eq!(a.breeding.len(), 1);
        assert_eq!(a.lambing.len(), 1);
        assert_eq!(buckets[&GroupId::from("b")].totals().ewes_mated, 20);
    }
}
