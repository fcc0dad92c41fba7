//! In-memory observation store and case registry for tests and dry runs.

use std::{
    collections::BTreeMap,
    ops::RangeInclusive,
    sync::Mutex,
};

use chrono::Utc;

use crate::db::registry::{touch_key, CaseLoadRecord, CaseRegistry, CaseStatus, TouchedKey};
use crate::db::{
    IndexStatus, Observation, ObservationRecord, ObservationStore, RemoveOutcome, StoreCounts,
    UpsertOutcome, INDEX_VERSION,
};
use crate::error::{CaseError, Error, StoreError};
use crate::observe::keys::{strucvar_prefix, strucvar_start_from_key, VariantKey};
use crate::observe::model::SvType;
use crate::observe::profile::CaseProfile;

/// Observation records and registry held in ordered maps keyed like the RocksDB store.
#[derive(Debug, Default)]
pub struct MemoryDb {
    seqvars: Mutex<BTreeMap<Vec<u8>, ObservationRecord>>,
    strucvars: Mutex<BTreeMap<Vec<u8>, ObservationRecord>>,
    index_version: Mutex<Option<u32>>,
    cases: Mutex<BTreeMap<String, CaseLoadRecord>>,
    touches: Mutex<BTreeMap<Vec<u8>, TouchedKey>>,
    profiles: Mutex<BTreeMap<String, CaseProfile>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self, key: &VariantKey) -> &Mutex<BTreeMap<Vec<u8>, ObservationRecord>> {
        match key {
            VariantKey::Seqvar(_) => &self.seqvars,
            VariantKey::Strucvar(_) => &self.strucvars,
        }
    }

    /// All records in key order, short variants first.
    pub fn dump(&self) -> Result<Vec<ObservationRecord>, StoreError> {
        let mut result = self.seqvars.lock()?.values().cloned().collect::<Vec<_>>();
        result.extend(self.strucvars.lock()?.values().cloned());
        Ok(result)
    }
}

impl ObservationStore for MemoryDb {
    fn get_exact(&self, key: &VariantKey) -> Result<Option<ObservationRecord>, StoreError> {
        Ok(self.records(key).lock()?.get(&key.to_bytes()).cloned())
    }

    fn get_candidates(
        &self,
        chrom: &str,
        sv_type: SvType,
        start_range: RangeInclusive<u32>,
    ) -> Result<Vec<ObservationRecord>, StoreError> {
        let prefix = strucvar_prefix(chrom, sv_type);
        let mut lower = prefix.clone();
        lower.extend_from_slice(&start_range.start().to_be_bytes());

        let records = self.strucvars.lock()?;
        Ok(records
            .range(lower..)
            .map_while(|(key, record)| {
                strucvar_start_from_key(&prefix, key)
                    .filter(|start| start <= start_range.end())
                    .map(|_| record.clone())
            })
            .collect())
    }

    fn upsert(
        &self,
        key: &VariantKey,
        observation: &Observation,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut records = self.records(key).lock()?;
        let record = records
            .entry(key.to_bytes())
            .or_insert_with(|| ObservationRecord::new(key.clone()));
        let created = record.is_empty();
        let outcome = if !record.add(observation) {
            UpsertOutcome::AlreadyPresent
        } else if created {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Added
        };
        record.check()?;
        Ok(outcome)
    }

    fn remove(&self, key: &VariantKey, case_id: &str) -> Result<RemoveOutcome, StoreError> {
        let mut records = self.records(key).lock()?;
        let bytes = key.to_bytes();
        let Some(record) = records.get_mut(&bytes) else {
            return Ok(RemoveOutcome::Absent);
        };
        if !record.remove(case_id) {
            return Ok(RemoveOutcome::Absent);
        }
        record.check()?;
        if record.is_empty() {
            records.remove(&bytes);
            Ok(RemoveOutcome::Deleted)
        } else {
            Ok(RemoveOutcome::Removed)
        }
    }

    fn ensure_indexes(&self) -> Result<(), StoreError> {
        *self.index_version.lock()? = Some(INDEX_VERSION);
        Ok(())
    }

    fn check_indexes(&self) -> Result<IndexStatus, StoreError> {
        Ok(match *self.index_version.lock()? {
            None => IndexStatus::Missing,
            Some(INDEX_VERSION) => IndexStatus::Current,
            Some(found) => IndexStatus::Outdated { found },
        })
    }

    fn wipe(&self) -> Result<(), StoreError> {
        self.seqvars.lock()?.clear();
        self.strucvars.lock()?.clear();
        self.cases.lock()?.clear();
        self.touches.lock()?.clear();
        self.profiles.lock()?.clear();
        *self.index_version.lock()? = None;
        Ok(())
    }

    fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(StoreCounts {
            seqvars: self.seqvars.lock()?.len(),
            strucvars: self.strucvars.lock()?.len(),
        })
    }
}

impl CaseRegistry for MemoryDb {
    fn begin_load(&self, record: CaseLoadRecord) -> Result<(), Error> {
        let mut cases = self.cases.lock().map_err(StoreError::from)?;
        if cases.contains_key(&record.case_id) {
            return Err(CaseError::AlreadyLoaded(record.case_id).into());
        }
        cases.insert(record.case_id.clone(), record);
        Ok(())
    }

    fn record_touches(&self, case_id: &str, touches: &[TouchedKey]) -> Result<(), StoreError> {
        let mut stored = self.touches.lock()?;
        for touch in touches {
            stored.insert(touch_key(case_id, &touch.key), touch.clone());
        }
        Ok(())
    }

    fn commit_load(
        &self,
        case_id: &str,
        nr_variants: u64,
        nr_sv_variants: u64,
    ) -> Result<CaseLoadRecord, Error> {
        let mut cases = self.cases.lock().map_err(StoreError::from)?;
        let record = cases
            .get_mut(case_id)
            .ok_or_else(|| CaseError::NotLoaded(case_id.to_string()))?;
        record.status = CaseStatus::Loaded;
        record.nr_variants = nr_variants;
        record.nr_sv_variants = nr_sv_variants;
        record.loaded_at = Some(Utc::now());
        Ok(record.clone())
    }

    fn get_case(&self, case_id: &str) -> Result<Option<CaseLoadRecord>, StoreError> {
        Ok(self.cases.lock()?.get(case_id).cloned())
    }

    fn touches(&self, case_id: &str) -> Result<Vec<TouchedKey>, StoreError> {
        let prefix = crate::db::registry::touch_prefix(case_id);
        Ok(self
            .touches
            .lock()?
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(_, touch)| touch.clone())
            .collect())
    }

    fn begin_delete(&self, case_id: &str) -> Result<(CaseLoadRecord, Vec<TouchedKey>), Error> {
        let record = self
            .get_case(case_id)?
            .ok_or_else(|| CaseError::NotLoaded(case_id.to_string()))?;
        if !record.attributed {
            return Err(CaseError::NotAttributed(case_id.to_string()).into());
        }
        let touches = self.touches(case_id)?;
        Ok((record, touches))
    }

    fn finish_delete(&self, case_id: &str) -> Result<(), StoreError> {
        let prefix = crate::db::registry::touch_prefix(case_id);
        self.touches
            .lock()?
            .retain(|key, _| !key.starts_with(&prefix));
        self.cases.lock()?.remove(case_id);
        Ok(())
    }

    fn list_cases(&self) -> Result<Vec<CaseLoadRecord>, StoreError> {
        Ok(self.cases.lock()?.values().cloned().collect())
    }

    fn get_profile(&self, case_id: &str) -> Result<Option<CaseProfile>, StoreError> {
        Ok(self.profiles.lock()?.get(case_id).cloned())
    }

    fn put_profile(&self, profile: &CaseProfile) -> Result<(), StoreError> {
        self.profiles
            .lock()?
            .insert(profile.case_id.clone(), profile.clone());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::observe::gate::CaseZygosity;
    use crate::observe::keys::{SeqvarKey, StrucvarKey};

    fn seqvar() -> VariantKey {
        VariantKey::Seqvar(SeqvarKey::new("1", 100, "A", "G"))
    }

    fn del(start: u32, end: u32) -> VariantKey {
        VariantKey::Strucvar(StrucvarKey::new("1", SvType::Del, start, end, "1"))
    }

    #[test]
    fn upsert_is_idempotent() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        let het = |case_id| Observation::new(Some(case_id), CaseZygosity::Het);

        assert_eq!(db.upsert(&seqvar(), &het("trio1"))?, UpsertOutcome::Created);
        assert_eq!(
            db.upsert(&seqvar(), &het("trio1"))?,
            UpsertOutcome::AlreadyPresent
        );
        assert_eq!(db.upsert(&seqvar(), &het("trio2"))?, UpsertOutcome::Added);

        let record = db.get_exact(&seqvar())?.expect("record exists");
        assert_eq!(record.observations, 2);

        Ok(())
    }

    #[test]
    fn remove_deletes_empty_records() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        db.upsert(&seqvar(), &Observation::new(Some("trio1"), CaseZygosity::Het))?;

        assert_eq!(db.remove(&seqvar(), "other")?, RemoveOutcome::Absent);
        assert_eq!(db.remove(&seqvar(), "trio1")?, RemoveOutcome::Deleted);
        assert_eq!(db.remove(&seqvar(), "trio1")?, RemoveOutcome::Absent);
        assert_eq!(db.get_exact(&seqvar())?, None);

        Ok(())
    }

    #[test]
    fn candidates_in_start_range() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        let obs = Observation::new(Some("case"), CaseZygosity::Het);
        for key in [del(800, 2000), del(1000, 2000), del(1200, 5000), del(1201, 2000)] {
            db.upsert(&key, &obs)?;
        }
        db.upsert(
            &VariantKey::Strucvar(StrucvarKey::new("1", SvType::Dup, 1000, 2000, "1")),
            &obs,
        )?;
        db.upsert(
            &VariantKey::Strucvar(StrucvarKey::new("2", SvType::Del, 1000, 2000, "2")),
            &obs,
        )?;

        let candidates = db
            .get_candidates("chr1", SvType::Del, 900..=1200)?
            .into_iter()
            .map(|record| record.key)
            .collect::<Vec<_>>();
        assert_eq!(candidates, vec![del(1000, 2000), del(1200, 5000)]);

        Ok(())
    }

    #[test]
    fn registry_lifecycle() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        db.begin_load(CaseLoadRecord::loading("trio1", vec![], true))?;
        assert!(matches!(
            db.begin_load(CaseLoadRecord::loading("trio1", vec![], true)),
            Err(Error::Case(CaseError::AlreadyLoaded(_)))
        ));

        let touch = TouchedKey {
            key: seqvar(),
            zygosity: CaseZygosity::Het,
        };
        db.record_touches("trio1", &[touch.clone(), touch.clone()])?;
        db.record_touches("trio10", &[touch.clone()])?;
        assert_eq!(db.touches("trio1")?, vec![touch.clone()]);

        let committed = db.commit_load("trio1", 1, 0)?;
        assert_eq!(committed.status, CaseStatus::Loaded);
        assert!(committed.loaded_at.is_some());

        let (record, touches) = db.begin_delete("trio1")?;
        assert_eq!(record.case_id, "trio1");
        assert_eq!(touches, vec![touch.clone()]);
        db.finish_delete("trio1")?;

        assert_eq!(db.get_case("trio1")?, None);
        assert_eq!(db.touches("trio10")?, vec![touch]);
        assert!(matches!(
            db.begin_delete("trio1"),
            Err(Error::Case(CaseError::NotLoaded(_)))
        ));

        Ok(())
    }

    #[test]
    fn indexes() -> Result<(), anyhow::Error> {
        let db = MemoryDb::new();
        assert_eq!(db.check_indexes()?, IndexStatus::Missing);
        db.ensure_indexes()?;
        assert_eq!(db.check_indexes()?, IndexStatus::Current);

        Ok(())
    }
}
