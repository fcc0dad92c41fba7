//! RocksDB-backed observation store and case registry.
//!
//! The database has the column families
//!
//! - `meta` with `loqusdb-version`, `schema-version`, and `index-version`,
//! - `seqvars` and `strucvars` with the observation records,
//! - `cases` with the registry entries,
//! - `touches` with the keys touched by each case's load,
//! - `profiles` with the sample profiles by case id.
//!
//! Values are JSON; keys are built by `observe::keys` so that records sort by
//! chromosome and position.

use std::{
    hash::{Hash, Hasher},
    ops::RangeInclusive,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Instant,
};

use chrono::Utc;
use rocksdb::{DBWithThreadMode, Direction, IteratorMode, SingleThreaded, WriteBatch, WriteOptions};
use rustc_hash::FxHasher;
use serde::{de::DeserializeOwned, Serialize};

use crate::db::registry::{
    touch_key, touch_prefix, CaseLoadRecord, CaseRegistry, CaseStatus, TouchedKey,
};
use crate::db::{
    IndexStatus, Observation, ObservationRecord, ObservationStore, RemoveOutcome, StoreCounts,
    UpsertOutcome, INDEX_VERSION, SCHEMA_VERSION,
};
use crate::error::{CaseError, Error, StoreError};
use crate::observe::keys::{strucvar_prefix, strucvar_start_from_key, VariantKey};
use crate::observe::model::SvType;
use crate::observe::profile::CaseProfile;

/// Names of the column families.
pub const CF_NAMES: &[&str] = &["meta", "seqvars", "strucvars", "cases", "touches", "profiles"];

/// Number of lock stripes serializing read-modify-write cycles per key.
const LOCK_STRIPES: usize = 64;

/// Tune RocksDB options for bulk insertion and point/range lookups.
pub fn rocksdb_tuning(mut options: rocksdb::Options) -> rocksdb::Options {
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(1);
    options.increase_parallelism(parallelism);
    options.optimize_level_style_compaction(512 * 1024 * 1024);
    options.set_compression_type(rocksdb::DBCompressionType::Lz4);
    options.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
    options
}

/// Observation store and case registry in one RocksDB database.
pub struct RocksDb {
    db: DBWithThreadMode<SingleThreaded>,
    path: PathBuf,
    read_only: bool,
    locks: Vec<Mutex<()>>,
    registry_lock: Mutex<()>,
}

impl std::fmt::Debug for RocksDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDb")
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl RocksDb {
    /// Open the database at `path` for writing, creating it if necessary.
    pub fn open<P>(path: P) -> Result<Self, StoreError>
    where
        P: AsRef<Path>,
    {
        tracing::debug!("Opening RocksDB at {:?}", path.as_ref());
        let mut options = rocksdb_tuning(rocksdb::Options::default());
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        let db = DBWithThreadMode::<SingleThreaded>::open_cf(&options, path.as_ref(), CF_NAMES)?;

        let result = Self::new(db, path.as_ref(), false);
        result.write_meta()?;
        Ok(result)
    }

    /// Open an existing database at `path` for reading only.
    pub fn open_read_only<P>(path: P) -> Result<Self, StoreError>
    where
        P: AsRef<Path>,
    {
        tracing::debug!("Opening RocksDB at {:?} (read-only)", path.as_ref());
        let db = DBWithThreadMode::<SingleThreaded>::open_cf_for_read_only(
            &rocksdb::Options::default(),
            path.as_ref(),
            CF_NAMES,
            false,
        )?;

        let result = Self::new(db, path.as_ref(), true);
        result.check_schema()?;
        Ok(result)
    }

    fn new(db: DBWithThreadMode<SingleThreaded>, path: &Path, read_only: bool) -> Self {
        Self {
            db,
            path: path.to_path_buf(),
            read_only,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            registry_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::MissingColumnFamily(name.to_string()))
    }

    fn records_cf(&self, key: &VariantKey) -> Result<&rocksdb::ColumnFamily, StoreError> {
        match key {
            VariantKey::Seqvar(_) => self.cf("seqvars"),
            VariantKey::Strucvar(_) => self.cf("strucvars"),
        }
    }

    fn lock_for(&self, key: &[u8]) -> &Mutex<()> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        &self.locks[hasher.finish() as usize % LOCK_STRIPES]
    }

    fn sync_write_options() -> WriteOptions {
        let mut write_options = WriteOptions::default();
        write_options.set_sync(true);
        write_options
    }

    fn get_json<T>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned,
    {
        match self.db.get_cf(self.cf(cf_name)?, key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn put_json<T>(&self, cf_name: &str, key: &[u8], value: &T, sync: bool) -> Result<(), StoreError>
    where
        T: Serialize,
    {
        let value = serde_json::to_vec(value)?;
        if sync {
            self.db
                .put_cf_opt(self.cf(cf_name)?, key, value, &Self::sync_write_options())?;
        } else {
            self.db.put_cf(self.cf(cf_name)?, key, value)?;
        }
        Ok(())
    }

    /// Key/value pairs of `cf_name` whose key starts with `prefix`, decoded from JSON.
    fn scan_prefix<T>(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, T)>, StoreError>
    where
        T: DeserializeOwned,
    {
        let mut result = Vec::new();
        let mut iter = self
            .db
            .iterator_cf(self.cf(cf_name)?, IteratorMode::From(prefix, Direction::Forward));
        while let Some((key, value)) = iter.next().transpose()? {
            if !key.starts_with(prefix) {
                break;
            }
            result.push((key.to_vec(), serde_json::from_slice(&value)?));
        }
        Ok(result)
    }

    /// Value of the `meta` column family entry `key`.
    pub fn meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .db
            .get_cf(self.cf("meta")?, key)?
            .map(|value| String::from_utf8_lossy(&value).to_string()))
    }

    fn check_schema(&self) -> Result<(), StoreError> {
        match self.meta("schema-version")? {
            Some(version) if version != SCHEMA_VERSION.to_string() => {
                Err(StoreError::Corrupt(format!(
                    "database has schema version {}, expected {}",
                    version, SCHEMA_VERSION
                )))
            }
            _ => Ok(()),
        }
    }

    fn write_meta(&self) -> Result<(), StoreError> {
        self.check_schema()?;
        let cf_meta = self.cf("meta")?;
        self.db
            .put_cf(cf_meta, "loqusdb-version", crate::common::version())?;
        self.db
            .put_cf(cf_meta, "schema-version", SCHEMA_VERSION.to_string())?;
        Ok(())
    }

    fn count_keys(&self, cf_name: &str) -> Result<usize, StoreError> {
        let mut count = 0;
        let mut iter = self.db.iterator_cf(self.cf(cf_name)?, IteratorMode::Start);
        while iter.next().transpose()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Compact the given column families and wait for compaction to finish.
    fn compact(&self, cf_names: &[&str]) -> Result<(), StoreError> {
        tracing::info!("Enforcing manual compaction");
        for cf_name in cf_names {
            self.db
                .compact_range_cf(self.cf(cf_name)?, None::<&[u8]>, None::<&[u8]>);
        }

        let compaction_start = Instant::now();
        let mut last_printed = compaction_start;
        while self
            .db
            .property_int_value(rocksdb::properties::COMPACTION_PENDING)?
            .unwrap_or(0)
            > 0
            || self
                .db
                .property_int_value(rocksdb::properties::NUM_RUNNING_COMPACTIONS)?
                .unwrap_or(0)
                > 0
        {
            std::thread::sleep(std::time::Duration::from_millis(100));
            if last_printed.elapsed() > std::time::Duration::from_millis(1000) {
                tracing::info!(
                    "... waiting for compaction for {:?}",
                    compaction_start.elapsed()
                );
                last_printed = Instant::now();
            }
        }
        Ok(())
    }
}

impl ObservationStore for RocksDb {
    fn get_exact(&self, key: &VariantKey) -> Result<Option<ObservationRecord>, StoreError> {
        let cf_name = if key.is_strucvar() {
            "strucvars"
        } else {
            "seqvars"
        };
        self.get_json(cf_name, &key.to_bytes())
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

        let mut result = Vec::new();
        let mut iter = self.db.iterator_cf(
            self.cf("strucvars")?,
            IteratorMode::From(&lower, Direction::Forward),
        );
        while let Some((key, value)) = iter.next().transpose()? {
            match strucvar_start_from_key(&prefix, &key) {
                Some(start) if start <= *start_range.end() => {
                    result.push(serde_json::from_slice(&value)?)
                }
                _ => break,
            }
        }
        Ok(result)
    }

    fn upsert(
        &self,
        key: &VariantKey,
        observation: &Observation,
    ) -> Result<UpsertOutcome, StoreError> {
        let bytes = key.to_bytes();
        let cf = self.records_cf(key)?;
        let _guard = self.lock_for(&bytes).lock()?;

        let (mut record, created) = match self.db.get_cf(cf, &bytes)? {
            Some(value) => (serde_json::from_slice::<ObservationRecord>(&value)?, false),
            None => (ObservationRecord::new(key.clone()), true),
        };
        if !record.add(observation) {
            return Ok(UpsertOutcome::AlreadyPresent);
        }
        record.check()?;
        self.db.put_cf(cf, &bytes, serde_json::to_vec(&record)?)?;

        Ok(if created {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Added
        })
    }

    fn remove(&self, key: &VariantKey, case_id: &str) -> Result<RemoveOutcome, StoreError> {
        let bytes = key.to_bytes();
        let cf = self.records_cf(key)?;
        let _guard = self.lock_for(&bytes).lock()?;

        let Some(value) = self.db.get_cf(cf, &bytes)? else {
            return Ok(RemoveOutcome::Absent);
        };
        let mut record = serde_json::from_slice::<ObservationRecord>(&value)?;
        if !record.remove(case_id) {
            return Ok(RemoveOutcome::Absent);
        }
        record.check()?;
        if record.is_empty() {
            self.db.delete_cf(cf, &bytes)?;
            Ok(RemoveOutcome::Deleted)
        } else {
            self.db.put_cf(cf, &bytes, serde_json::to_vec(&record)?)?;
            Ok(RemoveOutcome::Removed)
        }
    }

    fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.compact(&["seqvars", "strucvars", "touches"])?;
        self.db
            .put_cf(self.cf("meta")?, "index-version", INDEX_VERSION.to_string())?;
        Ok(())
    }

    fn check_indexes(&self) -> Result<IndexStatus, StoreError> {
        Ok(match self.meta("index-version")? {
            None => IndexStatus::Missing,
            Some(version) => match version.parse::<u32>() {
                Ok(INDEX_VERSION) => IndexStatus::Current,
                Ok(found) => IndexStatus::Outdated { found },
                Err(_) => IndexStatus::Outdated { found: 0 },
            },
        })
    }

    fn wipe(&self) -> Result<(), StoreError> {
        let _guard = self.registry_lock.lock()?;
        for cf_name in CF_NAMES.iter().filter(|name| **name != "meta") {
            let cf = self.cf(cf_name)?;
            let mut batch = WriteBatch::default();
            let mut iter = self.db.iterator_cf(cf, IteratorMode::Start);
            while let Some((key, _)) = iter.next().transpose()? {
                batch.delete_cf(cf, key);
            }
            tracing::debug!("wiping {} entries from {}", batch.len(), cf_name);
            self.db.write_opt(batch, &Self::sync_write_options())?;
        }
        self.db.delete_cf(self.cf("meta")?, "index-version")?;
        Ok(())
    }

    fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(StoreCounts {
            seqvars: self.count_keys("seqvars")?,
            strucvars: self.count_keys("strucvars")?,
        })
    }
}

impl CaseRegistry for RocksDb {
    fn begin_load(&self, record: CaseLoadRecord) -> Result<(), Error> {
        let _guard = self.registry_lock.lock().map_err(StoreError::from)?;
        if self
            .get_json::<CaseLoadRecord>("cases", record.case_id.as_bytes())?
            .is_some()
        {
            return Err(CaseError::AlreadyLoaded(record.case_id).into());
        }
        self.put_json("cases", record.case_id.as_bytes(), &record, true)?;
        Ok(())
    }

    fn record_touches(&self, case_id: &str, touches: &[TouchedKey]) -> Result<(), StoreError> {
        let cf = self.cf("touches")?;
        let mut batch = WriteBatch::default();
        for touch in touches {
            batch.put_cf(cf, touch_key(case_id, &touch.key), serde_json::to_vec(touch)?);
        }
        self.db.write_opt(batch, &Self::sync_write_options())?;
        Ok(())
    }

    fn commit_load(
        &self,
        case_id: &str,
        nr_variants: u64,
        nr_sv_variants: u64,
    ) -> Result<CaseLoadRecord, Error> {
        let _guard = self.registry_lock.lock().map_err(StoreError::from)?;
        let mut record = self
            .get_json::<CaseLoadRecord>("cases", case_id.as_bytes())?
            .ok_or_else(|| CaseError::NotLoaded(case_id.to_string()))?;
        record.status = CaseStatus::Loaded;
        record.nr_variants = nr_variants;
        record.nr_sv_variants = nr_sv_variants;
        record.loaded_at = Some(Utc::now());
        self.put_json("cases", case_id.as_bytes(), &record, true)?;
        Ok(record)
    }

    fn get_case(&self, case_id: &str) -> Result<Option<CaseLoadRecord>, StoreError> {
        self.get_json("cases", case_id.as_bytes())
    }

    fn touches(&self, case_id: &str) -> Result<Vec<TouchedKey>, StoreError> {
        Ok(self
            .scan_prefix::<TouchedKey>("touches", &touch_prefix(case_id))?
            .into_iter()
            .map(|(_, touch)| touch)
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
        let _guard = self.registry_lock.lock()?;
        let cf_touches = self.cf("touches")?;
        let mut batch = WriteBatch::default();
        for (key, _) in self.scan_prefix::<TouchedKey>("touches", &touch_prefix(case_id))? {
            batch.delete_cf(cf_touches, key);
        }
        batch.delete_cf(self.cf("cases")?, case_id.as_bytes());
        self.db.write_opt(batch, &Self::sync_write_options())?;
        Ok(())
    }

    fn list_cases(&self) -> Result<Vec<CaseLoadRecord>, StoreError> {
        Ok(self
            .scan_prefix::<CaseLoadRecord>("cases", b"")?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    fn get_profile(&self, case_id: &str) -> Result<Option<CaseProfile>, StoreError> {
        self.get_json("profiles", case_id.as_bytes())
    }

    fn put_profile(&self, profile: &CaseProfile) -> Result<(), StoreError> {
        self.put_json("profiles", profile.case_id.as_bytes(), profile, true)
    }
}
