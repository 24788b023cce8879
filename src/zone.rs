//! Zone store, resolution engine and bounded cache
//!
//! `ZoneData` is one immutable-after-load record set for a single origin
//! plus its resolution cache. `Zone` is the swappable slot the server
//! reads through: reloads parse a fresh `ZoneData` off to the side and
//! publish it in one atomic store, so in-flight queries always see either
//! the fully-old or the fully-new set.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use moka::sync::Cache;
use thiserror::Error;

use crate::rdata::Rdata;
use crate::record::{self, Record};
use crate::script::{NoScriptEngine, ScriptEngine};
use crate::types::{RecordClass, RecordType};
use crate::zone_parser::ZoneParser;

/// Resolution cache ceiling. The cache stops growing once it holds this
/// many entries; it never evicts and is rebuilt wholesale on reload.
pub const MAX_CACHED_RECORDS: u64 = 1024;

#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("duplicated record '{0}'")]
    DuplicateRecord(String),
}

pub struct ZoneData {
    origin: String,
    default_ttl: u32,
    records: Vec<Arc<Record>>,
    cache: Cache<String, Option<Arc<Record>>>,
    cache_capacity: u64,
    scans: AtomicU64,
}

impl std::fmt::Debug for ZoneData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneData")
            .field("origin", &self.origin)
            .field("default_ttl", &self.default_ttl)
            .field("records", &self.records.len())
            .field("cache_capacity", &self.cache_capacity)
            .field("scans", &self.scans.load(Ordering::Relaxed))
            .finish()
    }
}

impl ZoneData {
    pub fn new() -> ZoneData {
        ZoneData {
            origin: String::new(),
            default_ttl: 0,
            records: Vec::new(),
            cache: Cache::builder().build(),
            cache_capacity: MAX_CACHED_RECORDS,
            scans: AtomicU64::new(0),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Stores the origin without its trailing dot.
    pub fn set_origin(&mut self, origin: &str) {
        self.origin = origin.trim_end_matches('.').to_string();
    }

    pub fn default_ttl(&self) -> u32 {
        self.default_ttl
    }

    pub fn set_default_ttl(&mut self, ttl: u32) {
        self.default_ttl = ttl;
    }

    pub fn set_cache_capacity(&mut self, capacity: u64) {
        self.cache_capacity = capacity;
    }

    pub fn records(&self) -> &[Arc<Record>] {
        &self.records
    }

    /// Adds a record, rejecting duplicates of a unique key.
    pub fn add_record(&mut self, record: Record) -> Result<(), ZoneError> {
        if let Some(prev) = self.records.iter().find(|r| r.key == record.key) {
            if prev.is_unique() {
                return Err(ZoneError::DuplicateRecord(record.key));
            }
        }
        self.records.push(Arc::new(record));
        Ok(())
    }

    /// Whether the name falls inside this zone's namespace. The check is
    /// case-insensitive and label-aligned, so `notexample.com` is not part
    /// of `example.com`.
    pub fn contains(&self, name: &str) -> bool {
        let name = name.trim_end_matches('.').to_ascii_lowercase();
        let origin = self.origin.to_ascii_lowercase();
        name == origin || name.ends_with(&format!(".{}", origin))
    }

    /// Maps a query to at most one record: the single match, or a
    /// synthetic group when several records answer. Results (including
    /// no-match) are cached unless a script is involved or the cache is
    /// already full.
    pub fn resolve(&self, name: &str, rtype: RecordType, class: RecordClass) -> Option<Arc<Record>> {
        let fqname = record::qualify_name(&self.origin, name);
        let key = record::record_key(&fqname, class, rtype);

        tracing::debug!("[zone] Searching a match for '{}'", key);

        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!("[zone] Returning cached '{}'", key);
            return cached;
        }

        self.scans.fetch_add(1, Ordering::Relaxed);
        let matches: Vec<Arc<Record>> = self
            .records
            .iter()
            .filter(|rec| {
                (rtype == RecordType::ALL || rec.rtype == rtype)
                    && (class == RecordClass::ANY
                        || rec.class == RecordClass::ANY
                        || rec.class == class)
                    && rec.can_answer(&fqname)
            })
            .cloned()
            .collect();

        let result = if matches.is_empty() {
            None
        } else if matches.len() == 1 {
            Some(Arc::clone(&matches[0]))
        } else {
            Some(Arc::new(Record::group(class, rtype, matches.clone())))
        };

        // 带脚本的记录每次都要重新求值, 不进缓存
        let cacheable = !matches.iter().any(|rec| rec.is_script());
        if cacheable {
            if self.cache.entry_count() < self.cache_capacity {
                tracing::debug!("[zone] Adding result to cache");
                self.cache.insert(key.clone(), result.clone());
            }
        } else {
            tracing::debug!("[zone] Response is not cacheable");
        }

        if result.is_none() {
            tracing::debug!("[zone] Can't find a match for '{}'", key);
        }
        result
    }

    /// Number of full record-list scans performed so far; cache hits do
    /// not scan.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Flushes moka's pending bookkeeping so `entry_count` is exact.
    pub fn run_cache_maintenance(&self) {
        self.cache.run_pending_tasks();
    }
}

impl Default for ZoneData {
    fn default() -> Self {
        ZoneData::new()
    }
}

/// A served zone: the active record set behind an atomic-swap slot, plus
/// what a reload needs to rebuild it.
pub struct Zone {
    data: ArcSwap<ZoneData>,
    engine: Arc<dyn ScriptEngine>,
    path: Option<PathBuf>,
}

impl Zone {
    /// Loads a zone from a file. Parse failures carry the file path and
    /// the 1-based line number.
    pub fn from_file(path: impl AsRef<Path>, engine: Arc<dyn ScriptEngine>) -> Result<Zone> {
        let path = path.as_ref();
        let data = Zone::parse_file(path, &engine)?;
        Ok(Zone {
            data: ArcSwap::from_pointee(data),
            engine,
            path: Some(path.to_path_buf()),
        })
    }

    /// Wraps an already-built record set (tests, the reverse zone).
    pub fn from_data(data: ZoneData) -> Zone {
        Zone {
            data: ArcSwap::from_pointee(data),
            engine: Arc::new(NoScriptEngine),
            path: None,
        }
    }

    /// Synthesizes the `in-addr.arpa` zone mapping the server's IPv4
    /// listen addresses back to its host name. Wildcard binds map to
    /// loopback.
    pub fn reverse(hostname: &str, addresses: &[IpAddr]) -> Zone {
        let mut data = ZoneData::new();
        data.set_origin("in-addr.arpa");

        let mut seen: Vec<Ipv4Addr> = Vec::new();
        for address in addresses {
            let IpAddr::V4(addr) = address else { continue };
            let addr = if addr.is_unspecified() { Ipv4Addr::LOCALHOST } else { *addr };
            if !seen.contains(&addr) {
                seen.push(addr);
            }
        }

        for addr in seen {
            let octets = addr.octets();
            let name = format!("{}.{}.{}.{}", octets[3], octets[2], octets[1], octets[0]);
            if let Ok(rec) = Record::new(
                data.origin(),
                &name,
                RecordClass::IN,
                RecordType::PTR,
                0,
                Rdata::PTR { ptrdname: hostname.to_string() },
            ) {
                let _ = data.add_record(rec);
            }
        }

        Zone::from_data(data)
    }

    /// Current record set. Holders keep reading a consistent set even
    /// while a reload publishes a new one.
    pub fn snapshot(&self) -> Arc<ZoneData> {
        self.data.load_full()
    }

    pub fn origin(&self) -> String {
        self.data.load().origin().to_string()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-parses the zone file and atomically swaps the fresh record set
    /// in. On any failure the previously active set stays untouched.
    pub fn reload(&self) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .context("zone was not loaded from a file")?;
        let fresh = Zone::parse_file(path, &self.engine)?;
        self.data.store(Arc::new(fresh));
        Ok(())
    }

    fn parse_file(path: &Path, engine: &Arc<dyn ScriptEngine>) -> Result<ZoneData> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read zone file '{}'", path.display()))?;
        let data = ZoneParser::new(engine.clone())
            .parse(&text)
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
        tracing::info!(
            "[zone] Loaded {} records for zone '{}'",
            data.records().len(),
            data.origin()
        );
        Ok(data)
    }
}
