// pattern/cache.rs
//! Compiled-pattern cache. Owned by whoever compiles a rule set (spec
//! §9 "no process-wide mutable state ... passed explicitly") rather
//! than living behind a global; see [`PatternCache`].

use crate::error::FileMoverError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use lru::LruCache;
use regex::Regex;
use std::{
    num::NonZeroUsize,
    sync::Mutex,
    time::{Duration, Instant},
};

const MAX_CACHE_SIZE: usize = 1000;
const DEFAULT_TTL: Duration = Duration::from_secs(300);
const MAX_REGEX_COMPLEXITY: usize = 1000;

#[derive(Clone, Debug)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

/// Hit/miss/eviction counters for a compiled-pattern cache.
#[derive(Clone, Debug, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

impl CacheMetrics {
    pub fn hit_ratio(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

struct GlobCache {
    cache: Mutex<LruCache<String, CacheEntry<GlobSet>>>,
    metrics: Mutex<CacheMetrics>,
    ttl: Duration,
}

struct RegexCache {
    cache: Mutex<LruCache<String, CacheEntry<Regex>>>,
    metrics: Mutex<CacheMetrics>,
    ttl: Duration,
}

impl GlobCache {
    fn new(ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(MAX_CACHE_SIZE).unwrap())),
            metrics: Mutex::new(CacheMetrics::default()),
            ttl,
        }
    }

    fn get(&self, key: &str) -> Option<GlobSet> {
        let mut cache = self.cache.lock().unwrap();
        let mut metrics = self.metrics.lock().unwrap();

        if let Some(entry) = cache.get(key) {
            if entry.expires_at > Instant::now() {
                metrics.hits += 1;
                return Some(entry.value.clone());
            }
            cache.pop(key);
            metrics.size = cache.len();
            metrics.evictions += 1;
        }

        metrics.misses += 1;
        None
    }

    fn put(&self, key: String, value: GlobSet) {
        let mut cache = self.cache.lock().unwrap();
        let mut metrics = self.metrics.lock().unwrap();
        cache.put(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
        metrics.size = cache.len();
    }

    fn metrics(&self) -> CacheMetrics {
        self.metrics.lock().unwrap().clone()
    }

    fn clear(&self) {
        let mut cache = self.cache.lock().unwrap();
        let mut metrics = self.metrics.lock().unwrap();
        cache.clear();
        metrics.size = 0;
        metrics.evictions += 1;
    }
}

impl RegexCache {
    fn new(ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(MAX_CACHE_SIZE).unwrap())),
            metrics: Mutex::new(CacheMetrics::default()),
            ttl,
        }
    }

    fn get(&self, key: &str) -> Option<Regex> {
        let mut cache = self.cache.lock().unwrap();
        let mut metrics = self.metrics.lock().unwrap();

        if let Some(entry) = cache.get(key) {
            if entry.expires_at > Instant::now() {
                metrics.hits += 1;
                return Some(entry.value.clone());
            }
            cache.pop(key);
            metrics.size = cache.len();
            metrics.evictions += 1;
        }

        metrics.misses += 1;
        None
    }

    fn put(&self, key: String, value: Regex) {
        let mut cache = self.cache.lock().unwrap();
        let mut metrics = self.metrics.lock().unwrap();
        cache.put(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
        metrics.size = cache.len();
    }

    fn metrics(&self) -> CacheMetrics {
        self.metrics.lock().unwrap().clone()
    }

    fn clear(&self) {
        let mut cache = self.cache.lock().unwrap();
        let mut metrics = self.metrics.lock().unwrap();
        cache.clear();
        metrics.size = 0;
        metrics.evictions += 1;
    }
}

/// A compiled-glob and compiled-regex cache, owned by whoever is
/// compiling a rule set. One instance is typically created per
/// [`crate::FileMover`] (or per CLI invocation) and threaded through
/// [`crate::pattern::CompiledRuleSet::compile`] as a parameter, rather
/// than reached for through a global (spec §9).
pub struct PatternCache {
    glob: GlobCache,
    regex: RegexCache,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            glob: GlobCache::new(ttl),
            regex: RegexCache::new(ttl),
        }
    }

    /// Compiles a single glob pattern into a one-pattern [`GlobSet`], or
    /// returns a cached copy from a previous rule-set load.
    pub fn get_or_compile_glob(&self, pattern: &str) -> Result<GlobSet, FileMoverError> {
        if let Some(cached) = self.glob.get(pattern) {
            return Ok(cached);
        }

        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new(pattern)?);
        let set = builder.build()?;

        self.glob.put(pattern.to_string(), set.clone());
        Ok(set)
    }

    /// Compiles a regex, guarding against pathologically long or deeply
    /// nested patterns that would otherwise open a ReDoS door at
    /// rule-load time.
    pub fn get_or_compile_regex(&self, pat: &str) -> Result<Regex, FileMoverError> {
        if pat.len() > 1000 || pat.matches('(').count() > MAX_REGEX_COMPLEXITY {
            return Err(FileMoverError::InvalidRule {
                rule_id: String::new(),
                reason: "regex pattern too complex or long".into(),
            });
        }

        if let Some(cached) = self.regex.get(pat) {
            return Ok(cached);
        }

        let re = Regex::new(pat)?;
        self.regex.put(pat.to_string(), re.clone());
        Ok(re)
    }

    pub fn clear(&self) {
        self.glob.clear();
        self.regex.clear();
    }

    pub fn glob_metrics(&self) -> CacheMetrics {
        self.glob.metrics()
    }

    pub fn regex_metrics(&self) -> CacheMetrics {
        self.regex.metrics()
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new()
    }
}
