//! Session-scoped roster storage.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::loader::discard_upload;
use crate::roster::RosterSet;

/// Which roster a request is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Employee,
    Vendor,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Employee => "employee",
            Domain::Vendor => "vendor",
        }
    }

    /// Multipart field carrying the upload
    pub fn upload_field(&self) -> &'static str {
        match self {
            Domain::Employee => "employee_file",
            Domain::Vendor => "vendor_file",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Domain::Employee => "Employee Roster",
            Domain::Vendor => "Vendor Roster",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed upload and where its file was saved
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRoster {
    pub roster: RosterSet,
    pub file_path: PathBuf,
}

/// Storage for the roster of each session and domain.
/// A write replaces whatever was stored before, and the replaced upload file is removed.
pub trait RosterStore: Send + Sync {
    fn get(&self, session_id: &str, domain: Domain) -> Option<Arc<StoredRoster>>;

    fn set(&self, session_id: &str, domain: Domain, roster: StoredRoster);

    /// End a session: forget both of its rosters and remove their files
    fn clear(&self, session_id: &str);
}

#[derive(Debug)]
struct Entry {
    stored: Arc<StoredRoster>,
    touched: Instant,
}

/// In-process store. Sessions idle for longer than the TTL are evicted on the next access.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, Domain), Entry>>,
    ttl: Option<Duration>,
}

impl MemoryStore {
    /// Store whose sessions never expire
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that drops a session once it has been idle for `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::default(),
            ttl: Some(ttl),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove idle entries, returning their file paths
    fn evict_idle(&self, entries: &mut HashMap<(String, Domain), Entry>) -> Vec<PathBuf> {
        let Some(ttl) = self.ttl else {
            return Vec::new();
        };
        let now = Instant::now();
        let mut evicted = Vec::new();
        entries.retain(|(session_id, domain), entry| {
            if now.duration_since(entry.touched) < ttl {
                return true;
            }
            debug!("Evicting idle {} roster of session {}", domain, session_id);
            evicted.push(entry.stored.file_path.clone());
            false
        });
        evicted
    }
}

fn discard_all(paths: Vec<PathBuf>) {
    for path in paths {
        discard_upload(&path);
    }
}

impl RosterStore for MemoryStore {
    fn get(&self, session_id: &str, domain: Domain) -> Option<Arc<StoredRoster>> {
        let (found, evicted) = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let evicted = self.evict_idle(&mut entries);
            let found = entries
                .get_mut(&(session_id.to_string(), domain))
                .map(|entry| {
                    entry.touched = Instant::now();
                    Arc::clone(&entry.stored)
                });
            (found, evicted)
        };
        discard_all(evicted);
        found
    }

    fn set(&self, session_id: &str, domain: Domain, roster: StoredRoster) {
        let new_path = roster.file_path.clone();
        let mut stale = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let mut stale = self.evict_idle(&mut entries);
            let entry = Entry {
                stored: Arc::new(roster),
                touched: Instant::now(),
            };
            if let Some(old) = entries.insert((session_id.to_string(), domain), entry) {
                stale.push(old.stored.file_path.clone());
            }
            stale
        };
        stale.retain(|path| *path != new_path);
        discard_all(stale);
    }

    fn clear(&self, session_id: &str) {
        let removed = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let mut removed = self.evict_idle(&mut entries);
            entries.retain(|(id, _), entry| {
                if id == session_id {
                    removed.push(entry.stored.file_path.clone());
                    return false;
                }
                true
            });
            removed
        };
        discard_all(removed);
    }
}
