//! Execution-data traces.
//!
//! Both collection agents (the unit-test JVM agent and the on-device
//! instrumentation) dump the same block-structured format:
//!
//! ```text
//! 0x01 header        magic:u16 = 0xC0C0, version:u16 = 0x1007
//! 0x10 session info  id:utf, start:i64, dump:i64
//! 0x11 class data    id:i64, name:utf, probes:bool[]
//! ```
//!
//! Integers are big-endian, strings are length-prefixed modified UTF-8 and
//! probe arrays are a varint length followed by bits packed LSB first.
//!
//! [`ExecutionStore`] holds the decoded content. Merging stores ORs the probe
//! arrays of each class and unions the sessions, so the result does not
//! depend on merge order or grouping.

mod crc64;
mod reader;
mod writer;

pub use crc64::class_id;
pub use reader::{read_exec, read_exec_file};
pub use writer::{write_exec, write_exec_file};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub(crate) const BLOCK_HEADER: u8 = 0x01;
pub(crate) const BLOCK_SESSION_INFO: u8 = 0x10;
pub(crate) const BLOCK_EXECUTION_DATA: u8 = 0x11;
pub(crate) const MAGIC_NUMBER: u16 = 0xC0C0;
pub(crate) const FORMAT_VERSION: u16 = 0x1007;

/// Information about one agent session (one process lifetime).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier chosen by the agent (usually host + random suffix).
    pub id: String,
    /// Session start, epoch milliseconds.
    pub start: i64,
    /// Dump time, epoch milliseconds.
    pub dump: i64,
}

/// Probe data for one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionData {
    /// Class identifier (CRC-64 of the class bytes).
    pub id: u64,
    /// VM class name, e.g. `com/example/Foo$Bar`.
    pub name: String,
    /// One flag per probe; `true` if the probe executed.
    pub probes: Vec<bool>,
}

impl ExecutionData {
    pub fn new(id: u64, name: impl Into<String>, probes: Vec<bool>) -> Self {
        Self {
            id,
            name: name.into(),
            probes,
        }
    }

    /// OR another probe array into this one.
    ///
    /// Arrays of different length are padded with unexecuted probes, so the
    /// union never loses a hit.
    pub fn merge_probes(&mut self, other: &[bool]) {
        if other.len() > self.probes.len() {
            self.probes.resize(other.len(), false);
        }
        for (mine, theirs) in self.probes.iter_mut().zip(other) {
            *mine |= *theirs;
        }
    }

    /// Whether at least one probe executed.
    pub fn has_hits(&self) -> bool {
        self.probes.iter().any(|p| *p)
    }

    /// Number of executed probes.
    pub fn hit_count(&self) -> usize {
        self.probes.iter().filter(|p| **p).count()
    }
}

/// Decoded and merged execution data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionStore {
    entries: BTreeMap<(u64, String), ExecutionData>,
    sessions: BTreeSet<SessionInfo>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add class data, merging with an existing entry for the same class.
    pub fn put(&mut self, data: ExecutionData) {
        match self.entries.get_mut(&(data.id, data.name.clone())) {
            Some(existing) => existing.merge_probes(&data.probes),
            None => {
                self.entries.insert((data.id, data.name.clone()), data);
            }
        }
    }

    pub fn add_session(&mut self, session: SessionInfo) {
        self.sessions.insert(session);
    }

    /// Merge every entry and session of `other` into this store.
    pub fn merge(&mut self, other: &ExecutionStore) {
        for data in other.entries.values() {
            self.put(data.clone());
        }
        for session in &other.sessions {
            self.sessions.insert(session.clone());
        }
    }

    /// Exact entry for a class id and name.
    pub fn get(&self, id: u64, name: &str) -> Option<&ExecutionData> {
        self.entries.get(&(id, name.to_string()))
    }

    /// All entries recorded under a class name, whatever their id.
    pub fn entries_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ExecutionData> {
        self.entries.values().filter(move |d| d.name == name)
    }

    /// Entries in (id, name) order.
    pub fn entries(&self) -> impl Iterator<Item = &ExecutionData> {
        self.entries.values()
    }

    /// Sessions in sorted order.
    pub fn sessions(&self) -> impl Iterator<Item = &SessionInfo> {
        self.sessions.iter()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.sessions.is_empty()
    }
}
