//! Core data model: device identity, key codes, mapping table

use std::fmt;

use serde::{Deserialize, Serialize};

/// Key code in the scan-code space of the input driver (Linux input event
/// codes). Conversions to and from human-readable names happen at the CLI
/// boundary ([`crate::keys`]), never inside the engine.
pub type KeyCode = u16;

/// Stable, opaque identity for a physical input device.
///
/// Derived from hardware descriptors (vendor/product IDs plus the device's
/// serial, physical path or name), never from the volatile
/// `/dev/input/eventN` index, so the same physical device resolves to the
/// same identity across replug and reboot. Compared by equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single source-key to target-key remap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub source: KeyCode,
    pub target: KeyCode,
}

/// Per-device mapping table.
///
/// Entries are kept in insertion order for presentation; lookup does not
/// depend on order because at most one entry exists per source key
/// (last-write-wins on duplicate adds). An absent entry always means
/// pass-through, never block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTable {
    pub entries: Vec<MappingEntry>,
    pub enabled: bool,
}

impl Default for MappingTable {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            enabled: true,
        }
    }
}

impl MappingTable {
    /// Look up the mapped target for a source key, if an entry exists.
    ///
    /// The `enabled` flag is deliberately not consulted here; whether lookups
    /// are applied at all is the filter loop's decision.
    pub fn lookup(&self, source: KeyCode) -> Option<KeyCode> {
        self.entries
            .iter()
            .find(|e| e.source == source)
            .map(|e| e.target)
    }

    /// Insert or overwrite the entry for `source`.
    ///
    /// Returns `true` if an existing entry was replaced (a duplicate-source
    /// add, resolved last-write-wins in place so presentation order is kept).
    /// A `source == target` entry is stored like any other; the transform
    /// simply yields identity.
    pub fn add(&mut self, source: KeyCode, target: KeyCode) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.source == source) {
            entry.target = target;
            true
        } else {
            self.entries.push(MappingEntry { source, target });
            false
        }
    }

    /// Delete the entry for `source`. No-op if absent; returns whether an
    /// entry was removed.
    pub fn remove(&mut self, source: KeyCode) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.source != source);
        self.entries.len() != before
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Persisted configuration: which device is targeted and its mapping table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub target_device: Option<DeviceId>,
    #[serde(default)]
    pub table: MappingTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_absent_means_pass_through() {
        let table = MappingTable::default();
        assert_eq!(table.lookup(30), None);
    }

    #[test]
    fn add_then_lookup() {
        let mut table = MappingTable::default();
        table.add(30, 59);
        assert_eq!(table.lookup(30), Some(59));
        assert_eq!(table.lookup(31), None);
    }

    #[test]
    fn duplicate_add_is_last_write_wins_in_place() {
        let mut table = MappingTable::default();
        table.add(30, 59);
        table.add(48, 60);
        let replaced = table.add(30, 61);
        assert!(replaced);
        assert_eq!(table.lookup(30), Some(61));
        // Presentation order preserved: the replaced entry keeps its slot.
        assert_eq!(table.entries[0], MappingEntry { source: 30, target: 61 });
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn add_is_idempotent() {
        let mut table = MappingTable::default();
        table.add(30, 59);
        table.add(30, 59);
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(30), Some(59));
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut table = MappingTable::default();
        table.add(30, 59);
        assert!(!table.remove(99));
        assert!(table.remove(30));
        assert!(table.is_empty());
    }

    #[test]
    fn identity_mapping_is_stored() {
        let mut table = MappingTable::default();
        table.add(30, 30);
        assert_eq!(table.lookup(30), Some(30));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn config_json_round_trip() {
        let mut config = Config {
            target_device: Some(DeviceId::new("046d:c52b:usb-0000:00:14.0-2")),
            table: MappingTable::default(),
        };
        config.table.add(30, 59);
        config.table.set_enabled(false);

        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn device_id_serializes_as_plain_string() {
        let id = DeviceId::new("abc:def");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""abc:def""#);
    }
}
