//! Last-known snapshot of who is online.
//!
//! Replaced wholesale on every user-list reply; there is no incremental
//! merge and nothing survives a restart. Entry order is the snapshot's own
//! iteration order, which keeps suggestions deterministic.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub name: String,
    pub status: String,
    pub is_self: bool,
}

#[derive(Debug, Default)]
pub struct PeerDirectory {
    entries: Vec<PeerEntry>,
}

impl PeerDirectory {
    /// Atomically replace the snapshot. Stale entries are discarded.
    pub fn refresh(&mut self, snapshot: Vec<(String, String)>, self_name: Option<&str>) {
        self.entries = snapshot
            .into_iter()
            .map(|(name, status)| PeerEntry {
                is_self: Some(name.as_str()) == self_name,
                name,
                status,
            })
            .collect();
    }

    pub fn entries(&self) -> &[PeerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names matching `prefix`, in snapshot order.
    pub fn suggest(&self, prefix: &str, exclude_self: bool) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !(exclude_self && e.is_self))
            .filter(|e| e.name.starts_with(prefix))
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }
}
