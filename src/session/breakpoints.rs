//! Per-file breakpoint storage

use std::collections::HashMap;

use crate::ipc::protocol::{Breakpoint, FileId};

/// What a toggle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggled {
    Added(u32),
    Removed(u32),
}

/// All breakpoints of a session, grouped by file and kept in line order
#[derive(Debug)]
pub struct BreakpointTable {
    by_file: HashMap<FileId, Vec<Breakpoint>>,
    next_id: u32,
}

impl Default for BreakpointTable {
    fn default() -> Self {
        Self {
            by_file: HashMap::new(),
            next_id: 1,
        }
    }
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a breakpoint at `(file, line)`, or remove the one already there
    ///
    /// Ids come from one counter per table and are never reused, so they
    /// are unique within every file.
    pub fn toggle(&mut self, file_id: &str, line_number: u32, condition: Option<String>) -> Toggled {
        let bps = self.by_file.entry(file_id.to_string()).or_default();

        if let Some(pos) = bps.iter().position(|bp| bp.line_number == line_number) {
            let removed = bps.remove(pos);
            if bps.is_empty() {
                self.by_file.remove(file_id);
            }
            return Toggled::Removed(removed.id);
        }

        let id = self.next_id;
        self.next_id += 1;

        let insert_at = bps.partition_point(|bp| bp.line_number < line_number);
        bps.insert(
            insert_at,
            Breakpoint {
                id,
                file_id: file_id.to_string(),
                line_number,
                condition,
                hit_count: 0,
                enabled: true,
            },
        );
        Toggled::Added(id)
    }

    /// Breakpoints of one file in line order
    pub fn file(&self, file_id: &str) -> &[Breakpoint] {
        self.by_file.get(file_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, id: u32) -> Option<&Breakpoint> {
        self.iter().find(|bp| bp.id == id)
    }

    fn get_mut(&mut self, id: u32) -> Option<&mut Breakpoint> {
        self.by_file
            .values_mut()
            .flat_map(|bps| bps.iter_mut())
            .find(|bp| bp.id == id)
    }

    /// Flip `enabled`; returns the owning file when the id is known
    pub fn set_enabled(&mut self, id: u32, enabled: bool) -> Option<FileId> {
        let bp = self.get_mut(id)?;
        bp.enabled = enabled;
        Some(bp.file_id.clone())
    }

    /// Count a hit; returns the updated breakpoint when the id is known
    pub fn record_hit(&mut self, id: u32) -> Option<&Breakpoint> {
        let bp = self.get_mut(id)?;
        bp.hit_count = bp.hit_count.saturating_add(1);
        Some(&*bp)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.by_file.values().flat_map(|bps| bps.iter())
    }

    pub fn len(&self) -> usize {
        self.by_file.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_file.clear();
    }
}
