//! Fast-scroll section index over the sorted app list.

use crate::apps::AppRecord;

/// Section label for disabled apps.
pub const DISABLED_SECTION: &str = "--";

/// Section labels paired with the offset of each section's first record.
///
/// Invariants: `sections.len() == positions.len()`, `positions` is strictly
/// increasing, and `positions[0] == 0` whenever the index is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionIndex {
    sections: Vec<String>,
    positions: Vec<usize>,
}

impl SectionIndex {
    /// Scan `apps` left to right, opening a new section whenever the label
    /// differs from the previous record's.
    pub fn build(apps: &[AppRecord]) -> Self {
        let mut index = Self::default();
        let mut last: Option<String> = None;

        for (offset, app) in apps.iter().enumerate() {
            let label = section_label(app);
            if last.as_deref() != Some(label.as_str()) {
                index.sections.push(label.clone());
                index.positions.push(offset);
                last = Some(label);
            }
        }
        index
    }

    pub fn sections(&self) -> &[String] {
        &self.sections
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Offset of the first record in `section`, or `None` if out of range.
    pub fn position_for_section(&self, section: usize) -> Option<usize> {
        self.positions.get(section).copied()
    }

    /// Index of the section containing list offset `position`.
    ///
    /// `item_count` is the length of the list the index was built from;
    /// offsets at or past it have no section.
    pub fn section_for_position(&self, position: usize, item_count: usize) -> Option<usize> {
        if position >= item_count || self.positions.is_empty() {
            return None;
        }
        match self.positions.binary_search(&position) {
            Ok(i) => Some(i),
            // positions[0] == 0, so an insertion point is never 0 here
            Err(i) => Some(i - 1),
        }
    }
}

/// `"--"` for disabled apps, `""` for untitled ones, otherwise the title's
/// first character uppercased.
pub fn section_label(app: &AppRecord) -> String {
    if !app.enabled {
        return DISABLED_SECTION.to_string();
    }
    match app.title.chars().next() {
        Some(first) => first.to_uppercase().collect(),
        None => String::new(),
    }
}
