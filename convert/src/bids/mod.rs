pub mod sidecar;
pub mod tables;

/// Canonical BIDS entity ordering (§4.5). Entities not in this table are
/// preserved in their original relative position, placed after every known
/// entity that appears before them in the source filename (§9).
pub const ENTITY_ORDER: &[&str] = &[
    "sub", "ses", "task", "acq", "ce", "rec", "dir", "run", "mod", "echo", "flip", "inv", "mt",
    "part", "recording", "proc", "space",
];

/// A parsed BIDS filename, split into its ordered entity key-value pairs and
/// trailing suffix (e.g. `bold`, `T1w`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BidsName {
    pub entities: Vec<(String, String)>,
    pub suffix: String,
}

impl BidsName {
    /// Parses `sub-01_task-rest_run-1_bold` style stems (no extension).
    pub fn parse(stem: &str) -> Self {
        let mut parts: Vec<&str> = stem.split('_').collect();
        let suffix = parts.pop().unwrap_or_default().to_string();
        let mut entities = Vec::new();
        for part in parts {
            match part.split_once('-') {
                Some((key, value)) => entities.push((key.to_string(), value.to_string())),
                None => entities.push((String::new(), part.to_string())),
            }
        }
        Self { entities, suffix }
    }

    /// Sets (or replaces) the value for `key`, preserving canonical order
    /// for known entities and the original relative position for unknown
    /// ones.
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(existing) = self.entities.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value.to_string();
            return;
        }
        self.entities.push((key.to_string(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entities.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Fills in the suffix from the BIDS modality default for `modality_dir`
    /// (`anat` → `T1w`, `fmap` → `epi`, `func` → `bold`) when the heuristic's
    /// template left it out. A template without a true suffix parses with
    /// its last entity (which always contains a `-`) sitting in the suffix
    /// slot; that entity is restored before the default is applied (§4.5).
    pub fn apply_modality_default(&mut self, modality_dir: &str) {
        if !self.suffix.is_empty() && !self.suffix.contains('-') {
            return;
        }
        if !self.suffix.is_empty() {
            match self.suffix.split_once('-') {
                Some((key, value)) => self.entities.push((key.to_string(), value.to_string())),
                None => self.entities.push((String::new(), self.suffix.clone())),
            }
        }
        self.suffix = match modality_dir {
            "anat" => "T1w",
            "fmap" => "epi",
            "func" => "bold",
            _ => return,
        }
        .to_string();
    }

    /// Rewrites the legacy `rec-magnitude`/`rec-phase` entity pair into the
    /// current `part-mag`/`part-phase` vocabulary (§4.5).
    pub fn normalize_legacy_rec(&mut self) {
        let Some(idx) = self.entities.iter().position(|(k, _)| k == "rec") else {
            return;
        };
        let part = match self.entities[idx].1.to_ascii_lowercase().as_str() {
            "magnitude" => Some("mag"),
            "phase" => Some("phase"),
            _ => None,
        };
        if let Some(part) = part {
            self.entities.remove(idx);
            self.set("part", part);
        }
    }

    /// Renders the filename stem, reordering known entities into
    /// [`ENTITY_ORDER`] while keeping unrecognized entities in their
    /// original relative position immediately after the known-entity
    /// prefix that preceded them in the input.
    pub fn render(&self) -> String {
        let mut known: Vec<(String, String)> = Vec::new();
        let mut trailing_unknown: Vec<(String, String)> = Vec::new();
        for (key, value) in &self.entities {
            if ENTITY_ORDER.contains(&key.as_str()) {
                known.push((key.clone(), value.clone()));
            } else {
                trailing_unknown.push((key.clone(), value.clone()));
            }
        }
        known.sort_by_key(|(k, _)| ENTITY_ORDER.iter().position(|e| e == k).unwrap_or(usize::MAX));

        let mut segments: Vec<String> = known
            .into_iter()
            .map(|(k, v)| if k.is_empty() { v } else { format!("{k}-{v}") })
            .collect();
        for (k, v) in trailing_unknown {
            segments.push(if k.is_empty() { v } else { format!("{k}-{v}") });
        }
        segments.push(self.suffix.clone());
        segments.join("_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_renders_round_trip() {
        let name = BidsName::parse("sub-01_task-rest_run-1_bold");
        assert_eq!(name.render(), "sub-01_task-rest_run-1_bold");
    }

    #[test]
    fn reorders_known_entities_into_canonical_order() {
        let name = BidsName::parse("task-rest_sub-01_run-1_bold");
        assert_eq!(name.render(), "sub-01_task-rest_run-1_bold");
    }

    #[test]
    fn preserves_unknown_entities_after_the_known_prefix() {
        let mut name = BidsName::parse("sub-01_task-rest_vendorflag-xyz_bold");
        name.set("run", "2");
        assert_eq!(name.render(), "sub-01_task-rest_run-2_vendorflag-xyz_bold");
    }

    #[test]
    fn applies_the_modality_default_when_no_suffix_was_given() {
        let mut name = BidsName::parse("sub-01_run-1");
        name.apply_modality_default("anat");
        assert_eq!(name.render(), "sub-01_run-1_T1w");
    }

    #[test]
    fn leaves_an_explicit_suffix_untouched() {
        let mut name = BidsName::parse("sub-01_T2w");
        name.apply_modality_default("anat");
        assert_eq!(name.render(), "sub-01_T2w");
    }

    #[test]
    fn normalizes_legacy_rec_entities_to_part() {
        let mut name = BidsName::parse("sub-01_rec-magnitude_fieldmap");
        name.normalize_legacy_rec();
        assert_eq!(name.render(), "sub-01_part-mag_fieldmap");
    }
}
