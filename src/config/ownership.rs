// Ownership table for the Template Syncer (spec §4.4, §6 "Ownership table").
//
// Patterns are ordered; first match wins. Unmatched paths default to
// `CyberOwned` — the safe default, since the syncer must never delete
// cyber-owned content (spec invariant).

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ownership {
    TemplateOwned,
    CyberOwned,
    MergeRequired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipRule {
    /// Glob pattern matched against the path relative to the workspace root.
    pub pattern: String,
    pub ownership: Ownership,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipTable {
    rules: Vec<OwnershipRule>,
}

impl Default for OwnershipTable {
    fn default() -> Self {
        Self {
            rules: vec![
                OwnershipRule {
                    pattern: "code/**".to_string(),
                    ownership: Ownership::TemplateOwned,
                },
                OwnershipRule {
                    pattern: "memory/**".to_string(),
                    ownership: Ownership::CyberOwned,
                },
                OwnershipRule {
                    pattern: "inbox/**".to_string(),
                    ownership: Ownership::CyberOwned,
                },
                OwnershipRule {
                    pattern: "outbox/**".to_string(),
                    ownership: Ownership::CyberOwned,
                },
                OwnershipRule {
                    pattern: ".internal/**".to_string(),
                    ownership: Ownership::CyberOwned,
                },
                OwnershipRule {
                    pattern: "*.toml".to_string(),
                    ownership: Ownership::MergeRequired,
                },
            ],
        }
    }
}

impl OwnershipTable {
    pub fn new(rules: Vec<OwnershipRule>) -> Self {
        Self { rules }
    }

    /// Classify a path relative to the workspace root. First matching rule
    /// wins; unmatched paths are cyber-owned (never touched by the syncer).
    pub fn classify(&self, relative_path: &Path) -> Ownership {
        let path_str = relative_path.to_string_lossy().replace('\\', "/");
        for rule in &self.rules {
            if let Ok(pattern) = Pattern::new(&rule.pattern) {
                if pattern.matches(&path_str) {
                    return rule.ownership;
                }
            }
        }
        Ownership::CyberOwned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn first_match_wins() {
        let table = OwnershipTable::new(vec![
            OwnershipRule {
                pattern: "code/secret.rs".to_string(),
                ownership: Ownership::CyberOwned,
            },
            OwnershipRule {
                pattern: "code/**".to_string(),
                ownership: Ownership::TemplateOwned,
            },
        ]);
        assert_eq!(
            table.classify(&PathBuf::from("code/secret.rs")),
            Ownership::CyberOwned
        );
        assert_eq!(
            table.classify(&PathBuf::from("code/other.rs")),
            Ownership::TemplateOwned
        );
    }

    #[test]
    fn unmatched_defaults_to_cyber_owned() {
        let table = OwnershipTable::new(vec![]);
        assert_eq!(
            table.classify(&PathBuf::from("anything/goes/here.txt")),
            Ownership::CyberOwned
        );
    }

    #[test]
    fn default_table_protects_memory_and_inbox() {
        let table = OwnershipTable::default();
        assert_eq!(
            table.classify(&PathBuf::from("memory/snapshot.json")),
            Ownership::CyberOwned
        );
        assert_eq!(
            table.classify(&PathBuf::from("code/lib.py")),
            Ownership::TemplateOwned
        );
        assert_eq!(
            table.classify(&PathBuf::from("persona.toml")),
            Ownership::MergeRequired
        );
    }
}
