//! Conflict resolution policies
//!
//! The executor hands every detected [`FileConflict`] to a [`ConflictPolicy`]
//! before launching more work and releases the conflict's locks once the
//! policy returns. Policies only decide; they never touch the tracker.

use crate::ai::multi_agent::types::{ConflictResolution, FileConflict};

pub trait ConflictPolicy: Send + Sync {
    fn resolve(&self, conflict: &FileConflict, strategy_id: &str) -> Result<ConflictResolution, String>;
}

/// Record-only policy. Picks a winner by name and otherwise leaves the
/// workspace alone.
///
/// - `first_writer_wins`: the owning agent's write stands
/// - `last_writer_wins`: the most recent contender is named winner; it still
///   has to retry its write
/// - `manual`: left unresolved for a human
#[derive(Debug, Default, Clone)]
pub struct DefaultConflictPolicy;

impl ConflictPolicy for DefaultConflictPolicy {
    fn resolve(&self, conflict: &FileConflict, strategy_id: &str) -> Result<ConflictResolution, String> {
        let path = conflict.path.display();
        match strategy_id {
            "first_writer_wins" => {
                let winner = conflict
                    .agents
                    .first()
                    .cloned()
                    .ok_or_else(|| format!("Conflict on {} has no agents", path))?;
                Ok(ConflictResolution {
                    strategy: strategy_id.to_string(),
                    resolved: true,
                    note: format!("Kept {}'s write to {}", winner, path),
                    winner: Some(winner),
                })
            }
            "last_writer_wins" => {
                let winner = conflict
                    .agents
                    .last()
                    .cloned()
                    .ok_or_else(|| format!("Conflict on {} has no agents", path))?;
                Ok(ConflictResolution {
                    strategy: strategy_id.to_string(),
                    resolved: true,
                    note: format!("{} may overwrite {}", winner, path),
                    winner: Some(winner),
                })
            }
            "manual" => Ok(ConflictResolution {
                strategy: strategy_id.to_string(),
                resolved: false,
                winner: None,
                note: format!("{} needs manual review", path),
            }),
            other => Err(format!("Unknown conflict strategy: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn conflict() -> FileConflict {
        let mut c = FileConflict::new(PathBuf::from("/w/lib.rs"), "a", "b");
        c.agents.push("c".to_string());
        c
    }

    #[test]
    fn test_first_and_last_writer() {
        let policy = DefaultConflictPolicy;
        let first = policy.resolve(&conflict(), "first_writer_wins").unwrap();
        assert!(first.resolved);
        assert_eq!(first.winner.as_deref(), Some("a"));

        let last = policy.resolve(&conflict(), "last_writer_wins").unwrap();
        assert_eq!(last.winner.as_deref(), Some("c"));
    }

    #[test]
    fn test_manual_and_unknown() {
        let policy = DefaultConflictPolicy;
        assert!(!policy.resolve(&conflict(), "manual").unwrap().resolved);
        assert_eq!(
            policy.resolve(&conflict(), "coin_flip").unwrap_err(),
            "Unknown conflict strategy: coin_flip"
        );
    }
}
