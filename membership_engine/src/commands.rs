/// Membership Engine: Command Envelope
///
/// Serializable form of the three coordinator operations, so batches of
/// commands can be read from JSON files by the runtime.

use serde::{Deserialize, Serialize};

use crate::domain::{Level, Node, NodeDraft, ScopeKey};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Create {
        level: Level,
        draft: NodeDraft,
        #[serde(default)]
        superior_id: Option<String>,
    },
    Reassign {
        level: Level,
        id: String,
        superior_id: String,
        #[serde(default)]
        new_scope: Option<ScopeKey>,
    },
    Inactivate {
        level: Level,
        id: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Reassign { .. } => "reassign",
            Command::Inactivate { .. } => "inactivate",
        }
    }

    pub fn level(&self) -> Level {
        match self {
            Command::Create { level, .. }
            | Command::Reassign { level, .. }
            | Command::Inactivate { level, .. } => *level,
        }
    }

    /// Parse a JSON array of commands.
    pub fn parse_batch(json: &str) -> Result<Vec<Command>> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidInput(format!("malformed command batch: {}", e)))
    }
}

/// Result of one executed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Created { node: Node },
    Reassigned { node: Node },
    Inactivated { level: Level, id: String },
}

impl Outcome {
    pub fn node(&self) -> Option<&Node> {
        match self {
            Outcome::Created { node } | Outcome::Reassigned { node } => Some(node),
            Outcome::Inactivated { .. } => None,
        }
    }

    pub fn into_node(self) -> Option<Node> {
        match self {
            Outcome::Created { node } | Outcome::Reassigned { node } => Some(node),
            Outcome::Inactivated { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch() {
        let json = r#"[
            {"command": "create", "level": "church",
             "draft": {"id": "c1", "profile": {"type": "church", "name": "Central", "abbreviated_name": "CEN"}}},
            {"command": "reassign", "level": "zone", "id": "z1", "superior_id": "sv2",
             "new_scope": {"kind": "church_district", "church_id": "c1", "district": "comas"}},
            {"command": "inactivate", "level": "pastor", "id": "p1"}
        ]"#;
        let cmds = Command::parse_batch(json).unwrap();
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0].name(), "create");
        assert_eq!(cmds[1].level(), Level::Zone);
        match &cmds[2] {
            Command::Inactivate { id, .. } => assert_eq!(id, "p1"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        let err = Command::parse_batch(r#"[{"command": "merge", "level": "zone"}]"#).unwrap_err();
        assert_eq!(err.reason(), "invalid_input");
    }
}
