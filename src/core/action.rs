//! The closed action vocabulary shared by planner, executor and reports.

use crate::core::manifest::Manifest;
use crate::core::policy::SplitTarget;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    UpdateSection,
    FillClaim,
    Archive,
    ManualReview,
    SyncManifest,
    MigrateLegacy,
    ArchiveLegacy,
    TopologyRepair,
    NavigationRepair,
    MergeDocs,
    SplitDoc,
    SemanticRewrite,
    QualityRepair,
    RefreshEvidence,
}

impl ActionType {
    pub const ALL: [ActionType; 15] = [
        ActionType::Create,
        ActionType::UpdateSection,
        ActionType::FillClaim,
        ActionType::Archive,
        ActionType::ManualReview,
        ActionType::SyncManifest,
        ActionType::MigrateLegacy,
        ActionType::ArchiveLegacy,
        ActionType::TopologyRepair,
        ActionType::NavigationRepair,
        ActionType::MergeDocs,
        ActionType::SplitDoc,
        ActionType::SemanticRewrite,
        ActionType::QualityRepair,
        ActionType::RefreshEvidence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::UpdateSection => "update_section",
            ActionType::FillClaim => "fill_claim",
            ActionType::Archive => "archive",
            ActionType::ManualReview => "manual_review",
            ActionType::SyncManifest => "sync_manifest",
            ActionType::MigrateLegacy => "migrate_legacy",
            ActionType::ArchiveLegacy => "archive_legacy",
            ActionType::TopologyRepair => "topology_repair",
            ActionType::NavigationRepair => "navigation_repair",
            ActionType::MergeDocs => "merge_docs",
            ActionType::SplitDoc => "split_doc",
            ActionType::SemanticRewrite => "semantic_rewrite",
            ActionType::QualityRepair => "quality_repair",
            ActionType::RefreshEvidence => "refresh_evidence",
        }
    }

    pub fn parse(value: &str) -> Option<ActionType> {
        ActionType::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Actions that leave drift behind when present in an audit plan.
    pub fn is_actionable_drift(self) -> bool {
        !matches!(self, ActionType::ManualReview)
    }

    /// The subset a repair iteration may emit; all of them converge when re-applied.
    pub fn is_repair_safe(self) -> bool {
        matches!(
            self,
            ActionType::UpdateSection
                | ActionType::FillClaim
                | ActionType::RefreshEvidence
                | ActionType::QualityRepair
        )
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    File,
    Dir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    Policy,
    Manifest,
    Managed,
    Index,
    Agents,
    TopologyContract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyIssue {
    MissingContract,
    Orphan,
    OverDepth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyDecision {
    AutoMigrate,
    ManualReview,
    Skip,
}

/// Structured detail per action family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionPayload {
    Template {
        template: Template,
    },
    Manifest {
        snapshot: Manifest,
        notes: Vec<String>,
    },
    Metadata {
        missing: Vec<String>,
        invalid: Vec<String>,
    },
    Modules {
        missing_modules: Vec<String>,
    },
    Claim {
        statement_template: String,
        required_evidence_types: Vec<String>,
        available_evidence_types: Vec<String>,
        allow_unknown: bool,
    },
    Archive {
        source_path: String,
    },
    Legacy {
        source_path: String,
        target_path: String,
        archive_path: String,
        category: String,
        confidence: f64,
        decision: LegacyDecision,
    },
    Topology {
        issue: TopologyIssue,
        parent: Option<String>,
    },
    Navigation {
        children: Vec<String>,
    },
    Merge {
        title: String,
        sources: Vec<String>,
    },
    Split {
        outputs: Vec<SplitTarget>,
    },
    Quality {
        claim_ids: Vec<String>,
    },
    Refresh {
        last_reviewed: Option<String>,
        due_date: Option<String>,
    },
    Rewrite {
        missing_slots: Vec<String>,
    },
    Review {
        proposed: ActionType,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub kind: TargetKind,
    pub path: String,
    pub risk: Risk,
    pub reason: String,
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ActionPayload>,
}

impl Action {
    /// Paths this action writes as a whole (creating or replacing the file).
    pub fn whole_file_targets(&self) -> Vec<String> {
        match (&self.action_type, &self.payload) {
            (ActionType::Create, _) | (ActionType::MergeDocs, _) => vec![self.path.clone()],
            (ActionType::Archive, Some(ActionPayload::Archive { source_path })) => {
                vec![self.path.clone(), source_path.clone()]
            }
            (ActionType::SplitDoc, Some(ActionPayload::Split { outputs })) => {
                outputs.iter().map(|o| o.path.clone()).collect()
            }
            (ActionType::ArchiveLegacy, Some(ActionPayload::Legacy { source_path, archive_path, .. })) => {
                vec![source_path.clone(), archive_path.clone()]
            }
            _ => Vec::new(),
        }
    }

    pub fn required_evidence_types(&self) -> &[String] {
        match &self.payload {
            Some(ActionPayload::Claim {
                required_evidence_types,
                ..
            }) => required_evidence_types,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_names_round_trip() {
        for t in ActionType::ALL {
            assert_eq!(ActionType::parse(t.as_str()), Some(t));
            let json = serde_json::to_value(t).unwrap();
            assert_eq!(json, serde_json::Value::String(t.as_str().to_string()));
        }
        assert_eq!(ActionType::parse("add"), None);
    }

    #[test]
    fn test_payload_is_tagged() {
        let payload = ActionPayload::Navigation {
            children: vec!["docs/a.md".into()],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "navigation");
        assert_eq!(json["children"][0], "docs/a.md");
    }

    #[test]
    fn test_repair_safe_subset() {
        let safe: Vec<_> = ActionType::ALL.into_iter().filter(|t| t.is_repair_safe()).collect();
        assert_eq!(
            safe,
            vec![
                ActionType::UpdateSection,
                ActionType::FillClaim,
                ActionType::QualityRepair,
                ActionType::RefreshEvidence
            ]
        );
    }
}
