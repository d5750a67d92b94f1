// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Objective model: a goal decomposed into a dependency graph of steps.

use serde::{Deserialize, Serialize};

/// One step in a skill tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillNode {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub xp_reward: u32,
    /// Step IDs that must be completed before this step unlocks
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub unlocked: bool,
}

/// Edge in the rendered dependency graph (kept alongside the per-node
/// dependency lists for the frontend's graph layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEdge {
    pub from: String,
    pub to: String,
}

/// The full dependency graph for an objective.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillTree {
    #[serde(default)]
    pub nodes: Vec<SkillNode>,
    #[serde(default)]
    pub edges: Vec<SkillEdge>,
}

impl SkillTree {
    pub fn node(&self, step_id: &str) -> Option<&SkillNode> {
        self.nodes.iter().find(|n| n.id == step_id)
    }

    pub fn node_mut(&mut self, step_id: &str) -> Option<&mut SkillNode> {
        self.nodes.iter_mut().find(|n| n.id == step_id)
    }
}

/// Objective document stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    /// Document ID (UUID string)
    pub id: String,
    /// Exclusive owner
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub difficulty: String,
    pub skill_tree: SkillTree,
    /// 0-100, rounded percentage of completed steps
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub completed_steps: u32,
    /// Sum of xp_reward over completed nodes
    #[serde(default)]
    pub total_xp: u32,
    /// Conversation that produced this objective
    pub conversation_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Skill-tree draft as delivered by the AI workflow callback.
///
/// The workflow speaks camelCase JSON; completion flags are absent and
/// are computed at materialization time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub difficulty: String,
    pub skill_tree: SkillTreeDraft,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SkillTreeDraft {
    #[serde(default)]
    pub nodes: Vec<SkillNodeDraft>,
    #[serde(default)]
    pub edges: Vec<SkillEdge>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillNodeDraft {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub xp_reward: u32,
    #[serde(default)]
    pub dependencies: Vec<String>,
}
