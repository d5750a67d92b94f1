// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Skill tree engine: the dependency-graph state machine over an
//! objective's steps.
//!
//! Handles the core workflow:
//! 1. Mark a step completed
//! 2. Cascade-unlock dependents
//! 3. Recompute the progress/XP aggregates
//! 4. Persist the objective (one document, atomic within it)
//! 5. Update the owning user's gamification stats (best-effort)
//!
//! Cascade policy: a node auto-unlocks only when its dependency list is
//! exactly the single step just completed. Nodes with several
//! dependencies are never re-evaluated here; product has been flagged
//! that such nodes can only be unlocked explicitly.

use crate::db::FirestoreDb;
use crate::error::{AppError, Result};
use crate::models::{Objective, ObjectiveDraft, SkillNode, SkillTree};
use crate::time_utils::{format_utc_rfc3339, now_rfc3339};
use serde::Serialize;

/// Outcome of a step completion, returned to the client.
#[derive(Debug, Serialize)]
pub struct StepCompletion {
    pub progress: u32,
    pub total_xp: u32,
    pub completed_steps: u32,
    pub newly_unlocked: Vec<String>,
    /// XP credited to the user by this call (0 for an idempotent
    /// re-completion).
    pub xp_awarded: u32,
    /// True when this completion brought the objective to 100%.
    pub goal_completed: bool,
}

/// Recompute `(progress, completed_count, total_xp)` from node state.
/// Progress is 0 for an empty tree.
pub fn aggregates(tree: &SkillTree) -> (u32, u32, u32) {
    let total = tree.nodes.len() as u32;
    if total == 0 {
        return (0, 0, 0);
    }

    let completed = tree.nodes.iter().filter(|n| n.completed).count() as u32;
    let total_xp: u32 = tree
        .nodes
        .iter()
        .filter(|n| n.completed)
        .map(|n| n.xp_reward)
        .sum();
    let progress = ((f64::from(completed) * 100.0) / f64::from(total)).round() as u32;

    (progress, completed, total_xp)
}

/// Mark `step_id` completed and cascade-unlock its sole dependents.
///
/// Returns the IDs that flipped to unlocked. Only nodes whose
/// dependency list is exactly `[step_id]` are considered; everything
/// else keeps its current state.
pub fn apply_completion(tree: &mut SkillTree, step_id: &str) -> Option<Vec<String>> {
    tree.node_mut(step_id)?.completed = true;

    let mut newly_unlocked = Vec::new();
    for node in &mut tree.nodes {
        if !node.unlocked && node.dependencies.len() == 1 && node.dependencies[0] == step_id {
            node.unlocked = true;
            newly_unlocked.push(node.id.clone());
        }
    }

    Some(newly_unlocked)
}

/// Initial unlock set for a freshly materialized tree: every node with
/// no dependencies.
pub fn apply_initial_unlocks(tree: &mut SkillTree) -> usize {
    let mut unlocked = 0;
    for node in &mut tree.nodes {
        node.completed = false;
        node.unlocked = node.dependencies.is_empty();
        if node.unlocked {
            unlocked += 1;
        }
    }
    unlocked
}

/// Skill tree persistence and user-stat side effects.
#[derive(Clone)]
pub struct SkillTreeEngine {
    db: FirestoreDb,
}

impl SkillTreeEngine {
    pub fn new(db: FirestoreDb) -> Self {
        Self { db }
    }

    /// Ownership-scoped objective load; a missing objective and a
    /// foreign owner both surface as NotFound.
    async fn load_owned(&self, objective_id: &str, user_id: &str) -> Result<Objective> {
        self.db
            .get_objective(objective_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("Objective {} not found", objective_id)))
    }

    /// Complete a step and persist the resulting node state and
    /// aggregates in the same document update.
    ///
    /// Re-completing an already-completed step returns the current
    /// aggregates without crediting XP again.
    pub async fn complete_step(
        &self,
        objective_id: &str,
        step_id: &str,
        user_id: &str,
    ) -> Result<StepCompletion> {
        let mut objective = self.load_owned(objective_id, user_id).await?;

        let node = objective.skill_tree.node(step_id).ok_or_else(|| {
            AppError::NotFound(format!("Step {} not found in objective", step_id))
        })?;

        if node.completed {
            let (progress, completed, total_xp) = aggregates(&objective.skill_tree);
            tracing::debug!(
                objective_id,
                step_id,
                "Step already completed (idempotent skip)"
            );
            return Ok(StepCompletion {
                progress,
                total_xp,
                completed_steps: completed,
                newly_unlocked: Vec::new(),
                xp_awarded: 0,
                goal_completed: false,
            });
        }

        let xp_awarded = node.xp_reward;
        let was_complete = objective.progress >= 100;

        let newly_unlocked = apply_completion(&mut objective.skill_tree, step_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Step {} not found in objective", step_id))
            })?;

        let (progress, completed, total_xp) = aggregates(&objective.skill_tree);
        objective.progress = progress;
        objective.completed_steps = completed;
        objective.total_xp = total_xp;
        objective.updated_at = now_rfc3339();

        self.db.upsert_objective(&objective).await?;

        let goal_completed = progress >= 100 && !was_complete;

        tracing::info!(
            objective_id,
            step_id,
            user_id,
            progress,
            unlocked = newly_unlocked.len(),
            "Step completed"
        );

        self.credit_user(user_id, xp_awarded, goal_completed).await;

        Ok(StepCompletion {
            progress,
            total_xp,
            completed_steps: completed,
            newly_unlocked,
            xp_awarded,
            goal_completed,
        })
    }

    /// Toggle a step's unlocked flag (manual override of the cascade
    /// policy), same ownership checks as completion.
    pub async fn toggle_step_lock(
        &self,
        objective_id: &str,
        step_id: &str,
        user_id: &str,
    ) -> Result<bool> {
        let mut objective = self.load_owned(objective_id, user_id).await?;

        let node = objective.skill_tree.node_mut(step_id).ok_or_else(|| {
            AppError::NotFound(format!("Step {} not found in objective", step_id))
        })?;

        node.unlocked = !node.unlocked;
        let unlocked = node.unlocked;

        objective.updated_at = now_rfc3339();
        self.db.upsert_objective(&objective).await?;

        tracing::info!(objective_id, step_id, unlocked, "Step lock toggled");
        Ok(unlocked)
    }

    /// Materialize an AI-generated skill tree into a stored objective.
    pub async fn materialize_objective(
        &self,
        user_id: &str,
        conversation_id: &str,
        draft: ObjectiveDraft,
    ) -> Result<Objective> {
        let mut tree = SkillTree {
            nodes: draft
                .skill_tree
                .nodes
                .into_iter()
                .map(|n| SkillNode {
                    id: n.id,
                    title: n.title,
                    xp_reward: n.xp_reward,
                    dependencies: n.dependencies,
                    completed: false,
                    unlocked: false,
                })
                .collect(),
            edges: draft.skill_tree.edges,
        };
        let unlocked = apply_initial_unlocks(&mut tree);

        let now = now_rfc3339();
        let objective = Objective {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: draft.title,
            description: draft.description,
            category: draft.category,
            difficulty: draft.difficulty,
            skill_tree: tree,
            progress: 0,
            completed_steps: 0,
            total_xp: 0,
            conversation_id: conversation_id.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        self.db.upsert_objective(&objective).await?;
        tracing::info!(
            user_id,
            conversation_id,
            objective_id = %objective.id,
            steps = objective.skill_tree.nodes.len(),
            unlocked,
            "Objective materialized"
        );

        self.record_goal_created(user_id, objective.skill_tree.nodes.len() as u32)
            .await;

        Ok(objective)
    }

    /// Best-effort user stats update after a completion. The objective
    /// write already succeeded; a stats failure is logged and the next
    /// read path reconciles.
    async fn credit_user(&self, user_id: &str, xp: u32, goal_completed: bool) {
        let result = async {
            let Some(mut user) = self.db.get_user(user_id).await? else {
                // Anonymous identities have no user document.
                return Ok::<_, AppError>(());
            };

            let now = chrono::Utc::now();
            user.stats.record_step_completion(xp, now);
            if goal_completed {
                user.stats.record_goal_completed();
            }
            user.last_active = format_utc_rfc3339(now);
            self.db.upsert_user(&user).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(user_id, error = %e, "Failed to update user stats after step completion");
        }
    }

    async fn record_goal_created(&self, user_id: &str, total_steps: u32) {
        let result = async {
            let Some(mut user) = self.db.get_user(user_id).await? else {
                return Ok::<_, AppError>(());
            };
            let now = chrono::Utc::now();
            user.stats.record_goal_created(total_steps, now);
            user.last_active = format_utc_rfc3339(now);
            self.db.upsert_user(&user).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(user_id, error = %e, "Failed to update user stats after objective creation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, xp: u32, deps: &[&str]) -> SkillNode {
        SkillNode {
            id: id.to_string(),
            title: format!("Step {}", id),
            xp_reward: xp,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            completed: false,
            unlocked: deps.is_empty(),
        }
    }

    fn tree(nodes: Vec<SkillNode>) -> SkillTree {
        SkillTree {
            nodes,
            edges: vec![],
        }
    }

    #[test]
    fn completing_sole_dependency_unlocks_dependent() {
        let mut t = tree(vec![node("a", 50, &[]), node("b", 100, &["a"])]);

        let unlocked = apply_completion(&mut t, "a").unwrap();

        assert_eq!(unlocked, vec!["b"]);
        assert!(t.node("b").unwrap().unlocked);
    }

    #[test]
    fn multi_dependency_node_is_never_auto_unlocked() {
        // A <- B, and C depends on both A and B. Completing A unlocks B;
        // completing B does NOT unlock C because C's dependency list is
        // not a singleton. This is the documented cascade policy.
        let mut t = tree(vec![
            node("a", 10, &[]),
            node("b", 10, &["a"]),
            node("c", 10, &["a", "b"]),
        ]);

        let unlocked_a = apply_completion(&mut t, "a").unwrap();
        assert_eq!(unlocked_a, vec!["b"]);
        assert!(!t.node("c").unwrap().unlocked, "two deps: untouched by A");

        let unlocked_b = apply_completion(&mut t, "b").unwrap();
        assert!(unlocked_b.is_empty());
        assert!(
            !t.node("c").unwrap().unlocked,
            "multi-dependency node must not auto-unlock"
        );
    }

    #[test]
    fn unrelated_singleton_dependency_is_untouched() {
        let mut t = tree(vec![
            node("a", 10, &[]),
            node("b", 10, &[]),
            node("c", 10, &["b"]),
        ]);

        let unlocked = apply_completion(&mut t, "a").unwrap();

        assert!(unlocked.is_empty());
        assert!(!t.node("c").unwrap().unlocked);
    }

    #[test]
    fn already_unlocked_node_is_not_reported_again() {
        let mut t = tree(vec![node("a", 10, &[]), node("b", 10, &["a"])]);
        t.node_mut("b").unwrap().unlocked = true;

        let unlocked = apply_completion(&mut t, "a").unwrap();
        assert!(unlocked.is_empty());
    }

    #[test]
    fn missing_step_yields_none() {
        let mut t = tree(vec![node("a", 10, &[])]);
        assert!(apply_completion(&mut t, "zz").is_none());
    }

    #[test]
    fn aggregates_track_completion() {
        let mut t = tree(vec![
            node("a", 50, &[]),
            node("b", 100, &["a"]),
            node("c", 25, &[]),
        ]);

        assert_eq!(aggregates(&t), (0, 0, 0));

        apply_completion(&mut t, "a").unwrap();
        let (progress, completed, xp) = aggregates(&t);
        assert_eq!(progress, 33); // round(100 * 1/3)
        assert_eq!(completed, 1);
        assert_eq!(xp, 50);

        apply_completion(&mut t, "b").unwrap();
        let (progress, completed, xp) = aggregates(&t);
        assert_eq!(progress, 67); // round(100 * 2/3)
        assert_eq!(completed, 2);
        assert_eq!(xp, 150);

        apply_completion(&mut t, "c").unwrap();
        assert_eq!(aggregates(&t), (100, 3, 175));
    }

    #[test]
    fn empty_tree_has_zero_progress() {
        let t = tree(vec![]);
        assert_eq!(aggregates(&t), (0, 0, 0));
    }

    #[test]
    fn recompletion_does_not_inflate_aggregates() {
        let mut t = tree(vec![node("a", 50, &[]), node("b", 100, &["a"])]);

        apply_completion(&mut t, "a").unwrap();
        apply_completion(&mut t, "a").unwrap();

        let (_, completed, xp) = aggregates(&t);
        assert_eq!(completed, 1);
        assert_eq!(xp, 50, "aggregates are recomputed from the set, not summed");
    }

    #[test]
    fn initial_unlocks_are_roots_only() {
        let mut t = tree(vec![
            node("a", 10, &[]),
            node("b", 10, &["a"]),
            node("c", 10, &[]),
            node("d", 10, &["a", "c"]),
        ]);
        // Scramble incoming state to prove materialization resets it.
        t.node_mut("b").unwrap().unlocked = true;
        t.node_mut("a").unwrap().completed = true;

        let unlocked = apply_initial_unlocks(&mut t);

        assert_eq!(unlocked, 2);
        assert!(t.node("a").unwrap().unlocked);
        assert!(t.node("c").unwrap().unlocked);
        assert!(!t.node("b").unwrap().unlocked);
        assert!(!t.node("d").unwrap().unlocked);
        assert!(!t.node("a").unwrap().completed);
    }
}
