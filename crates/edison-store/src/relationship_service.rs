//! The single source of truth for relationship mutations.
//!
//! Adding `A --[parent]--> B` also adds `B --[child]--> A`, enforces
//! single-parent (fail-closed unless `force`), and updates both files.
//! Removal is symmetric. `bundle_root` is directed-only.

use edison_core::{EdgeType, EdisonError, RelationshipEdge};

use crate::task::Task;
use crate::task_repo::TaskRepository;

pub struct TaskRelationshipService<'a> {
    repo: &'a TaskRepository,
}

impl<'a> TaskRelationshipService<'a> {
    pub fn new(repo: &'a TaskRepository) -> Self {
        Self { repo }
    }

    fn remove_edges(task: &mut Task, edge_type: EdgeType, target: Option<&str>) {
        task.relationships.retain(|e| {
            if e.edge_type != edge_type {
                return true;
            }
            match target {
                Some(t) => e.target != t,
                None => false,
            }
        });
    }

    pub fn add(
        &self,
        task_id: &str,
        rel_type: EdgeType,
        target_id: &str,
        force: bool,
    ) -> Result<(), EdisonError> {
        let task_id = task_id.trim();
        let target_id = target_id.trim();
        if task_id.is_empty() || target_id.is_empty() {
            return Err(EdisonError::Persistence(
                "add relationship requires task id and target id".into(),
            ));
        }
        if task_id == target_id {
            return Err(EdisonError::Persistence(
                "Cannot add relationship to self".into(),
            ));
        }

        let mut a = self.repo.get(task_id)?;
        let mut b = self.repo.get(target_id)?;

        // Directed-only: no inverse maintained on the target.
        if rel_type == EdgeType::BundleRoot {
            let existing = a.bundle_root().map(str::to_string);
            if let Some(existing_root) = existing {
                if existing_root != target_id {
                    if !force {
                        return Err(EdisonError::Persistence(format!(
                            "Task {task_id} already has bundle_root {existing_root}; use force to replace"
                        )));
                    }
                    Self::remove_edges(&mut a, EdgeType::BundleRoot, None);
                }
            }
            a.relationships
                .push(RelationshipEdge::new(EdgeType::BundleRoot, target_id));
            return self.repo.save(&mut a);
        }

        let inverse = rel_type
            .inverse()
            .expect("all non-bundle_root edges have inverses");

        // Single-parent enforcement: identify the child side of the edge.
        if matches!(rel_type, EdgeType::Parent | EdgeType::Child) {
            let (child_is_a, desired_parent) = if rel_type == EdgeType::Parent {
                (true, target_id)
            } else {
                (false, task_id)
            };
            let child = if child_is_a { &a } else { &b };
            let existing_parent = child.parent_id().map(str::to_string);

            if let Some(old_parent_id) = existing_parent {
                if old_parent_id != desired_parent {
                    if !force {
                        return Err(EdisonError::Persistence(format!(
                            "Task {} already has parent {old_parent_id}; single-parent is enforced",
                            child.id
                        )));
                    }
                    // Force reparent: drop the old parent edge on the child
                    // and the matching child edge on the old parent.
                    let child_id = child.id.clone();
                    if child_is_a {
                        Self::remove_edges(&mut a, EdgeType::Parent, None);
                    } else {
                        Self::remove_edges(&mut b, EdgeType::Parent, None);
                    }
                    if old_parent_id == a.id {
                        Self::remove_edges(&mut a, EdgeType::Child, Some(&child_id));
                    } else if old_parent_id == b.id {
                        Self::remove_edges(&mut b, EdgeType::Child, Some(&child_id));
                    } else if let Some(mut old_parent) = self.repo.try_get(&old_parent_id)? {
                        Self::remove_edges(&mut old_parent, EdgeType::Child, Some(&child_id));
                        self.repo.save(&mut old_parent)?;
                    }
                }
            }
        }

        a.relationships
            .push(RelationshipEdge::new(rel_type, target_id));
        b.relationships
            .push(RelationshipEdge::new(inverse, task_id));

        self.repo.save(&mut a)?;
        self.repo.save(&mut b)
    }

    pub fn remove(
        &self,
        task_id: &str,
        rel_type: EdgeType,
        target_id: &str,
    ) -> Result<(), EdisonError> {
        let task_id = task_id.trim();
        let target_id = target_id.trim();
        if task_id == target_id {
            return Err(EdisonError::Persistence(
                "Cannot remove relationship to self".into(),
            ));
        }

        let mut a = self.repo.get(task_id)?;

        if rel_type == EdgeType::BundleRoot {
            Self::remove_edges(&mut a, EdgeType::BundleRoot, Some(target_id));
            return self.repo.save(&mut a);
        }

        let inverse = rel_type
            .inverse()
            .expect("all non-bundle_root edges have inverses");
        let mut b = self.repo.get(target_id)?;

        Self::remove_edges(&mut a, rel_type, Some(target_id));
        Self::remove_edges(&mut b, inverse, Some(task_id));

        self.repo.save(&mut a)?;
        self.repo.save(&mut b)
    }
}
