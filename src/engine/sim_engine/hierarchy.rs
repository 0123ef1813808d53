// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{collections::BTreeMap, sync::RwLock};

use crate::{
    cinder::{QuotaError, QuotaResult},
    engine::{
        hierarchy::{ProjectHierarchyResolver, ProjectNode, ProjectTree},
        types::{ProjectId, RequestContext},
    },
};

#[derive(Debug, Clone)]
struct SimProject {
    /// The parent project or, for a root project in a domain, the domain.
    parent_id: Option<ProjectId>,
    domain_id: Option<ProjectId>,
}

/// An identity service holding projects as parent pointers; children are
/// derived on lookup.
#[derive(Debug)]
pub struct SimHierarchy {
    projects: RwLock<BTreeMap<ProjectId, SimProject>>,
    supports_hierarchy: bool,
    admin_project: Option<ProjectId>,
}

impl Default for SimHierarchy {
    fn default() -> SimHierarchy {
        SimHierarchy::new()
    }
}

impl SimHierarchy {
    pub fn new() -> SimHierarchy {
        SimHierarchy {
            projects: RwLock::default(),
            supports_hierarchy: true,
            admin_project: None,
        }
    }

    /// An identity service that only knows flat projects.
    pub fn flat() -> SimHierarchy {
        SimHierarchy {
            supports_hierarchy: false,
            ..SimHierarchy::new()
        }
    }

    /// Mark one project as the cloud admin project.
    pub fn with_admin_project(mut self, project_id: &str) -> SimHierarchy {
        self.admin_project = Some(ProjectId::from(project_id));
        self
    }

    /// Add a project under `parent_id`, which must already exist. A project
    /// without a parent is a root project.
    pub fn add_project(&self, project_id: &str, parent_id: Option<&str>) -> QuotaResult<()> {
        let mut projects = self.projects.write()?;
        let (parent_id, domain_id) = match parent_id {
            None => (None, None),
            Some(parent_id) => {
                let parent = projects
                    .get(parent_id)
                    .ok_or_else(|| QuotaError::ProjectNotFound(parent_id.into()))?;
                (Some(ProjectId::from(parent_id)), parent.domain_id.clone())
            }
        };
        projects.insert(
            project_id.into(),
            SimProject {
                parent_id,
                domain_id,
            },
        );
        Ok(())
    }

    /// Add a root project owned by a domain. The domain is reported as the
    /// parent of the project, the way domain-aware identity services do.
    pub fn add_domain_project(&self, project_id: &str, domain_id: &str) -> QuotaResult<()> {
        self.projects.write()?.insert(
            project_id.into(),
            SimProject {
                parent_id: Some(domain_id.into()),
                domain_id: Some(domain_id.into()),
            },
        );
        Ok(())
    }

    fn subtree(projects: &BTreeMap<ProjectId, SimProject>, id: &ProjectId) -> Vec<ProjectTree> {
        projects
            .iter()
            .filter(|(_, project)| project.parent_id.as_ref() == Some(id))
            .map(|(child, _)| ProjectTree::new(child.clone(), SimHierarchy::subtree(projects, child)))
            .collect()
    }

    fn parents(projects: &BTreeMap<ProjectId, SimProject>, id: &ProjectId) -> Vec<ProjectId> {
        let mut parents = Vec::new();
        let mut next = projects.get(id).and_then(|p| p.parent_id.clone());
        while let Some(parent) = next {
            next = projects.get(&parent).and_then(|p| p.parent_id.clone());
            parents.push(parent);
        }
        parents
    }
}

impl ProjectHierarchyResolver for SimHierarchy {
    fn get_project_hierarchy(
        &self,
        _ctx: &RequestContext,
        project_id: &ProjectId,
        subtree_as_ids: bool,
        parents_as_ids: bool,
    ) -> QuotaResult<ProjectNode> {
        if !self.supports_hierarchy {
            return Err(QuotaError::HierarchyUnsupported(
                "identity service does not support project hierarchies".into(),
            ));
        }
        let projects = self.projects.read()?;
        let project = projects
            .get(project_id)
            .ok_or_else(|| QuotaError::ProjectNotFound(project_id.clone()))?;
        Ok(ProjectNode {
            id: project_id.clone(),
            parent_id: project.parent_id.clone(),
            domain_id: project.domain_id.clone(),
            subtree: subtree_as_ids.then(|| SimHierarchy::subtree(&projects, project_id)),
            parents: parents_as_ids.then(|| SimHierarchy::parents(&projects, project_id)),
            is_admin_project: self.admin_project.as_ref() == Some(project_id),
        })
    }

    fn get_all_root_project_ids(&self, _ctx: &RequestContext) -> QuotaResult<Vec<ProjectId>> {
        if !self.supports_hierarchy {
            return Err(QuotaError::HierarchyUnsupported(
                "identity service does not support project hierarchies".into(),
            ));
        }
        Ok(self
            .projects
            .read()?
            .iter()
            .filter(|(_, project)| project.parent_id.is_none() || project.parent_id == project.domain_id)
            .map(|(id, _)| id.clone())
            .collect())
    }
}
