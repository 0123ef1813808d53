// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Project hierarchy as reported by the identity service.

use std::{collections::VecDeque, fmt::Debug};

use crate::{
    cinder::QuotaResult,
    engine::types::{ProjectId, RequestContext},
};

/// A project and all of its descendants.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProjectTree {
    pub id: ProjectId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ProjectTree>,
}

impl ProjectTree {
    pub fn new<P>(id: P, children: Vec<ProjectTree>) -> ProjectTree
    where
        P: Into<ProjectId>,
    {
        ProjectTree {
            id: id.into(),
            children,
        }
    }

    pub fn leaf<P>(id: P) -> ProjectTree
    where
        P: Into<ProjectId>,
    {
        ProjectTree::new(id, Vec::new())
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True if `id` names a proper descendant of this project.
    pub fn has_descendant(&self, id: &str) -> bool {
        self.children
            .iter()
            .any(|child| &*child.id == id || child.has_descendant(id))
    }

    /// Every node of the tree, breadth first, starting with this one.
    pub fn iter(&self) -> impl Iterator<Item = &ProjectTree> + '_ {
        let mut queue = VecDeque::from([self]);
        std::iter::from_fn(move || {
            let node = queue.pop_front()?;
            queue.extend(node.children.iter());
            Some(node)
        })
    }
}

/// A project as seen by the quota engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProjectNode {
    pub id: ProjectId,
    /// None for a root project.
    pub parent_id: Option<ProjectId>,
    /// The domain owning the project; identity services may report the
    /// domain as the parent of a root project.
    pub domain_id: Option<ProjectId>,
    /// Direct children with their subtrees, if requested.
    pub subtree: Option<Vec<ProjectTree>>,
    /// Ancestors, nearest first, if requested.
    pub parents: Option<Vec<ProjectId>>,
    pub is_admin_project: bool,
}

impl ProjectNode {
    /// The project together with its subtree.
    pub fn tree(&self) -> ProjectTree {
        ProjectTree {
            id: self.id.clone(),
            children: self.subtree.clone().unwrap_or_default(),
        }
    }
}

/// Resolves parent and child relationships of projects.
pub trait ProjectHierarchyResolver: Debug + Send + Sync {
    /// Look up a project, optionally with its subtree and its chain of
    /// parents. Fails with `ProjectNotFound` for an unknown project and
    /// with `HierarchyUnsupported` if the service has no notion of
    /// hierarchy.
    fn get_project_hierarchy(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        subtree_as_ids: bool,
        parents_as_ids: bool,
    ) -> QuotaResult<ProjectNode>;

    fn get_all_root_project_ids(&self, ctx: &RequestContext) -> QuotaResult<Vec<ProjectId>>;
}
