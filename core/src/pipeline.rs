use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::resource::Resource;

/// Directed routing graph over resource ids.
///
/// Adjacency lists keep insertion order and never hold duplicates, so a
/// message fanning out from a node visits its successors in the order the
/// edges were first added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    id: usize,
    adjacency: IndexMap<String, Vec<String>>,
    first: Option<String>,
    last: Option<String>,
}

/// Endpoint of a pipeline edge.
#[derive(Debug, Clone)]
pub enum Node {
    Resource(String),
    Pipeline(Pipeline),
}

impl From<&Resource> for Node {
    fn from(resource: &Resource) -> Self {
        Node::Resource(resource.id().to_string())
    }
}

impl From<&str> for Node {
    fn from(id: &str) -> Self {
        Node::Resource(id.to_string())
    }
}

impl From<&Pipeline> for Node {
    fn from(pipeline: &Pipeline) -> Self {
        Node::Pipeline(pipeline.clone())
    }
}

impl Node {
    fn entry(&self) -> SimResult<String> {
        match self {
            Node::Resource(id) => Ok(id.clone()),
            Node::Pipeline(p) => p.first.clone().ok_or_else(|| empty(p)),
        }
    }

    fn exit(&self) -> SimResult<String> {
        match self {
            Node::Resource(id) => Ok(id.clone()),
            Node::Pipeline(p) => p.last.clone().ok_or_else(|| empty(p)),
        }
    }
}

fn empty(p: &Pipeline) -> SimError {
    SimError::InvalidPipeline(format!("pipeline {} has no edges", p.id))
}

impl Pipeline {
    pub fn new(id: usize) -> Self {
        Self { id, ..Default::default() }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn first(&self) -> Option<&str> {
        self.first.as_deref()
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    pub fn adjacency(&self) -> &IndexMap<String, Vec<String>> {
        &self.adjacency
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.adjacency.contains_key(resource)
    }

    pub fn next_hops(&self, resource: &str) -> &[String] {
        self.adjacency.get(resource).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Adds the edge `src -> dst`. Pipeline endpoints are merged in first and
    /// connected through their exit and entry resources.
    pub fn add_pipe(&mut self, src: &Node, dst: &Node) -> SimResult<()> {
        let from = src.exit()?;
        let to = dst.entry()?;
        let unrooted = self.first.is_none();
        for node in [src, dst] {
            if let Node::Pipeline(p) = node {
                self.merge_pipe(p);
            }
        }
        self.touch(&to);
        let hops = self.adjacency.entry(from.clone()).or_default();
        if !hops.contains(&to) {
            hops.push(to);
        }
        if unrooted {
            self.first = Some(src.entry()?);
        }
        self.last = Some(dst.exit()?);
        Ok(())
    }

    /// Unions `other` into this pipeline, preserving the order in which
    /// successors were first seen.
    pub fn merge_pipe(&mut self, other: &Pipeline) {
        for (from, hops) in &other.adjacency {
            let entry = self.adjacency.entry(from.clone()).or_default();
            for hop in hops {
                if !entry.contains(hop) {
                    entry.push(hop.clone());
                }
            }
        }
        if self.first.is_none() {
            self.first = other.first.clone();
        }
        if other.last.is_some() {
            self.last = other.last.clone();
        }
    }

    fn touch(&mut self, resource: &str) {
        if !self.adjacency.contains_key(resource) {
            self.adjacency.insert(resource.to_string(), Vec::new());
        }
    }
}
