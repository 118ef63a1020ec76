//! The knowledge graph: BFS traversal over typed directed `Association`
//! edges, used by `recall`'s graph-expansion mode and by `connect`'s
//! preview of what a new edge would reach.

use std::collections::{HashSet, VecDeque};

use anyhow::Result;

use crate::index::Index;
use crate::types::{Association, Slug};

#[derive(Debug, Clone)]
pub struct TraversalOptions {
    pub max_depth: usize,
    /// Follow edges where `slug` is the target as well as where it's the
    /// source — needed since most edges are only declared from one side.
    pub follow_incoming: bool,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_depth: 2,
            follow_incoming: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub slug: Slug,
    pub depth: usize,
    pub via: Option<Association>,
}

/// Breadth-first traversal starting from `start`, excluding soft-deleted
/// memories and never revisiting a slug once queued (cycle-safe for any
/// edge shape, including self-loops and back-references).
pub async fn traverse(
    index: &Index,
    start: &Slug,
    options: &TraversalOptions,
) -> Result<Vec<GraphNode>> {
    let mut visited: HashSet<Slug> = HashSet::new();
    let mut queue: VecDeque<(Slug, usize, Option<Association>)> = VecDeque::new();

    visited.insert(start.clone());
    queue.push_back((start.clone(), 0, None));

    let mut results = Vec::new();

    while let Some((slug, depth, via)) = queue.pop_front() {
        if slug != *start && index.by_slug(&slug).await?.is_none() {
            // Soft-deleted or never-existed; drop it from the result but
            // don't traverse further from it.
            continue;
        }

        results.push(GraphNode {
            slug: slug.clone(),
            depth,
            via,
        });

        if depth >= options.max_depth {
            continue;
        }

        let mut edges = index.associations_by_source(&slug).await?;
        if options.follow_incoming {
            edges.extend(index.associations_by_target(&slug).await?);
        }

        for edge in edges {
            let neighbor = if edge.source == slug {
                edge.target.clone()
            } else {
                edge.source.clone()
            };

            if visited.insert(neighbor.clone()) {
                queue.push_back((neighbor, depth + 1, Some(edge)));
            }
        }
    }

    Ok(results)
}
