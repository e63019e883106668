//! Lineage flattening
//!
//! A dataframe's ancestors are copied into an arena indexed by `usize`, keyed
//! by name so a node shared by several children appears once. A depth-first
//! post-order over the arena yields the CTE order: every node comes after all
//! of its parents.

use std::collections::HashMap;

use crate::dataframe::DataFrame;
use crate::error::{Error, Result};
use crate::sql::quote_ident;

/// Post-order of the nodes reachable from `root` through `edges`.
///
/// `edges[i]` lists the parents of node `i`. A node on the current DFS path
/// that is reached again indicates a cycle.
pub fn topological_order(edges: &[Vec<usize>], root: usize) -> Result<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    let mut marks = vec![Mark::White; edges.len()];
    let mut order = Vec::new();
    // (node, index of the next parent to visit)
    let mut stack = vec![(root, 0usize)];
    marks[root] = Mark::Grey;

    while let Some((node, next)) = stack.pop() {
        match edges[node].get(next) {
            Some(&parent) => {
                stack.push((node, next + 1));
                match marks[parent] {
                    Mark::White => {
                        marks[parent] = Mark::Grey;
                        stack.push((parent, 0));
                    }
                    Mark::Grey => return Err(Error::CyclicLineage(parent.to_string())),
                    Mark::Black => {}
                }
            }
            None => {
                marks[node] = Mark::Black;
                order.push(node);
            }
        }
    }
    Ok(order)
}

/// Arena of the nodes that must be expanded as CTEs.
struct Arena {
    nodes: Vec<DataFrame>,
    edges: Vec<Vec<usize>>,
    index: HashMap<String, usize>,
}

impl Arena {
    fn build(root: &DataFrame) -> Arena {
        let mut arena = Arena {
            nodes: Vec::new(),
            edges: Vec::new(),
            index: HashMap::new(),
        };
        let mut pending = vec![arena.insert(root)];
        while let Some(i) = pending.pop() {
            let parents: Vec<DataFrame> = arena.nodes[i].parents().to_vec();
            for parent in parents.iter().filter(|p| !p.is_table()) {
                let j = match arena.index.get(parent.name()) {
                    Some(&j) => j,
                    None => {
                        let j = arena.insert(parent);
                        pending.push(j);
                        j
                    }
                };
                arena.edges[i].push(j);
            }
        }
        arena
    }

    fn insert(&mut self, df: &DataFrame) -> usize {
        let i = self.nodes.len();
        self.nodes.push(df.clone());
        self.edges.push(Vec::new());
        self.index.insert(df.name().to_string(), i);
        i
    }
}

/// Ancestors of `root` to be emitted as CTEs, parents before children.
///
/// Catalog tables are never included and neither is `root` itself.
pub fn lineage(root: &DataFrame) -> Result<Vec<DataFrame>> {
    let arena = Arena::build(root);
    let order = topological_order(&arena.edges, 0).map_err(|err| match err {
        Error::CyclicLineage(i) => {
            let name = i
                .parse::<usize>()
                .ok()
                .and_then(|i| arena.nodes.get(i))
                .map(|df| df.name().to_string())
                .unwrap_or(i);
            Error::CyclicLineage(name)
        }
        other => other,
    })?;
    Ok(order
        .into_iter()
        .filter(|&i| i != 0)
        .map(|i| arena.nodes[i].clone())
        .collect())
}

/// The single statement computing `root`: `WITH a AS (...), b AS (...) <query>`.
pub fn full_query(root: &DataFrame) -> Result<String> {
    let ctes: Vec<String> = lineage(root)?
        .iter()
        .map(|df| format!("{} AS ({})", quote_ident(df.name()), df.query()))
        .collect();
    if ctes.is_empty() {
        return Ok(root.query().to_string());
    }
    Ok(format!("WITH {} {}", ctes.join(", "), root.query()))
}
