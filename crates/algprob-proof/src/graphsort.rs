//! Strongly connected components in topological order.
//!
//! Kosaraju's algorithm with explicit stacks (no recursion, so deep proof
//! chains cannot overflow the call stack). The second pass visits nodes in
//! decreasing finishing time on the reversed graph, which yields the
//! components of the condensation in topological order: a component always
//! precedes every component it has an edge into.
//!
//! For a dependency graph (edge `a -> b` meaning "`a` depends on `b`") the
//! result therefore lists dependents first; iterate it in reverse to visit
//! dependencies before the nodes that use them.

use std::collections::HashMap;
use std::hash::Hash;

/// Directed graph over dense node ids `0..node_count`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    out_adj: Vec<Vec<usize>>,
    in_adj: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new(node_count: usize) -> Self {
        Self {
            out_adj: vec![Vec::new(); node_count],
            in_adj: vec![Vec::new(); node_count],
        }
    }

    pub fn node_count(&self) -> usize {
        self.out_adj.len()
    }

    /// Add `from -> to`. Out-of-range ids are ignored.
    pub fn add_edge(&mut self, from: usize, to: usize) {
        let n = self.node_count();
        if from >= n || to >= n {
            return;
        }
        self.out_adj[from].push(to);
        self.in_adj[to].push(from);
    }

    pub fn successors(&self, node: usize) -> &[usize] {
        self.out_adj.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_self_loop(&self, node: usize) -> bool {
        self.successors(node).contains(&node)
    }

    /// A component is recursive if it has more than one node or a self loop.
    pub fn is_recursive(&self, component: &[usize]) -> bool {
        match component {
            [single] => self.has_self_loop(*single),
            _ => true,
        }
    }

    /// Components in topological order; nodes within a component ascend.
    pub fn strongly_connected_components(&self) -> Vec<Vec<usize>> {
        let n = self.node_count();
        let mut visited = vec![false; n];
        let mut order: Vec<usize> = Vec::with_capacity(n);

        // Iterative DFS to compute finishing order.
        for start in 0..n {
            if visited[start] {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            visited[start] = true;
            while let Some((node, idx)) = stack.pop() {
                if idx < self.out_adj[node].len() {
                    stack.push((node, idx + 1));
                    let next = self.out_adj[node][idx];
                    if !visited[next] {
                        visited[next] = true;
                        stack.push((next, 0));
                    }
                } else {
                    order.push(node);
                }
            }
        }

        // Reverse graph, decreasing finishing time.
        let mut comp_id = vec![usize::MAX; n];
        let mut components: Vec<Vec<usize>> = Vec::new();
        for &start in order.iter().rev() {
            if comp_id[start] != usize::MAX {
                continue;
            }
            let id = components.len();
            let mut members = vec![start];
            let mut stack = vec![start];
            comp_id[start] = id;
            while let Some(node) = stack.pop() {
                for &prev in &self.in_adj[node] {
                    if comp_id[prev] == usize::MAX {
                        comp_id[prev] = id;
                        members.push(prev);
                        stack.push(prev);
                    }
                }
            }
            members.sort_unstable();
            components.push(members);
        }
        components
    }
}

/// Group arbitrary nodes into components, in topological order.
///
/// Edges mentioning a node that is not in `nodes` are ignored.
pub fn sort_graph<N, I>(nodes: &[N], edges: I) -> Vec<Vec<N>>
where
    N: Clone + Eq + Hash,
    I: IntoIterator<Item = (N, N)>,
{
    let index: HashMap<&N, usize> = nodes.iter().enumerate().map(|(i, n)| (n, i)).collect();
    let mut graph = DependencyGraph::new(nodes.len());
    for (from, to) in edges {
        if let (Some(&f), Some(&t)) = (index.get(&from), index.get(&to)) {
            graph.add_edge(f, t);
        }
    }
    graph
        .strongly_connected_components()
        .into_iter()
        .map(|c| c.into_iter().map(|i| nodes[i].clone()).collect())
        .collect()
}
