//! Dependency graph over resource declarations

use crate::declaration::ResourceDeclaration;
use crate::error::{Result, StackError};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Declarations keyed by name, with the predecessor set of each
///
/// Nodes keep their insertion order, which is the tie-break for every
/// ordering this graph produces.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<ResourceDeclaration>,
    predecessors: Vec<BTreeSet<String>>,
    index: HashMap<String, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration; names must be unique
    pub fn add_node(&mut self, declaration: ResourceDeclaration) -> Result<()> {
        if self.index.contains_key(&declaration.name) {
            return Err(StackError::Configuration(format!(
                "resource '{}' is declared more than once",
                declaration.name
            )));
        }
        self.index.insert(declaration.name.clone(), self.nodes.len());
        self.predecessors.push(declaration.predecessors());
        self.nodes.push(declaration);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDeclaration> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Declarations in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceDeclaration> {
        self.nodes.iter()
    }

    pub fn predecessors(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.index.get(name).map(|&i| &self.predecessors[i])
    }

    /// Direct dependents of a node, in insertion order
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .zip(&self.predecessors)
            .filter(|(_, preds)| preds.contains(name))
            .map(|(node, _)| node.name.as_str())
            .collect()
    }

    /// Reverse index: node name → direct dependents
    pub fn reverse_index(&self) -> HashMap<&str, Vec<&str>> {
        let mut reverse: HashMap<&str, Vec<&str>> = self
            .nodes
            .iter()
            .map(|node| (node.name.as_str(), Vec::new()))
            .collect();
        for (node, preds) in self.nodes.iter().zip(&self.predecessors) {
            for pred in preds {
                if let Some(dependents) = reverse.get_mut(pred.as_str()) {
                    dependents.push(node.name.as_str());
                }
            }
        }
        reverse
    }

    /// Every predecessor must name a declared node
    pub fn validate(&self) -> Result<()> {
        for (node, preds) in self.nodes.iter().zip(&self.predecessors) {
            if let Some(missing) = preds.iter().find(|p| !self.index.contains_key(*p)) {
                return Err(StackError::Configuration(format!(
                    "resource '{}' depends on undeclared resource '{}'",
                    node.name, missing
                )));
            }
        }
        Ok(())
    }

    /// Provisioning order: every node after all of its predecessors
    ///
    /// Depth-first over nodes in insertion order, visiting predecessors in
    /// insertion order as well, so the same declarations always yield the
    /// same order. A cycle yields `CyclicDependency` with the offending path.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        self.validate()?;

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        for start in 0..self.nodes.len() {
            self.visit(start, &mut marks, &mut stack, &mut order)?;
        }

        Ok(order
            .into_iter()
            .map(|i| self.nodes[i].name.clone())
            .collect())
    }

    fn visit(
        &self,
        node: usize,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<()> {
        match marks[node] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                let from = stack.iter().position(|&i| i == node).unwrap_or(0);
                let mut path: Vec<String> = stack[from..]
                    .iter()
                    .map(|&i| self.nodes[i].name.clone())
                    .collect();
                path.push(self.nodes[node].name.clone());
                return Err(StackError::CyclicDependency { path });
            }
            Mark::Unvisited => {}
        }

        marks[node] = Mark::Visiting;
        stack.push(node);
        for pred in self.sorted_predecessors(node) {
            self.visit(pred, marks, stack, order)?;
        }
        stack.pop();
        marks[node] = Mark::Done;
        order.push(node);
        Ok(())
    }

    fn sorted_predecessors(&self, node: usize) -> Vec<usize> {
        let mut preds: Vec<usize> = self.predecessors[node]
            .iter()
            .filter_map(|name| self.index.get(name).copied())
            .collect();
        preds.sort_unstable();
        preds
    }

    /// Every node that transitively depends on `name`, in insertion order
    pub fn descendants(&self, name: &str) -> Vec<String> {
        let reverse = self.reverse_index();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([name]);
        while let Some(current) = queue.pop_front() {
            for &dependent in reverse.get(current).into_iter().flatten() {
                if seen.insert(self.index[dependent]) {
                    queue.push_back(dependent);
                }
            }
        }
        seen.into_iter().map(|i| self.nodes[i].name.clone()).collect()
    }

    /// Every node `name` transitively depends on, in insertion order
    pub fn predecessor_chain(&self, name: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.index.get(name).copied().into_iter().collect();
        while let Some(current) = queue.pop_front() {
            for pred in self.sorted_predecessors(current) {
                if seen.insert(pred) {
                    queue.push_back(pred);
                }
            }
        }
        seen.into_iter().map(|i| self.nodes[i].name.clone()).collect()
    }
}
