use std::collections::HashMap;

use crate::target::{TargetId, TargetRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    CircularDependency(Vec<String>),
    TargetNotFound(TargetId),
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::CircularDependency(cycle) => {
                write!(f, "Circular dependency detected: ")?;
                for (i, name) in cycle.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{}", name)?;
                }
                Ok(())
            }
            GraphError::TargetNotFound(id) => {
                write!(f, "Target not found in graph: {}", id)
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// One layer of the build schedule. Members keep declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub depth: usize,
    pub members: Vec<TargetId>,
}

/// Levels ordered leaves first: every target's prerequisites live in
/// strictly earlier levels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSchedule {
    levels: Vec<Level>,
}

impl BuildSchedule {
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    #[cfg(test)]
    pub fn depth_of(&self, id: TargetId) -> Option<usize> {
        self.levels
            .iter()
            .find(|level| level.members.contains(&id))
            .map(|level| level.depth)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done(usize),
}

pub struct TargetDependencyGraph {
    names: Vec<String>,
    prerequisites: Vec<Vec<TargetId>>,
}

impl TargetDependencyGraph {
    pub fn from_registry(registry: &TargetRegistry) -> Self {
        let mut by_name: HashMap<String, Vec<TargetId>> = HashMap::new();
        for (id, target) in registry.iter() {
            by_name.entry(target.name.clone()).or_default().push(id);
        }

        let prerequisites = registry
            .targets()
            .iter()
            .map(|target| {
                let mut edges: Vec<TargetId> = Vec::new();
                for dep in &target.dependencies {
                    if let Some(ids) = by_name.get(dep) {
                        for id in ids {
                            if !edges.contains(id) {
                                edges.push(*id);
                            }
                        }
                    }
                }
                edges
            })
            .collect();

        Self {
            names: registry.targets().iter().map(|t| t.name.clone()).collect(),
            prerequisites,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get_dependencies(&self, id: TargetId) -> Result<&[TargetId], GraphError> {
        self.prerequisites
            .get(id.0)
            .map(Vec::as_slice)
            .ok_or(GraphError::TargetNotFound(id))
    }

    /// Longest-path layering: a target sits one level above its deepest
    /// prerequisite, and targets without prerequisites sit at level 0.
    pub fn schedule(&self) -> Result<BuildSchedule, GraphError> {
        let mut marks = vec![Mark::Unvisited; self.len()];

        for index in 0..self.len() {
            self.visit(TargetId(index), &mut marks)?;
        }

        let mut levels: Vec<Level> = Vec::new();
        for (index, mark) in marks.iter().enumerate() {
            let Mark::Done(depth) = *mark else {
                continue;
            };

            while levels.len() <= depth {
                levels.push(Level {
                    depth: levels.len(),
                    members: Vec::new(),
                });
            }
            levels[depth].members.push(TargetId(index));
        }

        Ok(BuildSchedule { levels })
    }

    fn visit(&self, start: TargetId, marks: &mut [Mark]) -> Result<usize, GraphError> {
        if let Mark::Done(depth) = marks[start.0] {
            return Ok(depth);
        }

        // Explicit stack of (node, next edge to follow) so deep chains do not
        // exhaust the thread stack.
        let mut stack: Vec<(TargetId, usize)> = vec![(start, 0)];
        marks[start.0] = Mark::Visiting;

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let edges = self.get_dependencies(node)?;

            if frame.1 < edges.len() {
                let dep = edges[frame.1];
                frame.1 += 1;

                match marks[dep.0] {
                    Mark::Done(_) => {}
                    Mark::Visiting => return Err(self.cycle_error(&stack, dep)),
                    Mark::Unvisited => {
                        marks[dep.0] = Mark::Visiting;
                        stack.push((dep, 0));
                    }
                }
                continue;
            }

            let depth = edges
                .iter()
                .map(|dep| match marks[dep.0] {
                    Mark::Done(depth) => depth + 1,
                    _ => 0,
                })
                .max()
                .unwrap_or(0);

            marks[node.0] = Mark::Done(depth);
            stack.pop();
        }

        match marks[start.0] {
            Mark::Done(depth) => Ok(depth),
            _ => Err(GraphError::TargetNotFound(start)),
        }
    }

    fn cycle_error(&self, stack: &[(TargetId, usize)], repeated: TargetId) -> GraphError {
        let begin = stack
            .iter()
            .position(|(id, _)| *id == repeated)
            .unwrap_or(0);

        let mut cycle: Vec<String> = stack[begin..]
            .iter()
            .map(|(id, _)| self.names[id.0].clone())
            .collect();
        cycle.push(self.names[repeated.0].clone());

        GraphError::CircularDependency(cycle)
    }
}
