use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::SystemTime;

use crate::dependency_graph::BuildSchedule;
use crate::target::{TargetId, TargetRegistry};

/// Existence and modification-time queries, keyed by target or dependency
/// name interpreted as a path.
pub trait FileSystem {
    /// `None` when the path does not exist.
    fn modified(&self, path: &str) -> Option<SystemTime>;

    fn exists(&self, path: &str) -> bool {
        self.modified(path).is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiskFileSystem {
    root: Option<std::path::PathBuf>,
}

impl DiskFileSystem {
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Resolve relative names against `root` instead of the process cwd.
    pub fn rooted_at<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
        }
    }
}

impl FileSystem for DiskFileSystem {
    fn modified(&self, path: &str) -> Option<SystemTime> {
        let metadata = match &self.root {
            Some(root) => std::fs::metadata(root.join(path)),
            None => std::fs::metadata(path),
        }
        .ok()?;

        Some(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    OutputMissing,
    DependencyMissing(String),
    DependencyNewer(String),
    DependencyRebuilt(String),
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildReason::OutputMissing => write!(f, "output does not exist"),
            RebuildReason::DependencyMissing(dep) => write!(f, "dependency '{}' does not exist", dep),
            RebuildReason::DependencyNewer(dep) => write!(f, "dependency '{}' is newer", dep),
            RebuildReason::DependencyRebuilt(dep) => {
                write!(f, "dependency '{}' is being rebuilt", dep)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleTarget {
    pub id: TargetId,
    pub reason: RebuildReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildGroup {
    pub depth: usize,
    pub targets: Vec<StaleTarget>,
}

impl RebuildGroup {
    pub fn ids(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.targets.iter().map(|stale| stale.id)
    }

    pub fn contains(&self, id: TargetId) -> bool {
        self.targets.iter().any(|stale| stale.id == id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Rebuild groups in execution order. Levels with nothing stale are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildPlan {
    pub groups: Vec<RebuildGroup>,
}

impl RebuildPlan {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn target_count(&self) -> usize {
        self.groups.iter().map(RebuildGroup::len).sum()
    }

    #[cfg(test)]
    pub fn position_of(&self, id: TargetId) -> Option<usize> {
        self.groups.iter().position(|group| group.contains(id))
    }
}

pub struct StalenessPropagator<'a, F: FileSystem + ?Sized> {
    registry: &'a TargetRegistry,
    fs: &'a F,
}

impl<'a, F: FileSystem + ?Sized> StalenessPropagator<'a, F> {
    pub fn new(registry: &'a TargetRegistry, fs: &'a F) -> Self {
        Self { registry, fs }
    }

    /// Walks the schedule leaves first. A whole level is decided before the
    /// next one, using only the groups already decided for earlier levels.
    pub fn plan(&self, schedule: &BuildSchedule) -> RebuildPlan {
        let mut groups: Vec<RebuildGroup> = Vec::new();
        let mut rebuilt: HashSet<&str> = HashSet::new();

        for level in schedule.levels() {
            let mut stale: Vec<StaleTarget> = Vec::new();

            for &id in &level.members {
                let target = &self.registry[id];

                let Some(reason) = self.check(id, &rebuilt) else {
                    continue;
                };

                let already_marked = stale
                    .iter()
                    .any(|s| self.registry[s.id].name == target.name);
                if !already_marked {
                    stale.push(StaleTarget { id, reason });
                }
            }

            if stale.is_empty() {
                continue;
            }

            for s in &stale {
                rebuilt.insert(self.registry[s.id].name.as_str());
            }
            groups.push(RebuildGroup {
                depth: level.depth,
                targets: stale,
            });
        }

        RebuildPlan { groups }
    }

    fn check(&self, id: TargetId, rebuilt: &HashSet<&str>) -> Option<RebuildReason> {
        let target = &self.registry[id];

        let Some(output_time) = self.fs.modified(&target.name) else {
            return Some(RebuildReason::OutputMissing);
        };

        for dep in &target.dependencies {
            match self.fs.modified(dep) {
                None => return Some(RebuildReason::DependencyMissing(dep.clone())),
                Some(dep_time) if dep_time > output_time => {
                    return Some(RebuildReason::DependencyNewer(dep.clone()));
                }
                Some(_) if rebuilt.contains(dep.as_str()) => {
                    return Some(RebuildReason::DependencyRebuilt(dep.clone()));
                }
                Some(_) => {}
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency_graph::TargetDependencyGraph;
    use crate::target::Target;
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryFileSystem {
        files: HashMap<String, SystemTime>,
    }

    impl MemoryFileSystem {
        fn with(mut self, path: &str, age_secs: u64) -> Self {
            let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 - age_secs);
            self.files.insert(path.to_string(), time);
            self
        }
    }

    impl FileSystem for MemoryFileSystem {
        fn modified(&self, path: &str) -> Option<SystemTime> {
            self.files.get(path).copied()
        }
    }

    fn app_registry() -> TargetRegistry {
        TargetRegistry::new(vec![
            Target::new("app", "cc -o app main.o util.o").with_dependencies(["main.o", "util.o"]),
            Target::new("main.o", "cc -c main.c").with_dependencies(["main.c"]),
            Target::new("util.o", "cc -c util.c").with_dependencies(["util.c"]),
        ])
    }

    fn plan(registry: &TargetRegistry, fs: &MemoryFileSystem) -> RebuildPlan {
        let schedule = TargetDependencyGraph::from_registry(registry)
            .schedule()
            .unwrap();
        StalenessPropagator::new(registry, fs).plan(&schedule)
    }

    fn group_names(registry: &TargetRegistry, plan: &RebuildPlan) -> Vec<Vec<String>> {
        plan.groups
            .iter()
            .map(|g| g.ids().map(|id| registry[id].name.clone()).collect())
            .collect()
    }

    #[test]
    fn test_fresh_checkout_rebuilds_everything() {
        let registry = app_registry();
        let fs = MemoryFileSystem::default()
            .with("main.c", 10)
            .with("util.c", 10);

        let plan = plan(&registry, &fs);
        assert_eq!(
            group_names(&registry, &plan),
            vec![vec!["main.o", "util.o"], vec!["app"]]
        );
        assert_eq!(plan.target_count(), 3);
        assert_eq!(plan.groups[1].targets[0].reason, RebuildReason::OutputMissing);
    }

    #[test]
    fn test_touched_source_propagates_to_binary() {
        let registry = app_registry();
        let fs = MemoryFileSystem::default()
            .with("main.c", 1)
            .with("util.c", 50)
            .with("main.o", 40)
            .with("util.o", 40)
            .with("app", 30);

        let plan = plan(&registry, &fs);
        assert_eq!(group_names(&registry, &plan), vec![vec!["main.o"], vec!["app"]]);
        assert_eq!(
            plan.groups[0].targets[0].reason,
            RebuildReason::DependencyNewer("main.c".to_string())
        );
        assert_eq!(
            plan.groups[1].targets[0].reason,
            RebuildReason::DependencyRebuilt("main.o".to_string())
        );
    }

    #[test]
    fn test_everything_up_to_date() {
        let registry = app_registry();
        let fs = MemoryFileSystem::default()
            .with("main.c", 50)
            .with("util.c", 50)
            .with("main.o", 40)
            .with("util.o", 40)
            .with("app", 30);

        assert!(plan(&registry, &fs).is_empty());
    }

    #[test]
    fn test_equal_timestamps_are_up_to_date() {
        let registry = TargetRegistry::new(vec![
            Target::new("out", "cp in out").with_dependencies(["in"]),
        ]);
        let fs = MemoryFileSystem::default().with("in", 5).with("out", 5);

        assert!(plan(&registry, &fs).is_empty());
    }

    #[test]
    fn test_missing_dependency_forces_rebuild() {
        let registry = TargetRegistry::new(vec![
            Target::new("out", "cat a b > out").with_dependencies(["a", "b"]),
        ]);
        let fs = MemoryFileSystem::default().with("a", 50).with("out", 10);

        let plan = plan(&registry, &fs);
        assert_eq!(
            plan.groups[0].targets[0].reason,
            RebuildReason::DependencyMissing("b".to_string())
        );
    }

    #[test]
    fn test_first_matching_reason_wins() {
        let registry = TargetRegistry::new(vec![
            Target::new("out", "build").with_dependencies(["newer", "missing"]),
        ]);
        let fs = MemoryFileSystem::default().with("newer", 1).with("out", 10);

        let plan = plan(&registry, &fs);
        assert_eq!(
            plan.groups[0].targets[0].reason,
            RebuildReason::DependencyNewer("newer".to_string())
        );
    }

    #[test]
    fn test_empty_levels_are_omitted() {
        let registry = TargetRegistry::new(vec![
            Target::new("c", "touch c").with_dependencies(["b"]),
            Target::new("b", "touch b").with_dependencies(["a"]),
            Target::new("a", "touch a").with_dependencies(["src"]),
        ]);
        // Only `c` is missing; `a` and `b` are fresh.
        let fs = MemoryFileSystem::default()
            .with("src", 50)
            .with("a", 40)
            .with("b", 30);

        let plan = plan(&registry, &fs);
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].depth, 2);
        assert_eq!(group_names(&registry, &plan), vec![vec!["c"]]);
    }

    #[test]
    fn test_propagation_is_transitive() {
        let registry = TargetRegistry::new(vec![
            Target::new("d", "touch d").with_dependencies(["c"]),
            Target::new("c", "touch c").with_dependencies(["b"]),
            Target::new("b", "touch b").with_dependencies(["a"]),
            Target::new("a", "touch a").with_dependencies(["src"]),
            Target::new("side", "touch side").with_dependencies(["other"]),
        ]);
        let fs = MemoryFileSystem::default()
            .with("src", 1)
            .with("other", 60)
            .with("a", 50)
            .with("b", 40)
            .with("c", 30)
            .with("d", 20)
            .with("side", 20);

        let plan = plan(&registry, &fs);
        assert_eq!(
            group_names(&registry, &plan),
            vec![vec!["a"], vec!["b"], vec!["c"], vec!["d"]]
        );

        // Every dependent of a rebuilt target lands in a later group.
        let graph = TargetDependencyGraph::from_registry(&registry);
        for (id, _) in registry.iter() {
            for dep in graph.get_dependencies(id).unwrap() {
                if let Some(dep_pos) = plan.position_of(*dep) {
                    let pos = plan.position_of(id).expect("dependent must be rebuilt");
                    assert!(pos > dep_pos);
                }
            }
        }
    }

    #[test]
    fn test_duplicate_names_marked_once_per_level() {
        let registry = TargetRegistry::new(vec![
            Target::new("out", "echo first > out"),
            Target::new("out", "echo second > out"),
        ]);
        let fs = MemoryFileSystem::default();

        let plan = plan(&registry, &fs);
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].targets.len(), 1);
        assert_eq!(plan.groups[0].targets[0].id, TargetId(0));
    }

    #[test]
    fn test_disk_file_system() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.txt"), "x").unwrap();

        let fs = DiskFileSystem::rooted_at(dir.path());
        assert!(fs.exists("present.txt"));
        assert!(!fs.exists("absent.txt"));
        assert!(fs.modified("present.txt").is_some());
    }
}
