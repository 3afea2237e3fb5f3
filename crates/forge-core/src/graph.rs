//! Rule dependency graph.
//!
//! One node per rule in the project, one edge per rule-typed reference in
//! `srcs ∪ deps`, pointing from the referenced rule (predecessor) to the
//! referencing rule (dependent). Construction fails on dangling references,
//! duplicate full paths, and cycles; a found cycle is reported concretely.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use crate::error::{BuildReason, BuildResult, err};
use crate::project::Project;
use crate::rule::RuleHandle;

#[derive(Debug)]
pub struct RuleGraph {
    nodes: Vec<RuleHandle>,
    index: HashMap<String, usize>,
    /// Edges predecessor → dependents.
    dependents: Vec<Vec<usize>>,
    /// Edges dependent → predecessors.
    predecessors: Vec<Vec<usize>>,
}

impl RuleGraph {
    /// Build the graph over every rule currently loaded in the project.
    pub fn build(project: &Project) -> BuildResult<Self> {
        let nodes = project.rules();
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, rule) in nodes.iter().enumerate() {
            let path = rule.decl().full_path();
            if index.insert(path.clone(), i).is_some() {
                return Err(err(
                    BuildReason::Programming,
                    format!("rule \"{path}\" present multiple times"),
                ));
            }
        }

        let mut dependents = vec![Vec::new(); nodes.len()];
        let mut predecessors = vec![Vec::new(); nodes.len()];
        for (dependent, rule) in nodes.iter().enumerate() {
            let decl = rule.decl();
            let module_path = decl.parent().map(|p| p.module_path.clone()).unwrap_or_default();
            for reference in decl.rule_refs() {
                let full = Project::normalize_ref(Some(&module_path), reference)?;
                let Some(&predecessor) = index.get(&full) else {
                    return Err(err(
                        BuildReason::UnknownRule,
                        format!(
                            "rule \"{full}\" (required by \"{}\") not found",
                            decl.full_path(),
                        ),
                    ));
                };
                if !dependents[predecessor].contains(&dependent) {
                    dependents[predecessor].push(dependent);
                    predecessors[dependent].push(predecessor);
                }
            }
        }

        let graph = Self {
            nodes,
            index,
            dependents,
            predecessors,
        };
        graph.check_acyclic()?;
        log::debug!("rule graph built: {} node(s)", graph.nodes.len());
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, rule_path: &str) -> bool {
        self.index.contains_key(rule_path)
    }

    /// True iff `rule_path` transitively needs `predecessor_path`.
    /// Reflexive: every rule depends on itself.
    pub fn depends_on(&self, rule_path: &str, predecessor_path: &str) -> BuildResult<bool> {
        let rule = self.lookup(rule_path)?;
        let predecessor = self.lookup(predecessor_path)?;
        if rule == predecessor {
            return Ok(true);
        }
        // Walk forward from the predecessor towards dependents.
        let mut visited = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([predecessor]);
        visited[predecessor] = true;
        while let Some(node) = queue.pop_front() {
            for &next in &self.dependents[node] {
                if next == rule {
                    return Ok(true);
                }
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }
        Ok(false)
    }

    /// The minimal rule set covering `targets` and all their transitive
    /// predecessors, in a topological order (dependencies first). Ties
    /// among independent rules are broken by rule path, so the sequence is
    /// deterministic for a given input.
    pub fn sequence(&self, targets: &[String]) -> BuildResult<Vec<RuleHandle>> {
        let mut member = vec![false; self.nodes.len()];
        let mut queue = VecDeque::new();
        for target in targets {
            let node = self.lookup(target)?;
            if !member[node] {
                member[node] = true;
                queue.push_back(node);
            }
        }
        while let Some(node) = queue.pop_front() {
            for &pred in &self.predecessors[node] {
                if !member[pred] {
                    member[pred] = true;
                    queue.push_back(pred);
                }
            }
        }

        // Kahn over the induced subgraph; the ready set is keyed by rule
        // path so equal-rank rules pop in path order.
        let mut in_degree = vec![0usize; self.nodes.len()];
        for node in 0..self.nodes.len() {
            if !member[node] {
                continue;
            }
            in_degree[node] = self.predecessors[node]
                .iter()
                .filter(|&&p| member[p])
                .count();
        }

        let mut ready: BTreeMap<String, usize> = (0..self.nodes.len())
            .filter(|&n| member[n] && in_degree[n] == 0)
            .map(|n| (self.nodes[n].decl().full_path(), n))
            .collect();

        let mut order = Vec::new();
        while let Some((_, node)) = ready.pop_first() {
            order.push(Arc::clone(&self.nodes[node]));
            for &next in &self.dependents[node] {
                if !member[next] {
                    continue;
                }
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(self.nodes[next].decl().full_path(), next);
                }
            }
        }

        debug_assert_eq!(order.len(), member.iter().filter(|&&m| m).count());
        Ok(order)
    }

    fn lookup(&self, rule_path: &str) -> BuildResult<usize> {
        self.index.get(rule_path).copied().ok_or_else(|| {
            err(
                BuildReason::UnknownRule,
                format!("rule \"{rule_path}\" not found in graph"),
            )
        })
    }

    /// Kahn pass over the whole graph; leftovers mean a cycle, which is
    /// extracted and reported.
    fn check_acyclic(&self) -> BuildResult<()> {
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&n| in_degree[n] == 0)
            .collect();
        let mut processed = 0;
        while let Some(node) = queue.pop_front() {
            processed += 1;
            for &next in &self.dependents[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        if processed == self.nodes.len() {
            return Ok(());
        }
        let cycle = self.find_cycle(&in_degree);
        Err(err(
            BuildReason::CycleDetected,
            format!("dependency cycle: {}", cycle.join(" -> ")),
        ))
    }

    /// Walk predecessors from an unprocessed node until a node repeats.
    fn find_cycle(&self, in_degree: &[usize]) -> Vec<String> {
        let Some(start) = (0..self.nodes.len()).find(|&n| in_degree[n] > 0) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.nodes.len()];
        let mut path = Vec::new();
        let mut node = start;
        loop {
            if seen[node] {
                // Trim the lead-in so the reported path is exactly the loop.
                let loop_start = path.iter().position(|&n| n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[loop_start..]
                    .iter()
                    .map(|&n: &usize| self.nodes[n].decl().full_path())
                    .collect();
                cycle.push(self.nodes[node].decl().full_path());
                return cycle;
            }
            seen[node] = true;
            path.push(node);
            // Stay inside the cyclic residue: some predecessor still has
            // in-degree > 0.
            node = self.predecessors[node]
                .iter()
                .copied()
                .find(|&p| in_degree[p] > 0)
                .unwrap_or(node);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::rule::{BuildRule, Rule};

    #[derive(Debug)]
    struct PlainRule(Rule);

    impl BuildRule for PlainRule {
        fn decl(&self) -> &Rule {
            &self.0
        }
        fn type_tag(&self) -> &'static str {
            "plain"
        }
    }

    fn plain(name: &str, srcs: &[&str], deps: &[&str]) -> RuleHandle {
        Arc::new(PlainRule(
            Rule::new(
                name,
                srcs.iter().map(|s| s.to_string()).collect(),
                deps.iter().map(|s| s.to_string()).collect(),
                None,
            )
            .unwrap(),
        ))
    }

    fn project(rules: Vec<RuleHandle>) -> Project {
        let project = Project::new("test");
        for rule in rules {
            project.add_rule(rule).unwrap();
        }
        project
    }

    fn paths(rules: &[RuleHandle]) -> Vec<String> {
        rules.iter().map(|r| r.decl().full_path()).collect()
    }

    #[test]
    fn build_simple_graph() {
        let p = project(vec![
            plain("a", &[], &[]),
            plain("b", &[":a"], &[]),
            plain("c", &[], &[":b"]),
        ]);
        let graph = RuleGraph::build(&p).unwrap();
        assert_eq!(graph.len(), 3);
        assert!(graph.contains(":a"));
    }

    #[test]
    fn missing_reference_names_the_dependent() {
        let p = project(vec![plain("a", &[], &[":ghost"])]);
        let error = RuleGraph::build(&p).unwrap_err();
        let message = error.to_string();
        assert!(message.contains(":ghost"), "got: {message}");
        assert!(message.contains(":a"), "got: {message}");
    }

    #[test]
    fn cycle_is_detected_and_reported() {
        let p = project(vec![
            plain("a", &[], &[":b"]),
            plain("b", &[], &[":a"]),
        ]);
        let error = RuleGraph::build(&p).unwrap_err();
        let message = error.to_string();
        assert!(message.contains("cycle"), "got: {message}");
        assert!(message.contains(":a") && message.contains(":b"), "got: {message}");
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let p = project(vec![plain("a", &[], &[":a"])]);
        assert!(RuleGraph::build(&p).is_err());
    }

    #[test]
    fn depends_on_is_reflexive_and_transitive() {
        let p = project(vec![
            plain("a", &[], &[]),
            plain("b", &[":a"], &[]),
            plain("c", &[], &[":b"]),
            plain("d", &[], &[]),
        ]);
        let graph = RuleGraph::build(&p).unwrap();
        assert!(graph.depends_on(":a", ":a").unwrap());
        assert!(graph.depends_on(":b", ":a").unwrap());
        assert!(graph.depends_on(":c", ":a").unwrap());
        assert!(!graph.depends_on(":a", ":c").unwrap());
        assert!(!graph.depends_on(":d", ":a").unwrap());
        assert!(graph.depends_on(":a", ":missing").is_err());
        assert!(graph.depends_on(":missing", ":a").is_err());
    }

    #[test]
    fn sequence_orders_dependencies_first() {
        let p = project(vec![
            plain("c", &[], &[":b"]),
            plain("b", &[":a"], &[]),
            plain("a", &[], &[]),
        ]);
        let graph = RuleGraph::build(&p).unwrap();
        let seq = graph.sequence(&[":c".to_string()]).unwrap();
        assert_eq!(paths(&seq), vec![":a", ":b", ":c"]);
    }

    #[test]
    fn sequence_excludes_unreachable_rules() {
        let p = project(vec![
            plain("a", &[], &[]),
            plain("b", &[":a"], &[]),
            plain("unrelated", &[], &[]),
        ]);
        let graph = RuleGraph::build(&p).unwrap();
        let seq = graph.sequence(&[":b".to_string()]).unwrap();
        assert_eq!(paths(&seq), vec![":a", ":b"]);
    }

    #[test]
    fn sequence_breaks_ties_by_path() {
        let p = project(vec![
            plain("z1", &[], &[]),
            plain("a2", &[], &[]),
            plain("m3", &[], &[]),
            plain("top", &[":z1", ":a2", ":m3"], &[]),
        ]);
        let graph = RuleGraph::build(&p).unwrap();
        let seq = graph.sequence(&[":top".to_string()]).unwrap();
        assert_eq!(paths(&seq), vec![":a2", ":m3", ":z1", ":top"]);
    }

    #[test]
    fn sequence_unions_overlapping_targets_without_duplicates() {
        let p = project(vec![
            plain("base", &[], &[]),
            plain("left", &[":base"], &[]),
            plain("right", &[":base"], &[]),
        ]);
        let graph = RuleGraph::build(&p).unwrap();
        let seq = graph
            .sequence(&[":left".to_string(), ":right".to_string()])
            .unwrap();
        assert_eq!(paths(&seq), vec![":base", ":left", ":right"]);
    }

    #[test]
    fn sequence_unknown_target_is_an_error() {
        let p = project(vec![plain("a", &[], &[])]);
        let graph = RuleGraph::build(&p).unwrap();
        assert!(graph.sequence(&[":ghost".to_string()]).is_err());
    }
}
