use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Index;

use log::debug;
use petgraph::algo::kosaraju_scc;
use petgraph::graph::NodeIndex;
use petgraph::Graph;

use super::sparse::SparseMatrix;
use super::value_type::SolverValue;

/// States of an end component together with the choices (global row
/// indices) that never leave it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaximalEndComponent {
    choices: BTreeMap<usize, BTreeSet<usize>>,
}

impl MaximalEndComponent {
    pub fn new() -> MaximalEndComponent {
        MaximalEndComponent::default()
    }

    pub fn add_state(&mut self, state: usize, choices: BTreeSet<usize>) {
        self.choices.insert(state, choices);
    }

    pub fn contains_state(&self, state: usize) -> bool {
        self.choices.contains_key(&state)
    }

    pub fn contains_choice(&self, state: usize, choice: usize) -> bool {
        self.choices.get(&state).map_or(false, |choices| choices.contains(&choice))
    }

    pub fn choices_for_state(&self, state: usize) -> Option<&BTreeSet<usize>> {
        self.choices.get(&state)
    }

    /// States in ascending order.
    pub fn states(&self) -> impl Iterator<Item = usize> + '_ {
        self.choices.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BTreeSet<usize>)> + '_ {
        self.choices.iter().map(|(state, choices)| (*state, choices))
    }

    pub fn size(&self) -> usize {
        self.choices.len()
    }

    pub fn smallest_state(&self) -> Option<usize> {
        self.choices.keys().next().copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaximalEndComponentDecomposition {
    mecs: Vec<MaximalEndComponent>,
}

impl MaximalEndComponentDecomposition {
    /// Decomposes the whole system. `backward` is the transposed matrix, one
    /// row per state listing its predecessors.
    ///
    /// Starting from all states and all choices, repeatedly computes the SCCs
    /// of the graph induced by the remaining choices, drops every choice that
    /// can leave its SCC, and removes states left without choices together
    /// with the choices of predecessors that lead into them. The fixpoint SCCs
    /// are the MECs.
    pub fn new<V: SolverValue>(matrix: &SparseMatrix<V>, backward: &SparseMatrix<V>) -> MaximalEndComponentDecomposition {
        let n = matrix.row_group_count();
        debug_assert_eq!(backward.row_count(), n);
        let mut remaining = vec![true; n];
        let mut allowed: Vec<BTreeSet<usize>> = (0..n)
            .map(|state| matrix.row_group(state).filter(|row| !matrix.row(*row).is_empty()).collect())
            .collect();

        let mut rounds = 0usize;
        let components = loop {
            rounds += 1;
            let (components, scc_of) = strongly_connected_components(matrix, &remaining, &allowed);

            let mut changed = false;
            let mut removed: VecDeque<usize> = VecDeque::new();
            for state in 0..n {
                if !remaining[state] {
                    continue;
                }
                let before = allowed[state].len();
                allowed[state].retain(|row| {
                    matrix
                        .row(*row)
                        .iter()
                        .filter(|entry| !entry.value.is_zero())
                        .all(|entry| remaining[entry.column] && scc_of[entry.column] == scc_of[state])
                });
                changed |= allowed[state].len() != before;
                if allowed[state].is_empty() {
                    remaining[state] = false;
                    removed.push_back(state);
                }
            }

            // choices of predecessors leading into removed states go as well
            while let Some(state) = removed.pop_front() {
                for entry in backward.row(state) {
                    let predecessor = entry.column;
                    if !remaining[predecessor] {
                        continue;
                    }
                    let before = allowed[predecessor].len();
                    allowed[predecessor].retain(|row| {
                        !matrix
                            .row(*row)
                            .iter()
                            .any(|e| e.column == state && !e.value.is_zero())
                    });
                    if allowed[predecessor].len() != before && allowed[predecessor].is_empty() {
                        remaining[predecessor] = false;
                        removed.push_back(predecessor);
                    }
                }
            }

            if !changed {
                break components;
            }
        };

        let mut mecs: Vec<MaximalEndComponent> = components
            .into_iter()
            .filter_map(|component| {
                let mut mec = MaximalEndComponent::new();
                for state in component.into_iter().filter(|s| remaining[*s]) {
                    mec.add_state(state, allowed[state].clone());
                }
                if mec.size() == 0 {
                    None
                } else {
                    Some(mec)
                }
            })
            .collect();
        mecs.sort_by_key(MaximalEndComponent::smallest_state);
        debug!("Found {} maximal end components after {} refinement rounds.", mecs.len(), rounds);
        MaximalEndComponentDecomposition { mecs }
    }

    pub fn len(&self) -> usize {
        self.mecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mecs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MaximalEndComponent> {
        self.mecs.iter()
    }

    /// MEC index per state, `None` for states outside every MEC.
    pub fn state_to_mec(&self, number_of_states: usize) -> Vec<Option<usize>> {
        let mut mapping = vec![None; number_of_states];
        for (index, mec) in self.mecs.iter().enumerate() {
            for state in mec.states() {
                mapping[state] = Some(index);
            }
        }
        mapping
    }
}

impl Index<usize> for MaximalEndComponentDecomposition {
    type Output = MaximalEndComponent;

    fn index(&self, index: usize) -> &MaximalEndComponent {
        &self.mecs[index]
    }
}

impl<'a> IntoIterator for &'a MaximalEndComponentDecomposition {
    type Item = &'a MaximalEndComponent;
    type IntoIter = std::slice::Iter<'a, MaximalEndComponent>;

    fn into_iter(self) -> Self::IntoIter {
        self.mecs.iter()
    }
}

/// SCCs of the graph over the remaining states restricted to the allowed
/// choices; returns the components and the component index per state.
fn strongly_connected_components<V: SolverValue>(
    matrix: &SparseMatrix<V>,
    remaining: &[bool],
    allowed: &[BTreeSet<usize>],
) -> (Vec<Vec<usize>>, Vec<usize>) {
    let n = remaining.len();
    let mut graph: Graph<usize, ()> = Graph::new();
    let mut nodes: Vec<Option<NodeIndex>> = vec![None; n];
    for state in (0..n).filter(|s| remaining[*s]) {
        nodes[state] = Some(graph.add_node(state));
    }
    for state in 0..n {
        let source = match nodes[state] {
            Some(node) => node,
            None => continue,
        };
        for row in allowed[state].iter() {
            for entry in matrix.row(*row).iter().filter(|e| !e.value.is_zero()) {
                if let Some(target) = nodes[entry.column] {
                    graph.update_edge(source, target, ());
                }
            }
        }
    }

    let mut scc_of = vec![usize::MAX; n];
    let components: Vec<Vec<usize>> = kosaraju_scc(&graph)
        .into_iter()
        .enumerate()
        .map(|(index, scc)| {
            scc.into_iter()
                .map(|node| {
                    let state = graph[node];
                    scc_of[state] = index;
                    state
                })
                .collect()
        })
        .collect();
    (components, scc_of)
}
