//! Shape-only dependency graph of the fragments in one batch.
//!
//! A [`PlanGraph`] is built from the ordered fragment chain of every statement
//! in the batch:
//!
//! 1. **Vertices** -- each fragment occurrence becomes a [`PlanVertex`] whose
//!    round is its offset within its statement's chain. Every vertex gets a
//!    fresh output [`DependencyId`]; its input is the output of the previous
//!    fragment in the same chain (none for the first).
//! 2. **Edges** -- for every vertex with an input, one [`PlanEdge`] from each
//!    vertex producing that dependency. Self-edges and duplicates are skipped.
//! 3. **Flattened projection** -- fragment, input, and output ids as parallel
//!    arrays sorted by `(statement, round, fragment)`, which is all that local
//!    single-partition execution needs.
//!
//! The graph holds no partitions and no parameter values. It depends only on
//! which statements were planned single-partitioned, which is what makes it
//! cacheable in a [`PlanGraphCache`](crate::graph_cache::PlanGraphCache).

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::hash::{Hash, Hasher};

use crate::catalog::{FragmentId, PlanFragment};
use crate::dependency::{DependencyId, DependencyIdAllocator};

/// Structural identity of a vertex: two vertices are the same fragment
/// occurrence iff these three fields match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexKey {
    pub stmt_index: usize,
    pub round: usize,
    pub fragment_id: FragmentId,
}

/// One fragment occurrence within the batch.
#[derive(Clone, Debug)]
pub struct PlanVertex {
    pub fragment_id: FragmentId,
    pub stmt_index: usize,
    pub round: usize,
    /// `None` for the first fragment of a statement chain.
    pub input_dependency: Option<DependencyId>,
    pub output_dependency: DependencyId,
    pub read_only: bool,
}

impl PlanVertex {
    #[must_use]
    pub fn key(&self) -> VertexKey {
        VertexKey {
            stmt_index: self.stmt_index,
            round: self.round,
            fragment_id: self.fragment_id,
        }
    }
}

impl PartialEq for PlanVertex {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PlanVertex {}

impl Hash for PlanVertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Display for PlanVertex {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        let input = self
            .input_dependency
            .map_or_else(|| "NULL".to_string(), |d| d.to_string());
        write!(
            f,
            "<FragId={:02}, StmtIndex={:02}, Round={:02}, Input={input}, Output={}>",
            self.fragment_id, self.stmt_index, self.round, self.output_dependency
        )
    }
}

/// Data flowing from the producer vertex to the consumer vertex.
///
/// Endpoints are indices into [`PlanGraph::vertices`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlanEdge {
    pub producer: usize,
    pub consumer: usize,
    pub dependency: DependencyId,
}

#[derive(Debug)]
pub struct PlanGraph {
    vertices: Vec<PlanVertex>,
    edges: Vec<PlanEdge>,
    output_xref: HashMap<DependencyId, Vec<usize>>,
    round_count: usize,
    fragment_ids: Vec<FragmentId>,
    input_ids: Vec<Option<DependencyId>>,
    output_ids: Vec<DependencyId>,
}

impl PlanGraph {
    /// Build the graph for the given per-statement fragment chains.
    ///
    /// `chains[i]` is statement `i`'s fragments in execution order. Output
    /// dependency ids are drawn from `ids`.
    #[must_use]
    pub fn build(chains: &[&[PlanFragment]], ids: &DependencyIdAllocator) -> Self {
        let mut graph = Self {
            vertices: Vec::new(),
            edges: Vec::new(),
            output_xref: HashMap::new(),
            round_count: 0,
            fragment_ids: Vec::new(),
            input_ids: Vec::new(),
            output_ids: Vec::new(),
        };

        for (stmt_index, chain) in chains.iter().enumerate() {
            graph.round_count = graph.round_count.max(chain.len());
            let mut last_output = None;
            for (round, fragment) in chain.iter().enumerate() {
                let output = ids.next_id();
                graph.add_vertex(PlanVertex {
                    fragment_id: fragment.id,
                    stmt_index,
                    round,
                    input_dependency: last_output,
                    output_dependency: output,
                    read_only: fragment.read_only,
                });
                last_output = Some(output);
            }
        }

        graph.connect_edges();
        graph.flatten();
        graph
    }

    fn add_vertex(&mut self, vertex: PlanVertex) {
        let idx = self.vertices.len();
        self.output_xref
            .entry(vertex.output_dependency)
            .or_default()
            .push(idx);
        self.vertices.push(vertex);
    }

    fn connect_edges(&mut self) {
        let mut seen = HashSet::new();
        for (consumer, vertex) in self.vertices.iter().enumerate() {
            let Some(input) = vertex.input_dependency else {
                continue;
            };
            for &producer in self.output_xref.get(&input).into_iter().flatten() {
                if producer == consumer || !seen.insert((producer, consumer)) {
                    continue;
                }
                self.edges.push(PlanEdge {
                    producer,
                    consumer,
                    dependency: input,
                });
            }
        }
    }

    fn flatten(&mut self) {
        let mut order: Vec<usize> = (0..self.vertices.len()).collect();
        order.sort_by_key(|&i| self.vertices[i].key());

        self.fragment_ids = order.iter().map(|&i| self.vertices[i].fragment_id).collect();
        self.input_ids = order
            .iter()
            .map(|&i| self.vertices[i].input_dependency)
            .collect();
        self.output_ids = order
            .iter()
            .map(|&i| self.vertices[i].output_dependency)
            .collect();
    }

    #[must_use]
    pub fn vertices(&self) -> &[PlanVertex] {
        &self.vertices
    }

    #[must_use]
    pub fn edges(&self) -> &[PlanEdge] {
        &self.edges
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Longest statement chain in the batch.
    #[must_use]
    pub fn round_count(&self) -> usize {
        self.round_count
    }

    /// Vertices producing `dependency`.
    #[must_use]
    pub fn producers_of(&self, dependency: DependencyId) -> &[usize] {
        self.output_xref
            .get(&dependency)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Edges ending at vertex `consumer`.
    pub fn incoming(&self, consumer: usize) -> impl Iterator<Item = &PlanEdge> + '_ {
        self.edges.iter().filter(move |e| e.consumer == consumer)
    }

    #[must_use]
    pub fn fragment_ids(&self) -> &[FragmentId] {
        &self.fragment_ids
    }

    #[must_use]
    pub fn input_ids(&self) -> &[Option<DependencyId>] {
        &self.input_ids
    }

    #[must_use]
    pub fn output_ids(&self) -> &[DependencyId] {
        &self.output_ids
    }
}
