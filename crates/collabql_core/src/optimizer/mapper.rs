use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::partitioner::SubGraph;
use crate::config::DEFAULT_MAX_WORKERS;
use crate::errors::{CompileError, Result, internal};
use crate::graph::{ExecutionGraph, NodeId};

/// Nodes a single worker runs, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub worker_id: usize,
    pub node_ids: Vec<NodeId>,
}

/// Jobs that may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobBatch {
    pub jobs: Vec<Job>,
    /// All workers must synchronize before the next batch starts.
    pub need_call_barrier_after_jobs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingPolicy {
    pub worker_num: usize,
    pub batches: Vec<JobBatch>,
}

/// Schedule for one party's sub-graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub party: String,
    pub nodes: Vec<NodeId>,
    pub policy: SchedulingPolicy,
}

/// Maps sub-graphs onto a bounded pool of workers.
///
/// Nodes are layered into batches by their longest chain of same-party
/// predecessors. Inputs received from other parties don't order anything
/// locally since the matching receive node already waits for the data.
#[derive(Debug, Clone, Copy)]
pub struct GraphMapper {
    max_workers: usize,
}

impl Default for GraphMapper {
    fn default() -> Self {
        GraphMapper::new(DEFAULT_MAX_WORKERS)
    }
}

impl GraphMapper {
    pub fn new(max_workers: usize) -> Self {
        GraphMapper {
            max_workers: max_workers.max(1),
        }
    }

    pub fn map_all(
        &self,
        graph: &ExecutionGraph,
        sub_graphs: &BTreeMap<String, SubGraph>,
    ) -> Result<BTreeMap<String, ExecutionPlan>> {
        sub_graphs
            .iter()
            .map(|(party, sub)| Ok((party.clone(), self.map(graph, sub)?)))
            .collect()
    }

    pub fn map(&self, graph: &ExecutionGraph, sub_graph: &SubGraph) -> Result<ExecutionPlan> {
        let order = local_topological_order(graph, sub_graph)?;

        let mut batch_of: BTreeMap<NodeId, usize> = BTreeMap::new();
        for &id in &order {
            let batch = local_inputs(graph, sub_graph, id)?
                .filter_map(|input| batch_of.get(&input))
                .map(|b| b + 1)
                .max()
                .unwrap_or(0);
            batch_of.insert(id, batch);
        }

        let mut layers: Vec<Vec<NodeId>> = Vec::new();
        for (&id, &batch) in &batch_of {
            if layers.len() <= batch {
                layers.resize_with(batch + 1, Vec::new);
            }
            layers[batch].push(id);
        }

        let width = layers.iter().map(|l| l.len()).max().unwrap_or(0);
        let worker_num = width.clamp(1, self.max_workers);

        let mut assigned = vec![0usize; worker_num];
        let mut worker_of: BTreeMap<NodeId, usize> = BTreeMap::new();
        let mut batches = Vec::with_capacity(layers.len());

        for layer in &layers {
            let mut jobs: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
            for &id in layer {
                let worker = least_loaded(&assigned);
                assigned[worker] += 1;
                worker_of.insert(id, worker);
                jobs.entry(worker).or_default().push(id);
            }
            batches.push(JobBatch {
                jobs: jobs
                    .into_iter()
                    .map(|(worker_id, node_ids)| Job {
                        worker_id,
                        node_ids,
                    })
                    .collect(),
                need_call_barrier_after_jobs: false,
            });
        }

        // A dependency handed over between workers needs the producing batch
        // to finish everywhere first.
        for (&id, &worker) in &worker_of {
            for input in local_inputs(graph, sub_graph, id)? {
                if worker_of.get(&input) != Some(&worker) {
                    let batch = batch_of
                        .get(&input)
                        .ok_or_else(|| internal!("Missing batch for node {input}"))?;
                    batches[*batch].need_call_barrier_after_jobs = true;
                }
            }
        }

        debug!(
            party = %sub_graph.party,
            nodes = sub_graph.len(),
            batches = batches.len(),
            worker_num,
            "mapped sub-graph"
        );

        Ok(ExecutionPlan {
            party: sub_graph.party.clone(),
            nodes: sub_graph.nodes.clone(),
            policy: SchedulingPolicy {
                worker_num,
                batches,
            },
        })
    }
}

/// Worker with the fewest nodes so far, lowest id on ties.
fn least_loaded(assigned: &[usize]) -> usize {
    assigned
        .iter()
        .enumerate()
        .min_by_key(|(idx, count)| (**count, *idx))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

/// Inputs of `id` that run on the same party.
fn local_inputs<'a>(
    graph: &'a ExecutionGraph,
    sub_graph: &'a SubGraph,
    id: NodeId,
) -> Result<impl Iterator<Item = NodeId> + 'a> {
    let node = graph
        .node(id)
        .ok_or_else(|| CompileError::Partition(format!("node {id} not in graph")))?;
    if node.party != sub_graph.party {
        return Err(CompileError::Partition(format!(
            "node {id} of party {} in sub-graph of {}",
            node.party, sub_graph.party
        )));
    }
    Ok(node
        .inputs
        .iter()
        .copied()
        .filter(move |input| sub_graph.contains(*input)))
}

/// Order the sub-graph so inputs come before the nodes reading them, lowest
/// id first among the ready nodes.
fn local_topological_order(graph: &ExecutionGraph, sub_graph: &SubGraph) -> Result<Vec<NodeId>> {
    let mut pending: BTreeMap<NodeId, usize> = BTreeMap::new();
    let mut readers: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    for &id in &sub_graph.nodes {
        let inputs: Vec<_> = local_inputs(graph, sub_graph, id)?.collect();
        pending.insert(id, inputs.len());
        for input in inputs {
            readers.entry(input).or_default().push(id);
        }
    }

    let mut ready: BTreeSet<NodeId> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(sub_graph.len());

    while let Some(id) = ready.pop_first() {
        order.push(id);
        for reader in readers.get(&id).into_iter().flatten() {
            if let Some(count) = pending.get_mut(reader) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*reader);
                }
            }
        }
    }

    if order.len() != sub_graph.len() {
        return Err(internal!(
            "Sub-graph of {} is not acyclic",
            sub_graph.party
        ));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::catalog::Field;
    use crate::graph::OperatorKind;
    use crate::graph::builder::GraphBuilder;
    use crate::graph::checker::GraphChecker;
    use crate::optimizer::partitioner::{NaivePartition, PartitionStrategy};

    const PARTIES: [&str; 3] = ["alice", "bob", "carol"];

    fn source(builder: &mut GraphBuilder, party: &str) -> NodeId {
        builder.add_node(
            party,
            OperatorKind::Limit {
                limit: 1,
                offset: 0,
            },
            Vec::new(),
            vec![Field::new("c", None)],
        )
    }

    fn union(builder: &mut GraphBuilder, party: &str, inputs: Vec<NodeId>) -> NodeId {
        builder.add_node(
            party,
            OperatorKind::Union { all: true },
            inputs,
            vec![Field::new("c", None)],
        )
    }

    fn parties() -> Vec<String> {
        PARTIES.iter().map(|p| p.to_string()).collect()
    }

    /// Alice join of a local source and one received from bob.
    fn two_party_join() -> ExecutionGraph {
        let mut builder = GraphBuilder::new();
        let a = source(&mut builder, "alice");
        let b = source(&mut builder, "bob");
        let r = builder.transfer(b, "alice").unwrap();
        let join = union(&mut builder, "alice", vec![a, r]);
        builder.build(join, parties()).unwrap()
    }

    fn schedule(graph: &ExecutionGraph, max_workers: usize) -> BTreeMap<String, ExecutionPlan> {
        let subs = NaivePartition.partition(graph).unwrap();
        GraphMapper::new(max_workers).map_all(graph, &subs).unwrap()
    }

    #[test]
    fn join_with_received_input() {
        let plans = schedule(&two_party_join(), 4);

        let alice = &plans["alice"].policy;
        assert_eq!(2, alice.worker_num);
        assert_eq!(
            vec![
                JobBatch {
                    jobs: vec![
                        Job {
                            worker_id: 0,
                            node_ids: vec![NodeId(0)],
                        },
                        Job {
                            worker_id: 1,
                            node_ids: vec![NodeId(3)],
                        },
                    ],
                    need_call_barrier_after_jobs: true,
                },
                JobBatch {
                    jobs: vec![Job {
                        worker_id: 0,
                        node_ids: vec![NodeId(4)],
                    }],
                    need_call_barrier_after_jobs: false,
                },
            ],
            alice.batches
        );

        // Source then send, one worker.
        let bob = &plans["bob"].policy;
        assert_eq!(1, bob.worker_num);
        assert_eq!(2, bob.batches.len());
        assert!(bob.batches.iter().all(|b| !b.need_call_barrier_after_jobs));

        let carol = &plans["carol"];
        assert!(carol.nodes.is_empty());
        assert_eq!(1, carol.policy.worker_num);
        assert!(carol.policy.batches.is_empty());
    }

    #[test]
    fn single_node() {
        let mut builder = GraphBuilder::new();
        let a = source(&mut builder, "alice");
        let graph = builder.build(a, vec!["alice".to_string()]).unwrap();

        let plans = schedule(&graph, 4);
        let policy = &plans["alice"].policy;
        assert_eq!(1, policy.worker_num);
        assert_eq!(1, policy.batches.len());
        assert!(!policy.batches[0].need_call_barrier_after_jobs);
    }

    #[test]
    fn workers_capped() {
        let mut builder = GraphBuilder::new();
        let sources: Vec<_> = (0..6).map(|_| source(&mut builder, "alice")).collect();
        let root = union(&mut builder, "alice", sources);
        let graph = builder.build(root, vec!["alice".to_string()]).unwrap();

        let policy = &schedule(&graph, 4)["alice"].policy;
        assert_eq!(4, policy.worker_num);
        let first: Vec<_> = policy.batches[0]
            .jobs
            .iter()
            .map(|j| (j.worker_id, j.node_ids.len()))
            .collect();
        assert_eq!(vec![(0, 2), (1, 2), (2, 1), (3, 1)], first);
        assert!(policy.batches[0].need_call_barrier_after_jobs);

        let policy = &schedule(&graph, 0)["alice"].policy;
        assert_eq!(1, policy.worker_num);
        assert!(policy.batches.iter().all(|b| !b.need_call_barrier_after_jobs));
    }

    fn random_graph(rng: &mut ChaCha8Rng) -> ExecutionGraph {
        let mut builder = GraphBuilder::new();
        // Nodes other operators may read, transfers excluded.
        let mut readable = Vec::new();

        for _ in 0..rng.random_range(1..40) {
            let party = PARTIES[rng.random_range(0..PARTIES.len())];
            if readable.is_empty() || rng.random_bool(0.3) {
                readable.push(source(&mut builder, party));
                continue;
            }

            let mut inputs = Vec::new();
            for _ in 0..rng.random_range(1..=3) {
                let input = readable[rng.random_range(0..readable.len())];
                let input = builder.transfer(input, party).unwrap();
                if !inputs.contains(&input) {
                    inputs.push(input);
                }
            }
            readable.push(union(&mut builder, party, inputs));
        }

        let root = *readable.last().unwrap();
        builder.build(root, parties()).unwrap()
    }

    #[test]
    fn random_graphs_partition_and_schedule() {
        for seed in 0..200 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let graph = random_graph(&mut rng);
            GraphChecker::new().check(&graph).unwrap();

            let subs = NaivePartition.partition(&graph).unwrap();
            let mut seen = vec![0; graph.nodes.len()];
            for (party, sub) in &subs {
                for id in &sub.nodes {
                    assert_eq!(party, &graph.nodes[id.0].party, "seed {seed}");
                    seen[id.0] += 1;
                }
            }
            assert!(seen.iter().all(|c| *c == 1), "seed {seed}: {seen:?}");

            let max_workers = rng.random_range(1..6);
            let mapper = GraphMapper::new(max_workers);
            let plans = mapper.map_all(&graph, &subs).unwrap();
            assert_eq!(plans, mapper.map_all(&graph, &subs).unwrap());

            for (party, plan) in &plans {
                let policy = &plan.policy;
                assert!((1..=max_workers).contains(&policy.worker_num));

                let mut placed = BTreeMap::new();
                for (batch_idx, batch) in policy.batches.iter().enumerate() {
                    for job in &batch.jobs {
                        assert!(job.worker_id < policy.worker_num);
                        for id in &job.node_ids {
                            assert!(placed.insert(*id, (batch_idx, job.worker_id)).is_none());
                        }
                    }
                }
                assert_eq!(subs[party].nodes, placed.keys().copied().collect::<Vec<_>>());

                for (id, (batch, worker)) in &placed {
                    for input in &graph.nodes[id.0].inputs {
                        let Some((in_batch, in_worker)) = placed.get(input) else {
                            // Received from another party.
                            continue;
                        };
                        assert!(in_batch < batch, "seed {seed}: {input} -> {id}");
                        if in_worker != worker {
                            assert!(
                                policy.batches[*in_batch].need_call_barrier_after_jobs,
                                "seed {seed}: {input} -> {id}"
                            );
                        }
                    }
                }
            }
        }
    }
}
