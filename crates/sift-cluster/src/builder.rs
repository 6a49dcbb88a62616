//! Per-block cluster builder.
//!
//! For one block, builds a transient union-find over every address the
//! block touches, resolves addresses against persisted cluster state in a
//! single batched lookup, and emits a minimal set of instructions:
//! brand-new clusters for nodes with no persisted backing, and merge
//! instructions (target, sources, new members) for nodes that span one or
//! more persisted clusters.
//!
//! The union-find is an arena of records addressed by integer index with
//! parent pointers and path halving; merging reassigns indices and drains
//! record data into the surviving root, never mutating through shared
//! references.

use std::collections::{BTreeSet, HashMap};

use sift_core::error::SiftError;
use sift_core::types::{Address, Block, ClusterId};

/// Read access to persisted cluster state, batched where it matters.
///
/// `resolve_addresses` is one round trip for all of a block's addresses;
/// the store backs it with a multi-get.
pub trait ClusterResolver {
    /// Persisted cluster of each address, `None` where unknown.
    fn resolve_addresses(&self, addresses: &[Address]) -> Result<Vec<Option<ClusterId>>, SiftError>;

    /// Stored member count of a cluster (0 if the cluster is unknown).
    fn member_count(&self, cluster: ClusterId) -> Result<u64, SiftError>;
}

/// A brand-new cluster: no member had any persisted cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCluster {
    /// Earliest address-creation coordinate among the members.
    pub id: ClusterId,
    /// Initial member addresses.
    pub addresses: Vec<Address>,
}

/// Fold `sources` (and `new_addresses`) into `target`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeInstruction {
    /// Surviving cluster: most stored members, ties broken by lowest id.
    pub target: ClusterId,
    /// Clusters whose members and ledgers move into the target.
    /// Ascending id order; may be empty when only new addresses join.
    pub sources: Vec<ClusterId>,
    /// Addresses with no prior cluster that become target members.
    pub new_addresses: Vec<Address>,
}

/// Everything one block asks of the persistence layer, in a stable order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockPlan {
    /// Clusters to create.
    pub creations: Vec<NewCluster>,
    /// Merges to apply.
    pub merges: Vec<MergeInstruction>,
}

impl BlockPlan {
    /// Whether the block requires no cluster mutations at all.
    pub fn is_empty(&self) -> bool {
        self.creations.is_empty() && self.merges.is_empty()
    }
}

/// Transient per-node record, valid at union-find roots.
#[derive(Default)]
struct NodeRecord {
    /// Addresses with no persisted cluster.
    addresses: Vec<Address>,
    /// Persisted clusters this node spans.
    persisted: BTreeSet<ClusterId>,
    /// Earliest creation coordinate among `addresses`.
    earliest: Option<ClusterId>,
}

/// Per-block transient union-find. Construct fresh for every block.
pub struct ClusterBuilder<'a, R: ClusterResolver> {
    resolver: &'a R,
    parent: Vec<usize>,
    records: Vec<NodeRecord>,
    addr_node: HashMap<Address, usize>,
    cluster_node: HashMap<ClusterId, usize>,
}

impl<'a, R: ClusterResolver> ClusterBuilder<'a, R> {
    /// Create a builder resolving against the given persisted state.
    pub fn new(resolver: &'a R) -> Self {
        Self {
            resolver,
            parent: Vec::new(),
            records: Vec::new(),
            addr_node: HashMap::new(),
            cluster_node: HashMap::new(),
        }
    }

    /// Process one block and emit its plan.
    pub fn process_block(mut self, block: &Block) -> Result<BlockPlan, SiftError> {
        // One batched lookup for every distinct address in the block.
        let mut order = Vec::new();
        let mut seen: HashMap<&Address, ()> = HashMap::new();
        for tx in &block.transactions {
            for coin in tx.inputs.iter().chain(tx.outputs.iter()) {
                if let Some(addr) = &coin.address {
                    if seen.insert(addr, ()).is_none() {
                        order.push(addr.clone());
                    }
                }
            }
        }
        let resolved = self.resolver.resolve_addresses(&order)?;
        let persisted: HashMap<Address, ClusterId> = order
            .into_iter()
            .zip(resolved)
            .filter_map(|(addr, cluster)| cluster.map(|c| (addr, c)))
            .collect();

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let tx_index = tx_index as u64;

            // Common-input-ownership: union all resolvable input addresses
            // of a non-mixing transaction. Mixing transactions (CoinJoin
            // shape) contribute no unions; their outputs still seed below.
            if !tx.is_mixing() {
                let mut joined: Option<usize> = None;
                for (input_index, coin) in tx.inputs.iter().enumerate() {
                    let Some(addr) = &coin.address else { continue };
                    let node = self.node_for_input(
                        addr,
                        &persisted,
                        block.height,
                        tx_index,
                        tx.outputs.len() as u64 + input_index as u64,
                    );
                    joined = Some(match joined {
                        Some(prev) => self.union(prev, node),
                        None => node,
                    });
                }
            }

            // Outputs never union with anything; an unseen output address
            // seeds a singleton node at its creation coordinate.
            for (output_index, coin) in tx.outputs.iter().enumerate() {
                let Some(addr) = &coin.address else { continue };
                if self.addr_node.contains_key(addr) || persisted.contains_key(addr) {
                    continue;
                }
                let id = ClusterId::new(block.height, tx_index, output_index as u64);
                self.seed_node(addr.clone(), Some(id));
            }
        }

        self.finalize()
    }

    /// Node for an input address: pending node, persisted cluster node, or
    /// a fresh node at a fallback coordinate past the output index space.
    fn node_for_input(
        &mut self,
        addr: &Address,
        persisted: &HashMap<Address, ClusterId>,
        height: u64,
        tx_index: u64,
        fallback_index: u64,
    ) -> usize {
        if let Some(&node) = self.addr_node.get(addr) {
            return self.find(node);
        }
        if let Some(&cluster) = persisted.get(addr) {
            if let Some(&node) = self.cluster_node.get(&cluster) {
                let root = self.find(node);
                self.addr_node.insert(addr.clone(), root);
                return root;
            }
            let node = self.push_node(NodeRecord {
                persisted: BTreeSet::from([cluster]),
                ..NodeRecord::default()
            });
            self.cluster_node.insert(cluster, node);
            self.addr_node.insert(addr.clone(), node);
            return node;
        }
        // First sighting of this address anywhere is as an input. The
        // fallback coordinate lives past the transaction's output index
        // range so it cannot collide with an output-seeded id.
        self.seed_node(addr.clone(), Some(ClusterId::new(height, tx_index, fallback_index)))
    }

    fn seed_node(&mut self, addr: Address, earliest: Option<ClusterId>) -> usize {
        let node = self.push_node(NodeRecord {
            addresses: vec![addr.clone()],
            earliest,
            ..NodeRecord::default()
        });
        self.addr_node.insert(addr, node);
        node
    }

    fn push_node(&mut self, record: NodeRecord) -> usize {
        let idx = self.parent.len();
        self.parent.push(idx);
        self.records.push(record);
        idx
    }

    /// Root of `node`, with path halving.
    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    /// Union two nodes, draining the absorbed record into the new root.
    fn union(&mut self, a: usize, b: usize) -> usize {
        let (root_a, root_b) = (self.find(a), self.find(b));
        if root_a == root_b {
            return root_a;
        }
        self.parent[root_b] = root_a;
        let absorbed = std::mem::take(&mut self.records[root_b]);
        let keep = &mut self.records[root_a];
        keep.addresses.extend(absorbed.addresses);
        keep.persisted.extend(absorbed.persisted);
        keep.earliest = match (keep.earliest, absorbed.earliest) {
            (Some(x), Some(y)) => Some(x.min(y)),
            (x, y) => x.or(y),
        };
        root_a
    }

    /// Turn the surviving roots into creations and merges.
    fn finalize(mut self) -> Result<BlockPlan, SiftError> {
        let mut plan = BlockPlan::default();
        for node in 0..self.parent.len() {
            if self.find(node) != node {
                continue;
            }
            let record = std::mem::take(&mut self.records[node]);
            match record.persisted.len() {
                0 => {
                    // Seeded nodes always carry a coordinate.
                    let Some(id) = record.earliest else { continue };
                    plan.creations.push(NewCluster { id, addresses: record.addresses });
                }
                1 if record.addresses.is_empty() => {
                    // Every member already sits in this one cluster.
                }
                _ => {
                    let target = self.pick_target(&record.persisted)?;
                    let sources =
                        record.persisted.into_iter().filter(|&c| c != target).collect();
                    plan.merges.push(MergeInstruction {
                        target,
                        sources,
                        new_addresses: record.addresses,
                    });
                }
            }
        }
        tracing::debug!(
            creations = plan.creations.len(),
            merges = plan.merges.len(),
            "block plan finalized"
        );
        Ok(plan)
    }

    /// Merge target: most stored members, tie-break lowest id.
    ///
    /// The tie-break must stay exactly this; membership and ledger scan
    /// order depend on stable target selection across repeated runs.
    fn pick_target(&self, candidates: &BTreeSet<ClusterId>) -> Result<ClusterId, SiftError> {
        let mut best: Option<(u64, ClusterId)> = None;
        // Ascending id iteration makes "first wins" the lowest-id tie-break.
        for &cluster in candidates {
            let count = self.resolver.member_count(cluster)?;
            if best.is_none_or(|(best_count, _)| count > best_count) {
                best = Some((count, cluster));
            }
        }
        match best {
            Some((_, cluster)) => Ok(cluster),
            // Unreachable: finalize only calls this for nodes with
            // persisted backing.
            None => Err(sift_core::error::ClusterError::EmptyCluster.into()),
        }
    }
}
