use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Scope over which a collective operates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Communicator {
    /// Every process in the pool.
    Pool,
    /// Processes of this worker's group.
    Group,
    /// The group leaders.
    Leaders,
}

/// How a module divides its work across the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivisionStrategy {
    /// Each group takes a slice of the outer loop.
    Groups,
    /// Each process within a group takes a slice of an inner loop.
    GroupProcesses,
    /// Every process performs the same work.
    Pool,
    /// Each process in the pool takes a slice of the loop.
    PoolProcesses,
}

/// Strategy used to subdivide work *within* a scope of the parent strategy.
pub fn sub_division_strategy(strategy: DivisionStrategy) -> DivisionStrategy {
    match strategy {
        DivisionStrategy::Groups => DivisionStrategy::GroupProcesses,
        _ => DivisionStrategy::PoolProcesses,
    }
}

/// Typed message exchanged between pool workers.
#[derive(Debug, Clone)]
enum Payload {
    Token,
    Bool(bool),
    Real(f64),
    RealVec(Vec<f64>),
    UIntVec(Vec<u64>),
}

/// Cumulative wall-clock timer; collective calls can be wrapped in `time` to
/// attribute their cost.
#[derive(Debug, Default)]
pub struct Timer {
    accumulated: Mutex<Duration>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time<R>(&self, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        *self.accumulated.lock() += start.elapsed();
        result
    }

    pub fn total(&self) -> Duration {
        *self.accumulated.lock()
    }
}

/// A cooperating set of workers with three nested communicators: the whole
/// pool, this worker's process group, and the group leaders.
///
/// Workers are shared-nothing; every collective is a blocking synchronisation
/// point for all participants of the chosen scope, implemented over
/// point-to-point channels. No overlapping collectives may be issued in the
/// same scope.
pub struct ProcessPool {
    name: String,
    world_rank: usize,
    /// World ranks of the pool members, in pool-rank order.
    members: Vec<usize>,
    /// Our index within `members`.
    rank: usize,
    /// World ranks per group, in group order.
    groups: Vec<Vec<usize>>,
    group_index: usize,
    group_rank: usize,
    /// World ranks of the group leaders, in group order.
    leaders: Vec<usize>,
    max_process_groups: usize,
    senders: Vec<Sender<Payload>>,
    receivers: Vec<Receiver<Payload>>,
}

impl ProcessPool {
    /// Create a pool of `n` cooperating workers sharing a fully-connected
    /// channel mesh. Initially the pool is a single group.
    pub fn create_many(name: &str, n: usize) -> Vec<ProcessPool> {
        assert!(n > 0, "process pool must contain at least one worker");

        // senders[dst][src] / receivers[dst][src]
        let mut senders: Vec<Vec<Sender<Payload>>> = (0..n).map(|_| Vec::with_capacity(n)).collect();
        let mut receivers: Vec<Vec<Receiver<Payload>>> = (0..n).map(|_| Vec::with_capacity(n)).collect();
        for dst in 0..n {
            for _src in 0..n {
                let (tx, rx) = unbounded();
                senders[dst].push(tx);
                receivers[dst].push(rx);
            }
        }

        // Each worker keeps its own receivers (indexed by source) and one
        // sender per destination
        let all_members: Vec<usize> = (0..n).collect();
        let mut pools = Vec::with_capacity(n);
        for rank in 0..n {
            let my_receivers = receivers.remove(0);
            let my_senders: Vec<Sender<Payload>> = (0..n).map(|dst| senders[dst][rank].clone()).collect();
            pools.push(ProcessPool {
                name: name.to_string(),
                world_rank: rank,
                members: all_members.clone(),
                rank,
                groups: vec![all_members.clone()],
                group_index: 0,
                group_rank: rank,
                leaders: vec![0],
                max_process_groups: 1,
                senders: my_senders,
                receivers: my_receivers,
            });
        }
        pools
    }

    /// Restrict the pool to the given world ranks. Fails with a setup error on
    /// workers that expect to participate but are absent from the list.
    pub fn set_up(&mut self, name: &str, world_ranks: &[usize]) -> Result<()> {
        let rank = world_ranks
            .iter()
            .position(|&r| r == self.world_rank)
            .ok_or_else(|| {
                EngineError::Setup(format!(
                    "local rank {} is not in the world-rank list for pool '{}'",
                    self.world_rank, name
                ))
            })?;

        self.name = name.to_string();
        self.members = world_ranks.to_vec();
        self.rank = rank;
        self.groups = vec![self.members.clone()];
        self.group_index = 0;
        self.group_rank = rank;
        self.leaders = vec![self.members[0]];
        self.max_process_groups = 1;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_master(&self) -> bool {
        self.rank == 0
    }

    pub fn is_group_leader(&self) -> bool {
        self.group_rank == 0
    }

    pub fn group_index(&self) -> usize {
        self.group_index
    }

    pub fn group_rank(&self) -> usize {
        self.group_rank
    }

    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn group_size(&self) -> usize {
        self.groups[self.group_index].len()
    }

    /// Partition the pool into at most `max_groups` contiguous groups of
    /// near-equal size. Each group's local rank 0 becomes its leader; the
    /// leader list is agreed by consensus across the pool.
    pub fn assign_processes_to_groups(&mut self, max_groups: usize) -> Result<()> {
        let n = self.size();
        let n_groups = max_groups.clamp(1, n);

        self.groups.clear();
        self.leaders.clear();
        let base = n / n_groups;
        let extra = n % n_groups;
        let mut next = 0usize;
        for g in 0..n_groups {
            let size = base + usize::from(g < extra);
            let group: Vec<usize> = self.members[next..next + size].to_vec();
            next += size;
            if group.contains(&self.world_rank) {
                self.group_index = g;
                self.group_rank = group.iter().position(|&r| r == self.world_rank).unwrap();
            }
            self.leaders.push(group[0]);
            self.groups.push(group);
        }
        self.max_process_groups = max_groups.max(1);

        // Consensus check: gather each worker's claimed (group, leader) flag
        // and make sure exactly one worker leads each group
        let claims = self.assemble_uint(
            &[self.group_index as u64, u64::from(self.is_group_leader())],
            Communicator::Pool,
        )?;
        let mut leader_counts = vec![0u64; n_groups];
        for pair in claims.chunks(2) {
            if pair[1] != 0 {
                leader_counts[pair[0] as usize] += 1;
            }
        }
        if leader_counts.iter().any(|&c| c != 1) {
            return Err(EngineError::Internal(format!(
                "group leader assignment is inconsistent across pool '{}'",
                self.name
            )));
        }

        debug!(
            "Pool '{}' partitioned into {} group(s); worker {} is rank {} of group {}",
            self.name, n_groups, self.rank, self.group_rank, self.group_index
        );
        Ok(())
    }

    /// Preferred division strategy: by group when the pool strictly exceeds
    /// the number of process groups, by pool otherwise.
    pub fn best_strategy(&self) -> DivisionStrategy {
        if self.size() > self.max_process_groups {
            DivisionStrategy::Groups
        } else {
            DivisionStrategy::Pool
        }
    }

    /// Number of work divisions for the given strategy.
    pub fn strategy_n_divisions(&self, strategy: DivisionStrategy) -> usize {
        match strategy {
            DivisionStrategy::Groups => self.n_groups(),
            DivisionStrategy::GroupProcesses => self.group_size(),
            DivisionStrategy::Pool => 1,
            DivisionStrategy::PoolProcesses => self.size(),
        }
    }

    /// This worker's division index under the given strategy.
    pub fn strategy_index(&self, strategy: DivisionStrategy) -> usize {
        match strategy {
            DivisionStrategy::Groups => self.group_index,
            DivisionStrategy::GroupProcesses => self.group_rank,
            DivisionStrategy::Pool => 0,
            DivisionStrategy::PoolProcesses => self.rank,
        }
    }

    /// Whether loop item `i` belongs to this worker under the strategy.
    pub fn owns_item(&self, strategy: DivisionStrategy, i: usize) -> bool {
        i % self.strategy_n_divisions(strategy) == self.strategy_index(strategy)
    }

    // --- Scope membership ---

    /// World ranks of the members of the communicator, plus our index within
    /// it (None when this worker is not a participant, e.g. a non-leader
    /// touching the leaders' scope, for which collectives are no-ops). The
    /// scope root is always the first member.
    fn scope(&self, comm: Communicator) -> (&[usize], Option<usize>) {
        let members: &[usize] = match comm {
            Communicator::Pool => &self.members,
            Communicator::Group => &self.groups[self.group_index],
            Communicator::Leaders => &self.leaders,
        };
        let index = members.iter().position(|&r| r == self.world_rank);
        (members, index)
    }

    // --- Point-to-point ---

    fn send_payload(&self, to_world: usize, payload: Payload) -> Result<()> {
        self.senders[to_world]
            .send(payload)
            .map_err(|_| EngineError::Communication(format!("send to worker {} failed", to_world)))
    }

    fn recv_payload(&self, from_world: usize) -> Result<Payload> {
        self.receivers[from_world]
            .recv()
            .map_err(|_| EngineError::Communication(format!("receive from worker {} failed", from_world)))
    }

    /// Send a real array to the pool rank specified.
    pub fn send_reals(&self, to_pool_rank: usize, values: &[f64]) -> Result<()> {
        self.send_payload(self.members[to_pool_rank], Payload::RealVec(values.to_vec()))
    }

    /// Receive a real array from the pool rank specified.
    pub fn recv_reals(&self, from_pool_rank: usize) -> Result<Vec<f64>> {
        match self.recv_payload(self.members[from_pool_rank])? {
            Payload::RealVec(v) => Ok(v),
            other => Err(EngineError::Communication(format!(
                "expected real array, received {:?}",
                other
            ))),
        }
    }

    // --- Collectives ---

    /// Block until every member of the scope has arrived.
    pub fn barrier(&self, comm: Communicator) -> Result<()> {
        let (members, index) = self.scope(comm);
        let index = match index {
            Some(i) => i,
            None => return Ok(()),
        };
        if members.len() < 2 {
            return Ok(());
        }
        let root = members[0];
        if index == 0 {
            for &member in &members[1..] {
                match self.recv_payload(member)? {
                    Payload::Token => {}
                    other => {
                        return Err(EngineError::Communication(format!(
                            "barrier expected token, received {:?}",
                            other
                        )))
                    }
                }
            }
            for &member in &members[1..] {
                self.send_payload(member, Payload::Token)?;
            }
        } else {
            self.send_payload(root, Payload::Token)?;
            match self.recv_payload(root)? {
                Payload::Token => {}
                other => {
                    return Err(EngineError::Communication(format!(
                        "barrier expected token, received {:?}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }

    fn broadcast_payload(&self, comm: Communicator, mine: impl FnOnce() -> Payload) -> Result<Payload> {
        let (members, index) = self.scope(comm);
        let index = match index {
            Some(i) => i,
            None => return Ok(mine()),
        };
        if index == 0 {
            let payload = mine();
            for &member in &members[1..] {
                self.send_payload(member, payload.clone())?;
            }
            Ok(payload)
        } else {
            self.recv_payload(members[0])
        }
    }

    /// Broadcast a boolean from the scope root.
    pub fn broadcast_bool(&self, value: bool, comm: Communicator) -> Result<bool> {
        match self.broadcast_payload(comm, || Payload::Bool(value))? {
            Payload::Bool(b) => Ok(b),
            other => Err(EngineError::Communication(format!("expected bool, received {:?}", other))),
        }
    }

    /// Broadcast a real value from the scope root.
    pub fn broadcast_real(&self, value: f64, comm: Communicator) -> Result<f64> {
        match self.broadcast_payload(comm, || Payload::Real(value))? {
            Payload::Real(v) => Ok(v),
            other => Err(EngineError::Communication(format!("expected real, received {:?}", other))),
        }
    }

    /// Broadcast a real array from the scope root, replacing the local copy on
    /// all other members.
    pub fn broadcast_reals(&self, values: &mut Vec<f64>, comm: Communicator) -> Result<()> {
        let taken = std::mem::take(values);
        let payload = self.broadcast_payload(comm, move || Payload::RealVec(taken))?;
        match payload {
            Payload::RealVec(v) => {
                *values = v;
                Ok(())
            }
            other => Err(EngineError::Communication(format!(
                "expected real array, received {:?}",
                other
            ))),
        }
    }

    /// Broadcast an unsigned array from the scope root.
    pub fn broadcast_uints(&self, values: &mut Vec<u64>, comm: Communicator) -> Result<()> {
        let taken = std::mem::take(values);
        let payload = self.broadcast_payload(comm, move || Payload::UIntVec(taken))?;
        match payload {
            Payload::UIntVec(v) => {
                *values = v;
                Ok(())
            }
            other => Err(EngineError::Communication(format!(
                "expected uint array, received {:?}",
                other
            ))),
        }
    }

    /// Element-wise sum across the scope; every member ends with the total.
    pub fn all_sum_real(&self, values: &mut [f64], comm: Communicator) -> Result<()> {
        let (members, index) = self.scope(comm);
        let index = match index {
            Some(i) => i,
            None => return Ok(()),
        };
        if members.len() < 2 {
            return Ok(());
        }
        let root = members[0];
        if index == 0 {
            for &member in &members[1..] {
                match self.recv_payload(member)? {
                    Payload::RealVec(v) if v.len() == values.len() => {
                        for (total, contribution) in values.iter_mut().zip(v) {
                            *total += contribution;
                        }
                    }
                    other => {
                        return Err(EngineError::Communication(format!(
                            "sum reduction expected matching real array, received {:?}",
                            other
                        )))
                    }
                }
            }
            for &member in &members[1..] {
                self.send_payload(member, Payload::RealVec(values.to_vec()))?;
            }
        } else {
            self.send_payload(root, Payload::RealVec(values.to_vec()))?;
            match self.recv_payload(root)? {
                Payload::RealVec(v) if v.len() == values.len() => values.copy_from_slice(&v),
                other => {
                    return Err(EngineError::Communication(format!(
                        "sum reduction expected matching real array, received {:?}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }

    /// Element-wise unsigned sum across the scope.
    pub fn all_sum_uint(&self, values: &mut [u64], comm: Communicator) -> Result<()> {
        let (members, index) = self.scope(comm);
        let index = match index {
            Some(i) => i,
            None => return Ok(()),
        };
        if members.len() < 2 {
            return Ok(());
        }
        let root = members[0];
        if index == 0 {
            for &member in &members[1..] {
                match self.recv_payload(member)? {
                    Payload::UIntVec(v) if v.len() == values.len() => {
                        for (total, contribution) in values.iter_mut().zip(v) {
                            *total += contribution;
                        }
                    }
                    other => {
                        return Err(EngineError::Communication(format!(
                            "sum reduction expected matching uint array, received {:?}",
                            other
                        )))
                    }
                }
            }
            for &member in &members[1..] {
                self.send_payload(member, Payload::UIntVec(values.to_vec()))?;
            }
        } else {
            self.send_payload(root, Payload::UIntVec(values.to_vec()))?;
            match self.recv_payload(root)? {
                Payload::UIntVec(v) if v.len() == values.len() => values.copy_from_slice(&v),
                other => {
                    return Err(EngineError::Communication(format!(
                        "sum reduction expected matching uint array, received {:?}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }

    /// Concatenate each member's chunk in member order; every member receives
    /// the assembled array.
    pub fn assemble_real(&self, local: &[f64], comm: Communicator) -> Result<Vec<f64>> {
        let (members, index) = self.scope(comm);
        let index = match index {
            Some(i) => i,
            None => return Ok(local.to_vec()),
        };
        if members.len() < 2 {
            return Ok(local.to_vec());
        }
        let root = members[0];
        if index == 0 {
            let mut full = local.to_vec();
            for &member in &members[1..] {
                match self.recv_payload(member)? {
                    Payload::RealVec(v) => full.extend(v),
                    other => {
                        return Err(EngineError::Communication(format!(
                            "assemble expected real array, received {:?}",
                            other
                        )))
                    }
                }
            }
            for &member in &members[1..] {
                self.send_payload(member, Payload::RealVec(full.clone()))?;
            }
            Ok(full)
        } else {
            self.send_payload(root, Payload::RealVec(local.to_vec()))?;
            match self.recv_payload(root)? {
                Payload::RealVec(v) => Ok(v),
                other => Err(EngineError::Communication(format!(
                    "assemble expected real array, received {:?}",
                    other
                ))),
            }
        }
    }

    /// Unsigned variant of [`assemble_real`].
    pub fn assemble_uint(&self, local: &[u64], comm: Communicator) -> Result<Vec<u64>> {
        let (members, index) = self.scope(comm);
        let index = match index {
            Some(i) => i,
            None => return Ok(local.to_vec()),
        };
        if members.len() < 2 {
            return Ok(local.to_vec());
        }
        let root = members[0];
        if index == 0 {
            let mut full = local.to_vec();
            for &member in &members[1..] {
                match self.recv_payload(member)? {
                    Payload::UIntVec(v) => full.extend(v),
                    other => {
                        return Err(EngineError::Communication(format!(
                            "assemble expected uint array, received {:?}",
                            other
                        )))
                    }
                }
            }
            for &member in &members[1..] {
                self.send_payload(member, Payload::UIntVec(full.clone()))?;
            }
            Ok(full)
        } else {
            self.send_payload(root, Payload::UIntVec(local.to_vec()))?;
            match self.recv_payload(root)? {
                Payload::UIntVec(v) => Ok(v),
                other => Err(EngineError::Communication(format!(
                    "assemble expected uint array, received {:?}",
                    other
                ))),
            }
        }
    }

    /// True iff every member of the scope reports true, implemented by
    /// reducing a {0,1} count against the scope size.
    pub fn all_true(&self, value: bool, comm: Communicator) -> Result<bool> {
        let (members, index) = self.scope(comm);
        if index.is_none() {
            return Ok(true);
        }
        let scope_size = members.len() as u64;
        let mut count = [u64::from(value)];
        self.all_sum_uint(&mut count, comm)?;
        Ok(count[0] == scope_size)
    }

    /// Master evaluates a predicate and broadcasts the verdict pool-wide; the
    /// same call is made on master and workers.
    pub fn decide(&self, value_on_master: bool) -> Result<bool> {
        self.broadcast_bool(value_on_master, Communicator::Pool)
    }
}
