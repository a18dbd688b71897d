use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha12Rng;

use crate::error::Result;
use crate::parallel::pool::{Communicator, DivisionStrategy, ProcessPool, Timer};

/// Number of values generated per refill.
pub const RANDOM_BUFFER_SIZE: usize = 4096;

/// Bulk buffer of uniform random doubles in [0,1), broadcast from a single
/// producer so that every worker in the active scope observes identical
/// draws. The producer is the pool master for pool-wide and leader scopes,
/// and the group leader for group scopes; with no scope the buffer is
/// private.
pub struct RandomBuffer<'a> {
    pool: &'a ProcessPool,
    comm: Option<Communicator>,
    buffer: Vec<f64>,
    index: usize,
    rng: ChaCha12Rng,
    comms_timer: Option<&'a Timer>,
}

impl<'a> RandomBuffer<'a> {
    /// Construct for the given division strategy. All workers construct with
    /// the same seed; only the producer's generator is ever consumed.
    pub fn new(
        pool: &'a ProcessPool,
        strategy: DivisionStrategy,
        seed: u64,
        comms_timer: Option<&'a Timer>,
    ) -> Result<Self> {
        // Fold the pool rank into the seed so that the producers of disjoint
        // scopes (group leaders, private buffers) generate distinct streams;
        // consumers within a scope receive the producer's page regardless
        let rank_salt = (pool.rank() as u64).wrapping_mul(0x9e3779b97f4a7c15);
        let mut buffer = Self {
            pool,
            comm: None,
            buffer: vec![0.0; RANDOM_BUFFER_SIZE],
            index: RANDOM_BUFFER_SIZE,
            rng: ChaCha12Rng::seed_from_u64(seed ^ rank_salt),
            comms_timer,
        };
        buffer.reset(strategy)?;
        Ok(buffer)
    }

    /// Re-scope the buffer for a new strategy and refill it.
    pub fn reset(&mut self, strategy: DivisionStrategy) -> Result<()> {
        self.comm = match strategy {
            DivisionStrategy::Groups => Some(Communicator::Leaders),
            DivisionStrategy::GroupProcesses => Some(Communicator::Group),
            DivisionStrategy::Pool => Some(Communicator::Pool),
            DivisionStrategy::PoolProcesses => None,
        };
        self.refill()
    }

    fn refill(&mut self) -> Result<()> {
        self.index = 0;
        match self.comm {
            None => {
                // Private buffer, no communication
                for value in &mut self.buffer {
                    *value = self.rng.gen::<f64>();
                }
                Ok(())
            }
            Some(comm) => {
                let is_producer = match comm {
                    Communicator::Pool | Communicator::Leaders => self.pool.is_master(),
                    Communicator::Group => self.pool.is_group_leader(),
                };
                if is_producer {
                    for value in &mut self.buffer {
                        *value = self.rng.gen::<f64>();
                    }
                }
                match self.comms_timer {
                    Some(timer) => timer.time(|| self.pool.broadcast_reals(&mut self.buffer, comm)),
                    None => self.pool.broadcast_reals(&mut self.buffer, comm),
                }
            }
        }
    }

    /// Next value in [0,1); the buffer transparently refills when exhausted.
    pub fn random(&mut self) -> f64 {
        if self.index == self.buffer.len() {
            // A failed refill leaves the previous page in place; draws remain
            // consistent within the scope either way
            let _ = self.refill();
        }
        let value = self.buffer[self.index];
        self.index += 1;
        value
    }

    /// Next value in [-1,1).
    pub fn random_plus_minus_one(&mut self) -> f64 {
        (self.random() - 0.5) * 2.0
    }
}
