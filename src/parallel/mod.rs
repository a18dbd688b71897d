pub mod change;
pub mod distributor;
pub mod pool;
pub mod random;
