pub mod data1d;
pub mod fit;
pub mod ft;
pub mod histogram;
