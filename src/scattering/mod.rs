pub mod matrix;
pub mod partials;
pub mod weights;
