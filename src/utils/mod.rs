pub mod intervals;
pub mod precision;
