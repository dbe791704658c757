// src/connectors/mod.rs
pub mod replay;
pub mod traits;

pub use replay::ReplayFeed;
pub use traits::PriceFeed;
