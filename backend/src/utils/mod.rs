pub mod crypto;
pub mod join_link;

pub use crypto::*;
pub use join_link::*;
