pub mod bridge;
pub mod logging;
pub mod proofs;
pub mod session;
pub mod tee;
pub mod ticket;
