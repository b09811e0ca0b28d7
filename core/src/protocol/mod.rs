//! Wire protocol: snapshot model and packet codec

pub mod constants;
mod packet;
mod snapshot;

pub use packet::{Hello, Packet};
pub use snapshot::{ClipItem, Snapshot};
