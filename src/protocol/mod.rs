pub mod constants;
pub mod packet;
pub mod types;

pub use packet::{Direction, RootPacket};
pub use types::{ClientVersion, GameCode};
