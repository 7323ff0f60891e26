// RTMP protocol utilities

mod command;
mod constants;
mod handshake;
mod packet;

pub use command::*;
pub use constants::*;
pub use handshake::*;
pub use packet::*;
