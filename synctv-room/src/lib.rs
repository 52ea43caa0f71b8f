pub mod models;
pub mod storage;
pub mod room;
pub mod cache;
pub mod vendor;
pub mod live;
pub mod password;
pub mod config;
pub mod error;
pub mod logging;

#[cfg(test)]
pub mod test_helpers;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use room::{Room, RoomDeps, RoomInfo, RoomManager};
