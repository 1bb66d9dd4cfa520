pub mod bus;
pub mod envelope;
pub mod history;
pub mod ids;

pub use bus::{user_room, BroadcastBus, RoomEvent, DEFAULT_ROOM};
pub use envelope::{normalize, now_epoch, Envelope};
pub use history::{HistoryEntry, HistoryLog};
