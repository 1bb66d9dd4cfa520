pub mod bridge;
pub mod dispatch;
pub mod server;
pub mod session;

pub use dispatch::{ClientRequest, Dispatcher};
pub use server::{start, AppState, ServerConfig, ServerHandle};
pub use session::{ServerStats, Session, SessionError, SessionRegistry};
