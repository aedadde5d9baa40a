pub mod session;

pub use session::{
    post_message, Arrival, ChatEntry, ChatSession, InitialLoad, LoadRequest, Notice, NoticeLevel,
    Notification, SessionState,
};
