mod handler;
mod model;

pub use handler::{unread, with_giver, with_receiver, ws_handler};
pub use model::{
    ConnectionGrant, UnreadCounts, authorize_connection, history_as_giver, history_as_receiver, unread_counts,
};
