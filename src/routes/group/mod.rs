mod handler;
mod model;

pub use handler::{
    create_group, delete_group, draw, find_by_id, join_group, my_assignment, my_groups,
};
pub use model::{
    CreateGroupRequest, Group, GroupIdRequest, JoinGroupRequest, lock_owned_group, participant_id,
};
