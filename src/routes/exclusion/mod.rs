mod handler;
mod model;

pub use handler::{create_exclusion, delete_exclusion, list_exclusions};
pub use model::{
    CreateExclusionRequest, DeleteExclusionRequest, Exclusion, ExclusionDetail, ExclusionMember,
};
