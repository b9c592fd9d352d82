pub mod search_projector;

pub use search_projector::{
    ProjectorError, ProjectorHandle, SearchProjector, BACKFILL_BATCH_SIZE, DEFAULT_QUEUE_CAPACITY,
};
