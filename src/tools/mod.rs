pub mod batch_harvest;
pub mod directions;
pub mod pagination;

pub use batch_harvest::{BatchHarvester, StopSignal};
pub use directions::DirectionResolver;
pub use pagination::PaginationExtractor;
