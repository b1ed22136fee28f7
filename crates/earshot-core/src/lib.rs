pub mod errors;
pub mod ids;
pub mod position;
pub mod protocol;
pub mod volume;

pub use ids::{PlayerId, WorldId};
pub use position::{PlayerPosition, Vec3};
