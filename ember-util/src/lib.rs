pub mod math;

pub use math::vector2::Vector2;
pub use math::vector3::Vector3;
