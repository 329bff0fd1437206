use std::fmt::{self, Display};

use super::vector3::Math;

#[derive(Clone, Copy, Debug, PartialEq, Hash, Eq, Default, PartialOrd, Ord)]
pub struct Vector2<T> {
    pub x: T,
    pub z: T,
}

impl<T: Math + Copy> Vector2<T> {
    pub const fn new(x: T, z: T) -> Self {
        Vector2 { x, z }
    }
}

impl<T: Display> Display for Vector2<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}
