//! Closed-form derived quantities for cement paste and concrete mixes.

pub mod heat_capacity;
pub mod hydration;
pub mod volume_fraction;

pub use heat_capacity::paste_specific_heat_capacity;
pub use hydration::{hydration_parameters, HydrationParameters};
pub use volume_fraction::substitute_volume_fraction;

/// One value per phase of a cement paste
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Phases<T> {
    pub cement: T,
    pub substitute: T,
    pub water: T,
}

impl<T> Phases<T> {
    pub fn new(cement: T, substitute: T, water: T) -> Phases<T> {
        Phases {
            cement,
            substitute,
            water,
        }
    }

    /// Iterates the phases as `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &T)> {
        [
            ("cement", &self.cement),
            ("substitute", &self.substitute),
            ("water", &self.water),
        ]
        .into_iter()
    }
}
