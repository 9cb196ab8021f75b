//! Trichromatic light. Full spectral sampling is not attempted.

use crate::geometry::Vec3f;

pub type Spectrum = Vec3f;

pub fn black() -> Spectrum {
    Vec3f::zeros()
}

pub fn is_black(spectrum: &Spectrum) -> bool {
    spectrum.iter().all(|c| *c <= 0.0)
}
