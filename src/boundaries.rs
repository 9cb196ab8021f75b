use crate::geometry::{Fp, Ray};
use crate::scene::PrimitiveId;

/// The crossing of one scene object with a ray. A fragment contributes only
/// the part inside its box, and its flags say which ends are real surfaces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryPiece {
    pub primitive: PrimitiveId,
    pub entry: Fp,
    pub exit: Fp,
    pub entry_on_surface: bool,
    pub exit_on_surface: bool,
}

/// Merged crossing of a whole primitive.
pub type Boundary = BoundaryPiece;

impl BoundaryPiece {
    /// First real surface crossing strictly after `after` and before `before`.
    pub fn first_surface_crossing(&self, after: Fp, before: Fp) -> Option<Fp> {
        [
            (self.entry, self.entry_on_surface),
            (self.exit, self.exit_on_surface),
        ]
        .into_iter()
        .find(|&(t, on_surface)| on_surface && t > after && t < before)
        .map(|(t, _)| t)
    }

    pub fn surface_crossing_on(&self, ray: &Ray) -> Option<Fp> {
        self.first_surface_crossing(0.0, ray.length)
    }
}

/// All primitives crossed by a ray, one boundary per primitive, ordered by entry.
#[derive(Clone, Debug, Default)]
pub struct BoundaryCollection {
    boundaries: Vec<Boundary>,
}

impl BoundaryCollection {
    /// Joins the pieces left by fragments of the same primitive.
    pub fn from_pieces(mut pieces: Vec<BoundaryPiece>) -> BoundaryCollection {
        pieces.sort_by(|a, b| {
            a.primitive
                .cmp(&b.primitive)
                .then(a.entry.total_cmp(&b.entry))
        });
        let mut boundaries: Vec<Boundary> = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match boundaries.last_mut() {
                Some(last)
                    if last.primitive == piece.primitive
                        && piece.entry <= last.exit + 1e-9 * (1.0 + last.exit.abs()) =>
                {
                    if piece.exit > last.exit {
                        last.exit = piece.exit;
                        last.exit_on_surface = piece.exit_on_surface;
                    } else if piece.exit == last.exit {
                        last.exit_on_surface |= piece.exit_on_surface;
                    }
                    if piece.entry == last.entry {
                        last.entry_on_surface |= piece.entry_on_surface;
                    }
                }
                _ => boundaries.push(piece),
            }
        }
        boundaries.sort_by(|a, b| a.entry.total_cmp(&b.entry));
        BoundaryCollection { boundaries }
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Boundary> {
        self.boundaries.iter()
    }

    /// Closest surface crossing in front of the ray origin.
    pub fn first_hit(&self, ray: &Ray) -> Option<(PrimitiveId, Fp)> {
        self.boundaries
            .iter()
            .filter_map(|boundary| {
                boundary
                    .surface_crossing_on(ray)
                    .map(|t| (boundary.primitive, t))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}
