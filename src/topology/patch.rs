//! Boundary patch descriptors.
//!
//! A patch names a contiguous run of boundary faces and says how they
//! couple: not at all (external), to another rank (processor), to a paired
//! patch on the same rank (cyclic), or to a partially-overlapping partner
//! patch through area weights (non-conformal).

use crate::topology::transform::Transform;

/// Area-weight table for a non-conformal (AMI) coupling.
///
/// `sources[i]` lists `(partner_local_face, weight)` contributions for local
/// face `i`; the weights of a face sum to at most one. Faces whose total
/// weight falls below `low_weight` receive the payload default instead of an
/// interpolated value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AmiWeights {
    pub sources: Vec<Vec<(usize, f64)>>,
    pub low_weight: f64,
}

impl AmiWeights {
    /// Total configured overlap weight of local face `i`.
    pub fn total_weight(&self, i: usize) -> f64 {
        self.sources[i].iter().map(|&(_, w)| w).sum()
    }
}

/// Coupling behaviour of a patch.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum PatchKind {
    /// Plain external boundary; the wave stops here.
    External,
    /// Faces duplicated on `neighbour_rank`; positionally matched with the
    /// partner patch there.
    Processor {
        neighbour_rank: usize,
        transform: Option<Transform>,
    },
    /// Periodic pairing with patch `partner` on the same rank; face `i`
    /// couples to partner face `i`.
    Cyclic {
        partner: usize,
        transform: Option<Transform>,
    },
    /// Non-conformal pairing with patch `partner`; coupling through
    /// area-fraction weights.
    NonConformal { partner: usize, weights: AmiWeights },
}

/// A contiguous run of boundary faces with a coupling kind.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Patch {
    pub name: String,
    /// First mesh face of the run.
    pub start: usize,
    /// Number of faces in the run.
    pub size: usize,
    pub kind: PatchKind,
}

impl Patch {
    pub fn new(name: impl Into<String>, start: usize, size: usize, kind: PatchKind) -> Self {
        Self {
            name: name.into(),
            start,
            size,
            kind,
        }
    }

    /// Mesh face indices covered by this patch.
    pub fn faces(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.size
    }

    pub fn contains(&self, face: usize) -> bool {
        face >= self.start && face < self.start + self.size
    }

    /// Patch-local index of a mesh face.
    pub fn local_index(&self, face: usize) -> usize {
        debug_assert!(self.contains(face));
        face - self.start
    }

    /// True for any kind that exchanges values with a counterpart.
    pub fn is_coupled(&self) -> bool {
        !matches!(self.kind, PatchKind::External)
    }

    pub fn neighbour_rank(&self) -> Option<usize> {
        match self.kind {
            PatchKind::Processor { neighbour_rank, .. } => Some(neighbour_rank),
            _ => None,
        }
    }

    pub fn partner(&self) -> Option<usize> {
        match self.kind {
            PatchKind::Cyclic { partner, .. } => Some(partner),
            PatchKind::NonConformal { partner, .. } => Some(partner),
            _ => None,
        }
    }

    /// Frame transform applied to values arriving through this patch.
    pub fn transform(&self) -> Option<&Transform> {
        match &self.kind {
            PatchKind::Processor { transform, .. } => transform.as_ref(),
            PatchKind::Cyclic { transform, .. } => transform.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_range_and_local_index() {
        let p = Patch::new("wall", 10, 4, PatchKind::External);
        assert_eq!(p.faces(), 10..14);
        assert!(p.contains(13));
        assert!(!p.contains(14));
        assert_eq!(p.local_index(12), 2);
        assert!(!p.is_coupled());
    }

    #[test]
    fn ami_total_weight() {
        let w = AmiWeights {
            sources: vec![vec![(0, 0.6), (1, 0.3)], vec![]],
            low_weight: 0.5,
        };
        assert!((w.total_weight(0) - 0.9).abs() < 1e-15);
        assert_eq!(w.total_weight(1), 0.0);
    }
}
