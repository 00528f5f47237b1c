//! Exhaustive squared-L2 nearest-neighbour index.
//!
//! Every search scans all vectors, which is fine for a single client's
//! corpus. A larger corpus would need an approximate or incrementally
//! updatable structure instead.

use std::cmp::Ordering;
use std::io::{Read, Write};

use crate::error::RagError;

const MAGIC: &[u8; 4] = b"ADVX";
const FORMAT_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    /// Row-major, `len() * dimension` floats.
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn build(vectors: &[Vec<f32>]) -> Result<Self, RagError> {
        let Some(first) = vectors.first() else {
            return Ok(Self::default());
        };
        let dimension = first.len();
        if dimension == 0 {
            return Err(RagError::corrupt("zero-length embedding"));
        }
        let mut data = Vec::with_capacity(vectors.len() * dimension);
        for v in vectors {
            if v.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    found: v.len(),
                });
            }
            data.extend_from_slice(v);
        }
        Ok(Self { dimension, data })
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 { 0 } else { self.data.len() / self.dimension }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.len() {
            return None;
        }
        let start = position * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    /// The `k` nearest vectors, nearest first; ties go to the lower position.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, RagError> {
        self.rank(query, 0..self.len(), k)
    }

    /// Like [`search`](Self::search) but only over `positions`. Positions
    /// outside the index are ignored.
    pub fn search_among(
        &self,
        query: &[f32],
        positions: &[usize],
        k: usize,
    ) -> Result<Vec<Neighbor>, RagError> {
        let len = self.len();
        self.rank(query, positions.iter().copied().filter(|p| *p < len), k)
    }

    fn rank(
        &self,
        query: &[f32],
        positions: impl Iterator<Item = usize>,
        k: usize,
    ) -> Result<Vec<Neighbor>, RagError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
            });
        }
        let mut scored: Vec<Neighbor> = positions
            .map(|position| {
                let start = position * self.dimension;
                Neighbor {
                    position,
                    distance: squared_l2(query, &self.data[start..start + self.dimension]),
                }
            })
            .collect();
        scored.sort_by(compare_neighbors);
        scored.dedup_by_key(|n| n.position);
        scored.truncate(k);
        Ok(scored)
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), RagError> {
        w.write_all(MAGIC)?;
        w.write_all(&FORMAT_VERSION.to_le_bytes())?;
        w.write_all(&(self.dimension as u64).to_le_bytes())?;
        w.write_all(&(self.len() as u64).to_le_bytes())?;
        for x in &self.data {
            w.write_all(&x.to_le_bytes())?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut r: R) -> Result<Self, RagError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(RagError::corrupt("vectors file has an unknown header"));
        }
        let mut word = [0u8; 4];
        r.read_exact(&mut word)?;
        let version = u32::from_le_bytes(word);
        if version != FORMAT_VERSION {
            return Err(RagError::corrupt(format!("unsupported vectors format version {}", version)));
        }
        let dimension = read_u64(&mut r)? as usize;
        let count = read_u64(&mut r)? as usize;
        let expected_bytes = dimension
            .checked_mul(count)
            .and_then(|total| total.checked_mul(4))
            .ok_or_else(|| RagError::corrupt("vector count overflows"))?;

        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes)?;
        if bytes.len() != expected_bytes {
            return Err(RagError::corrupt(format!(
                "expected {} vector bytes, found {}",
                expected_bytes,
                bytes.len()
            )));
        }
        let data = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let dimension = if count == 0 { 0 } else { dimension };
        Ok(Self { dimension, data })
    }
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, RagError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.position.cmp(&b.position))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> VectorIndex {
        VectorIndex::build(&[
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
        ])
        .unwrap()
    }

    #[test]
    fn search_orders_by_distance_then_position() {
        let hits = index().search(&[1.0, 0.0], 3).unwrap();
        let positions: Vec<_> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![1, 3, 0]);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[2].distance, 1.0);
    }

    #[test]
    fn k_larger_than_corpus_returns_everything() {
        assert_eq!(index().search(&[0.0, 0.0], 50).unwrap().len(), 4);
    }

    #[test]
    fn search_among_restricts_candidates() {
        let hits = index().search_among(&[1.0, 0.0], &[0, 2, 99], 5).unwrap();
        let positions: Vec<_> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![0, 2]);
    }

    #[test]
    fn rejects_mixed_and_mismatched_dimensions() {
        assert!(matches!(
            VectorIndex::build(&[vec![1.0, 2.0], vec![1.0]]),
            Err(RagError::DimensionMismatch { expected: 2, found: 1 })
        ));
        assert!(matches!(
            index().search(&[1.0, 0.0, 0.0], 1),
            Err(RagError::DimensionMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn empty_index_searches_to_nothing() {
        let empty = VectorIndex::build(&[]).unwrap();
        assert!(empty.search(&[1.0, 2.0, 3.0], 5).unwrap().is_empty());
    }

    #[test]
    fn binary_round_trip_is_exact() {
        let original = VectorIndex::build(&[vec![0.1, -3.5e-8, f32::MAX], vec![1.0 / 3.0, 2.0, -0.0]]).unwrap();
        let mut buf = Vec::new();
        original.write_to(&mut buf).unwrap();
        let loaded = VectorIndex::read_from(buf.as_slice()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let mut buf = Vec::new();
        index().write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(VectorIndex::read_from(buf.as_slice()), Err(RagError::CorruptSnapshot(_))));
    }

    #[test]
    fn oversized_header_is_corrupt_not_a_panic() {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&(1u64 << 62).to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        assert!(matches!(VectorIndex::read_from(buf.as_slice()), Err(RagError::CorruptSnapshot(_))));
    }
}
