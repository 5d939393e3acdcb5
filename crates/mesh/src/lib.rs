//! Vertex-to-faces adjacency for indexed triangle lists, stored as
//! compressed rows: per-vertex counts, prefix offsets and a flattened list
//! of face indices.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshError {
    #[error("face {face} references vertex {vertex}, mesh has {nb_verts}")]
    VertexOutOfRange { face: usize, vertex: u32, nb_verts: u32 },
    #[error("too many faces for 32-bit adjacency entries: {0}")]
    TooManyFaces(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexToFaces {
    counts: Vec<u32>,
    offsets: Vec<u32>,
    faces: Vec<u32>,
}

impl VertexToFaces {
    /// Build the adjacency of `nb_verts` vertices over `triangles`.
    ///
    /// A face appears once in the list of each distinct vertex it uses, in
    /// increasing face order. Degenerate triangles are kept.
    pub fn create(nb_verts: u32, triangles: &[[u32; 3]]) -> Result<Self, MeshError> {
        check_face_count(triangles.len())?;

        let mut counts = vec![0u32; nb_verts as usize];
        for (face, tri) in triangles.iter().enumerate() {
            for (i, &vertex) in tri.iter().enumerate() {
                if vertex >= nb_verts {
                    return Err(MeshError::VertexOutOfRange { face, vertex, nb_verts });
                }
                if !tri[..i].contains(&vertex) {
                    counts[vertex as usize] += 1;
                }
            }
        }

        let mut offsets = Vec::with_capacity(counts.len() + 1);
        let mut total = 0u32;
        offsets.push(0);
        for &count in &counts {
            total += count;
            offsets.push(total);
        }

        let mut cursor = offsets[..counts.len()].to_vec();
        let mut faces = vec![0u32; total as usize];
        for (face, tri) in triangles.iter().enumerate() {
            for (i, &vertex) in tri.iter().enumerate() {
                if tri[..i].contains(&vertex) {
                    continue;
                }
                let slot = &mut cursor[vertex as usize];
                faces[*slot as usize] = face as u32;
                *slot += 1;
            }
        }

        tracing::trace!(nb_verts, nb_faces = triangles.len(), entries = total, "vertex adjacency built");
        Ok(Self { counts, offsets, faces })
    }

    pub fn nb_verts(&self) -> usize {
        self.counts.len()
    }

    /// Faces per vertex.
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// `nb_verts + 1` prefix sums of `counts`.
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn face_indices(&self) -> &[u32] {
        &self.faces
    }

    /// Faces touching `vertex`; empty when out of range.
    pub fn faces_of(&self, vertex: u32) -> &[u32] {
        let v = vertex as usize;
        match (self.offsets.get(v), self.offsets.get(v + 1)) {
            (Some(&start), Some(&end)) => &self.faces[start as usize..end as usize],
            _ => &[],
        }
    }
}

/// Every face adds at most three entries, so the entry total and all
/// offsets fit in `u32` when three entries per face do.
fn check_face_count(nb_faces: usize) -> Result<(), MeshError> {
    match nb_faces.checked_mul(3).map(u32::try_from) {
        Some(Ok(_)) => Ok(()),
        _ => Err(MeshError::TooManyFaces(nb_faces)),
    }
}
