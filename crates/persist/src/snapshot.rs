use std::collections::BTreeMap;

use cellgraph_common::{CellFlags, Kid};
use cellgraph_kernel::{Edge, FieldMap, Kernel, KernelError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::factory::CellFactory;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("no constructor registered for cell type {0}")]
    UnknownType(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// One captured cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub kid: Kid,
    pub type_name: String,
    pub name: String,
    /// Capability flags; kernel-driven state bits are not recorded.
    pub flags: CellFlags,
    pub fields: FieldMap,
    pub refs: Vec<Edge>,
}

impl CellRecord {
    fn capture(cell: &cellgraph_kernel::Cell) -> Self {
        let mut fields = FieldMap::new();
        cell.export(&mut fields);
        Self {
            kid: cell.kid(),
            type_name: cell.type_name().to_owned(),
            name: cell.name().to_owned(),
            flags: cell.flags().difference(CellFlags::STATE),
            fields,
            refs: cell.ref_edges().to_vec(),
        }
    }
}

/// A content-addressed capture of the serializable part of a kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub cells: Vec<CellRecord>,
    /// Hex sha256 of the JSON encoding of `cells`.
    pub sha256: String,
}

impl Snapshot {
    pub fn capture(kernel: &Kernel) -> Result<Self, PersistError> {
        let _span = tracing::info_span!("snapshot_capture").entered();
        let cells: Vec<_> = kernel
            .cells()
            .filter(|cell| cell.is_set(CellFlags::SERIALIZE))
            .map(CellRecord::capture)
            .collect();
        let sha256 = content_hash(&cells)?;
        tracing::info!(cells = cells.len(), %sha256, "snapshot captured");
        Ok(Self { cells, sha256 })
    }

    /// Recompute the content hash and compare it with the recorded one.
    pub fn verify(&self) -> Result<(), PersistError> {
        let actual = content_hash(&self.cells)?;
        if actual != self.sha256 {
            return Err(PersistError::IntegrityMismatch {
                expected: self.sha256.clone(),
                actual,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Recreate every recorded cell in `kernel`.
    ///
    /// The snapshot is verified and every type name resolved before any cell
    /// is created, so those failures leave `kernel` untouched. `Kid` field
    /// values are remapped to the new identifiers; values pointing outside
    /// the snapshot are not imported. Returns the old-to-new identifier map.
    pub fn restore(&self, kernel: &mut Kernel, factory: &CellFactory) -> Result<BTreeMap<Kid, Kid>, PersistError> {
        let _span = tracing::info_span!("snapshot_restore", sha256 = %self.sha256).entered();
        self.verify()?;
        if let Some(record) = self.cells.iter().find(|r| !factory.knows(&r.type_name)) {
            return Err(PersistError::UnknownType(record.type_name.clone()));
        }

        let mut remap = BTreeMap::new();
        for record in &self.cells {
            let behavior = factory
                .build(&record.type_name)
                .ok_or_else(|| PersistError::UnknownType(record.type_name.clone()))?;
            let kid = kernel.create_boxed(behavior)?;
            let cell = kernel.cell_mut(kid)?;
            cell.set_name(record.name.as_str());
            cell.enable(record.flags);
            remap.insert(record.kid, kid);
        }

        for record in &self.cells {
            let kid = remap[&record.kid];
            let mut fields = record.fields.clone();
            fields.remap_kids(|old| remap.get(&old).copied());
            kernel.import(kid, &mut fields)?;

            for edge in &record.refs {
                let Some(&target) = remap.get(&edge.kid) else {
                    tracing::debug!(from = %record.kid, to = %edge.kid, "edge leaves the snapshot, skipped");
                    continue;
                };
                match edge.relation {
                    Some(relation) => kernel.create_typed_ref(kid, target, relation)?,
                    None => kernel.create_ref(kid, target)?,
                };
            }
        }

        tracing::info!(cells = remap.len(), "snapshot restored");
        Ok(remap)
    }
}

fn content_hash(cells: &[CellRecord]) -> Result<String, PersistError> {
    let bytes = serde_json::to_vec(cells)?;
    Ok(sha256_hex(&bytes))
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
