use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::access::{AccessMap, TileIndex};
use crate::dataflow::node::NodeRef;
use crate::error::{FlowError, FlowResult};
use crate::tensor::{TensorRef, Tier};

/// Same-tier data dependency inside one graph.
#[derive(Debug, Clone)]
pub struct Edge {
    from: NodeRef,
    to: NodeRef,
}

impl Edge {
    pub fn new(from: &NodeRef, to: &NodeRef) -> Self {
        Self {
            from: Arc::clone(from),
            to: Arc::clone(to),
        }
    }

    pub fn from(&self) -> &NodeRef {
        &self.from
    }

    pub fn to(&self) -> &NodeRef {
        &self.to
    }
}

/// Direction of a cross-tier copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    GlobalToShared,
    SharedToRegister,
    RegisterToShared,
    SharedToGlobal,
}

impl TransferKind {
    /// `None` unless the tiers are adjacent.
    pub fn between(from: Tier, to: Tier) -> Option<Self> {
        match (from, to) {
            (Tier::Global, Tier::Shared) => Some(TransferKind::GlobalToShared),
            (Tier::Shared, Tier::Register) => Some(TransferKind::SharedToRegister),
            (Tier::Register, Tier::Shared) => Some(TransferKind::RegisterToShared),
            (Tier::Shared, Tier::Global) => Some(TransferKind::SharedToGlobal),
            _ => None,
        }
    }

    pub fn source_tier(self) -> Tier {
        match self {
            TransferKind::GlobalToShared => Tier::Global,
            TransferKind::SharedToRegister => Tier::Shared,
            TransferKind::RegisterToShared => Tier::Register,
            TransferKind::SharedToGlobal => Tier::Shared,
        }
    }

    pub fn dest_tier(self) -> Tier {
        match self {
            TransferKind::GlobalToShared => Tier::Shared,
            TransferKind::SharedToRegister => Tier::Register,
            TransferKind::RegisterToShared => Tier::Shared,
            TransferKind::SharedToGlobal => Tier::Global,
        }
    }

    /// Returns `true` for copies that move data toward the register file.
    pub fn is_inward(self) -> bool {
        self.dest_tier() < self.source_tier()
    }

    /// `g2s`, `s2r`, `r2s` or `s2g`.
    pub fn short(self) -> String {
        format!("{}2{}", self.source_tier().short(), self.dest_tier().short())
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

/// Cross-tier movement of tiles from `source` to `dest`, indexed by an
/// [`AccessMap`].
///
/// Endpoint tiers, ranks, divisibility and the reachable tile range are all
/// checked here, so an attached edge that exists is always emittable.
#[derive(Debug, Clone)]
pub struct AttachedEdge {
    source: TensorRef,
    dest: TensorRef,
    access: AccessMap,
    kind: TransferKind,
}

impl AttachedEdge {
    pub fn new(source: &TensorRef, dest: &TensorRef, access: AccessMap) -> FlowResult<Self> {
        let kind = TransferKind::between(source.tier(), dest.tier()).ok_or_else(|| {
            FlowError::TierMismatch {
                from: source.name().to_string(),
                from_tier: source.tier(),
                to: dest.name().to_string(),
                to_tier: dest.tier(),
            }
        })?;
        let label = format!("{} -> {}", source.name(), dest.name());
        access.check_endpoints(&label, source, dest)?;
        Ok(Self {
            source: Arc::clone(source),
            dest: Arc::clone(dest),
            access,
            kind,
        })
    }

    pub fn source(&self) -> &TensorRef {
        &self.source
    }

    pub fn dest(&self) -> &TensorRef {
        &self.dest
    }

    pub fn access(&self) -> &AccessMap {
        &self.access
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn label(&self) -> String {
        format!("{} -> {}", self.source.name(), self.dest.name())
    }

    /// Returns `true` when the destination is larger than the source along
    /// some dimension, so each transfer fills only one of its tiles.
    pub fn writes_partial_dest(&self) -> bool {
        self.dest
            .shape()
            .iter()
            .zip(self.source.shape())
            .any(|(dest, source)| dest > source)
    }

    pub fn index_expr(&self) -> TileIndex {
        self.access.index_expr(self.source.rank())
    }

    pub fn resolve(&self, values: &[i64]) -> FlowResult<Vec<i64>> {
        self.access.resolve(self.source.rank(), values)
    }
}
