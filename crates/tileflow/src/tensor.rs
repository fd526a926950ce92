use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};

/// Memory hierarchy level a tensor tile lives in, innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Register,
    Shared,
    Global,
}

impl Tier {
    /// Distance from the register file: 0 for registers, 2 for global memory.
    pub fn level(self) -> u8 {
        match self {
            Tier::Register => 0,
            Tier::Shared => 1,
            Tier::Global => 2,
        }
    }

    /// Returns `true` when data may move between the two tiers in one step.
    pub fn is_adjacent(self, other: Tier) -> bool {
        self.level().abs_diff(other.level()) == 1
    }

    /// Single-letter tag used in transfer names (`g2s`, `s2r`, ...).
    pub fn short(self) -> char {
        match self {
            Tier::Register => 'r',
            Tier::Shared => 's',
            Tier::Global => 'g',
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Tier::Register => "register",
            Tier::Shared => "shared",
            Tier::Global => "global",
        };
        f.write_str(label)
    }
}

/// Element order of a tile in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Layout {
    #[default]
    RowMajor,
    ColMajor,
}

impl Layout {
    /// Element strides for `shape`: the last axis is contiguous for row-major,
    /// the first axis for column-major.
    pub fn strides(self, shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![0; shape.len()];
        let mut running = 1usize;
        match self {
            Layout::RowMajor => {
                for (axis, extent) in shape.iter().enumerate().rev() {
                    strides[axis] = running;
                    running *= extent;
                }
            }
            Layout::ColMajor => {
                for (axis, extent) in shape.iter().enumerate() {
                    strides[axis] = running;
                    running *= extent;
                }
            }
        }
        strides
    }
}

/// Scalar element types a tile may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DType {
    F16,
    Bf16,
    #[default]
    F32,
    F64,
}

impl DType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F16 | DType::Bf16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F16 => "half",
            DType::Bf16 => "bfloat16",
            DType::F32 => "float",
            DType::F64 => "double",
        };
        f.write_str(name)
    }
}

/// A named tile of a multi-dimensional array placed in one memory tier.
///
/// Tensors are immutable and shared by reference between nodes and attached
/// edges; see [`TensorRef`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tensor {
    name: String,
    shape: Vec<usize>,
    layout: Layout,
    tier: Tier,
    dtype: DType,
}

pub type TensorRef = Arc<Tensor>;

impl Tensor {
    /// Creates an `f32` tensor.
    pub fn new(
        name: impl Into<String>,
        shape: impl Into<Vec<usize>>,
        layout: Layout,
        tier: Tier,
    ) -> FlowResult<TensorRef> {
        Self::with_dtype(name, shape, layout, tier, DType::default())
    }

    pub fn with_dtype(
        name: impl Into<String>,
        shape: impl Into<Vec<usize>>,
        layout: Layout,
        tier: Tier,
        dtype: DType,
    ) -> FlowResult<TensorRef> {
        let name = name.into();
        let shape = shape.into();
        if name.is_empty() {
            return Err(FlowError::InvalidTensorName {
                name,
                reason: "must not be empty".to_string(),
            });
        }
        if shape.is_empty() {
            return Err(FlowError::InvalidShape {
                tensor: name,
                reason: "rank must be at least 1".to_string(),
            });
        }
        if let Some(axis) = shape.iter().position(|extent| *extent == 0) {
            return Err(FlowError::InvalidShape {
                tensor: name,
                reason: format!("extent of axis {axis} must be positive"),
            });
        }
        if shape
            .iter()
            .try_fold(dtype.size_in_bytes(), |acc, extent| acc.checked_mul(*extent))
            .is_none()
        {
            return Err(FlowError::InvalidShape {
                tensor: name,
                reason: "byte length overflows usize".to_string(),
            });
        }
        Ok(Arc::new(Tensor {
            name,
            shape,
            layout,
            tier,
            dtype,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn byte_len(&self) -> usize {
        self.element_count() * self.dtype.size_in_bytes()
    }

    pub fn strides(&self) -> Vec<usize> {
        self.layout.strides(&self.shape)
    }
}
