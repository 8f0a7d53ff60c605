use std::fmt::Display;

/// Element type of a tensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F16,
    BF16,
    I32,
    I1,
}

impl Display for ElementType {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::I32 => "i32",
            Self::I1 => "i1",
        };
        formatter.write_str(name)
    }
}

/// Statically shaped, ranked tensor type (e.g., `tensor<8x32xf32>`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorType {
    shape: Vec<usize>,
    element_type: ElementType,
}

impl TensorType {
    pub fn new(shape: Vec<usize>, element_type: ElementType) -> Self {
        Self { shape, element_type }
    }

    /// Creates an `f32` tensor type with the provided shape.
    pub fn f32(shape: &[usize]) -> Self {
        Self::new(shape.to_vec(), ElementType::F32)
    }

    pub fn shape(&self) -> &[usize] {
        self.shape.as_slice()
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the size of dimension `dimension`, if it exists.
    pub fn dimension_size(&self, dimension: usize) -> Option<usize> {
        self.shape.get(dimension).copied()
    }
}

impl Display for TensorType {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("tensor<")?;
        for dimension_size in &self.shape {
            write!(formatter, "{dimension_size}x")?;
        }
        write!(formatter, "{}>", self.element_type)
    }
}
