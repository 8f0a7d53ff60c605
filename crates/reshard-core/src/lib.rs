pub mod errors;
pub mod mesh;
pub mod rules;
pub mod sharding;

pub use errors::ShardingError;
pub use mesh::{AxisRef, Mesh, MeshAxis, SubAxisInfo};
pub use rules::{DimMapping, OpShardingRule, TensorMapping};
pub use sharding::{DimensionSharding, TensorSharding};
