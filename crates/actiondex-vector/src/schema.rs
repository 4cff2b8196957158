use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const VECTOR_TABLE: &str = "chunk_vectors";

/// `chunk_id: Int32`, `vector: FixedSizeList<Float32, dim>`.
pub fn build_vector_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("chunk_id", DataType::Int32, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), false),
	]))
}
