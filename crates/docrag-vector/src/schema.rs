use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const VECTOR_COLUMN: &str = "vector";

/// Layout of the chunk table. `metadata` holds the full metadata map as JSON;
/// `filename`, `page`, `chunk_index` and `created_at_ms` are copies kept for
/// predicate pushdown.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("namespace", DataType::Utf8, false),
		Field::new("seq", DataType::Int64, false),
		Field::new("filename", DataType::Utf8, false),
		Field::new("page", DataType::Int64, false),
		Field::new("chunk_index", DataType::Int64, false),
		Field::new("created_at_ms", DataType::Int64, true),
		Field::new("text", DataType::Utf8, false),
		Field::new("metadata", DataType::Utf8, false),
		Field::new(VECTOR_COLUMN, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}

/// Vector width declared by a chunk table schema.
pub fn vector_dim(schema: &Schema) -> Option<usize> {
	match schema.field_with_name(VECTOR_COLUMN).ok()?.data_type() {
		DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
		_ => None,
	}
}
