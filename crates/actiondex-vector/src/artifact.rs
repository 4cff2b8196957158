//! LanceDB persistence of a [`DenseIndex`].
//!
//! The artifact directory is a LanceDB database holding one table,
//! `chunk_vectors`. Vectors go in and come out as raw `f32`, so a reloaded
//! index scores bit-identically.
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator};
use arrow_schema::DataType;
use futures::TryStreamExt;
use lancedb::query::ExecutableQuery;
use lancedb::{connect, Connection};
use tracing::debug;

use actiondex_core::types::ChunkId;

use crate::dense::DenseIndex;
use crate::schema::{build_vector_schema, VECTOR_TABLE};

pub async fn open_db(dir: &Path) -> Result<Connection> {
	let uri = dir.to_string_lossy().to_string();
	Ok(connect(&uri).execute().await?)
}

/// Write every row of `index` into a fresh `chunk_vectors` table under `dir`.
pub async fn write_vectors(dir: &Path, index: &DenseIndex) -> Result<()> {
	std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
	let conn = open_db(dir).await?;
	let dim = i32::try_from(index.dim()).context("embedding dimension exceeds i32")?;
	let schema = build_vector_schema(dim);

	let mut ids = Vec::with_capacity(index.len());
	let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(index.len());
	for (id, v) in index.rows() {
		ids.push(i32::try_from(id).context("chunk id exceeds i32")?);
		vectors.push(Some(v.iter().copied().map(Some).collect()));
	}
	let batch = RecordBatch::try_new(
		schema.clone(),
		vec![
			Arc::new(Int32Array::from(ids)),
			Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors.into_iter(), dim)),
		],
	)?;
	let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
	conn.create_table(VECTOR_TABLE, reader).execute().await?;
	debug!(rows = index.len(), dim, dir = %dir.display(), "wrote dense artifact");
	Ok(())
}

/// Load the `chunk_vectors` table under `dir` back into a [`DenseIndex`].
pub async fn read_vectors(dir: &Path) -> Result<DenseIndex> {
	let conn = open_db(dir).await?;
	let names = conn.table_names().execute().await?;
	if !names.iter().any(|n| n == VECTOR_TABLE) {
		return Err(anyhow!("table '{VECTOR_TABLE}' missing in {}", dir.display()));
	}
	let table = conn.open_table(VECTOR_TABLE).execute().await?;
	let schema = table.schema().await?;
	let dim = match schema.field_with_name("vector")?.data_type() {
		DataType::FixedSizeList(_, n) => usize::try_from(*n)?,
		other => return Err(anyhow!("unexpected vector column type {other:?}")),
	};

	let mut rows: Vec<(ChunkId, Vec<f32>)> = Vec::new();
	let mut stream = table.query().execute().await?;
	while let Some(batch) = stream.try_next().await? {
		let ids = batch
			.column_by_name("chunk_id")
			.and_then(|c| c.as_any().downcast_ref::<Int32Array>())
			.ok_or_else(|| anyhow!("chunk_id column missing"))?;
		let vecs = batch
			.column_by_name("vector")
			.and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
			.ok_or_else(|| anyhow!("vector column missing"))?;
		for i in 0..batch.num_rows() {
			let id = ChunkId::try_from(ids.value(i)).context("negative chunk id")?;
			let list = vecs.value(i);
			let values = list.as_primitive::<Float32Type>().values().to_vec();
			rows.push((id, values));
		}
	}
	debug!(rows = rows.len(), dim, dir = %dir.display(), "read dense artifact");
	DenseIndex::from_rows(rows, dim).map_err(|e| anyhow!(e.to_string()))
}
