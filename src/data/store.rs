use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, ArrayRef, Float64Array, Float64Builder, LargeListArray, ListArray, ListBuilder,
    UInt64Array, UInt64Builder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use super::model::{DigitalCode, FolderCorpus, Sample};

/// Schema metadata keys.
const FOLDER_NAME_KEY: &str = "folder_name";
const CODE_KIND_KEY: &str = "code_kind";

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Where [`save_corpus`] puts a folder's record.
pub fn corpus_path(dir: &Path, folder_name: &str) -> PathBuf {
    dir.join(format!("{folder_name}.parquet"))
}

/// Persist one folder corpus as a Snappy-compressed Parquet file.
///
/// Layout, one row per trace:
/// * `code`:  List<UInt64> – one element when combined, one per converter when split
/// * `time`:  List<Float64>
/// * `value`: List<Float64>
///
/// The folder name and code kind travel in the schema metadata.
pub fn save_corpus(dir: &Path, corpus: &FolderCorpus) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let split = corpus.traces.keys().next().is_some_and(DigitalCode::is_split);
    if corpus.traces.keys().any(|c| c.is_split() != split) {
        bail!("{}: mixes combined and split digital codes", corpus.folder_name);
    }

    let mut code_builder = ListBuilder::new(UInt64Builder::new());
    let mut time_builder = ListBuilder::new(Float64Builder::new());
    let mut value_builder = ListBuilder::new(Float64Builder::new());

    for (code, samples) in &corpus.traces {
        code_builder.values().append_slice(&code.components());
        code_builder.append(true);

        let times = time_builder.values();
        for s in samples {
            times.append_value(s.time);
        }
        time_builder.append(true);

        let values = value_builder.values();
        for s in samples {
            values.append_value(s.value);
        }
        value_builder.append(true);
    }

    let metadata = HashMap::from([
        (FOLDER_NAME_KEY.to_string(), corpus.folder_name.clone()),
        (
            CODE_KIND_KEY.to_string(),
            if split { "split" } else { "combined" }.to_string(),
        ),
    ]);
    let schema = Arc::new(
        Schema::new(vec![
            list_field("code", DataType::UInt64),
            list_field("time", DataType::Float64),
            list_field("value", DataType::Float64),
        ])
        .with_metadata(metadata),
    );

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(code_builder.finish()),
            Arc::new(time_builder.finish()),
            Arc::new(value_builder.finish()),
        ],
    )
    .context("assembling record batch")?;

    let path = corpus_path(dir, &corpus.folder_name);
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props)).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;

    log::info!("Saved {} traces of \"{}\" to {}", corpus.len(), corpus.folder_name, path.display());
    Ok(path)
}

/// Restore a folder corpus written by [`save_corpus`].
pub fn load_corpus(path: &Path) -> Result<FolderCorpus> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;

    let metadata = builder.schema().metadata().clone();
    let folder_name = metadata
        .get(FOLDER_NAME_KEY)
        .cloned()
        .context("parquet file missing 'folder_name' metadata")?;
    let split = match metadata.get(CODE_KIND_KEY).map(String::as_str) {
        Some("split") => true,
        Some("combined") => false,
        other => bail!("unknown code kind {other:?}"),
    };

    let reader = builder.build().context("building parquet reader")?;
    let mut corpus = FolderCorpus::new(folder_name);

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let code_col = batch.column(schema.index_of("code").context("missing 'code' column")?);
        let time_col = batch.column(schema.index_of("time").context("missing 'time' column")?);
        let value_col = batch.column(schema.index_of("value").context("missing 'value' column")?);

        for row in 0..batch.num_rows() {
            let codes = extract_u64_list(code_col, row).with_context(|| format!("Row {row}: failed to read 'code'"))?;
            let times = extract_f64_list(time_col, row).with_context(|| format!("Row {row}: failed to read 'time'"))?;
            let values = extract_f64_list(value_col, row).with_context(|| format!("Row {row}: failed to read 'value'"))?;

            if times.len() != values.len() {
                bail!("Row {row}: time has {} values but value has {}", times.len(), values.len());
            }

            let code = if split {
                DigitalCode::Split(codes)
            } else {
                match codes.as_slice() {
                    [single] => DigitalCode::Combined(*single),
                    other => bail!("Row {row}: combined code has {} elements", other.len()),
                }
            };
            let samples = times
                .into_iter()
                .zip(values)
                .map(|(t, v)| Sample::new(t, v))
                .collect();
            corpus.traces.insert(code, samples);
        }
    }

    Ok(corpus)
}

/// The first `rows` traces of a stored corpus as a pretty-printed table.
pub fn preview(path: &Path, rows: usize) -> Result<String> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?
        .with_batch_size(rows.max(1))
        .build()
        .context("building parquet reader")?;

    let batches = reader
        .take(1)
        .collect::<std::result::Result<Vec<RecordBatch>, _>>()
        .context("reading parquet record batch")?;
    let table = pretty_format_batches(&batches).context("formatting preview")?;
    Ok(table.to_string())
}

// ---------------------------------------------------------------------------
// Arrow helpers
// ---------------------------------------------------------------------------

fn list_field(name: &str, item: DataType) -> Field {
    Field::new(name, DataType::List(Arc::new(Field::new("item", item, true))), false)
}

/// The inner array of a List or LargeList column at the given row.
fn list_values(col: &ArrayRef, row: usize) -> Result<ArrayRef> {
    if col.is_null(row) {
        bail!("null value in list column");
    }
    match col.data_type() {
        DataType::List(_) => Ok(col
            .as_any()
            .downcast_ref::<ListArray>()
            .context("expected ListArray")?
            .value(row)),
        DataType::LargeList(_) => Ok(col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .context("expected LargeListArray")?
            .value(row)),
        other => bail!("Expected List or LargeList column, got {other:?}"),
    }
}

fn extract_f64_list(col: &ArrayRef, row: usize) -> Result<Vec<f64>> {
    let values = list_values(col, row)?;
    let arr = values
        .as_any()
        .downcast_ref::<Float64Array>()
        .with_context(|| format!("List inner type is {:?}, expected Float64", values.data_type()))?;
    Ok(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn extract_u64_list(col: &ArrayRef, row: usize) -> Result<Vec<u64>> {
    let values = list_values(col, row)?;
    let arr = values
        .as_any()
        .downcast_ref::<UInt64Array>()
        .with_context(|| format!("List inner type is {:?}, expected UInt64", values.data_type()))?;
    arr.iter()
        .map(|v| v.context("null digital code"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn split_corpus_survives_a_round_trip() {
        let tmp = TempDir::new().unwrap();
        let mut corpus = FolderCorpus::new("analog_5px_tt_px");
        corpus.traces.insert(
            DigitalCode::Split(vec![128, 0, 3, 0, 255]),
            vec![Sample::new(0.0, 50.0), Sample::new(1.0e-9, -21.7498915)],
        );
        corpus
            .traces
            .insert(DigitalCode::Split(vec![1, 2, 3, 4, 5]), vec![Sample::new(0.0, 0.0)]);

        let path = save_corpus(tmp.path(), &corpus).unwrap();
        assert_eq!(path, corpus_path(tmp.path(), "analog_5px_tt_px"));
        assert_eq!(load_corpus(&path).unwrap(), corpus);

        let table = preview(&path, 1).unwrap();
        assert!(table.contains("code"));
        assert!(table.contains("[1, 2, 3, 4, 5]"));
    }

    #[test]
    fn mixed_code_kinds_are_refused() {
        let tmp = TempDir::new().unwrap();
        let mut corpus = FolderCorpus::new("mixed");
        corpus.traces.insert(DigitalCode::Combined(1), Vec::new());
        corpus.traces.insert(DigitalCode::Split(vec![1]), Vec::new());
        assert!(save_corpus(tmp.path(), &corpus).is_err());
    }
}
