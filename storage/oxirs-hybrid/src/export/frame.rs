//! Arrow IPC frames inside one LZ4 frame stream
//!
//! Wire layout: a single LZ4 frame stream carrying two consecutive Arrow IPC
//! streams. The first holds exactly one metadata batch, the second holds one
//! or more data batches. Each IPC stream is finished before the next starts,
//! and the compressor is finished last.

use crate::error::{HybridError, HybridResult};
use crate::model::StreamId;
use arrow::array::{
    ArrayRef, Float64Builder, Int64Builder, StringBuilder, TimestampNanosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use lz4_flex::frame::FrameEncoder;
use std::io::{self, Write};
use std::sync::Arc;

/// Schema of the metadata frame
pub fn metadata_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("brick_class", DataType::Utf8, true),
        Field::new("brick_uri", DataType::Utf8, true),
        Field::new("units", DataType::Utf8, true),
        Field::new("name", DataType::Utf8, true),
        Field::new("stream_id", DataType::Int64, false),
    ]))
}

/// Schema of every data frame; `id` carries the row label
pub fn data_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(
            "time",
            DataType::Timestamp(TimeUnit::Nanosecond, None),
            false,
        ),
        Field::new("value", DataType::Float64, false),
        Field::new("id", DataType::Utf8, false),
    ]))
}

/// Identity and classification of one exported stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMetadata {
    /// Stream id
    pub id: StreamId,
    /// Ontology class URI
    pub brick_class: Option<String>,
    /// Ontology entity URI
    pub brick_uri: Option<String>,
    /// Engineering units
    pub units: Option<String>,
    /// Stream name
    pub name: Option<String>,
}

/// Row and frame counts of the data section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataSummary {
    /// Rows written across all frames
    pub rows: u64,
    /// Frames written, including the final one
    pub frames: u64,
}

/// Owns the compression stream for one export call
pub struct ExportWriter<W: Write> {
    encoder: FrameEncoder<W>,
    flush_rows: usize,
}

impl<W: Write> ExportWriter<W> {
    /// Wrap `sink`; data frames hold at most `flush_rows` rows
    pub fn new(sink: W, flush_rows: usize) -> Self {
        Self {
            encoder: FrameEncoder::new(sink),
            flush_rows: flush_rows.max(1),
        }
    }

    /// Write the metadata frame as a complete IPC stream
    pub fn write_metadata(&mut self, streams: &[StreamMetadata]) -> HybridResult<()> {
        let schema = metadata_schema();
        let mut classes = StringBuilder::new();
        let mut uris = StringBuilder::new();
        let mut units = StringBuilder::new();
        let mut names = StringBuilder::new();
        let mut ids = Int64Builder::with_capacity(streams.len());
        for stream in streams {
            classes.append_option(stream.brick_class.as_deref());
            uris.append_option(stream.brick_uri.as_deref());
            units.append_option(stream.units.as_deref());
            names.append_option(stream.name.as_deref());
            ids.append_value(stream.id);
        }
        let columns: Vec<ArrayRef> = vec![
            Arc::new(classes.finish()),
            Arc::new(uris.finish()),
            Arc::new(units.finish()),
            Arc::new(names.finish()),
            Arc::new(ids.finish()),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns)?;

        let mut writer = StreamWriter::try_new(&mut self.encoder, &schema)?;
        writer.write(&batch)?;
        writer.finish()?;
        Ok(())
    }

    /// Start the data IPC stream
    pub fn data_frames(&mut self) -> HybridResult<DataFrameWriter<'_, W>> {
        let schema = data_schema();
        let writer = StreamWriter::try_new(&mut self.encoder, &schema)?;
        Ok(DataFrameWriter::new(writer, schema, self.flush_rows))
    }

    /// Finish the compression stream, flush the sink and hand it back
    pub fn finish(self) -> HybridResult<W> {
        let mut sink = self
            .encoder
            .finish()
            .map_err(|e| HybridError::Io(io::Error::other(e)))?;
        sink.flush()?;
        Ok(sink)
    }
}

/// Buffers data rows and emits a frame every `flush_rows` rows
pub struct DataFrameWriter<'a, W: Write> {
    writer: StreamWriter<&'a mut FrameEncoder<W>>,
    schema: SchemaRef,
    flush_rows: usize,
    times: TimestampNanosecondBuilder,
    values: Float64Builder,
    labels: StringBuilder,
    pending: usize,
    summary: DataSummary,
}

impl<'a, W: Write> DataFrameWriter<'a, W> {
    fn new(
        writer: StreamWriter<&'a mut FrameEncoder<W>>,
        schema: SchemaRef,
        flush_rows: usize,
    ) -> Self {
        Self {
            writer,
            schema,
            flush_rows,
            times: TimestampNanosecondBuilder::new(),
            values: Float64Builder::new(),
            labels: StringBuilder::new(),
            pending: 0,
            summary: DataSummary::default(),
        }
    }

    /// Append one row, flushing a frame once the threshold is reached
    pub fn push(&mut self, time: DateTime<Utc>, value: f64, label: &str) -> HybridResult<()> {
        let nanos = time.timestamp_nanos_opt().ok_or_else(|| {
            HybridError::validation(format!("timestamp {time} is outside the nanosecond range"))
        })?;
        self.times.append_value(nanos);
        self.values.append_value(value);
        self.labels.append_value(label);
        self.pending += 1;
        self.summary.rows += 1;
        if self.pending >= self.flush_rows {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> HybridResult<()> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(self.times.finish()),
            Arc::new(self.values.finish()),
            Arc::new(self.labels.finish()),
        ];
        let batch = RecordBatch::try_new(self.schema.clone(), columns)?;
        self.writer.write(&batch)?;
        self.pending = 0;
        self.summary.frames += 1;
        Ok(())
    }

    /// Emit the remainder (possibly empty) and close the data IPC stream
    pub fn finish(mut self) -> HybridResult<DataSummary> {
        self.flush()?;
        self.writer.finish()?;
        Ok(self.summary)
    }
}
