use log::debug;
use std::ops::Range;

use telemetry::{PersistentStore, Table};
use tensors::{Batch, Tensor3};

use crate::error::{Result, TrainError};
use crate::TrainerConfig;

/// Dropped before normalization; it orders rows but is not a feature.
pub const TIMESTAMP_COLUMN: &str = "timestamp";
/// x, y, z lead every row and are what the model predicts.
pub const LABEL_COLUMNS: usize = 3;
/// Lower bound for a column's standard deviation.
pub const STD_FLOOR: f64 = 1e-10;

/// Geometry of one windowed example.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowShape {
    pub input_width: usize,
    pub label_width: usize,
    pub shift: usize,
    pub input_columns: usize,
    pub label_columns: usize,
}

impl WindowShape {
    /// Rows spanned by one example.
    pub fn total_width(&self) -> usize {
        self.input_width + self.shift
    }

    /// Offset of the first label row inside the window.
    pub fn label_start(&self) -> usize {
        self.total_width() - self.label_width
    }
}

/// Per-column statistics of the slice the sets were built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct WindowedSets {
    pub shape: WindowShape,
    pub columns: Vec<String>,
    pub stats: ColumnStats,
    /// Rows in the bounded slice.
    pub rows: usize,
    pub train: Vec<Batch>,
    pub validation: Vec<Batch>,
    pub test: Vec<Batch>,
}

#[derive(Debug, Clone)]
pub enum Windowing {
    /// Not enough rows yet; nothing was produced.
    Insufficient { rows: usize },
    Ready(WindowedSets),
}

/// Turns the most recent slice of the store into batched train, validation
/// and test windows.
///
/// Statistics are taken from the slice itself on every call and never kept,
/// so they always describe the data being trained on.
#[derive(Debug, Clone)]
pub struct DatasetWindower {
    data_size: usize,
    input_width: usize,
    label_width: usize,
    shift: usize,
    batch_size: usize,
    partition: [f64; 3],
    min_rows: f64,
}

impl DatasetWindower {
    pub fn new(config: &TrainerConfig) -> Self {
        Self {
            data_size: config.data_size,
            input_width: config.input_width,
            label_width: config.label_width,
            shift: config.shift,
            batch_size: config.batch_size,
            partition: config.partition,
            min_rows: config.min_rows(),
        }
    }

    /// Reads the bounded slice from `store` and windows it. An absent store
    /// counts as zero rows.
    pub fn load(&self, store: &PersistentStore) -> Result<Windowing> {
        match store.read_tail(self.data_size)? {
            Some(table) => self.window(table),
            None => Ok(Windowing::Insufficient { rows: 0 }),
        }
    }

    pub fn window(&self, table: Table) -> Result<Windowing> {
        let mut table = table.without_column(TIMESTAMP_COLUMN);
        if table.columns.len() <= LABEL_COLUMNS {
            return Err(TrainError::Config(format!(
                "need at least one input column after the {LABEL_COLUMNS} label columns, got {:?}",
                table.columns
            )));
        }

        let rows = table.len();
        if !self.data_reach_min_size(rows) {
            debug!("{} rows, need more than {:.1}", rows, self.min_rows);
            return Ok(Windowing::Insufficient { rows });
        }

        let stats = normalize(&mut table);
        let label_columns: Vec<usize> = (0..LABEL_COLUMNS).collect();
        let input_columns: Vec<usize> = (LABEL_COLUMNS..table.columns.len()).collect();
        let shape = WindowShape {
            input_width: self.input_width,
            label_width: self.label_width,
            shift: self.shift,
            input_columns: input_columns.len(),
            label_columns: label_columns.len(),
        };

        let [train, validation, test] = split_bounds(rows, self.partition)
            .map(|range| self.batches(&table.rows[range], &input_columns, &label_columns));

        Ok(Windowing::Ready(WindowedSets {
            shape,
            columns: table.columns,
            stats,
            rows,
            train,
            validation,
            test,
        }))
    }

    /// True when every split can hold at least one full batch of windows.
    pub fn data_reach_min_size(&self, rows: usize) -> bool {
        rows as f64 > self.min_rows
    }

    /// Slides a window one row at a time over `rows` and groups the examples
    /// into batches of `batch_size`; the last batch may be smaller.
    fn batches(
        &self,
        rows: &[Vec<f64>],
        input_columns: &[usize],
        label_columns: &[usize],
    ) -> Vec<Batch> {
        let total = self.input_width + self.shift;
        let label_start = total - self.label_width;
        if rows.len() < total {
            return Vec::new();
        }

        let starts: Vec<usize> = (0..=rows.len() - total).collect();
        starts
            .chunks(self.batch_size)
            .map(|chunk| {
                let n = chunk.len();
                let mut inputs = Tensor3::zeros([n, self.input_width, input_columns.len()]);
                let mut labels = Tensor3::zeros([n, self.label_width, label_columns.len()]);
                for (b, &start) in chunk.iter().enumerate() {
                    for t in 0..self.input_width {
                        gather(inputs.row_mut(b, t), &rows[start + t], input_columns);
                    }
                    for t in 0..self.label_width {
                        gather(labels.row_mut(b, t), &rows[start + label_start + t], label_columns);
                    }
                }
                Batch { inputs, labels }
            })
            .collect()
    }
}

fn gather(dst: &mut [f32], row: &[f64], columns: &[usize]) {
    for (d, &c) in dst.iter_mut().zip(columns) {
        *d = row[c] as f32;
    }
}

/// Z-scores every column in place using the sample standard deviation.
/// NaN cells are skipped for the statistics and then set to 0, the new mean.
pub fn normalize(table: &mut Table) -> ColumnStats {
    let width = table.columns.len();
    let mut mean = vec![0.0; width];
    let mut std = vec![STD_FLOOR; width];

    for c in 0..width {
        let values: Vec<f64> = table.rows.iter().map(|r| r[c]).filter(|v| !v.is_nan()).collect();
        let n = values.len();
        if n == 0 {
            continue;
        }
        mean[c] = values.iter().sum::<f64>() / n as f64;
        if n > 1 {
            let var = values.iter().map(|v| (v - mean[c]).powi(2)).sum::<f64>() / (n - 1) as f64;
            std[c] = var.sqrt().max(STD_FLOOR);
        }
    }

    for row in &mut table.rows {
        for (c, v) in row.iter_mut().enumerate() {
            *v = if v.is_nan() { 0.0 } else { (*v - mean[c]) / std[c] };
        }
    }

    ColumnStats { mean, std }
}

/// Ordered, disjoint row ranges for train, validation and test.
pub fn split_bounds(rows: usize, partition: [f64; 3]) -> [Range<usize>; 3] {
    let mut cumulative = 0.0;
    let mut start = 0;
    partition.map(|ratio| {
        cumulative += ratio;
        // Absorbs rounding in the running sum, e.g. 0.5 + 0.2 + 0.1 < 0.8.
        let end = ((rows as f64 * cumulative + 1e-9).floor() as usize).clamp(start, rows);
        let range = start..end;
        start = end;
        range
    })
}
