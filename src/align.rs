use chrono::NaiveDate;

use crate::error::EtlError;

/// Contiguous, gap-free run of calendar dates shared by every row of a wide
/// table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateSpine {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateSpine {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EtlError> {
        if start > end {
            return Err(EtlError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..self.len() as i64).map(|offset| self.start + chrono::Days::new(offset as u64))
    }

    /// Row index of `date`, when it falls inside the spine. Contiguity makes
    /// this pure arithmetic.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        if date < self.start || date > self.end {
            return None;
        }
        Some((date - self.start).num_days() as usize)
    }
}

/// Constant per-entity metadata repeated on every row of its table.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMeta {
    pub code: String,
    pub name: String,
    pub population: Option<f64>,
}

impl EntityMeta {
    pub fn new(code: impl Into<String>, name: impl Into<String>, population: Option<f64>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            population,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LineageColumn {
    pub label: String,
    pub values: Vec<Option<f64>>,
}

/// Date-indexed table for one entity: a spine, fixed metadata, and one
/// column per merged lineage series. Rows align by exact date equality,
/// never by position.
#[derive(Debug, Clone)]
pub struct WideTable {
    meta: EntityMeta,
    spine: DateSpine,
    columns: Vec<LineageColumn>,
}

impl WideTable {
    pub fn new(meta: EntityMeta, spine: DateSpine) -> Self {
        Self {
            meta,
            spine,
            columns: Vec::new(),
        }
    }

    pub fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    pub fn spine(&self) -> &DateSpine {
        &self.spine
    }

    pub fn columns(&self) -> &[LineageColumn] {
        &self.columns
    }

    pub fn labels(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.label.as_str()).collect()
    }

    pub fn column(&self, label: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|column| column.label == label)
            .map(|column| column.values.as_slice())
    }

    /// Left-joins one smoothed lineage series onto the spine. Spine dates the
    /// series lacks stay `None`; series dates outside the spine are dropped.
    pub fn merge_lineage(
        mut self,
        label: impl Into<String>,
        points: &[(NaiveDate, f64)],
    ) -> Result<Self, EtlError> {
        let label = label.into();
        if self.columns.iter().any(|column| column.label == label) {
            return Err(EtlError::DuplicateSeries(label));
        }
        let mut values = vec![None; self.spine.len()];
        for (date, value) in points {
            if let Some(index) = self.spine.index_of(*date) {
                values[index] = Some(*value);
            }
        }
        self.columns.push(LineageColumn { label, values });
        Ok(self)
    }
}
