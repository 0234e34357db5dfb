use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::RawCell;
use crate::spreadsheet::SheetRows;
use crate::spreadsheet::SpreadsheetError;

/// Largest number of cells a sheet may expand to once laid out as rows.
pub(crate) const MAX_CELLS: usize = 10_000_000;

/// Populated cells of one sheet plus the bounding box they occupy.
///
/// Readers push cells as they meet them; [`Grid::into_sheet_rows`] then lays them out
/// as a header row followed by data rows spanning the populated columns.
#[derive(Default)]
pub(crate) struct Grid {
    pub(crate) cells: Vec<Cell>,
    pub(crate) row_lower_bound: Option<usize>,
    pub(crate) row_upper_bound: Option<usize>,
    pub(crate) col_lower_bound: Option<usize>,
    pub(crate) col_upper_bound: Option<usize>,
}

impl Grid {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Records a cell. Null cells carry no value and do not widen the populated region.
    pub(crate) fn push(&mut self, cell: Cell) {
        if cell.value == RawCell::Null {
            return;
        }
        self.update_bound(cell.row, cell.col);
        self.cells.push(cell);
    }

    fn update_bound(&mut self, row: usize, col: usize) {
        if self.row_lower_bound.map(|lower| row < lower).unwrap_or(true) {
            self.row_lower_bound = Some(row);
        }
        if self.row_upper_bound.map(|upper| upper < row).unwrap_or(true) {
            self.row_upper_bound = Some(row);
        }
        if self.col_lower_bound.map(|lower| col < lower).unwrap_or(true) {
            self.col_lower_bound = Some(col);
        }
        if self.col_upper_bound.map(|upper| upper < col).unwrap_or(true) {
            self.col_upper_bound = Some(col);
        }
    }

    /// Shapes the populated region into headers and rows.
    ///
    /// The first populated row is the header. Header cells that are blank are named
    /// `ColumnN` after their 1-based position. When two cells share a position the
    /// one pushed last wins. Only rows that are emitted get allocated, and the emitted
    /// region may hold at most [`MAX_CELLS`] cells.
    pub(crate) fn into_sheet_rows(mut self, skip_empty_rows: bool) -> Result<SheetRows, SpreadsheetError> {
        let (Some(row_lower), Some(row_upper), Some(col_lower), Some(col_upper)) = (
            self.row_lower_bound,
            self.row_upper_bound,
            self.col_lower_bound,
            self.col_upper_bound,
        ) else {
            return Ok(SheetRows::default());
        };
        let width = col_upper - col_lower + 1;

        // Stable, so among duplicates the later push stays last.
        self.cells.sort_by_key(|cell| (cell.row, cell.col));
        let height = if skip_empty_rows {
            let mut populated = self.cells.iter().map(|cell| cell.row).collect::<Vec<_>>();
            populated.dedup();
            populated.len()
        } else {
            row_upper - row_lower + 1
        };
        if width.saturating_mul(height) > MAX_CELLS {
            return Err(SpreadsheetError::SheetTooLarge {
                rows: height,
                columns: width,
                limit: MAX_CELLS,
            });
        }

        let mut table: Vec<Vec<RawCell>> = Vec::with_capacity(height);
        let mut next_row = row_lower;
        let mut cells = self.cells.into_iter().peekable();
        while let Some(row_index) = cells.peek().map(|cell| cell.row) {
            if !skip_empty_rows {
                table.extend((next_row..row_index).map(|_| vec![RawCell::Null; width]));
            }
            let mut row = vec![RawCell::Null; width];
            while let Some(cell) = cells.next_if(|cell| cell.row == row_index) {
                row[cell.col - col_lower] = cell.value;
            }
            if table.is_empty() || !skip_empty_rows || !row.iter().all(RawCell::is_blank) {
                table.push(row);
            }
            next_row = row_index + 1;
        }

        let mut table = table.into_iter();
        let headers = table
            .next()
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, cell)| match cell.to_string().trim() {
                "" => format!("Column{}", index + 1),
                text => text.to_owned(),
            })
            .collect();
        let rows = table.collect();
        Ok(SheetRows { headers, rows })
    }
}
