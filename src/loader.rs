use calamine::{Data, Reader, Xls, Xlsx, open_workbook_from_rs};
use std::io::Cursor;

use crate::error::AppError;
use crate::table::{SheetMap, Table, Value};

/// Sheet name given to the single table read from a CSV file
pub const CSV_SHEET_NAME: &str = "Sheet1";

/// Extensions accepted by the upload widget
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["csv", "xlsx", "xls"];

/// Load a CSV file into a single-sheet map
///
/// The first record is the header. Records may be shorter or longer than the
/// header; short ones are padded with empty cells.
///
/// # Arguments
/// * `bytes` - Raw file content
///
/// # Returns
/// * `Result<SheetMap, AppError>` - A map holding one sheet named `Sheet1`
pub fn from_csv(bytes: &[u8]) -> Result<SheetMap, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let header: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    if header.is_empty() {
        return Err(AppError::FileRead("CSV file is empty".to_string()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(Value::infer).collect());
    }

    let mut sheets = SheetMap::new();
    sheets.insert(CSV_SHEET_NAME, Table::new(header, rows));
    Ok(sheets)
}

/// Load every sheet of an Excel workbook
///
/// Works for both `.xlsx` and legacy `.xls` readers. Each sheet is parsed on
/// its own with its first row as the header.
pub fn from_excel<R>(bytes: &[u8]) -> Result<SheetMap, AppError>
where
    R: Reader<Cursor<Vec<u8>>>,
    R::Error: std::fmt::Display,
{
    let mut workbook = open_workbook_from_rs::<R, _>(Cursor::new(bytes.to_vec()))
        .map_err(|e| AppError::FileRead(e.to_string()))?;

    let mut sheets = SheetMap::new();
    for sheet_name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| AppError::FileRead(format!("{}: {}", sheet_name, e)))?;

        let mut rows = range.rows();
        let header = match rows.next() {
            Some(first) => first.iter().map(|cell| cell.to_string()).collect(),
            None => Vec::new(),
        };
        let data = rows
            .map(|row| row.iter().map(convert_cell).collect())
            .collect();

        sheets.insert(sheet_name, Table::new(header, data));
    }

    if sheets.is_empty() {
        return Err(AppError::FileRead("No sheets found in Excel file".to_string()));
    }

    Ok(sheets)
}

fn convert_cell(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Empty,
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) => Value::Text(s.clone()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(Value::DateTime)
            .unwrap_or(Value::Float(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::Text(s.clone()),
        // Cell errors such as #DIV/0! are treated as missing values
        Data::Error(_) => Value::Empty,
    }
}

/// Lower-cased extension of a file name, if any
pub fn file_extension(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Detect file type and load the appropriate format
///
/// # Arguments
/// * `file_name` - Name of the uploaded file, used only for its extension
/// * `bytes` - Raw file content
///
/// # Returns
/// * `Result<SheetMap, AppError>` - Sheet name to table, or
///   `AppError::UnsupportedFileFormat` for anything but csv/xlsx/xls
///
/// # Examples
/// ```
/// use sheet_qa::loader::load_file;
///
/// let sheets = load_file("sales.csv", b"region,sales\nNorth,100\n").unwrap();
/// assert_eq!(sheets.names(), vec!["Sheet1"]);
/// assert!(load_file("notes.txt", b"hello").is_err());
/// ```
pub fn load_file(file_name: &str, bytes: &[u8]) -> Result<SheetMap, AppError> {
    let extension = file_extension(file_name);

    let sheets = match extension.as_deref() {
        Some("csv") => from_csv(bytes)?,
        Some("xlsx") => from_excel::<Xlsx<Cursor<Vec<u8>>>>(bytes)?,
        Some("xls") => from_excel::<Xls<Cursor<Vec<u8>>>>(bytes)?,
        Some(ext) => return Err(AppError::UnsupportedFileFormat(format!(".{}", ext))),
        None => return Err(AppError::UnsupportedFileFormat(file_name.to_string())),
    };

    log::info!(
        "loaded {} ({} sheet{})",
        file_name,
        sheets.len(),
        if sheets.len() == 1 { "" } else { "s" }
    );
    Ok(sheets)
}
