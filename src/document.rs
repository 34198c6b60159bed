//! Tabular document conversion (CSV, TXT, XLSX/XLS, JSON).

use calamine::{open_workbook_auto, Reader};
use rust_xlsxwriter::Workbook;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::error::{ConvertError, Result};
use crate::{extension_of, Category, ConversionOptions};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const XLSX_MAX_COLUMNS: usize = 16_384;

/// Text encodings understood when reading and writing delimited files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    /// UTF-8 with a leading byte order mark
    #[serde(rename = "utf-8-sig", alias = "utf8-sig")]
    Utf8Bom,
    #[serde(rename = "latin-1", alias = "latin1", alias = "iso-8859-1")]
    Latin1,
    #[serde(rename = "ascii")]
    Ascii,
}

impl TextEncoding {
    pub const ALL: [TextEncoding; 4] = [
        TextEncoding::Utf8,
        TextEncoding::Utf8Bom,
        TextEncoding::Latin1,
        TextEncoding::Ascii,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf8Bom => "utf-8-sig",
            TextEncoding::Latin1 => "latin-1",
            TextEncoding::Ascii => "ascii",
        }
    }

    pub fn decode(&self, bytes: &[u8], path: &Path) -> Result<String> {
        let invalid = |reason: String| ConvertError::Document {
            path: path.to_path_buf(),
            reason,
        };
        match self {
            TextEncoding::Utf8 | TextEncoding::Utf8Bom => {
                let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                String::from_utf8(body.to_vec())
                    .map_err(|e| invalid(format!("not valid {}: {}", self.name(), e)))
            }
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            TextEncoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(pos) => Err(invalid(format!(
                    "non-ascii byte 0x{:02x} at offset {}",
                    bytes[pos], pos
                ))),
                None => Ok(bytes.iter().map(|&b| b as char).collect()),
            },
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::Utf8Bom => {
                let mut out = Vec::with_capacity(text.len() + UTF8_BOM.len());
                out.extend_from_slice(UTF8_BOM);
                out.extend_from_slice(text.as_bytes());
                Ok(out)
            }
            TextEncoding::Latin1 => narrow(text, self.name(), 0xFF),
            TextEncoding::Ascii => narrow(text, self.name(), 0x7F),
        }
    }
}

fn narrow(text: &str, encoding: &'static str, max: u32) -> Result<Vec<u8>> {
    text.chars()
        .map(|ch| {
            if (ch as u32) <= max {
                Ok(ch as u8)
            } else {
                Err(ConvertError::Encoding { encoding, ch })
            }
        })
        .collect()
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TextEncoding {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "utf-8-sig" | "utf8-sig" => Ok(TextEncoding::Utf8Bom),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(TextEncoding::Latin1),
            "ascii" | "us-ascii" => Ok(TextEncoding::Ascii),
            _ => Err(ConvertError::UnknownEncoding(s.to_string())),
        }
    }
}

/// In-memory table: a header row plus string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0)
    }

    /// Pad ragged rows and name unnamed columns so every row has `width()` cells.
    ///
    /// Repeated header names get a `.1`, `.2`, ... suffix so every column
    /// survives formats keyed by name.
    fn normalize(&mut self) {
        let width = self.width();
        while self.headers.len() < width {
            let n = self.headers.len() + 1;
            self.headers.push(format!("column_{}", n));
        }
        for row in &mut self.rows {
            row.resize(width, String::new());
        }
        self.headers = unique_headers(&self.headers);
    }
}

fn unique_headers(headers: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut unique = Vec::with_capacity(headers.len());
    for header in headers {
        let mut name = header.clone();
        while seen.contains(&name) {
            let n = counts.entry(header.as_str()).or_insert(0);
            *n += 1;
            name = format!("{}.{}", header, n);
        }
        seen.insert(name.clone());
        unique.push(name);
    }
    unique
}

/// Convert one tabular document to `target` (csv, xlsx, json or txt).
pub fn convert_document(
    input: &Path,
    output: &Path,
    target: &str,
    options: &ConversionOptions,
) -> Result<()> {
    let in_ext = extension_of(input).unwrap_or_default();

    // Plain text is only parsed when going to csv; anything else keeps the bytes as-is.
    if in_ext == "txt" && target != "csv" {
        debug!(input = %input.display(), "copying text document verbatim");
        fs::copy(input, output).map_err(|e| ConvertError::io(output, e))?;
        return Ok(());
    }

    let table = read_table(input, options.encoding)?;
    debug!(
        input = %input.display(),
        rows = table.rows.len(),
        columns = table.headers.len(),
        "read table"
    );
    write_table(&table, output, target, options)
}

pub fn read_table(path: &Path, encoding: TextEncoding) -> Result<Table> {
    let ext = extension_of(path).unwrap_or_default();
    let mut table = match ext.as_str() {
        "csv" => {
            let text = read_text(path, encoding)?;
            parse_delimited(&text, b',')?
        }
        "txt" => {
            let text = read_text(path, encoding)?;
            let delimiter = if text.lines().next().is_some_and(|l| l.contains('\t')) {
                b'\t'
            } else {
                b','
            };
            parse_delimited(&text, delimiter)?
        }
        "xlsx" | "xls" => read_spreadsheet(path)?,
        "json" => {
            let text = read_text(path, encoding)?;
            let value: Value = serde_json::from_str(&text)?;
            table_from_json(value, path)?
        }
        _ => {
            return Err(ConvertError::UnsupportedInput {
                path: path.to_path_buf(),
                extension: ext,
            })
        }
    };
    table.normalize();
    Ok(table)
}

fn read_text(path: &Path, encoding: TextEncoding) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| ConvertError::io(path, e))?;
    encoding.decode(&bytes, path)
}

fn parse_delimited(text: &str, delimiter: u8) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.iter().map(String::from).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(String::from).collect());
    }
    Ok(Table { headers, rows })
}

fn read_spreadsheet(path: &Path) -> Result<Table> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook.worksheet_range_at(0).ok_or_else(|| ConvertError::Document {
        path: path.to_path_buf(),
        reason: "workbook has no worksheets".to_string(),
    })??;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect::<Vec<String>>());
    let headers = rows.next().unwrap_or_default();
    Ok(Table {
        headers,
        rows: rows.collect(),
    })
}

fn table_from_json(value: Value, path: &Path) -> Result<Table> {
    let invalid = |reason: &str| ConvertError::Document {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    match value {
        Value::Array(items) if items.iter().all(Value::is_object) => {
            let mut headers: Vec<String> = Vec::new();
            for item in &items {
                if let Value::Object(map) = item {
                    for key in map.keys() {
                        if !headers.contains(key) {
                            headers.push(key.clone());
                        }
                    }
                }
            }
            let rows = items
                .iter()
                .map(|item| {
                    headers
                        .iter()
                        .map(|h| item.get(h).map(cell_text).unwrap_or_default())
                        .collect()
                })
                .collect();
            Ok(Table { headers, rows })
        }
        Value::Array(items) if items.iter().all(Value::is_array) => {
            let mut rows = items
                .into_iter()
                .map(|row| match row {
                    Value::Array(cells) => cells.iter().map(cell_text).collect(),
                    _ => Vec::new(),
                })
                .collect::<Vec<Vec<String>>>()
                .into_iter();
            let headers = rows.next().unwrap_or_default();
            Ok(Table {
        headers,
        rows: rows.collect(),
    })
        }
        // Column oriented: {"col": {"0": v, "1": v}} or {"col": [v, v]}
        Value::Object(columns) => {
            let headers: Vec<String> = columns.keys().cloned().collect();
            let mut index: Vec<String> = Vec::new();
            let mut longest_list = 0;
            for column in columns.values() {
                match column {
                    Value::Object(cells) => {
                        for key in cells.keys() {
                            if !index.contains(key) {
                                index.push(key.clone());
                            }
                        }
                    }
                    Value::Array(cells) => longest_list = longest_list.max(cells.len()),
                    _ => {
                        return Err(invalid(
                            "expected an array of records or an object of columns",
                        ))
                    }
                }
            }
            let height = index.len().max(longest_list);
            let rows = (0..height)
                .map(|i| {
                    columns
                        .values()
                        .map(|column| match column {
                            Value::Object(cells) => index
                                .get(i)
                                .and_then(|k| cells.get(k))
                                .map(cell_text)
                                .unwrap_or_default(),
                            Value::Array(cells) => cells.get(i).map(cell_text).unwrap_or_default(),
                            _ => String::new(),
                        })
                        .collect()
                })
                .collect();
            Ok(Table { headers, rows })
        }
        _ => Err(invalid("expected an array of records or an object of columns")),
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Number parsed from `s` only when it prints back identically.
fn exact_number(s: &str) -> Option<Number> {
    if let Ok(i) = s.parse::<i64>() {
        return (i.to_string() == s).then(|| Number::from(i));
    }
    let f = s.parse::<f64>().ok().filter(|f| f.is_finite())?;
    Number::from_f64(f).filter(|n| n.to_string() == s)
}

fn json_cell(s: &str) -> Value {
    match s {
        "" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => exact_number(s).map(Value::Number).unwrap_or_else(|| Value::String(s.to_string())),
    }
}

pub fn write_table(
    table: &Table,
    output: &Path,
    target: &str,
    options: &ConversionOptions,
) -> Result<()> {
    match target {
        "csv" => write_delimited(table, output, b',', options),
        "txt" => write_delimited(table, output, b'\t', options),
        "json" => write_json(table, output, options.encoding),
        "xlsx" => write_xlsx(table, output, options.include_headers),
        other => Err(ConvertError::UnsupportedTarget {
            category: Category::Documents,
            format: other.to_string(),
            allowed: Category::Documents.target_formats().join(", "),
        }),
    }
}

fn write_delimited(
    table: &Table,
    output: &Path,
    delimiter: u8,
    options: &ConversionOptions,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_writer(Vec::new());
    if options.include_headers {
        writer.write_record(&table.headers)?;
    }
    for row in &table.rows {
        writer.write_record(row)?;
    }
    let buf = writer.into_inner().map_err(|e| ConvertError::io(output, e.into_error()))?;
    let text = String::from_utf8(buf).map_err(|e| ConvertError::Document {
        path: output.to_path_buf(),
        reason: e.to_string(),
    })?;
    let bytes = options.encoding.encode(&text)?;
    fs::write(output, bytes).map_err(|e| ConvertError::io(output, e))
}

fn write_json(table: &Table, output: &Path, encoding: TextEncoding) -> Result<()> {
    let records: Vec<Value> = table
        .rows
        .iter()
        .map(|row| {
            let record: Map<String, Value> = table
                .headers
                .iter()
                .zip(row.iter())
                .map(|(h, cell)| (h.clone(), json_cell(cell)))
                .collect();
            Value::Object(record)
        })
        .collect();
    let text = serde_json::to_string(&Value::Array(records))?;
    let bytes = encoding.encode(&text)?;
    fs::write(output, bytes).map_err(|e| ConvertError::io(output, e))
}

fn write_xlsx(table: &Table, output: &Path, include_headers: bool) -> Result<()> {
    if table.width() > XLSX_MAX_COLUMNS {
        return Err(ConvertError::Document {
            path: output.to_path_buf(),
            reason: format!(
                "{} columns exceed the xlsx limit of {}",
                table.width(),
                XLSX_MAX_COLUMNS
            ),
        });
    }

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let mut row: u32 = 0;
    if include_headers {
        for (col, header) in table.headers.iter().enumerate() {
            worksheet.write_string(row, col as u16, header.as_str())?;
        }
        row += 1;
    }
    for cells in &table.rows {
        for (col, cell) in cells.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            match exact_number(cell).and_then(|n| n.as_f64()) {
                Some(n) => worksheet.write_number(row, col as u16, n)?,
                None => worksheet.write_string(row, col as u16, cell.as_str())?,
            };
        }
        row += 1;
    }
    workbook.save(output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn encoding_names_parse() {
        assert_eq!("UTF8".parse::<TextEncoding>().unwrap(), TextEncoding::Utf8);
        assert_eq!("iso_8859_1".parse::<TextEncoding>().unwrap(), TextEncoding::Latin1);
        assert!(matches!("ebcdic".parse::<TextEncoding>(), Err(ConvertError::UnknownEncoding(_))));
    }

    #[test]
    fn latin1_round_trips_and_ascii_rejects() {
        let bytes = TextEncoding::Latin1.encode("café").unwrap();
        assert_eq!(bytes, vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(TextEncoding::Latin1.decode(&bytes, Path::new("x.csv")).unwrap(), "café");
        assert!(matches!(
            TextEncoding::Ascii.encode("café"),
            Err(ConvertError::Encoding { ch: 'é', .. })
        ));
        assert!(TextEncoding::Ascii.decode(&bytes, Path::new("x.csv")).is_err());
    }

    #[test]
    fn utf8_bom_is_written_and_stripped() {
        let bytes = TextEncoding::Utf8Bom.encode("a,b").unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        assert_eq!(TextEncoding::Utf8.decode(&bytes, Path::new("x.csv")).unwrap(), "a,b");
    }

    #[test]
    fn json_cells_only_become_numbers_when_exact() {
        assert_eq!(json_cell("42"), Value::from(42));
        assert_eq!(json_cell("3.5"), Value::from(3.5));
        assert_eq!(json_cell("007"), Value::from("007"));
        assert_eq!(json_cell("1.50"), Value::from("1.50"));
        assert_eq!(json_cell(""), Value::Null);
        assert_eq!(json_cell("true"), Value::Bool(true));
    }

    #[test]
    fn ragged_rows_are_padded() {
        let mut table = parse_delimited("a,b\n1\n2,3,4\n", b',').unwrap();
        table.normalize();
        assert_eq!(table.headers, vec!["a", "b", "column_3"]);
        assert_eq!(table.rows, vec![vec!["1", "", ""], vec!["2", "3", "4"]]);
    }

    #[test]
    fn repeated_headers_get_numbered() {
        let mut table = parse_delimited("a,b,a,a,a.1\n1,2,3,4,5\n", b',').unwrap();
        table.normalize();
        assert_eq!(table.headers, vec!["a", "b", "a.1", "a.2", "a.1.1"]);
        assert_eq!(table.rows[0], vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn repeated_headers_keep_every_json_value() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("dupes.csv");
        let json = dir.path().join("dupes.json");
        fs::write(&input, "a,a\n1,2\n").unwrap();
        convert_document(&input, &json, "json", &ConversionOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(&json).unwrap(), r#"[{"a":1,"a.1":2}]"#);
    }

    #[test]
    fn latin1_json_reads_back_with_the_same_encoding() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("menu.csv");
        let json = dir.path().join("menu.json");
        let back = dir.path().join("menu_back.csv");
        fs::write(&input, b"name\ncaf\xE9\n").unwrap();

        let opts = ConversionOptions::default().with_encoding(TextEncoding::Latin1);
        convert_document(&input, &json, "json", &opts).unwrap();
        assert_eq!(fs::read(&json).unwrap(), b"[{\"name\":\"caf\xE9\"}]");

        convert_document(&json, &back, "csv", &opts).unwrap();
        assert_eq!(fs::read(&back).unwrap(), fs::read(&input).unwrap());
    }

    #[test]
    fn json_rows_use_first_row_as_header() {
        let value: Value =
            serde_json::from_str(r#"[["name","n"],["a",1],["b",null,true]]"#).unwrap();
        let mut table = table_from_json(value, Path::new("t.json")).unwrap();
        table.normalize();
        assert_eq!(table.headers, vec!["name", "n", "column_3"]);
        assert_eq!(table.rows, vec![vec!["a", "1", ""], vec!["b", "", "true"]]);
    }

    #[test]
    fn json_records_keep_key_order() {
        let value: Value = serde_json::from_str(r#"[{"z":1,"a":"x"},{"a":"y","m":true}]"#).unwrap();
        let table = table_from_json(value, Path::new("t.json")).unwrap();
        assert_eq!(table.headers, vec!["z", "a", "m"]);
        assert_eq!(table.rows[0], vec!["1", "x", ""]);
        assert_eq!(table.rows[1], vec!["", "y", "true"]);
    }

    #[test]
    fn json_columns_are_accepted() {
        let value: Value =
            serde_json::from_str(r#"{"name":{"0":"a","1":"b"},"n":{"0":1,"1":2}}"#).unwrap();
        let table = table_from_json(value, Path::new("t.json")).unwrap();
        assert_eq!(table.headers, vec!["name", "n"]);
        assert_eq!(table.rows, vec![vec!["a", "1"], vec!["b", "2"]]);
    }

    #[test]
    fn scalar_json_is_rejected() {
        let err = table_from_json(Value::from(3), Path::new("t.json")).unwrap_err();
        assert!(matches!(err, ConvertError::Document { .. }));
    }

    #[test]
    fn txt_to_non_csv_is_copied_verbatim() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("notes.txt");
        let output = dir.path().join("notes.json");
        fs::write(&input, "not\ta table at all").unwrap();
        convert_document(&input, &output, "json", &ConversionOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "not\ta table at all");
    }

    #[test]
    fn tab_separated_txt_becomes_csv() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("data.txt");
        let output = dir.path().join("data.csv");
        fs::write(&input, "name\tage\nann\t31\n").unwrap();
        convert_document(&input, &output, "csv", &ConversionOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "name,age\nann,31\n");
    }

    #[test]
    fn headers_can_be_omitted() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("data.csv");
        let output = dir.path().join("data.txt");
        fs::write(&input, "name,age\nann,31\nbob,42\n").unwrap();
        let opts = ConversionOptions::default().with_headers(false);
        convert_document(&input, &output, "txt", &opts).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "ann\t31\nbob\t42\n");
    }

    #[test]
    fn unknown_input_extension_fails() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("data.parquet");
        fs::write(&input, "PAR1").unwrap();
        let output = dir.path().join("data.csv");
        let err =
            convert_document(&input, &output, "csv", &ConversionOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::UnsupportedInput { ref extension, .. } if extension == "parquet"
        ));
    }

    #[test]
    fn xlsx_output_reads_back() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("people.csv");
        let output = dir.path().join("people.xlsx");
        fs::write(&input, "name,age\nann,31\nbob,42\n").unwrap();
        convert_document(&input, &output, "xlsx", &ConversionOptions::default()).unwrap();

        let table = read_table(&output, TextEncoding::Utf8).unwrap();
        assert_eq!(table.headers, vec!["name", "age"]);
        assert_eq!(table.rows, vec![vec!["ann", "31"], vec!["bob", "42"]]);
    }

    #[test]
    fn xlsx_output_without_headers_starts_with_data() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("people.csv");
        let output = dir.path().join("people.xlsx");
        fs::write(&input, "name,age\nann,31\nbob,42\n").unwrap();
        let opts = ConversionOptions::default().with_headers(false);
        convert_document(&input, &output, "xlsx", &opts).unwrap();

        // read_table treats the first sheet row as the header
        let table = read_table(&output, TextEncoding::Utf8).unwrap();
        assert_eq!(table.headers, vec!["ann", "31"]);
        assert_eq!(table.rows, vec![vec!["bob", "42"]]);
    }

    #[test]
    fn xls_input_goes_through_the_spreadsheet_reader() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("legacy.xls");
        fs::write(&input, "name,age\nann,31\n").unwrap();
        let err = read_table(&input, TextEncoding::Utf8).unwrap_err();
        assert!(matches!(err, ConvertError::Spreadsheet(_)), "got {err}");
    }
}
