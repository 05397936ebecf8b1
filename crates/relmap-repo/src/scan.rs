//! Moving cursor rows into documents.

use relmap_core::{Collection, Cursor, Document, Result, Scanner, Value};

/// Scan the first row of `cursor` into `doc`. Returns whether there was one.
pub(crate) fn scan_one(cursor: &mut dyn Cursor, doc: &mut Document<'_>) -> Result<bool> {
    let result = read_one(cursor, doc);
    cursor.close();
    result
}

fn read_one(cursor: &mut dyn Cursor, doc: &mut Document<'_>) -> Result<bool> {
    let fields = cursor.fields()?;
    if !cursor.next() {
        return Ok(false);
    }
    let mut scanners = doc.scanners(&fields);
    cursor.scan(&mut scanners)?;
    doc.assign(scanners)?;
    Ok(true)
}

/// Append every row of `cursor` to `col`. Returns the number of rows.
pub(crate) fn scan_all(cursor: &mut dyn Cursor, col: &mut Collection<'_>) -> Result<usize> {
    let result = read_all(cursor, col);
    cursor.close();
    result
}

fn read_all(cursor: &mut dyn Cursor, col: &mut Collection<'_>) -> Result<usize> {
    let fields = cursor.fields()?;
    let mut count = 0;
    while cursor.next() {
        let mut doc = col.add();
        let mut scanners = doc.scanners(&fields);
        cursor.scan(&mut scanners)?;
        doc.assign(scanners)?;
        count += 1;
    }
    Ok(count)
}

/// Rows of `cursor` as raw values, for fanning one row out to many records.
pub(crate) fn capture_rows(cursor: &mut dyn Cursor) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
    let result = read_rows(cursor);
    cursor.close();
    result
}

fn read_rows(cursor: &mut dyn Cursor) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
    let fields = cursor.fields()?;
    let mut rows = Vec::new();
    while cursor.next() {
        let mut scanners: Vec<Scanner> = fields.iter().map(|_| Scanner::capture()).collect();
        cursor.scan(&mut scanners)?;
        rows.push(
            scanners
                .iter_mut()
                .map(|scanner| scanner.take().unwrap_or(Value::Null))
                .collect(),
        );
    }
    Ok((fields, rows))
}

/// Write one captured row into `doc`.
pub(crate) fn assign_row(doc: &mut Document<'_>, fields: &[String], row: &[Value]) -> Result<()> {
    let mut scanners = doc.scanners(fields);
    for (scanner, value) in scanners.iter_mut().zip(row) {
        scanner.put(value.clone());
    }
    doc.assign(scanners)
}
