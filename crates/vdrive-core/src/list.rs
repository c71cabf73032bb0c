//! Listing results and their table rendering.

use std::fmt;

use crate::File;

pub const LIST_MASK_KEY: u32 = 1;
pub const LIST_MASK_CID: u32 = 2;
pub const LIST_MASK_SIZE: u32 = 4;
pub const LIST_MASK_TIME: u32 = 8;
pub const LIST_MASK_OWNER: u32 = 16;
pub const LIST_MASK_ALL: u32 = 31;

/// Files matched by [`Drive::list`](crate::Drive::list), sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    files: Vec<File>,
}

impl ListResult {
    pub(crate) fn new(mut files: Vec<File>) -> Self {
        files.sort_by(|a, b| a.key.cmp(&b.key));
        Self { files }
    }

    pub fn files(&self) -> &[File] {
        &self.files
    }

    pub fn into_files(self) -> Vec<File> {
        self.files
    }

    pub fn keys(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.key.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Render an aligned table with the columns selected by `mask`.
    /// A mask selecting no known column renders every column.
    pub fn render(&self, mask: u32) -> String {
        let mut mask = mask & LIST_MASK_ALL;
        if mask == 0 {
            mask = LIST_MASK_ALL;
        }

        let all: [(u32, &str, fn(&File) -> String); 5] = [
            (LIST_MASK_KEY, "Key", |f| f.key.clone()),
            (LIST_MASK_CID, "Cid", |f| f.content_id.to_hex()),
            (LIST_MASK_SIZE, "Size", |f| human_size(f.size)),
            (LIST_MASK_TIME, "Timestamp", |f| f.timestamp.clone()),
            (LIST_MASK_OWNER, "Owner", |f| f.owner.clone()),
        ];
        let columns: Vec<(&str, fn(&File) -> String)> = all
            .into_iter()
            .filter(|(bit, _, _)| mask & bit != 0)
            .map(|(_, name, cell)| (name, cell))
            .collect();

        let rows: Vec<Vec<String>> = self
            .files
            .iter()
            .map(|file| columns.iter().map(|(_, cell)| cell(file)).collect())
            .collect();

        let widths: Vec<usize> = columns
            .iter()
            .enumerate()
            .map(|(i, (name, _))| {
                rows.iter()
                    .map(|row| row[i].chars().count())
                    .chain(std::iter::once(name.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        push_row(&mut out, columns.iter().map(|(name, _)| *name), &widths);
        out.push('|');
        for width in &widths {
            out.push_str(&"-".repeat(width + 2));
            out.push('|');
        }
        out.push('\n');
        for row in &rows {
            push_row(&mut out, row.iter().map(String::as_str), &widths);
        }
        out
    }
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    out.push('|');
    for (cell, width) in cells.zip(widths) {
        let pad = width.saturating_sub(cell.chars().count());
        out.push(' ');
        out.push_str(cell);
        out.push_str(&" ".repeat(pad + 1));
        out.push('|');
    }
    out.push('\n');
}

impl fmt::Display for ListResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(LIST_MASK_ALL))
    }
}

impl IntoIterator for ListResult {
    type Item = File;
    type IntoIter = std::vec::IntoIter<File>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

/// Human-readable IEC size: `512 B`, `1.5 KiB`, `20 MiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let exp = ((63 - bytes.leading_zeros()) / 10) as usize;
    let value = bytes as f64 / (1u64 << (exp * 10)) as f64;
    if value < 10.0 {
        format!("{:.1} {}", value, UNITS[exp])
    } else {
        format!("{:.0} {}", value, UNITS[exp])
    }
}
