//! Parser for the fixed-width tables winget prints.
//!
//! ```text
//! Name              Id                Version   Available Source
//! --------------------------------------------------------------
//! Mozilla Firefox   Mozilla.Firefox   101.0     102.0     winget
//! ```
//!
//! Column boundaries come from the header line. Progress spinners that winget
//! writes with carriage returns are discarded.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct Table {
    rows: Vec<HashMap<String, String>>,
}

impl Table {
    /// Parse `output`; returns `None` when no header with all `required`
    /// column names is found.
    pub(crate) fn parse(output: &str, required: &[&str]) -> Option<Self> {
        let lines: Vec<&str> = output
            .lines()
            .map(|l| l.rsplit('\r').next().unwrap_or(l).trim_end())
            .collect();

        let header_idx = lines.iter().position(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            required.iter().all(|r| words.contains(r))
        })?;
        let columns = column_starts(lines[header_idx]);

        let mut rows = Vec::new();
        for line in &lines[header_idx + 1..] {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.chars().all(|c| c == '-') {
                continue;
            }
            let chars: Vec<char> = line.chars().collect();
            let mut row = HashMap::new();
            for (i, (name, start)) in columns.iter().enumerate() {
                let end = columns
                    .get(i + 1)
                    .map(|(_, next)| *next)
                    .unwrap_or(chars.len())
                    .min(chars.len());
                if *start >= end {
                    continue;
                }
                let cell: String = chars[*start..end].iter().collect();
                let cell = cell.trim();
                if !cell.is_empty() {
                    row.insert(name.clone(), cell.to_string());
                }
            }
            rows.push(row);
        }
        Some(Self { rows })
    }

    /// Rows that have a value for every column in `required`.
    pub(crate) fn rows_with<'a>(
        &'a self,
        required: &'a [&'a str],
    ) -> impl Iterator<Item = &'a HashMap<String, String>> + 'a {
        self.rows
            .iter()
            .filter(move |row| required.iter().all(|c| row.contains_key(*c)))
    }
}

/// Header words with their starting character offsets.
fn column_starts(header: &str) -> Vec<(String, usize)> {
    let mut columns: Vec<(String, usize)> = Vec::new();
    let mut prev_space = true;

    for (idx, c) in header.chars().enumerate() {
        if c.is_whitespace() {
            prev_space = true;
            continue;
        }
        if prev_space {
            columns.push((String::new(), idx));
        }
        if let Some((name, _)) = columns.last_mut() {
            name.push(c);
        }
        prev_space = false;
    }
    columns
}
