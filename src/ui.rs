#![allow(dead_code)]

use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.len()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{}/{}]", num, total).blue().bold(), msg);
}

// ============================================================================
// Tables
// ============================================================================

/// Width of each column, sized to the widest cell including the header
pub fn column_widths(headers: &[&str], rows: &[Vec<String>]) -> Vec<usize> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i >= widths.len() {
                widths.push(0);
            }
            widths[i] = widths[i].max(cell.chars().count());
        }
    }
    widths
}

/// Join cells padded to column widths. The last column is left unpadded.
pub fn format_row(cells: &[&str], widths: &[usize]) -> String {
    let mut out = String::new();
    for (i, cell) in cells.iter().enumerate() {
        if i + 1 == cells.len() {
            out.push_str(cell);
        } else {
            let width = widths.get(i).copied().unwrap_or(0);
            out.push_str(&format!("{:<width$}  ", cell));
        }
    }
    out.trim_end().to_string()
}

/// Print an aligned table with a bold header row
pub fn table(headers: &[&str], rows: &[Vec<String>]) {
    let widths = column_widths(headers, rows);
    println!("{}", format_row(headers, &widths).bold());
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        println!("{}", format_row(&cells, &widths));
    }
}

/// Print rows joined by tabs, no header and no padding
pub fn machine_table(rows: &[Vec<String>]) {
    for row in rows {
        println!("{}", row.join("\t"));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_widths_tracks_widest_cell() {
        let rows = vec![
            vec!["default".to_string(), "-".to_string()],
            vec!["de".to_string(), "rpool/ROOT/default@snap".to_string()],
        ];
        assert_eq!(column_widths(&["Name", "Origin"], &rows), vec![7, 23]);
    }

    #[test]
    fn test_column_widths_header_wins_when_wider() {
        let rows = vec![vec!["a".to_string(), "b".to_string()]];
        assert_eq!(column_widths(&["Name", "Mountpoint"], &rows), vec![4, 10]);
    }

    #[test]
    fn test_column_widths_ragged_rows() {
        let rows = vec![vec![
            "one".to_string(),
            "two".to_string(),
            "three".to_string(),
        ]];
        assert_eq!(column_widths(&["Name"], &rows), vec![4, 3, 5]);
    }

    #[test]
    fn test_format_row_pads_all_but_last() {
        let widths = vec![7, 6, 3];
        assert_eq!(
            format_row(&["default", "N", "/"], &widths),
            "default  N       /"
        );
    }

    #[test]
    fn test_format_row_single_column() {
        assert_eq!(format_row(&["default"], &[7]), "default");
    }

    #[test]
    fn test_format_row_trims_trailing_space() {
        let widths = vec![10, 1];
        assert_eq!(format_row(&["short", ""], &widths), "short");
    }
}
