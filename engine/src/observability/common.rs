//! Plain-text table rendering for log reports.

/// Width of every column: the widest of its header and its cells.
fn column_widths(headers: &[&str], rows: &[Vec<String>]) -> Vec<usize> {
    let columns = rows
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(headers.len());

    (0..columns)
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.chars().count())
                .chain(headers.get(col).map(|h| h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect()
}

fn push_row<S: AsRef<str>>(cells: &[S], widths: &[usize], output: &mut String) {
    let padded: Vec<String> = widths
        .iter()
        .enumerate()
        .map(|(col, width)| {
            let cell = cells.get(col).map(|c| c.as_ref()).unwrap_or("");
            format!("{:width$}", cell, width = width)
        })
        .collect();
    output.push_str(&format!("| {} |\n", padded.join(" | ")));
}

/// Render `rows` under a title bar and a header row. Empty when there are
/// no rows.
pub fn format_table(title: &str, headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut widths = column_widths(headers, rows);
    let inner: usize = widths.iter().sum::<usize>() + (widths.len() - 1) * 3;
    let title_len = title.chars().count();
    if title_len > inner {
        if let Some(last) = widths.last_mut() {
            *last += title_len - inner;
        }
    }
    let inner = inner.max(title_len);

    let mut output = String::new();
    output.push_str(&format!(" {} \n", "=".repeat(inner + 2)));
    output.push_str(&format!("| {:<inner$} |\n", title));
    output.push_str(&format!("|-{}-|\n", "-".repeat(inner)));

    push_row(headers, &widths, &mut output);
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&format!("|-{}-|\n", separator.join("-|-")));
    for row in rows {
        push_row(row, &widths, &mut output);
    }
    output.push_str(&format!(" {} \n", "-".repeat(inner + 2)));

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_rows_render_nothing() {
        assert_eq!(format_table("Usage", &["A"], &[]), "");
    }

    #[test]
    fn test_columns_are_aligned() {
        let rows = vec![
            vec!["openai".to_string(), "12".to_string()],
            vec!["hf".to_string(), "3".to_string()],
        ];
        let table = format_table("API", &["Service", "Requests"], &rows);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines[1], "| API                |");
        assert_eq!(lines[3], "| Service | Requests |");
        assert_eq!(lines[5], "| openai  | 12       |");
        assert_eq!(lines[6], "| hf      | 3        |");
        assert!(lines.iter().skip(1).all(|l| l.chars().count() == lines[3].chars().count()));
    }

    #[test]
    fn test_long_title_widens_last_column() {
        let rows = vec![vec!["a".to_string(), "b".to_string()]];
        let table = format_table("A much longer title", &["x", "y"], &rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[1], "| A much longer title |");
        assert_eq!(lines[3].len(), lines[1].len());
    }
}
