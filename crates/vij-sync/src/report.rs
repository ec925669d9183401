//! Plain CSV output for job summaries.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use tracing::info;

/// Write `rows` under `header` to `path`, replacing any previous file.
/// Fields containing the delimiter, quotes or newlines are quoted.
pub fn write_csv(path: &Path, header: &[&str], rows: &[Vec<String>]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let io_context = || format!("writing {}", path.display());
    writeln!(file, "{}", join_record(header.iter().copied())).with_context(io_context)?;
    for row in rows {
        writeln!(file, "{}", join_record(row.iter().map(String::as_str)))
            .with_context(io_context)?;
    }
    info!(path = %path.display(), rows = rows.len(), "summary csv written");
    Ok(())
}

fn join_record<'a>(fields: impl Iterator<Item = &'a str>) -> String {
    fields.map(csv_field).collect::<Vec<_>>().join(",")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().expect("dir");
        let path = dir.path().join("resumen.csv");
        let rows = vec![
            vec!["Enfermería".to_string(), "120".to_string(), "Profesional".to_string()],
            vec![
                "Técnico en Redes, Nivel Superior".to_string(),
                "45".to_string(),
                "Tecnica".to_string(),
            ],
        ];
        write_csv(&path, &["Carrera", "Cantidad", "Tipo"], &rows).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("Carrera,Cantidad,Tipo"));
        assert_eq!(lines.next(), Some("Enfermería,120,Profesional"));
        assert_eq!(
            lines.next(),
            Some("\"Técnico en Redes, Nivel Superior\",45,Tecnica")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn embedded_quotes_are_doubled() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("say \"hola\""), "\"say \"\"hola\"\"\"");
    }
}
