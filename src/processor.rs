//! Offline PDF conversion.
//!
//! Turns a directory of PDFs into the pre-chunked markdown that a sync pass
//! adopts: one `<stem>.md` per PDF, holding a title, a short file-info
//! section, and one `## Chunk N` section per chunk produced by the
//! [`Chunker`]. A `processing-report.json` summarising the run is written
//! next to the markdown files.
//!
//! Text is extracted with `pdf-extract`; page count and document dates come
//! from the PDF trailer via `lopdf`. A PDF that cannot be read is logged and
//! skipped; the rest of the batch carries on.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lopdf::Object;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunk::Chunker;
use crate::error::ProcessError;

/// Heading prefix of each chunk section.
pub const CHUNK_HEADING: &str = "## Chunk ";

/// Heading prefix written by older tooling; still counted.
const LEGACY_CHUNK_HEADING: &str = "## 内容块 ";

pub const REPORT_FILE: &str = "processing-report.json";

/// Text and metadata pulled out of one PDF.
#[derive(Debug, Clone, Default)]
pub struct PdfText {
    pub text: String,
    pub pages: usize,
    pub created: Option<String>,
    pub modified: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub file_name: String,
    pub output_path: String,
    pub chunks: usize,
    pub total_chars: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingReport {
    pub processed_at: DateTime<Utc>,
    pub total_files: usize,
    pub total_chunks: usize,
    pub total_chars: usize,
    pub files: Vec<FileReport>,
}

pub fn extract_pdf(path: &str, bytes: &[u8]) -> Result<PdfText, ProcessError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| ProcessError::Pdf {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    let mut out = PdfText {
        text,
        ..Default::default()
    };

    // Metadata is best effort; text already came out.
    if let Ok(doc) = lopdf::Document::load_mem(bytes) {
        out.pages = doc.get_pages().len();
        let info = doc
            .trailer
            .get(b"Info")
            .and_then(Object::as_reference)
            .and_then(|id| doc.get_dictionary(id));
        if let Ok(info) = info {
            out.created = info_string(info, b"CreationDate");
            out.modified = info_string(info, b"ModDate");
        }
    }

    Ok(out)
}

fn info_string(dict: &lopdf::Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key) {
        Ok(Object::String(bytes, _)) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

/// Render the processed markdown for one PDF.
pub fn render_markdown(title: &str, pdf: &PdfText, chunks: &[String]) -> String {
    let mut md = format!("# {}\n\n", title);
    md.push_str("**File info:**\n");
    md.push_str(&format!("- Pages: {}\n", pdf.pages));
    md.push_str(&format!(
        "- Created: {}\n",
        pdf.created.as_deref().unwrap_or("unknown")
    ));
    md.push_str(&format!(
        "- Modified: {}\n\n",
        pdf.modified.as_deref().unwrap_or("unknown")
    ));
    md.push_str("---\n\n");

    for (i, chunk) in chunks.iter().enumerate() {
        md.push_str(&format!("{}{}\n\n{}\n\n---\n\n", CHUNK_HEADING, i + 1, chunk));
    }
    md
}

/// Number of chunk sections in a processed markdown file.
pub fn count_chunks(markdown: &str) -> usize {
    markdown
        .lines()
        .filter(|l| l.starts_with(CHUNK_HEADING) || l.starts_with(LEGACY_CHUNK_HEADING))
        .count()
}

/// Convert one PDF into `<output_dir>/<stem>.md`.
pub fn process_file(pdf_path: &Path, output_dir: &Path, chunker: &Chunker) -> Result<FileReport> {
    info!(path = %pdf_path.display(), "processing pdf");

    let display = pdf_path.display().to_string();
    let bytes = std::fs::read(pdf_path).map_err(|source| ProcessError::Io {
        path: display.clone(),
        source,
    })?;
    let pdf = extract_pdf(&display, &bytes)?;

    let stem = pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| display.clone());
    let chunks = chunker.split(&pdf.text);
    let output_path = output_dir.join(format!("{}.md", stem));

    std::fs::write(&output_path, render_markdown(&stem, &pdf, &chunks))
        .with_context(|| format!("Failed to write {}", output_path.display()))?;
    info!(output = %output_path.display(), chunks = chunks.len(), "saved processed markdown");

    Ok(FileReport {
        file_name: stem,
        output_path: output_path.display().to_string(),
        chunks: chunks.len(),
        total_chars: pdf.text.chars().count(),
    })
}

/// PDFs directly under `dir`, sorted by name.
pub fn find_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pdfs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        let is_pdf = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if entry.file_type().is_file() && is_pdf {
            pdfs.push(entry.into_path());
        }
    }
    Ok(pdfs)
}

/// Convert every PDF in `pdf_dir` and write the run report.
pub fn process_all(pdf_dir: &Path, output_dir: &Path, chunker: &Chunker) -> Result<ProcessingReport> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let pdfs = find_pdfs(pdf_dir)?;
    info!(count = pdfs.len(), dir = %pdf_dir.display(), "found pdf files");

    let mut files = Vec::new();
    for path in &pdfs {
        match process_file(path, output_dir, chunker) {
            Ok(report) => files.push(report),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping pdf"),
        }
    }

    let report = ProcessingReport {
        processed_at: Utc::now(),
        total_files: files.len(),
        total_chunks: files.iter().map(|f| f.chunks).sum(),
        total_chars: files.iter().map(|f| f.total_chars).sum(),
        files,
    };

    let report_path = output_dir.join(REPORT_FILE);
    std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    info!(
        files = report.total_files,
        chunks = report.total_chunks,
        chars = report.total_chars,
        "processing complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> PdfText {
        PdfText {
            text: "ignored".to_string(),
            pages: 3,
            created: Some("D:20240101".to_string()),
            modified: None,
        }
    }

    #[test]
    fn test_render_markdown_layout() {
        let chunks = vec!["First part。".to_string(), "Second part。".to_string()];
        let md = render_markdown("guide", &sample(), &chunks);

        assert!(md.starts_with("# guide\n\n**File info:**\n- Pages: 3\n"));
        assert!(md.contains("- Created: D:20240101\n"));
        assert!(md.contains("- Modified: unknown\n"));
        assert!(md.contains("## Chunk 1\n\nFirst part。\n\n---"));
        assert!(md.contains("## Chunk 2\n\nSecond part。\n\n---"));
    }

    #[test]
    fn test_count_chunks_matches_render() {
        let chunks: Vec<String> = (0..7).map(|i| format!("part {}。", i)).collect();
        let md = render_markdown("x", &sample(), &chunks);
        assert_eq!(count_chunks(&md), 7);
    }

    #[test]
    fn test_count_chunks_accepts_legacy_headings() {
        let md = "# doc\n\n---\n\n## 内容块 1\n\na\n\n---\n\n## 内容块 2\n\nb\n";
        assert_eq!(count_chunks(md), 2);
        assert_eq!(count_chunks("# plain markdown\n\nno sections"), 0);
    }

    #[test]
    fn test_find_pdfs_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.PDF"), b"x").unwrap();
        std::fs::write(tmp.path().join("a.pdf"), b"x").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(tmp.path().join("dir.pdf")).unwrap();

        let names: Vec<String> = find_pdfs(tmp.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.PDF"]);
    }

    #[test]
    fn test_unreadable_pdf_is_skipped_and_reported() {
        let tmp = TempDir::new().unwrap();
        let pdfs = tmp.path().join("pdfs");
        let out = tmp.path().join("processed");
        std::fs::create_dir(&pdfs).unwrap();
        std::fs::write(pdfs.join("broken.pdf"), b"not a pdf").unwrap();

        let report = process_all(&pdfs, &out, &Chunker::default()).unwrap();
        assert_eq!(report.total_files, 0);
        assert!(out.join(REPORT_FILE).exists());
        assert!(!out.join("broken.md").exists());
    }
}
