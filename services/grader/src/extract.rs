//! Text from rubric-generation source documents.

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Guideline text beyond this is cut before it reaches the prompt.
pub const MAX_GUIDELINE_CHARS: usize = 20_000;
/// Each sample essay is cut to this length.
pub const MAX_SAMPLE_CHARS: usize = 1_500;

const TEXT_COLUMNS: [&str; 5] = ["essay", "essay_response", "response", "essay_text", "text"];
const SCORE_COLUMNS: [&str; 4] = ["score", "essay_score", "grade", "domain1_score"];

/// PDFs (by extension or magic bytes) go through `pdf-extract`, anything
/// else is read as UTF-8.
pub fn document_text(key: &str, bytes: &[u8]) -> Result<String> {
    let is_pdf = key.to_ascii_lowercase().ends_with(".pdf") || bytes.starts_with(b"%PDF");
    let text = if is_pdf {
        pdf_extract::extract_text_from_mem(bytes).with_context(|| format!("could not extract text from PDF '{key}'"))?
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    };
    let text = collapse_blank_lines(&text);
    debug!(key = %key, pdf = is_pdf, chars = text.chars().count(), "document text extracted");
    Ok(truncate_chars(&text, MAX_GUIDELINE_CHARS))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleEssay {
    pub score: Option<String>,
    pub text: String,
}

/// Reads up to `limit` sample essays from a CSV with a header row.
///
/// The essay column is the first header matching a known name, else the
/// last column. Rows with an empty essay are skipped.
pub fn sample_essays(bytes: &[u8], limit: usize) -> Result<Vec<SampleEssay>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .context("sample essay CSV has no header row")?
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();
    if headers.is_empty() {
        anyhow::bail!("sample essay CSV has no columns");
    }

    let find = |names: &[&str]| names.iter().find_map(|n| headers.iter().position(|h| h == n));
    let text_col = find(&TEXT_COLUMNS).unwrap_or(headers.len() - 1);
    let score_col = find(&SCORE_COLUMNS);
    if find(&TEXT_COLUMNS).is_none() {
        warn!(column = %headers[text_col], "no essay column by name, using the last column");
    }

    let mut out = Vec::new();
    for row in reader.records() {
        if out.len() >= limit {
            break;
        }
        let row = row.context("malformed sample essay CSV row")?;
        let text = row.get(text_col).unwrap_or_default();
        if text.is_empty() {
            continue;
        }
        out.push(SampleEssay {
            score: score_col
                .and_then(|c| row.get(c))
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            text: truncate_chars(text, MAX_SAMPLE_CHARS),
        });
    }
    Ok(out)
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => s[..cut].to_string(),
        None => s.to_string(),
    }
}

fn collapse_blank_lines(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut blank_run = 0;
    for line in s.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
