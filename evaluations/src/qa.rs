//! Parser for the markdown Q&A evaluation format:
//!
//! ```text
//! ### Q1: question text
//! **A1:** answer text
//!
//! ### Q2: ...
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// One parsed question/answer pair, tagged with its source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QaPair {
    pub number: usize,
    pub question: String,
    pub answer: String,
    pub file: String,
}

/// Parse every `.md` file in the directory, sorted by filename so runs are
/// reproducible.
pub fn load_qa_dir(dir: &Path) -> Result<Vec<QaPair>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading Q&A directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
        .collect();
    files.sort();

    let mut pairs = Vec::new();
    for path in files {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parsed = parse_qa_content(&content, &file_name)
            .with_context(|| format!("parsing {}", path.display()))?;
        pairs.extend(parsed);
    }

    if pairs.is_empty() {
        bail!("no Q&A pairs found under {}", dir.display());
    }
    Ok(pairs)
}

/// Parse one file's content. A question runs until the next `###` heading
/// or EOF; its answer starts at the matching `**An:**` line. Question and
/// answer numbers must agree.
pub fn parse_qa_content(content: &str, file: &str) -> Result<Vec<QaPair>> {
    let mut pairs = Vec::new();

    for block in content.split("### ").skip(1) {
        let Some((number, rest)) = parse_marker(block, 'Q', ':') else {
            bail!("malformed question heading in block starting {:?}", head(block));
        };

        let answer_marker_start = rest.find("**A").with_context(|| {
            format!("question Q{number} has no matching answer marker")
        })?;
        let (question_text, answer_block) = rest.split_at(answer_marker_start);

        let trimmed_answer_block = answer_block
            .strip_prefix("**A")
            .unwrap_or(answer_block);
        let Some((answer_number, answer_text)) = parse_marker(trimmed_answer_block, '\0', ':')
        else {
            bail!("malformed answer marker for Q{number}");
        };
        if answer_number != number {
            bail!("answer number A{answer_number} does not match question Q{number}");
        }
        let answer_text = answer_text
            .strip_prefix("**")
            .unwrap_or(answer_text);

        let question = question_text.trim().to_string();
        let answer = answer_text.trim().to_string();
        if question.is_empty() || answer.is_empty() {
            bail!("Q{number} has an empty question or answer");
        }

        pairs.push(QaPair {
            number,
            question,
            answer,
            file: file.to_string(),
        });
    }

    Ok(pairs)
}

/// Parse a `Q<n>:` / `<n>:**` style marker: an optional leading tag
/// character, digits, then the separator. Returns the number and the rest.
fn parse_marker(text: &str, tag: char, separator: char) -> Option<(usize, &str)> {
    let mut rest = text;
    if tag != '\0' {
        rest = rest.strip_prefix(tag)?;
    }
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let number = rest[..digits_end].parse::<usize>().ok()?;
    let rest = &rest[digits_end..];
    let rest = rest.strip_prefix(separator)?;
    Some((number, rest))
}

fn head(block: &str) -> String {
    block.chars().take(40).collect()
}
