//! Code block extraction from free-form model output.
//!
//! Markdown fences are matched first, then every configured delimiter pair is
//! scanned independently. A block found by more than one pattern is reported
//! once, at its first occurrence. Text that does not match simply yields fewer
//! blocks; only the delimiter configuration itself can fail.

use crate::config::types::validate_delimiter_pair;
use crate::core_types::{CodeBlock, DelimiterPair};
use crate::errors::CodeExecutorError;
use regex::Regex;
use std::collections::HashSet;

pub const DEFAULT_LANGUAGE: &str = "python";

const FENCED_BLOCK_PATTERN: &str = r"(?s)```([A-Za-z0-9_+\-]*)\n(.*?)\n```";

// Longer names first so "javascript" wins over "js" and "bash" over "sh".
const LANGUAGE_MARKERS: &[(&str, &str)] = &[
    ("javascript", "javascript"),
    ("python", "python"),
    ("golang", "go"),
    ("nodejs", "javascript"),
    ("shell", "bash"),
    ("bash", "bash"),
    ("node", "javascript"),
    ("py", "python"),
    ("js", "javascript"),
    ("go", "go"),
    ("sh", "bash"),
];

struct DelimiterPattern {
    regex: Regex,
    language: String,
}

pub struct DelimiterParser {
    fenced: Regex,
    patterns: Vec<DelimiterPattern>,
}

impl DelimiterParser {
    pub fn new(delimiters: &[DelimiterPair]) -> Result<Self, CodeExecutorError> {
        let fenced = Regex::new(FENCED_BLOCK_PATTERN)
            .map_err(|e| CodeExecutorError::Config(format!("Invalid fenced block pattern: {}", e)))?;

        let mut patterns = Vec::with_capacity(delimiters.len());
        for pair in delimiters {
            patterns.push(DelimiterPattern {
                regex: delimited_pattern(pair)?,
                language: infer_language(&pair.start),
            });
        }

        Ok(Self { fenced, patterns })
    }

    pub fn extract_code_blocks(&self, text: &str) -> Vec<CodeBlock> {
        let mut blocks = Vec::new();
        let mut seen = HashSet::new();

        for caps in self.fenced.captures_iter(text) {
            let (Some(whole), Some(body)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            let tag = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            if seen.insert((whole.start(), whole.end())) {
                blocks.push(CodeBlock {
                    language: normalize_tag(tag),
                    code: body.as_str().to_string(),
                    start: whole.start(),
                    end: whole.end(),
                });
            }
        }

        for pattern in &self.patterns {
            for caps in pattern.regex.captures_iter(text) {
                let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                if seen.insert((whole.start(), whole.end())) {
                    blocks.push(CodeBlock {
                        language: pattern.language.clone(),
                        code: body.as_str().to_string(),
                        start: whole.start(),
                        end: whole.end(),
                    });
                }
            }
        }

        blocks
    }
}

/// Builds the non-greedy `start(.*?)end` matcher for a delimiter pair.
pub(crate) fn delimited_pattern(pair: &DelimiterPair) -> Result<Regex, CodeExecutorError> {
    validate_delimiter_pair(pair, "code block")?;
    let pattern = format!(
        "(?s){}(.*?){}",
        regex::escape(&pair.start),
        regex::escape(&pair.end)
    );
    Regex::new(&pattern).map_err(|e| {
        CodeExecutorError::Config(format!(
            "Invalid delimiter pattern ({:?}, {:?}): {}",
            pair.start, pair.end, e
        ))
    })
}

/// Guesses a language from a delimiter's start marker. `tool_code` maps to the
/// default language; anything unrecognized yields an empty tag.
pub fn infer_language(marker: &str) -> String {
    let lower = marker.to_lowercase();
    if lower.contains("tool_code") {
        return DEFAULT_LANGUAGE.to_string();
    }
    LANGUAGE_MARKERS
        .iter()
        .find(|(name, _)| lower.contains(name))
        .map(|(_, language)| language.to_string())
        .unwrap_or_default()
}

fn normalize_tag(tag: &str) -> String {
    let lower = tag.to_lowercase();
    if lower == "tool_code" {
        DEFAULT_LANGUAGE.to_string()
    } else {
        lower
    }
}

/// Keeps the blocks whose language is in `languages` (case-insensitive). An
/// empty filter keeps everything.
pub fn filter_by_language<S: AsRef<str>>(blocks: Vec<CodeBlock>, languages: &[S]) -> Vec<CodeBlock> {
    if languages.is_empty() {
        return blocks;
    }
    let wanted: HashSet<String> = languages
        .iter()
        .map(|l| l.as_ref().to_lowercase())
        .collect();
    blocks
        .into_iter()
        .filter(|block| wanted.contains(&block.language.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_code_block_delimiters;

    fn parser(pairs: Vec<DelimiterPair>) -> DelimiterParser {
        DelimiterParser::new(&pairs).unwrap()
    }

    #[test]
    fn test_python_fence_matched_once() {
        let parser = parser(vec![DelimiterPair::new("```python\n", "\n```")]);
        let text = "Let me compute that.\n```python\nprint(1)\n```\nDone.";

        let blocks = parser.extract_code_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].code, "print(1)");
        assert_eq!(blocks[0].language, "python");
        assert_eq!(&text[blocks[0].start..blocks[0].end], "```python\nprint(1)\n```");
    }

    #[test]
    fn test_fenced_blocks_keep_their_tags() {
        let parser = parser(Vec::new());
        let text = "```bash\necho hi\n```\nand\n```Go\nfmt.Println(1)\n```";

        let blocks = parser.extract_code_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language, "bash");
        assert_eq!(blocks[1].language, "go");
        assert_eq!(blocks[1].code, "fmt.Println(1)");
    }

    #[test]
    fn test_tool_code_defaults_to_python() {
        let parser = parser(default_code_block_delimiters());
        let blocks = parser.extract_code_blocks("```tool_code\nx = 1\nprint(x)\n```");

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, "python");
        assert_eq!(blocks[0].code, "x = 1\nprint(x)");
    }

    #[test]
    fn test_custom_delimiters_are_non_greedy() {
        let parser = parser(vec![DelimiterPair::new("<exec lang=\"js\">", "</exec>")]);
        let text = "<exec lang=\"js\">console.log(1)</exec> text <exec lang=\"js\">console.log(2)</exec>";

        let blocks = parser.extract_code_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].code, "console.log(1)");
        assert_eq!(blocks[1].code, "console.log(2)");
        assert!(blocks.iter().all(|b| b.language == "javascript"));
    }

    #[test]
    fn test_no_duplicate_spans() {
        let parser = parser(vec![
            DelimiterPair::new("```python\n", "\n```"),
            DelimiterPair::new("```python\n", "\n```"),
            DelimiterPair::new("```", "```"),
        ]);
        let text = "```python\na = 1\n```\n```python\nb = 2\n```";

        let blocks = parser.extract_code_blocks(text);
        let spans: HashSet<(usize, usize)> = blocks.iter().map(|b| (b.start, b.end)).collect();
        assert_eq!(spans.len(), blocks.len());
    }

    #[test]
    fn test_unmatched_text_yields_nothing() {
        let parser = parser(default_code_block_delimiters());
        assert!(parser.extract_code_blocks("```python\nprint(1)").is_empty());
        assert!(parser.extract_code_blocks("").is_empty());
    }

    #[test]
    fn test_empty_marker_is_a_configuration_error() {
        let result = DelimiterParser::new(&[DelimiterPair::new("<code>", "")]);
        assert!(matches!(result, Err(CodeExecutorError::Config(_))));
    }

    #[test]
    fn test_infer_language() {
        assert_eq!(infer_language("```tool_code\n"), "python");
        assert_eq!(infer_language("```javascript\n"), "javascript");
        assert_eq!(infer_language("<bash>"), "bash");
        assert_eq!(infer_language("[[run]]"), "");
    }

    #[test]
    fn test_filter_by_language() {
        let parser = parser(Vec::new());
        let blocks = parser.extract_code_blocks("```Python\n1\n```\n```bash\n2\n```\n```\n3\n```");
        assert_eq!(blocks.len(), 3);

        let python = filter_by_language(blocks.clone(), &["PYTHON"]);
        assert_eq!(python.len(), 1);
        assert_eq!(python[0].code, "1");

        let all = filter_by_language::<&str>(blocks.clone(), &[]);
        assert_eq!(all, blocks);
    }
}
