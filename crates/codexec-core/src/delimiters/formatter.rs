//! Renders execution results back into conversation text.

use crate::core_types::{CodeExecutionResult, DelimiterPair};
use crate::delimiters::parser::delimited_pattern;
use crate::errors::CodeExecutorError;
use regex::Regex;

pub const DEFAULT_SUCCESS_MESSAGE: &str = "Code executed successfully.";

pub struct ResultFormatter {
    delimiters: DelimiterPair,
    extractor: Regex,
}

impl ResultFormatter {
    pub fn new(delimiters: DelimiterPair) -> Result<Self, CodeExecutorError> {
        let extractor = delimited_pattern(&delimiters)?;
        Ok(Self {
            delimiters,
            extractor,
        })
    }

    pub fn delimiters(&self) -> &DelimiterPair {
        &self.delimiters
    }

    /// Wraps the result's primary content in the result delimiters, followed by
    /// a one-line manifest of output files when there are any.
    pub fn format_result(&self, result: &CodeExecutionResult) -> String {
        let mut formatted = format!(
            "{}{}{}",
            self.delimiters.start,
            result.primary_content(),
            self.delimiters.end
        );

        if !result.output_files.is_empty() {
            let manifest: Vec<String> = result
                .output_files
                .iter()
                .map(|file| format!("{} ({} bytes)", file.name, file.size))
                .collect();
            formatted.push_str("\nOutput files: ");
            formatted.push_str(&manifest.join(", "));
        }

        formatted
    }

    /// Returns the body of every delimited result in `text`, in order.
    pub fn extract_execution_results(&self, text: &str) -> Vec<String> {
        self.extractor
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }
}

/// Short undelimited summary for compact contexts.
pub fn format_inline_result(result: &CodeExecutionResult) -> String {
    if result.is_success() {
        let stdout = result.stdout.trim();
        if stdout.is_empty() {
            return DEFAULT_SUCCESS_MESSAGE.to_string();
        }
        return stdout.to_string();
    }

    if let Some(error) = &result.error {
        if !error.message.is_empty() {
            return format!("error: {}", error.message);
        }
    }
    let stderr = result.stderr.trim();
    if !stderr.is_empty() {
        return format!("error: {}", stderr);
    }
    format!("Code execution failed with exit code {}", result.exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_execution_result_delimiters;
    use crate::core_types::{CodeExecutionFile, ExecutionError, ExecutionErrorKind};

    fn formatter() -> ResultFormatter {
        ResultFormatter::new(default_execution_result_delimiters()).unwrap()
    }

    #[test]
    fn test_format_success() {
        let result = CodeExecutionResult {
            stdout: "4\n".to_string(),
            ..Default::default()
        };
        assert_eq!(formatter().format_result(&result), "```tool_output\n4\n\n```");
    }

    #[test]
    fn test_format_failure_uses_stderr_and_error() {
        let result = CodeExecutionResult {
            stdout: "ignored".to_string(),
            stderr: "NameError: name 'x' is not defined".to_string(),
            exit_code: 1,
            error: Some(ExecutionError {
                kind: ExecutionErrorKind::NonZeroExit,
                message: "exit status 1".to_string(),
            }),
            ..Default::default()
        };

        let text = formatter().format_result(&result);
        assert!(text.contains("NameError"));
        assert!(text.contains("exit status 1"));
        assert!(!text.contains("ignored"));
    }

    #[test]
    fn test_format_appends_file_manifest() {
        let result = CodeExecutionResult {
            stdout: "saved".to_string(),
            output_files: vec![
                CodeExecutionFile::new("plot.png", vec![0u8; 12]),
                CodeExecutionFile::new("out.csv", "a,b\n"),
            ],
            ..Default::default()
        };

        let text = formatter().format_result(&result);
        assert!(text.ends_with("\nOutput files: plot.png (12 bytes), out.csv (4 bytes)"));
    }

    #[test]
    fn test_format_then_extract_returns_primary_content() {
        let pairs = vec![
            default_execution_result_delimiters(),
            DelimiterPair::new("<result>", "</result>"),
            DelimiterPair::new("[[", "]]"),
        ];
        let results = vec![
            CodeExecutionResult {
                stdout: "hello\nworld\n".to_string(),
                ..Default::default()
            },
            CodeExecutionResult {
                stdout: String::new(),
                ..Default::default()
            },
            CodeExecutionResult {
                stderr: "boom".to_string(),
                exit_code: 2,
                output_files: vec![CodeExecutionFile::new("x.txt", "x")],
                ..Default::default()
            },
        ];

        for pair in pairs {
            let formatter = ResultFormatter::new(pair).unwrap();
            for result in &results {
                let text = format!("Some prose.\n{}\nMore prose.", formatter.format_result(result));
                let extracted = formatter.extract_execution_results(&text);
                assert_eq!(extracted, vec![result.primary_content()]);
            }
        }
    }

    #[test]
    fn test_inline_result() {
        let ok = CodeExecutionResult {
            stdout: "  42\n".to_string(),
            ..Default::default()
        };
        assert_eq!(format_inline_result(&ok), "42");

        let empty = CodeExecutionResult::default();
        assert_eq!(format_inline_result(&empty), DEFAULT_SUCCESS_MESSAGE);

        let with_error = CodeExecutionResult {
            exit_code: 1,
            error: Some(ExecutionError {
                kind: ExecutionErrorKind::Timeout,
                message: "timed out after 2s".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(format_inline_result(&with_error), "error: timed out after 2s");

        let bare = CodeExecutionResult {
            exit_code: 3,
            ..Default::default()
        };
        assert_eq!(format_inline_result(&bare), "Code execution failed with exit code 3");
    }
}
