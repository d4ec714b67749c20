// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Static quality scoring for generated solutions.
//!
//! Cheap text heuristics, no interpreter. The score starts at 1.0 and each
//! finding subtracts a fixed penalty:
//!
//! | Finding | Penalty |
//! |---------|---------|
//! | no `class Solution` | 0.3 |
//! | no method taking `self` | 0.3 |
//! | no `return` | 0.2 |
//! | unbalanced brackets or unterminated string | 0.4 |
//! | each missing import (`List`, `Optional`, `defaultdict`) | 0.1 |
//! | leftover test code | 0.1 |
//! | placeholder body | 0.2 |
//! | dangerous call | 0.5 |
//!
//! A solution is safe when the score stays above 0.5 and there is neither a
//! syntax nor a danger finding.

use regex::Regex;
use serde::{Deserialize, Serialize};

const SAFE_THRESHOLD: f64 = 0.5;

const TEST_MARKERS: &[&str] = &[
    "print(",
    "solution().",
    "sol =",
    "result =",
    "test code",
    "example:",
    "# test",
];

const PLACEHOLDER_MARKERS: &[&str] = &[
    "notimplementederror",
    "# todo",
    "your code here",
    "# implement",
];

/// Outcome of scoring one piece of code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub is_safe: bool,
    pub warnings: Vec<String>,
    /// In `[0, 1]`.
    pub quality_score: f64,
}

/// Compiled scoring rules.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    method_with_self: Regex,
    list_hint: Regex,
    optional_hint: Regex,
    dangerous: Regex,
}

impl QualityScorer {
    /// Compile the rules.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            method_with_self: Regex::new(r"def\s+\w+\s*\(\s*self\s*[,)]")?,
            list_hint: Regex::new(r"\bList\[")?,
            optional_hint: Regex::new(r"\bOptional\[")?,
            dangerous: Regex::new(
                r"\bos\.system\s*\(|\bsubprocess\b|(?:^|[^\w.])eval\s*\(|(?:^|[^\w.])exec\s*\(|__import__\s*\(",
            )?,
        })
    }

    /// Score `code`.
    pub fn score(&self, code: &str) -> QualityReport {
        let mut warnings = Vec::new();
        let mut score: f64 = 1.0;
        let mut blocking = false;
        let lower = code.to_lowercase();

        let has_class = code.contains("class Solution");
        if !has_class {
            warnings.push("Missing 'class Solution' definition".to_string());
            score -= 0.3;
        }
        if has_class && !self.method_with_self.is_match(code) {
            warnings.push("Missing method definition with 'self' parameter".to_string());
            score -= 0.3;
        }
        if !code.contains("return") {
            warnings.push("Missing return statement".to_string());
            score -= 0.2;
        }
        if let Err(problem) = check_balanced(code) {
            warnings.push(format!("Syntax error: {}", problem));
            score -= 0.4;
            blocking = true;
        }

        let mut missing_imports = Vec::new();
        if self.list_hint.is_match(code) && !code.contains("from typing import") {
            missing_imports.push("List");
        }
        if self.optional_hint.is_match(code) && !imports_name(code, "Optional") {
            missing_imports.push("Optional");
        }
        if code.contains("defaultdict") && !code.contains("from collections import") {
            missing_imports.push("defaultdict");
        }
        if !missing_imports.is_empty() {
            warnings.push(format!("Missing imports: {}", missing_imports.join(", ")));
            score -= 0.1 * missing_imports.len() as f64;
        }

        if TEST_MARKERS.iter().any(|m| lower.contains(m)) {
            warnings.push("Test code detected - should be removed".to_string());
            score -= 0.1;
        }
        if PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m)) {
            warnings.push("Incomplete implementation placeholder detected".to_string());
            score -= 0.2;
        }
        if self.dangerous.is_match(code) {
            warnings.push("Potentially dangerous call detected".to_string());
            score -= 0.5;
            blocking = true;
        }

        let quality_score = score.clamp(0.0, 1.0);
        QualityReport {
            is_safe: quality_score > SAFE_THRESHOLD && !blocking,
            warnings,
            quality_score,
        }
    }
}

fn imports_name(code: &str, name: &str) -> bool {
    code.lines()
        .map(str::trim_start)
        .filter(|l| l.starts_with("from ") || l.starts_with("import "))
        .any(|l| l.contains(name))
}

/// Bracket and string balance, skipping comments and string contents.
fn check_balanced(code: &str) -> Result<(), String> {
    let chars: Vec<char> = code.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => line += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '\'' | '"' => {
                let triple = i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c;
                let start_line = line;
                i += if triple { 3 } else { 1 };
                loop {
                    if i >= chars.len() {
                        return Err(format!("unterminated string starting on line {}", start_line));
                    }
                    match chars[i] {
                        '\\' => i += 1,
                        '\n' if !triple => {
                            return Err(format!("unterminated string on line {}", start_line));
                        }
                        '\n' => line += 1,
                        q if q == c => {
                            if !triple {
                                break;
                            }
                            if i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c {
                                i += 2;
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(format!(
                            "'{}' on line {} does not match '{}' on line {}",
                            c, line, open, open_line
                        ));
                    }
                    None => return Err(format!("unmatched '{}' on line {}", c, line)),
                }
            }
            _ => {}
        }
        i += 1;
    }

    match stack.pop() {
        Some((open, open_line)) => Err(format!("'{}' on line {} was never closed", open, open_line)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SAMPLE_CODE;

    fn scorer() -> QualityScorer {
        QualityScorer::new().unwrap()
    }

    #[test]
    fn test_clean_solution_scores_full() {
        let report = scorer().score(SAMPLE_CODE);
        assert!(report.is_safe, "{:?}", report.warnings);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.quality_score, 1.0);
    }

    #[test]
    fn test_structural_penalties() {
        let report = scorer().score("def helper(x):\n    x + 1\n");
        // no class (0.3), no return (0.2)
        assert!((report.quality_score - 0.5).abs() < 1e-9);
        assert!(!report.is_safe);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_method_without_self() {
        let report = scorer().score("class Solution:\n    def f(x):\n        return x\n");
        assert!((report.quality_score - 0.7).abs() < 1e-9);
        assert!(report.is_safe);
    }

    #[test]
    fn test_missing_imports() {
        let code = "class Solution:\n    def f(self, xs: List[int]) -> Optional[int]:\n        d = defaultdict(int)\n        return None\n";
        let report = scorer().score(code);
        assert!((report.quality_score - 0.7).abs() < 1e-9);
        assert!(
            report
                .warnings
                .contains(&"Missing imports: List, Optional, defaultdict".to_string())
        );
    }

    #[test]
    fn test_syntax_error_is_never_safe() {
        let code = "class Solution:\n    def f(self, xs):\n        return (xs[0]\n";
        let report = scorer().score(code);
        assert!(!report.is_safe);
        assert!(report.warnings.iter().any(|w| w.starts_with("Syntax error")));
    }

    #[test]
    fn test_brackets_inside_strings_and_comments_are_ignored() {
        let code = "class Solution:\n    def f(self):\n        # (\n        s = \"(]\"\n        t = '''\n[\n'''\n        return s\n";
        assert!(check_balanced(code).is_ok());
        assert!(check_balanced("x = 'open").is_err());
        assert!(check_balanced("f(a]").is_err());
        assert!(check_balanced(")").is_err());
    }

    #[test]
    fn test_dangerous_calls_are_unsafe() {
        let code = "import os\nclass Solution:\n    def f(self):\n        os.system('rm -rf /')\n        return 1\n";
        let report = scorer().score(code);
        assert!(!report.is_safe);
        assert!((report.quality_score - 0.5).abs() < 1e-9);

        let literal_eval = "class Solution:\n    def f(self, s):\n        return ast.literal_eval(s)\n";
        assert!(scorer().score(literal_eval).is_safe);
    }

    #[test]
    fn test_test_code_and_placeholders() {
        let code = "class Solution:\n    def f(self):\n        raise NotImplementedError\n        return 0\nprint(Solution().f())\n";
        let report = scorer().score(code);
        assert!((report.quality_score - 0.7).abs() < 1e-9);
        assert_eq!(report.warnings.len(), 2);
    }
}
