// Copyright 2024-Present Gisaïa
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Glob patterns over dotted names (collection names, field paths).
//!
//! `*` matches any run of characters, dots included. Every other character, `.` first of
//! all, is matched literally and the whole name must match.

use regex::RegexSet;
use regex_syntax::escape_into;

#[derive(Debug, Clone)]
pub struct GlobMatcher {
    patterns: Vec<String>,
    regex_set: RegexSet,
}

impl GlobMatcher {
    /// Builds a matcher accepting a name if it matches any of `patterns`. An empty list
    /// of patterns matches nothing.
    pub fn try_from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns: Vec<String> = patterns
            .iter()
            .map(|pattern| pattern.as_ref().to_string())
            .collect();
        let regex_set = if patterns.iter().any(|pattern| pattern == "*") {
            RegexSet::new([".*"])?
        } else {
            RegexSet::new(patterns.iter().map(|pattern| build_regex(pattern)))?
        };
        Ok(Self {
            patterns,
            regex_set,
        })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex_set.is_match(name)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Returns true if `name` matches `pattern`.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first_part) = parts.next() else {
        return name.is_empty();
    };
    let Some(mut rest) = name.strip_prefix(first_part) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last_part, middle_parts)) = parts.split_last() else {
        // No wildcard in the pattern.
        return rest.is_empty();
    };
    for part in middle_parts {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last_part.len() && rest.ends_with(last_part)
}

fn build_regex(pattern: &str) -> String {
    let mut regex = String::new();
    regex.push('^');

    for (idx, part) in pattern.split('*').enumerate() {
        if idx > 0 {
            regex.push_str(".*");
        }
        escape_into(part, &mut regex);
    }
    regex.push('$');
    regex
}
