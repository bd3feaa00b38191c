//! Code extraction from raw model responses.
//!
//! Preference order: a fenced block defining the expected symbol, then the
//! longest fenced block, then a slice starting at the first `def`/`class`
//! line. Fence lines and leading filler prose are stripped.

/// Shape of the raw response, feeding the format axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// The whole response is code.
    PlainCode,
    /// Exactly one fenced block and nothing else of substance.
    CleanFenced,
    /// Fenced code surrounded by prose.
    FencedWithProse,
    /// No recognisable code container; sliced heuristically.
    Unstructured,
}

#[derive(Debug, Clone)]
pub struct Extracted {
    pub code: String,
    pub shape: ResponseShape,
}

const FILLER_PREFIXES: &[&str] = &[
    "sure",
    "certainly",
    "of course",
    "here's",
    "here is",
    "i'm sorry",
    "i apologize",
    "apologies",
    "great question",
];

fn defines_symbol(code: &str, symbol: &str) -> bool {
    code.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed
            .strip_prefix("def ")
            .or_else(|| trimmed.strip_prefix("class "))
            .map(|rest| {
                let name: String = rest
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                name == symbol
            })
            .unwrap_or(false)
    })
}

fn looks_like_code_line(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("def ")
        || t.starts_with("class ")
        || t.starts_with("import ")
        || t.starts_with("from ")
        || t.starts_with('@')
        || t.starts_with('#')
}

struct FencedBlock {
    code: String,
}

/// Split out all fenced blocks and the prose left between them.
fn split_fences(raw: &str) -> (Vec<FencedBlock>, String) {
    let mut blocks = Vec::new();
    let mut outside = String::new();
    let mut current: Option<String> = None;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            match current.take() {
                Some(code) => blocks.push(FencedBlock { code }),
                None => current = Some(String::new()),
            }
            continue;
        }
        match current.as_mut() {
            Some(code) => {
                code.push_str(line);
                code.push('\n');
            }
            None => {
                outside.push_str(line);
                outside.push('\n');
            }
        }
    }
    // An unterminated fence still counts as a block.
    if let Some(code) = current {
        blocks.push(FencedBlock { code });
    }
    (blocks, outside)
}

fn strip_filler(raw: &str) -> &str {
    let mut rest = raw.trim_start();
    loop {
        let Some(first_line) = rest.lines().next() else {
            return rest;
        };
        let lower = first_line.trim().to_ascii_lowercase();
        let is_filler =
            !looks_like_code_line(first_line) && FILLER_PREFIXES.iter().any(|p| lower.starts_with(p));
        if !is_filler {
            return rest;
        }
        rest = rest[first_line.len()..].trim_start();
    }
}

/// Extract candidate code from a raw response. Returns `None` when the
/// response contains nothing resembling code.
pub fn extract_code(raw: &str, expected_symbol: &str) -> Option<Extracted> {
    let (blocks, outside) = split_fences(raw);

    if !blocks.is_empty() {
        let prose_present = outside
            .lines()
            .any(|l| !l.trim().is_empty() && !looks_like_code_line(l));
        let shape = if blocks.len() == 1 && !prose_present {
            ResponseShape::CleanFenced
        } else {
            ResponseShape::FencedWithProse
        };

        let chosen = blocks
            .iter()
            .find(|b| defines_symbol(&b.code, expected_symbol))
            .or_else(|| blocks.iter().max_by_key(|b| b.code.len()))?;
        let code = chosen.code.trim().to_string();
        if code.is_empty() {
            return None;
        }
        return Some(Extracted { code, shape });
    }

    let stripped = strip_filler(raw);
    if stripped.trim().is_empty() {
        return None;
    }
    if looks_like_code_line(stripped.lines().next().unwrap_or_default()) {
        return Some(Extracted {
            code: stripped.trim().to_string(),
            shape: ResponseShape::PlainCode,
        });
    }

    // Last resort: slice from the first def/class line.
    let mut offset = 0usize;
    for line in stripped.lines() {
        let t = line.trim_start();
        if t.starts_with("def ") || t.starts_with("class ") {
            let code = stripped[offset..].trim().to_string();
            return Some(Extracted {
                code,
                shape: ResponseShape::Unstructured,
            });
        }
        offset += line.len() + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOLUTION: &str = "def two_sum(nums, target):\n    seen = {}\n    for i, v in enumerate(nums):\n        if target - v in seen:\n            return [seen[target - v], i]\n        seen[v] = i\n";

    #[test]
    fn clean_fenced_block() {
        let raw = format!("```python\n{SOLUTION}```\n");
        let e = extract_code(&raw, "two_sum").unwrap();
        assert_eq!(e.shape, ResponseShape::CleanFenced);
        assert!(e.code.starts_with("def two_sum"));
    }

    #[test]
    fn fenced_with_prose() {
        let raw = format!("Here is a solution that uses a hash map.\n\n```python\n{SOLUTION}```\n\nThis runs in linear time.");
        let e = extract_code(&raw, "two_sum").unwrap();
        assert_eq!(e.shape, ResponseShape::FencedWithProse);
        assert!(e.code.contains("def two_sum"));
    }

    #[test]
    fn prefers_block_with_symbol_over_longer_block() {
        let raw = format!(
            "```python\n# helper utilities that are much longer than the answer\nHELPERS = [0] * 10\nEXTRA = 'x' * 50\nMORE = 'y' * 50\n```\n```python\n{SOLUTION}```"
        );
        let e = extract_code(&raw, "two_sum").unwrap();
        assert!(e.code.starts_with("def two_sum"));
    }

    #[test]
    fn plain_code_response() {
        let e = extract_code(SOLUTION, "two_sum").unwrap();
        assert_eq!(e.shape, ResponseShape::PlainCode);
    }

    #[test]
    fn filler_prefix_stripped() {
        let raw = format!("Sure! Happy to help.\n{SOLUTION}");
        let e = extract_code(&raw, "two_sum").unwrap();
        assert_eq!(e.shape, ResponseShape::PlainCode);
        assert!(e.code.starts_with("def two_sum"));
    }

    #[test]
    fn prose_then_bare_code_is_unstructured() {
        let raw = format!("The trick is complements.\nObserve the loop below.\n{SOLUTION}");
        let e = extract_code(&raw, "two_sum").unwrap();
        assert_eq!(e.shape, ResponseShape::Unstructured);
        assert!(e.code.starts_with("def two_sum"));
    }

    #[test]
    fn refusal_yields_none() {
        assert!(extract_code("I can't help with that.", "two_sum").is_none());
        assert!(extract_code("", "two_sum").is_none());
    }

    #[test]
    fn unterminated_fence_still_extracts() {
        let raw = format!("```python\n{SOLUTION}");
        let e = extract_code(&raw, "two_sum").unwrap();
        assert!(e.code.starts_with("def two_sum"));
    }
}
