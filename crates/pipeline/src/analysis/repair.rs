//! Best-effort cleanup of almost-JSON model output.
//!
//! Handles markdown code fences, prose around the object, unquoted keys,
//! unescaped quotes and raw control characters inside strings, and trailing
//! commas. Anything beyond that is reported as unparseable.

use regex_lite::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// A parsed response and whether it needed repair
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub value: Value,
    pub repaired: bool,
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)\s*```").expect("fence pattern is valid")
    })
}

/// Strip fences and surrounding prose, leaving the outermost `{...}`
fn isolate_object(raw: &str) -> &str {
    let inner = fence_pattern()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    match (inner.find('{'), inner.rfind('}')) {
        (Some(start), Some(end)) if end > start => &inner[start..=end],
        _ => inner.trim(),
    }
}

/// Parse model output as a JSON object, repairing it if needed
pub fn parse_lenient(raw: &str) -> Result<Parsed, String> {
    let candidate = isolate_object(raw);
    let stripped = candidate.len() != raw.trim().len();

    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => Ok(Parsed {
            value,
            repaired: stripped,
        }),
        Err(original) => {
            let fixed = repair_json(candidate);
            serde_json::from_str::<Value>(&fixed)
                .map(|value| Parsed {
                    value,
                    repaired: true,
                })
                .map_err(|_| original.to_string())
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-')
}

fn next_non_ws(chars: &[char], from: usize) -> Option<(usize, char)> {
    chars[from..]
        .iter()
        .enumerate()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(i, c)| (from + i, *c))
}

/// Whether an identifier starting at `start` is a bare key (followed by `:`)
/// or a literal (`true`, `false`, `null`)
fn bare_token_follows(chars: &[char], start: usize) -> bool {
    let end = chars[start..]
        .iter()
        .position(|c| !is_ident_char(*c))
        .map(|p| start + p)
        .unwrap_or(chars.len());
    let word: String = chars[start..end].iter().collect();

    matches!(word.as_str(), "true" | "false" | "null")
        || matches!(next_non_ws(chars, end), Some((_, ':')))
}

/// Decide whether the quote at `i` (inside a string) closes it.
///
/// A closing quote is followed by `:`, `}`, `]`, end of input, or a comma that
/// itself leads into another key or value.
fn closes_string(chars: &[char], i: usize) -> bool {
    match next_non_ws(chars, i + 1) {
        None => true,
        Some((_, '}' | ']' | ':')) => true,
        Some((j, ',')) => match next_non_ws(chars, j + 1) {
            None => true,
            Some((_, '"' | '{' | '[' | '}' | ']' | '-')) => true,
            Some((_, c)) if c.is_ascii_digit() => true,
            Some((k, c)) if is_ident_start(c) => bare_token_follows(chars, k),
            Some(_) => false,
        },
        Some(_) => false,
    }
}

/// Character-level repair pass
fn repair_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut in_string = false;
    // Last significant character emitted outside strings
    let mut last_structural: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            match c {
                '\\' => {
                    out.push(c);
                    if let Some(next) = chars.get(i + 1) {
                        out.push(*next);
                        i += 1;
                    }
                }
                '"' if closes_string(&chars, i) => {
                    out.push('"');
                    in_string = false;
                    last_structural = Some('"');
                }
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => {}
                c => out.push(c),
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                // Trailing comma before a closing bracket
                if !matches!(next_non_ws(&chars, i + 1), Some((_, '}' | ']'))) {
                    out.push(c);
                    last_structural = Some(c);
                }
            }
            c if is_ident_start(c) && matches!(last_structural, Some('{' | ',')) => {
                let end = chars[i..]
                    .iter()
                    .position(|c| !is_ident_char(*c))
                    .map(|p| i + p)
                    .unwrap_or(chars.len());
                let word: String = chars[i..end].iter().collect();

                if matches!(next_non_ws(&chars, end), Some((_, ':'))) {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(&word);
                }
                last_structural = Some('w');
                i = end;
                continue;
            }
            c => {
                out.push(c);
                if !c.is_whitespace() {
                    last_structural = Some(c);
                }
            }
        }
        i += 1;
    }

    out
}
