//! Axis-labels spec parsing.
//!
//! Parses strings like `"...|i->1"` (one operand's batch/input/output
//! labels) and full einsum forms like `"...|i->1;...|...->i=>...|i"`
//! (`;` separates binary operands, `=>` separates the right-hand side
//! from the left-hand side). Both the ASCII (`->`, `=>`) and Unicode
//! (`→`, `⇒`) separators are accepted.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::{TensorcError, TensorcResult};

/// One label slot: either a named axis (shared across operands when the
/// same name repeats) or `_`, an anonymous placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Label {
    Named(String),
    Placeholder,
}

impl core::fmt::Display for Label {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Label::Named(s) => write!(f, "{s}"),
            Label::Placeholder => write!(f, "_"),
        }
    }
}

/// The labels for one row (batch, input, or output) of one slot.
///
/// `ellipsis` anchors a broadcast row-variable at the first-from-end
/// position: the listed labels align from the right, with the ellipsis
/// standing for zero or more unlisted leading dims.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowLabels {
    pub labels: Vec<Label>,
    pub ellipsis: bool,
}

impl core::fmt::Display for RowLabels {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.ellipsis {
            parts.push(String::from("..."));
        }
        for label in &self.labels {
            parts.push(label.to_string());
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// The three rows of one operand (or the output) in an einsum spec.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotLabels {
    pub batch: RowLabels,
    pub input: RowLabels,
    pub output: RowLabels,
}

impl core::fmt::Display for SlotLabels {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.batch.ellipsis || !self.batch.labels.is_empty() {
            write!(f, "{} | ", self.batch)?;
        }
        write!(f, "{} -> {}", self.input, self.output)
    }
}

/// A full einsum spec: one or two operand slots and one output slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EinsumSpec {
    pub operands: Vec<SlotLabels>,
    pub output: SlotLabels,
}

impl core::fmt::Display for EinsumSpec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let rendered: Vec<String> = self.operands.iter().map(|o| o.to_string()).collect();
        write!(f, "{} => {}", rendered.join(" ; "), self.output)
    }
}

fn split_once_any<'a>(s: &'a str, seps: &[&str]) -> Option<(&'a str, &'a str)> {
    for sep in seps {
        if let Some(pos) = s.find(sep) {
            return Some((&s[..pos], &s[pos + sep.len()..]));
        }
    }
    None
}

/// Tokenizes one row substring into [`Label`]s, detecting single-character
/// vs multi-character mode and stripping a leading `...` ellipsis marker.
fn parse_row_part(raw: &str) -> RowLabels {
    let trimmed = raw.trim();
    let ellipsis = trimmed.contains("...");
    let stripped = trimmed.replace("...", " ").trim().to_string();
    if stripped.is_empty() {
        return RowLabels {
            labels: Vec::new(),
            ellipsis,
        };
    }
    let multi_char_mode = stripped.contains(',')
        || stripped.contains('(')
        || stripped.contains(')')
        || stripped.trim().contains(char::is_whitespace);

    let labels = if multi_char_mode {
        stripped
            .split(|c: char| c == ',' || c == '(' || c == ')' || c.is_whitespace())
            .filter(|tok| !tok.is_empty())
            .map(token_to_label)
            .collect()
    } else {
        stripped.chars().map(|c| token_to_label(&c.to_string())).collect()
    };
    RowLabels { labels, ellipsis }
}

fn token_to_label(token: &str) -> Label {
    if token == "_" {
        Label::Placeholder
    } else {
        Label::Named(token.to_string())
    }
}

/// Parses one operand (or output) slot: `[batch "|"] input ("->"|"→") output`.
pub fn parse_slot(spec: &str) -> TensorcResult<SlotLabels> {
    let (batch_part, rest) = match spec.split_once('|') {
        Some((b, r)) => (Some(b), r),
        None => (None, spec),
    };
    let (input_part, output_part) = split_once_any(rest, &["->", "\u{2192}"])
        .ok_or_else(|| TensorcError::user_input(format!("axis-label spec `{spec}` is missing `->`")))?;
    Ok(SlotLabels {
        batch: batch_part.map(parse_row_part).unwrap_or_default(),
        input: parse_row_part(input_part),
        output: parse_row_part(output_part),
    })
}

/// Parses a full einsum spec: one or two `;`-separated operand slots,
/// `=>`/`⇒`, then the output slot.
pub fn parse_einsum_spec(spec: &str) -> TensorcResult<EinsumSpec> {
    let (lhs, output_part) = split_once_any(spec, &["=>", "\u{21d2}"])
        .ok_or_else(|| TensorcError::user_input(format!("einsum spec `{spec}` is missing `=>`")))?;
    let operands = lhs
        .split(';')
        .map(parse_slot)
        .collect::<TensorcResult<Vec<_>>>()?;
    if operands.is_empty() {
        return Err(TensorcError::user_input("einsum spec has no operands"));
    }
    let output = parse_slot(output_part)?;
    Ok(EinsumSpec { operands, output })
}
