//! Spintax expansion: `{option1|option2}` groups resolved to one option each.
//!
//! Markup spans (`<b>`, `<a href="...">`, `</p>`) are masked before brace
//! matching so a brace inside a tag attribute is never treated as a group,
//! then restored verbatim.

use rand::seq::SliceRandom;
use rand::Rng;

/// Private-use code points delimiting a masked markup span.
const MASK_OPEN: char = '\u{E000}';
const MASK_CLOSE: char = '\u{E001}';

/// Expand with the thread-local RNG. Every call draws fresh.
pub fn expand(template: &str) -> String {
    expand_with(template, &mut rand::thread_rng())
}

/// Expand every innermost `{...}` group with an independent draw from `rng`.
///
/// * two or more non-empty options: one is picked uniformly
/// * exactly one option: the braces are dropped (`{a}` → `a`)
/// * no non-empty option (`{}`, `{ | }`): the group is kept verbatim
///
/// Groups containing another group are left as they are; only the inner
/// group is resolved.
pub fn expand_with<R: Rng + ?Sized>(template: &str, rng: &mut R) -> String {
    if !template.contains('{') {
        return template.to_string();
    }
    let (masked, spans) = mask_markup(template);
    let spun = spin_groups(&masked, rng);
    restore_markup(&spun, &spans)
}

fn spin_groups<R: Rng + ?Sized>(text: &str, rng: &mut R) -> String {
    let mut out = String::with_capacity(text.len());
    // byte offset in `out` of the most recent unmatched '{'
    let mut open: Option<usize> = None;

    for ch in text.chars() {
        match ch {
            '{' => {
                open = Some(out.len());
                out.push(ch);
            }
            '}' => match open.take() {
                Some(start) => {
                    let inner = &out[start + 1..];
                    match pick(inner, rng) {
                        Some(choice) => {
                            out.truncate(start);
                            out.push_str(&choice);
                        }
                        None => out.push(ch),
                    }
                }
                None => out.push(ch),
            },
            _ => out.push(ch),
        }
    }
    out
}

fn pick<R: Rng + ?Sized>(inner: &str, rng: &mut R) -> Option<String> {
    let options: Vec<&str> = inner
        .split('|')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .collect();
    match options.len() {
        0 => None,
        1 => Some(options[0].to_string()),
        _ => options.choose(rng).map(|o| o.to_string()),
    }
}

/// Replace every `<...>` tag with an opaque placeholder.
fn mask_markup(text: &str) -> (String, Vec<String>) {
    let mut masked = String::with_capacity(text.len());
    let mut spans = Vec::new();
    let mut rest = text;

    while let Some(lt) = rest.find('<') {
        let after = &rest[lt + 1..];
        let is_tag = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!');
        let close = after.find('>');
        match (is_tag, close) {
            (true, Some(gt)) => {
                masked.push_str(&rest[..lt]);
                masked.push(MASK_OPEN);
                masked.push_str(&spans.len().to_string());
                masked.push(MASK_CLOSE);
                spans.push(rest[lt..lt + 1 + gt + 1].to_string());
                rest = &after[gt + 1..];
            }
            _ => {
                masked.push_str(&rest[..lt + 1]);
                rest = after;
            }
        }
    }
    masked.push_str(rest);
    (masked, spans)
}

fn restore_markup(text: &str, spans: &[String]) -> String {
    if spans.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find(MASK_OPEN) {
        out.push_str(&rest[..open]);
        let after = &rest[open + MASK_OPEN.len_utf8()..];
        let Some(close) = after.find(MASK_CLOSE) else {
            out.push_str(&rest[open..]);
            return out;
        };
        match after[..close].parse::<usize>().ok().and_then(|i| spans.get(i)) {
            Some(span) => out.push_str(span),
            None => out.push_str(&rest[open..open + MASK_OPEN.len_utf8() + close + MASK_CLOSE.len_utf8()]),
        }
        rest = &after[close + MASK_CLOSE.len_utf8()..];
    }
    out.push_str(rest);
    out
}
