//! Heuristic recipe parser for OCR text.
//!
//! Pure functions, no async, no configuration. Splits recognized text into
//! lines, guesses the title and the ingredient block, then tokenizes each
//! candidate line into quantity / unit / name.

use serde::{Deserialize, Serialize};

/// Name used when the text has no usable first line.
pub const PLACEHOLDER_NAME: &str = "Recette importée";

/// Every ingredient produced by the parser lands in this category.
pub const DEFAULT_CATEGORY: &str = "principal";

/// Number of lines after the title taken when no ingredient marker exists.
const FALLBACK_WINDOW: usize = 14;

const START_MARKERS: &[&str] = &["ingrédient", "ingredients"];
const END_MARKERS: &[&str] = &["préparation", "preparation", "étape", "etape", "instruction"];
const NAME_PREFIXES: &[&str] = &["de ", "d'", "d’", "du ", "des "];
const NOISE_PREFIXES: &[&str] = &[
    "préparation",
    "preparation",
    "étape",
    "etape",
    "pour ",
    "cuire",
    "mélanger",
    "melanger",
];

/// Recipe header. Only `name` is filled for now; the rest is part of the
/// response contract and always serialized as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub description: Option<String>,
    pub servings: Option<u32>,
    pub prep_time_min: Option<u32>,
    pub cook_time_min: Option<u32>,
    pub total_time_min: Option<u32>,
    pub difficulty: Option<String>,
    pub caloric_label: Option<String>,
    pub origin_code: Option<String>,
    pub regime_code: Option<String>,
    pub web_url: Option<String>,
    pub video_url: Option<String>,
}

impl Recipe {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            servings: None,
            prep_time_min: None,
            cook_time_min: None,
            total_time_min: None,
            difficulty: None,
            caloric_label: None,
            origin_code: None,
            regime_code: None,
            web_url: None,
            video_url: None,
        }
    }
}

/// One ingredient line split into its parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub raw: String,
    pub name: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub recipe: Recipe,
    pub ingredients: Vec<Ingredient>,
}

/// Parse OCR text into a recipe and its ingredient list.
///
/// Never fails: text without structure degrades to the placeholder name
/// and/or an empty ingredient list.
pub fn parse_recipe_from_text(text: &str) -> ParseResult {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let (name, candidates) = segment_sections(&lines);

    let ingredients = candidates
        .iter()
        .filter(|l| l.chars().count() > 2)
        .map(|l| parse_ingredient_line(l))
        .filter(|ing| !ing.name.is_empty())
        .collect();

    ParseResult {
        recipe: Recipe::named(name),
        ingredients,
    }
}

/// Pick the recipe name and the candidate ingredient lines.
///
/// `lines` must already be trimmed and non-empty.
pub fn segment_sections<'a>(lines: &[&'a str]) -> (String, Vec<&'a str>) {
    let Some(first) = lines.first() else {
        return (PLACEHOLDER_NAME.to_string(), Vec::new());
    };

    let start = lines
        .iter()
        .position(|l| contains_any(&l.to_lowercase(), START_MARKERS))
        .map(|i| i + 1);

    let block = match start {
        Some(start) => {
            let end = lines[start..]
                .iter()
                .position(|l| contains_any(&l.to_lowercase(), END_MARKERS))
                .map(|offset| start + offset)
                .unwrap_or(lines.len());
            &lines[start..end]
        }
        None => {
            let end = (FALLBACK_WINDOW + 1).min(lines.len());
            &lines[1..end]
        }
    };

    (first.to_string(), block.to_vec())
}

/// Split one line into quantity, unit and name.
///
/// An empty `name` in the result means "not an ingredient".
pub fn parse_ingredient_line(line: &str) -> Ingredient {
    let raw = line.trim();
    if raw.is_empty() {
        return Ingredient {
            raw: String::new(),
            name: String::new(),
            quantity: None,
            unit: None,
            category: DEFAULT_CATEGORY.to_string(),
        };
    }

    let (number, rest) = scan_number(raw);

    let mut unit = None;
    let mut remainder = rest;
    if number.is_some() {
        let after_space = rest.trim_start();
        let (token, tail) = scan_unit(after_space);
        // A lone word after the quantity is the ingredient, not its unit.
        if !token.is_empty() && !tail.trim().is_empty() {
            unit = Some(normalize_unit(token));
            remainder = tail;
        }
    }

    let quantity = number.and_then(parse_quantity);

    let mut name = clean_name(remainder);
    if name.is_empty() {
        name = line.to_string();
    }
    if is_noise(&name) {
        name.clear();
    }

    Ingredient {
        raw: raw.to_string(),
        name,
        quantity,
        unit,
        category: DEFAULT_CATEGORY.to_string(),
    }
}

/// Parse a quantity token, accepting a comma as decimal separator.
pub fn parse_quantity(token: &str) -> Option<f64> {
    token
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|q| q.is_finite() && *q >= 0.0)
}

/// Trim and strip one leading connector ("de ", "d'", ...).
pub fn clean_name(candidate: &str) -> String {
    let trimmed = candidate.trim();
    NAME_PREFIXES
        .iter()
        .find_map(|p| trimmed.strip_prefix(p))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

fn is_noise(name: &str) -> bool {
    let lower = name.to_lowercase();
    NOISE_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn normalize_unit(token: &str) -> String {
    token.to_lowercase().trim_end_matches('.').to_string()
}

/// Leading `digits([.,]digits)?`. Returns the token and the rest.
fn scan_number(s: &str) -> (Option<&str>, &str) {
    let int_len = s.bytes().take_while(u8::is_ascii_digit).count();
    if int_len == 0 {
        return (None, s);
    }

    let mut end = int_len;
    let bytes = s.as_bytes();
    if matches!(bytes.get(end), Some(b'.') | Some(b',')) {
        let frac_len = bytes[end + 1..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if frac_len > 0 {
            end += 1 + frac_len;
        }
    }

    (Some(&s[..end]), &s[end..])
}

/// Leading run of unit characters. Returns the token and the rest.
fn scan_unit(s: &str) -> (&str, &str) {
    let end = s
        .char_indices()
        .find(|(_, c)| !is_unit_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s.split_at(end)
}

fn is_unit_char(c: char) -> bool {
    c.is_ascii_alphabetic()
        || (('\u{C0}'..='\u{FF}').contains(&c) && c != '×' && c != '÷')
        || matches!(c, '.' | '/' | '-' | '%' | 'µ')
}
