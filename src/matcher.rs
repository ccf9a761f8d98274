//! Free-text property matcher.
//!
//! Two-stage contract: an utterance carrying a 5–9 digit run is always tried
//! against the reference column first; only when that yields nothing do we
//! fall back to heuristic scoring over address, name, locality, token
//! overlap and price proximity.  Pure functions, no I/O.

use crate::catalog::CatalogItem;
use crate::config::CatalogColumns;

const REFERENCE_MIN_DIGITS: usize = 5;
const REFERENCE_MAX_DIGITS: usize = 9;
/// Budget figures below this are treated as noise (door numbers, floors).
const MIN_BUDGET: f64 = 1000.0;
/// Price counts as "close" when within this fraction of the stated budget.
const PRICE_TOLERANCE: f64 = 0.25;
const MAX_TOKEN_HITS: usize = 3;
const MIN_TOKEN_LEN: usize = 4;

#[derive(Debug, PartialEq)]
pub enum MatchOutcome<'a> {
    Match(&'a CatalogItem),
    /// Several items share the hinted locality but none cleared the
    /// threshold; the dialogue asks for more detail.
    Ambiguous { city: String, count: usize },
    NoMatch,
}

/// Lowercase and fold Spanish accents so "Sí, Tarragona" matches
/// "si tarragona".
pub fn normalize(s: &str) -> String {
    s.to_lowercase().chars().map(fold_accent).collect()
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        _ => c,
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, '.' | ',' | ' ' | '-')
}

/// Digit runs with separators between digits collapsed, so "597.444" and
/// "59 74 44" both read as "597444".
fn digit_runs(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut runs = vec![];
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_digit() {
            current.push(c);
        } else if is_separator(c)
            && !current.is_empty()
            && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())
        {
            // separator inside a run
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// First digit run of reference length found in the utterance.
pub fn extract_reference(text: &str) -> Option<String> {
    digit_runs(text)
        .into_iter()
        .find(|run| (REFERENCE_MIN_DIGITS..=REFERENCE_MAX_DIGITS).contains(&run.len()))
}

/// Largest plausible money figure mentioned in the utterance.
pub fn extract_budget(text: &str) -> Option<f64> {
    digit_runs(text)
        .into_iter()
        .filter_map(|run| run.parse::<f64>().ok())
        .filter(|v| *v >= MIN_BUDGET)
        .fold(None, |best: Option<f64>, v| match best {
            Some(b) if b >= v => Some(b),
            _ => Some(v),
        })
}

/// Numeric value of a price column rendering like "310.000 €"; `None` when
/// the column holds no digits at all.
pub fn parse_money(text: &str) -> Option<f64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Heuristic score of one item against a normalized utterance.
pub fn score_item(
    text_norm: &str,
    budget: Option<f64>,
    item: &CatalogItem,
    cols: &CatalogColumns,
) -> f64 {
    let mut score = 0.0;
    let address = normalize(item.text(&cols.address));
    if !address.is_empty() && text_norm.contains(&address) {
        score += 2.5;
    }
    // A one-letter name would substring-match almost anything.
    let name = normalize(&item.name);
    if name.chars().count() >= MIN_TOKEN_LEN && text_norm.contains(&name) {
        score += 1.0;
    }
    let locality = normalize(item.text(&cols.locality));
    if locality.chars().count() >= MIN_TOKEN_LEN && text_norm.contains(&locality) {
        score += 1.0;
    }

    let haystack = format!("{name} {address} {locality}");
    let mut token_hits = 0;
    for token in text_norm
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
    {
        if haystack.contains(token) {
            token_hits += 1;
            if token_hits == MAX_TOKEN_HITS {
                break;
            }
        }
    }
    score += 0.5 * token_hits as f64;

    // No parseable price means the term contributes exactly zero.
    if let (Some(budget), Some(price)) = (budget, parse_money(item.text(&cols.price))) {
        if (price - budget).abs() <= budget * PRICE_TOLERANCE {
            score += 1.5;
        }
    }
    score
}

/// Best-matching item for an utterance, or a disambiguation/none outcome.
///
/// `city` is the slot-extracted locality hint; it only drives the ambiguity
/// check, never the score.  Ties on score resolve to the lowest item id, so
/// the result is deterministic for a fixed item slice regardless of fetch
/// order.
pub fn find_match<'a>(
    text: &str,
    city: Option<&str>,
    items: &'a [CatalogItem],
    cols: &CatalogColumns,
    threshold: f64,
) -> MatchOutcome<'a> {
    if items.is_empty() {
        return MatchOutcome::NoMatch;
    }

    if let Some(reference) = extract_reference(text) {
        for item in items {
            if item.text(&cols.reference) == reference {
                return MatchOutcome::Match(item);
            }
        }
        // unknown reference: fall through to the fuzzy scorer
    }

    let text_norm = normalize(text);
    let budget = extract_budget(&text_norm);
    let mut best: Option<(&CatalogItem, f64)> = None;
    for item in items {
        let score = score_item(&text_norm, budget, item, cols);
        let better = match best {
            None => score > 0.0,
            Some((b, bs)) => score > bs || (score == bs && item.id < b.id),
        };
        if better {
            best = Some((item, score));
        }
    }
    if let Some((item, score)) = best {
        if score >= threshold {
            return MatchOutcome::Match(item);
        }
    }

    if let Some(city) = city {
        let city_norm = normalize(city);
        if !city_norm.is_empty() {
            let count = items
                .iter()
                .filter(|i| normalize(i.text(&cols.locality)).contains(&city_norm))
                .count();
            if count >= 2 {
                return MatchOutcome::Ambiguous {
                    city: city.to_string(),
                    count,
                };
            }
        }
    }
    MatchOutcome::NoMatch
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn item(id: u64, name: &str, cols: &[(&str, &str)]) -> CatalogItem {
        CatalogItem {
            id,
            name: name.to_string(),
            columns: cols
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            raw_values: HashMap::new(),
        }
    }

    fn columns() -> CatalogColumns {
        CatalogColumns::default()
    }

    #[test]
    fn reference_run_survives_separators() {
        assert_eq!(extract_reference("597.444"), Some("597444".to_string()));
        assert_eq!(
            extract_reference("me interesa la 59 74 44"),
            Some("597444".to_string())
        );
        assert_eq!(extract_reference("piso 123"), None); // too short
        assert_eq!(extract_reference("1234567890"), None); // too long
        assert_eq!(extract_reference("sin numeros"), None);
    }

    #[test]
    fn separator_needs_digits_on_both_sides() {
        // "123. y 45" is two runs, not "12345"
        assert_eq!(digit_runs("123. y 45"), vec!["123", "45"]);
        assert_eq!(digit_runs("300.000 euros"), vec!["300000"]);
    }

    #[test]
    fn budget_extraction_picks_largest_figure() {
        assert_eq!(
            extract_budget("piso de unos 300000 euros, 3 habitaciones"),
            Some(300000.0)
        );
        assert_eq!(extract_budget("entre 200.000 y 250.000"), Some(250000.0));
        assert_eq!(extract_budget("piso de 3 habitaciones"), None);
    }

    #[test]
    fn money_parsing_ignores_currency_noise() {
        assert_eq!(parse_money("310.000 €"), Some(310000.0));
        assert_eq!(parse_money("a consultar"), None);
        assert_eq!(parse_money(""), None);
    }

    #[test]
    fn reference_lookup_runs_before_fuzzy_scoring() {
        let items = vec![
            // would win any fuzzy scoring of the utterance below
            item(
                1,
                "Piso Tarragona",
                &[("localidad", "Tarragona"), ("direccion", "Rambla Nova 10")],
            ),
            item(2, "Loft", &[("nolon", "597444")]),
        ];
        let outcome = find_match(
            "la 597.444 de tarragona",
            None,
            &items,
            &columns(),
            2.0,
        );
        assert_eq!(outcome, MatchOutcome::Match(&items[1]));
    }

    #[test]
    fn unknown_reference_falls_through_to_scoring() {
        let items = vec![item(
            1,
            "Piso Centro",
            &[("localidad", "Tarragona"), ("precio", "300.000 €")],
        )];
        let outcome = find_match(
            "la referencia 99999 de tarragona por 300000",
            None,
            &items,
            &columns(),
            2.0,
        );
        // locality +1.0, token +0.5, price +1.5
        assert_eq!(outcome, MatchOutcome::Match(&items[0]));
    }

    #[test]
    fn tarragona_budget_scenario() {
        let cols = columns();
        let close = item(
            1,
            "Ático Playa",
            &[("localidad", "Tarragona"), ("precio", "310.000 €")],
        );
        let far = item(
            2,
            "Casa Rambla",
            &[("localidad", "Tarragona"), ("precio", "800.000 €")],
        );
        let text = normalize("piso en Tarragona de unos 300000 euros");
        let budget = extract_budget(&text);
        assert_eq!(budget, Some(300000.0));
        // 310,000 is within ±25% of 300,000; 800,000 is not
        assert_eq!(score_item(&text, budget, &close, &cols), 3.0);
        assert_eq!(score_item(&text, budget, &far, &cols), 1.5);

        let items = vec![far.clone(), close.clone()];
        let outcome = find_match(
            "piso en Tarragona de unos 300000 euros",
            Some("Tarragona"),
            &items,
            &cols,
            2.0,
        );
        assert_eq!(outcome, MatchOutcome::Match(&items[1]));
    }

    #[test]
    fn unparseable_price_contributes_zero() {
        let cols = columns();
        let priced = item(
            1,
            "A",
            &[("localidad", "Tarragona"), ("precio", "300.000 €")],
        );
        let unpriced = item(
            2,
            "B",
            &[("localidad", "Tarragona"), ("precio", "a consultar")],
        );
        let text = normalize("piso en tarragona de unos 300000 euros");
        let budget = extract_budget(&text);
        let diff = score_item(&text, budget, &priced, &cols)
            - score_item(&text, budget, &unpriced, &cols);
        assert_eq!(diff, 1.5);
    }

    #[test]
    fn trivially_short_names_earn_no_bonus() {
        let cols = columns();
        let short = item(1, "A", &[("localidad", "Tarragona")]);
        let text = normalize("piso en tarragona");
        // locality +1.0, token +0.5; "a" must not substring-match the text
        assert_eq!(score_item(&text, None, &short, &cols), 1.5);
    }

    #[test]
    fn ties_break_to_lowest_item_id() {
        let cols = columns();
        let twin = |id| {
            item(
                id,
                "Piso",
                &[("localidad", "Tarragona"), ("precio", "300.000 €")],
            )
        };
        let items = vec![twin(7), twin(3)];
        let outcome = find_match(
            "piso en tarragona de unos 300000 euros",
            None,
            &items,
            &cols,
            2.0,
        );
        match outcome {
            MatchOutcome::Match(item) => assert_eq!(item.id, 3),
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn matcher_is_deterministic_for_identical_inputs() {
        let cols = columns();
        let items = vec![
            item(5, "Ático", &[("localidad", "Reus"), ("precio", "180.000")]),
            item(9, "Piso", &[("localidad", "Reus"), ("precio", "185.000")]),
        ];
        let text = "algo en reus por 180000";
        let first = find_match(text, None, &items, &cols, 2.0);
        let second = find_match(text, None, &items, &cols, 2.0);
        assert_eq!(first, second);
    }

    #[test]
    fn city_hint_yields_ambiguous_below_threshold() {
        let cols = columns();
        let items = vec![
            item(1, "Ático", &[("localidad", "Tarragona")]),
            item(2, "Casa", &[("localidad", "Tarragona")]),
        ];
        // transcript never says the city; the slot does
        let outcome = find_match("busco un piso luminoso", Some("Tarragona"), &items, &cols, 2.0);
        assert_eq!(
            outcome,
            MatchOutcome::Ambiguous {
                city: "Tarragona".to_string(),
                count: 2
            }
        );
    }

    #[test]
    fn address_match_clears_threshold_alone() {
        let cols = columns();
        let items = vec![
            item(1, "Ático", &[("localidad", "Tarragona"), ("direccion", "Rambla Nova 10")]),
            item(2, "Casa", &[("localidad", "Tarragona")]),
        ];
        let outcome = find_match("la de Rambla Nova 10", Some("Tarragona"), &items, &cols, 2.0);
        assert_eq!(outcome, MatchOutcome::Match(&items[0]));
    }

    #[test]
    fn empty_catalog_is_no_match() {
        assert_eq!(
            find_match("piso en tarragona", Some("Tarragona"), &[], &columns(), 2.0),
            MatchOutcome::NoMatch
        );
    }

    #[test]
    fn accents_fold_for_matching() {
        assert_eq!(normalize("Sí, Ática en Cádiz"), "si, atica en cadiz");
    }
}
