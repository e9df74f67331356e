//! City normalization for registry result cards

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Spellings seen on registry cards, keyed by their lowercase form
static CITY_VARIANTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("tirane", "tirane"),
        ("tirana", "tirane"),
        ("tiranë", "tirane"),
        ("durres", "durres"),
        ("durrës", "durres"),
        ("durresi", "durres"),
        ("shkoder", "shkoder"),
        ("shkodër", "shkoder"),
        ("shkodra", "shkoder"),
        ("vlore", "vlore"),
        ("vlorë", "vlore"),
        ("vlora", "vlore"),
        ("elbasan", "elbasan"),
        ("korce", "korce"),
        ("korçë", "korce"),
        ("korca", "korce"),
        ("korça", "korce"),
        ("fier", "fier"),
        ("berat", "berat"),
        ("lushnje", "lushnje"),
        ("lushnjë", "lushnje"),
        ("kavaje", "kavaje"),
        ("kavajë", "kavaje"),
        ("pogradec", "pogradec"),
        ("gjirokaster", "gjirokaster"),
        ("gjirokastër", "gjirokaster"),
        ("sarande", "sarande"),
        ("sarandë", "sarande"),
        ("kukes", "kukes"),
        ("kukës", "kukes"),
        ("lezhe", "lezhe"),
        ("lezhë", "lezhe"),
        ("peshkopi", "peshkopi"),
    ]
    .into_iter()
    .collect()
});

/// Maps registry city text to its canonical key, falling back to `primary`
pub fn normalize_city(text: &str, primary: &str) -> String {
    let key = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    CITY_VARIANTS
        .get(key.as_str())
        .map_or_else(|| primary.to_string(), |city| (*city).to_string())
}
