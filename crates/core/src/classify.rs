use once_cell::sync::Lazy;
use regex::Regex;

use crate::record::Domain;
use crate::schema::fold;

pub struct DomainRule {
    pub pattern: Regex,
    pub domain: Domain,
}

fn rule(pattern: &str, domain: Domain) -> DomainRule {
    DomainRule {
        pattern: Regex::new(pattern).expect("valid domain rule"),
        domain,
    }
}

/// Evaluated in order against the folded `"<file> <sheet>"` text; first match wins.
pub static NAME_RULES: Lazy<Vec<DomainRule>> = Lazy::new(|| {
    vec![
        rule(r"becas?", Domain::Becas),
        rule(r"arancel|cuota|matricula", Domain::Aranceles),
        rule(r"fecha|calendario|inscrip", Domain::Fechas),
        rule(r"reglamento|norma|condicion|politica", Domain::Reglamentos),
        rule(r"oferta", Domain::Oferta),
        rule(r"carrera|plan|materias", Domain::Carreras),
        rule(r"faq|preguntas|respuestas", Domain::Faq),
    ]
});

/// Evaluated in order against the space-joined slugified column names.
pub static COLUMN_RULES: Lazy<Vec<DomainRule>> = Lazy::new(|| {
    vec![
        rule(r"arancel|matricula|cuota|mensual|importe|precio", Domain::Aranceles),
        rule(r"beca|cobertura", Domain::Becas),
        rule(r"identificador_carrera|id_carrera|carrera", Domain::Carreras),
    ]
});

fn first_match(rules: &[DomainRule], haystack: &str) -> Option<Domain> {
    rules
        .iter()
        .find(|rule| rule.pattern.is_match(haystack))
        .map(|rule| rule.domain)
}

pub fn domain_from_name(file_name: &str, sheet_name: &str) -> Option<Domain> {
    let haystack = fold(&format!("{file_name} {sheet_name}"));
    first_match(&NAME_RULES, &haystack)
}

pub fn domain_from_columns(columns: &[String]) -> Option<Domain> {
    let haystack = columns.join(" ");
    first_match(&COLUMN_RULES, &haystack)
}

/// Canonical fee columns; any of them makes the sheet `aranceles`.
pub const FEE_COLUMNS: [&str; 4] = [
    "matricula_general",
    "matricula_ingresante",
    "arancel_mensual",
    "arancel_total",
];

/// Program columns; they make the sheet `carreras` unless the name said fees or grants.
pub const PROGRAM_COLUMNS: [&str; 2] = ["identificador_carrera", "carrera"];

fn has_any(columns: &[String], wanted: &[&str]) -> bool {
    columns.iter().any(|c| wanted.contains(&c.as_str()))
}

/// Names decide first, column hints fill in when none fires, then exact
/// fee and program columns override the guess.
pub fn classify(file_name: &str, sheet_name: &str, columns: &[String]) -> Domain {
    let guess = domain_from_name(file_name, sheet_name)
        .or_else(|| domain_from_columns(columns))
        .unwrap_or(Domain::General);
    if has_any(columns, &FEE_COLUMNS) {
        Domain::Aranceles
    } else if has_any(columns, &PROGRAM_COLUMNS) && !matches!(guess, Domain::Aranceles | Domain::Becas) {
        Domain::Carreras
    } else {
        guess
    }
}
