//! Entity and relation extraction.
//!
//! Two layers feed the entity list:
//!
//! 1. A [`NamedEntityTagger`]: the default [`HeuristicTagger`] recognizes
//!    organisations, persons with honorifics, dates, quantities, acronyms,
//!    and multi-word title-case concepts.
//! 2. A [`DomainLexicon`] of satellite and data-product names, matched
//!    case-insensitively. Lexicon labels win over tagger labels when both
//!    claim overlapping spans.
//!
//! Triples come from a fixed table of `CapitalizedSpan keyword
//! CapitalizedSpan` patterns, one per [`Relation`]. Everything here is
//! best-effort: odd input produces fewer results, never an error.

use std::collections::HashSet;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::models::{Document, Entity, EntityLabel, Relation, Triple};

/// Capitalized span: a capitalized token followed by more tokens that
/// start with a capital or a digit, on one line.
const CAP: &str = r"[A-Z][A-Za-z0-9\-]*(?:[ \t]+[A-Z0-9][A-Za-z0-9\-]*)*";

const DETERMINERS: &[&str] = &["The", "A", "An", "This", "These", "That", "Those"];

const SATELLITES: &[&str] = &[
    r"INSAT-3D[RS]?",
    r"OCEANSAT-[23]",
    r"SCATSAT-1",
    r"KALPANA-1",
    r"MeghaTropiques",
    r"SARAL-AltiKa",
    r"INSAT-3A",
];

const PRODUCTS: &[&str] = &[
    "Sea Surface Temperature",
    "Rainfall Product",
    "Weather Forecast",
    "Ocean Current",
    "Soil Moisture",
    "Cloud Properties",
    "Cyclone Detection",
    "Lightning Forecast",
    "Monsoon Prediction",
    "Wave Height",
    "Air Quality",
    "Coastal Product",
];

/// Maximum characters of the surrounding sentence kept as entity context.
const CONTEXT_CHARS: usize = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    /// Additional literal satellite names.
    #[serde(default)]
    pub extra_satellites: Vec<String>,
    /// Additional literal data-product names.
    #[serde(default)]
    pub extra_products: Vec<String>,
    #[serde(default = "default_min_span_chars")]
    pub min_span_chars: usize,
}

fn default_min_span_chars() -> usize {
    3
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            extra_satellites: Vec::new(),
            extra_products: Vec::new(),
            min_span_chars: default_min_span_chars(),
        }
    }
}

/// A general-purpose named entity recognizer.
pub trait NamedEntityTagger: Send + Sync {
    fn tag(&self, text: &str) -> Vec<Entity>;
}

/// Regex-driven tagger with no model files.
pub struct HeuristicTagger {
    organization: Regex,
    person: Regex,
    date: Regex,
    quantity: Regex,
    acronym: Regex,
    concept: Regex,
}

impl HeuristicTagger {
    pub fn new() -> Result<Self> {
        Ok(Self {
            organization: Regex::new(
                r"\b(?:[A-Z][A-Za-z]+[ \t]+)*(?:[A-Z][A-Za-z]+)[ \t]+(?:Organisation|Organization|Centre|Center|Agency|Institute|University|Department|Laboratory)\b",
            )?,
            person: Regex::new(r"\b(?:Dr|Mr|Mrs|Ms|Prof)\.?[ \t]+[A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)*")?,
            date: Regex::new(
                r"\b(?:\d{1,2}[ \t]+)?(?:January|February|March|April|May|June|July|August|September|October|November|December)[ \t]+\d{4}\b|\b\d{4}-\d{2}-\d{2}\b",
            )?,
            quantity: Regex::new(
                r"\b\d+(?:\.\d+)?(?:%|[ \t]*(?:km|kg|GHz|MHz|nm|metres?|meters?|hours?|minutes?|days?)\b)",
            )?,
            acronym: Regex::new(r"\b[A-Z]{2,}(?:-[A-Z0-9]+)*\b")?,
            concept: Regex::new(r"\b[A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)+\b")?,
        })
    }

    fn collect(&self, text: &str, re: &Regex, label: EntityLabel, out: &mut Vec<Entity>) {
        for m in re.find_iter(text) {
            out.push(entity_at(text, m.start(), m.end(), label));
        }
    }
}

impl NamedEntityTagger for HeuristicTagger {
    fn tag(&self, text: &str) -> Vec<Entity> {
        let mut out = Vec::new();
        self.collect(text, &self.organization, EntityLabel::Organization, &mut out);
        self.collect(text, &self.person, EntityLabel::Person, &mut out);
        self.collect(text, &self.date, EntityLabel::Date, &mut out);
        self.collect(text, &self.quantity, EntityLabel::Quantity, &mut out);
        self.collect(text, &self.acronym, EntityLabel::Acronym, &mut out);

        for m in self.concept.find_iter(text) {
            let (mut start, end) = (m.start(), m.end());
            if at_sentence_start(text, start) {
                // The first word is capitalized by grammar, not by name.
                let rest = &text[start..end];
                let Some(space) = rest.find([' ', '\t']) else {
                    continue;
                };
                let trimmed = rest[space..].trim_start();
                if !trimmed.contains([' ', '\t']) {
                    continue;
                }
                start = end - trimmed.len();
            }
            out.push(entity_at(text, start, end, EntityLabel::Concept));
        }
        out
    }
}

/// Domain vocabulary matched case-insensitively.
pub struct DomainLexicon {
    satellites: Vec<Regex>,
    products: Vec<Regex>,
}

impl DomainLexicon {
    pub fn new(extra_satellites: &[String], extra_products: &[String]) -> Result<Self> {
        let satellites = SATELLITES
            .iter()
            .map(|p| p.to_string())
            .chain(extra_satellites.iter().map(|s| regex::escape(s.trim())))
            .map(|p| word_pattern(&p))
            .collect::<Result<Vec<_>>>()?;
        let products = PRODUCTS
            .iter()
            .map(|p| regex::escape(p))
            .chain(extra_products.iter().map(|s| regex::escape(s.trim())))
            .map(|p| word_pattern(&p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            satellites,
            products,
        })
    }

    pub fn tag(&self, text: &str) -> Vec<Entity> {
        let mut out = Vec::new();
        for re in &self.satellites {
            for m in re.find_iter(text) {
                out.push(entity_at(text, m.start(), m.end(), EntityLabel::Satellite));
            }
        }
        for re in &self.products {
            for m in re.find_iter(text) {
                out.push(entity_at(text, m.start(), m.end(), EntityLabel::Product));
            }
        }
        out
    }
}

fn word_pattern(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(&format!(r"\b(?:{})\b", pattern))
        .case_insensitive(true)
        .build()
        .with_context(|| format!("invalid lexicon pattern: {}", pattern))
}

/// Entities and triples found in one document.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: Vec<Entity>,
    pub triples: Vec<Triple>,
}

pub struct Extractor {
    tagger: Box<dyn NamedEntityTagger>,
    lexicon: DomainLexicon,
    patterns: Vec<(Relation, Regex)>,
    min_span_chars: usize,
}

impl Extractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        Ok(Self {
            tagger: Box::new(HeuristicTagger::new()?),
            lexicon: DomainLexicon::new(&config.extra_satellites, &config.extra_products)?,
            patterns: relation_patterns()?,
            min_span_chars: config.min_span_chars.max(1),
        })
    }

    /// Replace the general-purpose tagger.
    pub fn with_tagger(mut self, tagger: Box<dyn NamedEntityTagger>) -> Self {
        self.tagger = tagger;
        self
    }

    pub fn extract(&self, doc: &Document) -> Extraction {
        Extraction {
            entities: self.extract_entities(&doc.text),
            triples: self.extract_triples(&doc.text, &doc.source_id),
        }
    }

    /// Non-overlapping entities in text order, one per distinct surface form.
    pub fn extract_entities(&self, text: &str) -> Vec<Entity> {
        let mut candidates = self.lexicon.tag(text);
        candidates.extend(self.tagger.tag(text));
        candidates.retain(|e| e.text.chars().count() >= self.min_span_chars);

        // Highest priority first, then longest span, then earliest.
        candidates.sort_by(|a, b| {
            b.label
                .priority()
                .cmp(&a.label.priority())
                .then((b.end - b.start).cmp(&(a.end - a.start)))
                .then(a.start.cmp(&b.start))
        });

        let mut taken: Vec<(usize, usize)> = Vec::new();
        let mut kept = Vec::new();
        for e in candidates {
            if taken.iter().any(|&(s, t)| e.start < t && s < e.end) {
                continue;
            }
            taken.push((e.start, e.end));
            kept.push(e);
        }
        kept.sort_by_key(|e| e.start);

        let mut seen = HashSet::new();
        kept.retain(|e| seen.insert(e.text.to_lowercase()));
        kept
    }

    /// Closed-vocabulary triples, deduplicated, in first-seen order.
    pub fn extract_triples(&self, text: &str, source_id: &str) -> Vec<Triple> {
        let mut seen = HashSet::new();
        let mut triples = Vec::new();
        for (relation, re) in &self.patterns {
            for caps in re.captures_iter(text) {
                let (Some(subject), Some(object)) = (caps.name("subject"), caps.name("object"))
                else {
                    continue;
                };
                let subject = strip_determiner(subject.as_str());
                let object = strip_determiner(object.as_str());
                if subject.chars().count() < self.min_span_chars
                    || object.chars().count() < self.min_span_chars
                    || subject == object
                {
                    continue;
                }
                let triple = Triple::new(subject, *relation, object, source_id);
                if seen.insert(triple.clone()) {
                    triples.push(triple);
                }
            }
        }
        triples
    }

    /// Entity surface forms in a query, used as extra graph lookup terms.
    pub fn query_terms(&self, query: &str) -> Vec<String> {
        self.extract_entities(query)
            .into_iter()
            .map(|e| e.text)
            .collect()
    }
}

fn relation_patterns() -> Result<Vec<(Relation, Regex)>> {
    let table: [(Relation, &str); 5] = [
        (
            Relation::Provides,
            r"(?i:provides|offers|monitors|measures|detects|generates|produces)",
        ),
        (Relation::IsA, r"(?i:is|are)[ \t]+(?i:a|an)"),
        (Relation::Launched, r"(?i:launched|deployed|operated)"),
        (Relation::IsSatellite, r"(?i:satellite|mission|instrument)"),
        (Relation::ProducesData, r"(?i:data|product|information)"),
    ];
    table
        .into_iter()
        .map(|(relation, keywords)| {
            let pattern = format!(
                r"\b(?P<subject>{cap})[ \t]+{keywords}\b[ \t]+(?P<object>{cap})",
                cap = CAP,
                keywords = keywords
            );
            Regex::new(&pattern)
                .with_context(|| format!("invalid pattern for {}", relation))
                .map(|re| (relation, re))
        })
        .collect()
}

fn strip_determiner(span: &str) -> String {
    let span = span.trim();
    for det in DETERMINERS {
        if let Some(rest) = span.strip_prefix(det) {
            if rest.starts_with([' ', '\t']) {
                return rest.trim_start().to_string();
            }
        }
    }
    span.to_string()
}

fn at_sentence_start(text: &str, start: usize) -> bool {
    match text[..start].trim_end().chars().last() {
        None => true,
        Some(c) => matches!(c, '.' | '!' | '?' | '\n' | ':'),
    }
}

fn entity_at(text: &str, start: usize, end: usize, label: EntityLabel) -> Entity {
    Entity {
        text: text[start..end].to_string(),
        label,
        start,
        end,
        context: sentence_around(text, start, end),
    }
}

fn sentence_around(text: &str, start: usize, end: usize) -> String {
    let is_boundary = |c: char| matches!(c, '.' | '!' | '?' | '\n');
    let from = text[..start]
        .rfind(is_boundary)
        .map(|i| i + 1)
        .unwrap_or(0);
    let to = text[end..]
        .find(is_boundary)
        .map(|i| end + i + 1)
        .unwrap_or(text.len());
    let sentence = text[from..to].trim();
    if sentence.chars().count() > CONTEXT_CHARS {
        sentence.chars().take(CONTEXT_CHARS).collect()
    } else {
        sentence.to_string()
    }
}
