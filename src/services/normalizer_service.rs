//! services/normalizer_service.rs
//! Normalizador de snapshots: pipeline ordenado de transformaciones independientes
//! que quitan el markup volatil (codigo, metadatos, anuncios, indicadores de carga,
//! atributos cambiantes) y dejan una forma estable para comparar.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{node::Element, ElementRef, Html, Node};

/// Pasadas maximas del pipeline hasta llegar a un punto fijo.
const MAX_PASSES: usize = 4;

/// Un paso del pipeline. Cada paso es determinista y se puede probar por separado.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, input: &str) -> String;
}

pub struct Normalizer {
    steps: Vec<Box<dyn Transform>>,
}

static STANDARD: Lazy<Normalizer> = Lazy::new(Normalizer::standard);

/// Normaliza con el pipeline estandar.
pub fn normalize(raw: &str) -> String {
    STANDARD.normalize(raw)
}

impl Normalizer {
    /// Orden: codigo, metadatos, anuncios, carga, atributos, espacios.
    /// Anuncios y carga van antes de quitar atributos porque se detectan por class/id.
    pub fn standard() -> Self {
        Self::with_steps(vec![
            Box::new(StripCode),
            Box::new(StripMetadata),
            Box::new(StripAdContainers),
            Box::new(StripLoadingIndicators),
            Box::new(StripVolatileAttributes),
            Box::new(CollapseWhitespace),
        ])
    }

    pub fn with_steps(steps: Vec<Box<dyn Transform>>) -> Self {
        Self { steps }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Aplica el pipeline hasta que la salida deja de cambiar, de modo que
    /// re-normalizar un texto ya normalizado no lo altera.
    pub fn normalize(&self, raw: &str) -> String {
        if raw.trim().is_empty() {
            return String::new();
        }

        let mut current = self.run_once(raw);
        for _ in 1..MAX_PASSES {
            let next = self.run_once(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn run_once(&self, input: &str) -> String {
        self.steps
            .iter()
            .fold(input.to_string(), |acc, step| step.apply(&acc))
    }
}

// --------------------------------------------------------------------------------
// Reescritura sobre el arbol parseado
// --------------------------------------------------------------------------------

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Que descarta un paso al volver a escribir el fragmento.
struct Rules {
    /// Nodos que se omiten con todo su contenido.
    skip: fn(&Node) -> bool,
    keep_attr: fn(&str) -> bool,
}

fn skip_nothing(_: &Node) -> bool {
    false
}

fn keep_all_attrs(_: &str) -> bool {
    true
}

/// Parsea `input` como fragmento HTML y lo escribe en forma canonica: nombres en
/// minuscula, atributos ordenados y entre comillas dobles, texto re-escapado y sin
/// los nodos que `rules.skip` descarte. El resultado vuelve a parsear al mismo arbol.
fn rewrite(input: &str, rules: &Rules) -> String {
    let fragment = Html::parse_fragment(input);
    let mut out = String::with_capacity(input.len());
    write_children(fragment.root_element(), rules, &mut out);
    out
}

fn write_children(parent: ElementRef<'_>, rules: &Rules, out: &mut String) {
    for child in parent.children() {
        let value = child.value();
        if (rules.skip)(value) {
            continue;
        }
        match value {
            Node::Text(text) => push_escaped(out, text, false),
            Node::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
            Node::Doctype(doctype) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(doctype.name());
                out.push('>');
            }
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    write_element(element, rules, out);
                }
            }
            _ => {}
        }
    }
}

fn write_element(element: ElementRef<'_>, rules: &Rules, out: &mut String) {
    let value = element.value();
    let name = value.name();

    let mut attrs: Vec<(&str, &str)> = value
        .attrs()
        .filter(|(key, _)| (rules.keep_attr)(*key))
        .collect();
    attrs.sort();

    out.push('<');
    out.push_str(name);
    for (key, val) in attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        push_escaped(out, val, true);
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return;
    }
    write_children(element, rules, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn push_escaped(out: &mut String, raw: &str, in_attribute: bool) {
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' if in_attribute => out.push_str("&quot;"),
            '<' if !in_attribute => out.push_str("&lt;"),
            '>' if !in_attribute => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

fn element_of(node: &Node) -> Option<&Element> {
    match node {
        Node::Element(element) => Some(element),
        _ => None,
    }
}

/// Tokens de class, id y role, separando guiones, guiones bajos y camelCase.
fn marker_tokens(element: &Element) -> Vec<String> {
    ["class", "id", "role"]
        .iter()
        .filter_map(|a| element.attr(a))
        .flat_map(split_marker)
        .collect()
}

fn split_marker(value: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for piece in value.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for ch in piece.chars() {
            if ch.is_ascii_uppercase() && prev_lower && !current.is_empty() {
                tokens.push(current.to_lowercase());
                current.clear();
            }
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            current.push(ch);
        }
        if !current.is_empty() {
            tokens.push(current.to_lowercase());
        }
    }
    tokens
}

// --------------------------------------------------------------------------------
// Transformaciones
// --------------------------------------------------------------------------------

/// Bloques de codigo embebido: script, style, noscript, template.
pub struct StripCode;

fn is_code(node: &Node) -> bool {
    element_of(node).map_or(false, |e| {
        matches!(e.name(), "script" | "style" | "noscript" | "template")
    })
}

impl Transform for StripCode {
    fn name(&self) -> &'static str {
        "strip-code"
    }

    fn apply(&self, input: &str) -> String {
        rewrite(
            input,
            &Rules {
                skip: is_code,
                keep_attr: keep_all_attrs,
            },
        )
    }
}

/// Comentarios, doctype y tags de metadatos (meta, link, base).
pub struct StripMetadata;

fn is_metadata(node: &Node) -> bool {
    match node {
        Node::Comment(_) | Node::Doctype(_) | Node::ProcessingInstruction(_) => true,
        Node::Element(e) => matches!(e.name(), "meta" | "link" | "base"),
        _ => false,
    }
}

impl Transform for StripMetadata {
    fn name(&self) -> &'static str {
        "strip-metadata"
    }

    fn apply(&self, input: &str) -> String {
        rewrite(
            input,
            &Rules {
                skip: is_metadata,
                keep_attr: keep_all_attrs,
            },
        )
    }
}

/// Contenedores de anuncios, detectados por estructura (tokens de class/id,
/// atributos data-ad-*, iframes y enlaces de redes publicitarias).
pub struct StripAdContainers;

const AD_TOKENS: &[&str] = &[
    "ad",
    "ads",
    "adsbygoogle",
    "adslot",
    "adunit",
    "adbox",
    "advert",
    "adverts",
    "advertisement",
    "advertising",
    "sponsor",
    "sponsored",
];

const AD_NETWORK_HINTS: &[&str] = &[
    "doubleclick",
    "googleadservices",
    "googlesyndication",
    "/ads/click",
    "/api/ads",
];

fn is_ad_container(node: &Node) -> bool {
    let Some(element) = element_of(node) else {
        return false;
    };
    if element.attrs().any(|(key, _)| key.starts_with("data-ad")) {
        return true;
    }
    if marker_tokens(element)
        .iter()
        .any(|t| AD_TOKENS.contains(&t.as_str()))
    {
        return true;
    }
    if matches!(element.name(), "iframe" | "a" | "ins") {
        let target = element
            .attr("src")
            .or_else(|| element.attr("href"))
            .unwrap_or("")
            .to_lowercase();
        return AD_NETWORK_HINTS.iter().any(|h| target.contains(h));
    }
    false
}

impl Transform for StripAdContainers {
    fn name(&self) -> &'static str {
        "strip-ad-heuristic"
    }

    fn apply(&self, input: &str) -> String {
        rewrite(
            input,
            &Rules {
                skip: is_ad_container,
                keep_attr: keep_all_attrs,
            },
        )
    }
}

/// Indicadores de carga, progreso, spinners, relojes y contadores, y los textos
/// que solo dicen "Loading..." o similares.
pub struct StripLoadingIndicators;

const LOADING_TOKENS: &[&str] = &[
    "loading",
    "loader",
    "spinner",
    "throbber",
    "progress",
    "progressbar",
    "skeleton",
    "clock",
    "timer",
    "counter",
    "countdown",
];

static LOADING_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:loading|please\s+wait|processing)\s*(?:\.{1,3}|…)?\s*(?:\d{1,3}\s*%)?\s*$",
    )
    .expect("regex de carga invalida")
});

fn is_loading_indicator(node: &Node) -> bool {
    match node {
        Node::Text(text) => LOADING_TEXT_RE.is_match(text),
        Node::Element(element) => {
            element.name() == "progress"
                || element
                    .attr("aria-busy")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false)
                || marker_tokens(element)
                    .iter()
                    .any(|t| LOADING_TOKENS.contains(&t.as_str()))
        }
        _ => false,
    }
}

impl Transform for StripLoadingIndicators {
    fn name(&self) -> &'static str {
        "strip-loading-heuristic"
    }

    fn apply(&self, input: &str) -> String {
        rewrite(
            input,
            &Rules {
                skip: is_loading_indicator,
                keep_attr: keep_all_attrs,
            },
        )
    }
}

/// Atributos cuyo valor cambia sin que cambie el contenido visible.
pub struct StripVolatileAttributes;

const VOLATILE_ATTRS: &[&str] = &[
    "id",
    "class",
    "style",
    "src",
    "srcset",
    "sizes",
    "href",
    "action",
    "nonce",
    "integrity",
    "crossorigin",
    "referrerpolicy",
    "as",
    "type",
    "media",
    "rel",
    "loading",
    "decoding",
    "tabindex",
    "jsaction",
    "jsname",
];

const VOLATILE_PREFIXES: &[&str] = &["data-", "aria-", "on", "ng-", "v-"];

fn is_stable_attr(name: &str) -> bool {
    !VOLATILE_ATTRS.contains(&name) && !VOLATILE_PREFIXES.iter().any(|p| name.starts_with(p))
}

impl Transform for StripVolatileAttributes {
    fn name(&self) -> &'static str {
        "strip-volatile-attributes"
    }

    fn apply(&self, input: &str) -> String {
        rewrite(
            input,
            &Rules {
                skip: skip_nothing,
                keep_attr: is_stable_attr,
            },
        )
    }
}

/// Colapsa espacios y elimina los espacios entre tags.
pub struct CollapseWhitespace;

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("regex de espacios invalida"));
static BETWEEN_TAGS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r">\s+<").expect("regex de espacios invalida"));

impl Transform for CollapseWhitespace {
    fn name(&self) -> &'static str {
        "collapse-whitespace"
    }

    fn apply(&self, input: &str) -> String {
        let collapsed = WHITESPACE_RE.replace_all(input, " ");
        BETWEEN_TAGS_RE
            .replace_all(collapsed.trim(), "><")
            .into_owned()
    }
}

// --------------------------------------------------------------------------------
// Texto plano
// --------------------------------------------------------------------------------

/// Texto visible de un snapshot ya normalizado, con las entidades decodificadas.
pub fn extract_text(normalized: &str) -> String {
    let fragment = Html::parse_fragment(normalized);
    let text = fragment
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    WHITESPACE_RE.replace_all(&text, " ").into_owned()
}
