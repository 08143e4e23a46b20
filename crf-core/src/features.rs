//! # Fábrica de Features
//!
//! O motor consome features como strings opacas: a fábrica recebe o
//! documento e uma posição focal e devolve, para cada ordem `o ∈ [0..W-1]`,
//! uma coleção de strings. Cada string deve aparecer sempre na mesma ordem —
//! é ela que determina qual tamanho de clique a feature parametriza.
//!
//! A fábrica embutida ([`ShapeFeatureFactory`]) cobre o inventário
//! ortográfico e contextual clássico:
//!
//! - identidade e forma minúscula da palavra;
//! - prefixos e sufixos de 2 a 4 caracteres;
//! - classe de capitalização e "shape" (`João` → `Xx`, `COVID-19` → `X-d`);
//! - flags de dígito e pontuação;
//! - palavras vizinhas (janela de 1 token para cada lado);
//! - features de aresta nas ordens superiores, que dão peso às transições.
//!
//! Implementações são identificadas por um nome estável persistido no
//! arquivo de modelo, para que a desserialização reconstrua a mesma fábrica.

use std::sync::OnceLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::corpus::Document;
use crate::error::{CrfError, CrfResult};

/// Contrato das fábricas de features.
pub trait FeatureFactory: Send + Sync {
    /// Nome estável da implementação, gravado no modelo serializado.
    fn identifier(&self) -> &'static str;

    /// Features da posição `position`, uma coleção por ordem `0..window`.
    fn features(&self, doc: &Document, position: usize, window: usize) -> Vec<Vec<String>>;
}

/// Reconstrói uma fábrica a partir do identificador persistido no modelo.
pub fn factory_for(identifier: &str) -> CrfResult<Box<dyn FeatureFactory>> {
    match identifier {
        ShapeFeatureFactory::IDENTIFIER => Ok(Box::new(ShapeFeatureFactory)),
        other => Err(CrfError::format(format!(
            "unknown feature factory `{other}`"
        ))),
    }
}

/// Fábrica padrão baseada em forma ortográfica e contexto local.
pub struct ShapeFeatureFactory;

impl ShapeFeatureFactory {
    pub const IDENTIFIER: &'static str = "shape.v1";
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]+([.,][0-9]+)*$").unwrap())
}

/// Colapsa a palavra em sua "shape": maiúsculas viram `X`, minúsculas `x`,
/// dígitos `d`, o resto fica; sequências repetidas são comprimidas.
fn word_shape(word: &str) -> String {
    let mut shape = String::new();
    let mut last = '\0';
    for c in word.chars() {
        let class = if c.is_uppercase() {
            'X'
        } else if c.is_lowercase() {
            'x'
        } else if c.is_ascii_digit() {
            'd'
        } else {
            c
        };
        if class != last {
            shape.push(class);
            last = class;
        }
    }
    shape
}

fn word_at(doc: &Document, position: isize) -> Option<&str> {
    if position < 0 {
        return None;
    }
    doc.tokens.get(position as usize).map(|t| t.word.as_str())
}

impl FeatureFactory for ShapeFeatureFactory {
    fn identifier(&self) -> &'static str {
        Self::IDENTIFIER
    }

    fn features(&self, doc: &Document, position: usize, window: usize) -> Vec<Vec<String>> {
        let word = &doc.tokens[position].word;
        let lower = word.to_lowercase();
        let graphemes: Vec<&str> = lower.graphemes(true).collect();

        let mut order0 = vec![
            format!("w={word}"),
            format!("lw={lower}"),
            format!("shape={}", word_shape(word)),
            "bias".to_string(),
        ];

        for k in 2..=4usize {
            if graphemes.len() >= k {
                order0.push(format!("prefix{k}={}", graphemes[..k].concat()));
                order0.push(format!("suffix{k}={}", graphemes[graphemes.len() - k..].concat()));
            }
        }

        let mut chars = word.chars();
        let first_upper = chars.next().map(char::is_uppercase).unwrap_or(false);
        if first_upper {
            order0.push("is_capitalized".to_string());
        }
        if !word.is_empty() && word.chars().all(char::is_uppercase) {
            order0.push("is_all_caps".to_string());
        }
        if number_pattern().is_match(word) {
            order0.push("is_number".to_string());
        }
        if word.chars().all(|c| !c.is_alphanumeric()) && !word.is_empty() {
            order0.push("is_punctuation".to_string());
        }

        match word_at(doc, position as isize - 1) {
            Some(prev) => order0.push(format!("prev_word={}", prev.to_lowercase())),
            None => order0.push("BOS".to_string()),
        }
        match word_at(doc, position as isize + 1) {
            Some(next) => order0.push(format!("next_word={}", next.to_lowercase())),
            None => order0.push("EOS".to_string()),
        }

        let mut per_order = vec![order0];
        for o in 1..window {
            // Features de aresta: um viés de transição por ordem, mais a
            // identidade e a shape da palavra focal condicionadas à clique.
            per_order.push(vec![
                format!("edge{o}"),
                format!("edge{o}|lw={lower}"),
                format!("edge{o}|shape={}", word_shape(word)),
            ]);
        }
        per_order
    }
}
