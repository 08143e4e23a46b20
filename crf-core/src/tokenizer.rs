//! # Tokenizador de Texto Plano para Inferência
//!
//! O caminho de treinamento lê arquivos em colunas já tokenizados; este
//! módulo cobre o caminho de inferência sobre texto cru. Cada token preserva
//! seus offsets de byte no texto original, o que permite reconstruir as
//! entidades com a formatação intacta na saída.
//!
//! A segmentação é por palavra Unicode (grafemas agrupados em palavras),
//! com pontuação emitida como tokens separados.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Um token extraído do texto original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// O texto do token (ex: "Lula", ",", "presidente").
    pub text: String,
    /// Índice de byte inicial no texto original (inclusive).
    pub start: usize,
    /// Índice de byte final no texto original (exclusivo).
    pub end: usize,
    /// Índice sequencial do token na lista (0, 1, 2...).
    pub index: usize,
}

/// Tokeniza um texto em palavras e pontuações com offsets de byte.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for (start, word) in text.split_word_bounds().scan(0usize, |offset, w| {
        let start = *offset;
        *offset += w.len();
        Some((start, w))
    }) {
        if word.trim().is_empty() {
            continue;
        }
        tokens.push(Token {
            text: word.to_string(),
            start,
            end: start + word.len(),
            index: tokens.len(),
        });
    }
    tokens
}

/// Quebra um texto em sentenças simples por pontuação final, devolvendo os
/// tokens de cada sentença. Abreviações não são tratadas — o leitor de
/// colunas é o caminho recomendado para corpora anotados.
pub fn tokenize_sentences(text: &str) -> Vec<Vec<Token>> {
    let tokens = tokenize(text);
    let mut sentences = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    for token in tokens {
        let is_final = matches!(token.text.as_str(), "." | "!" | "?");
        current.push(token);
        if is_final {
            sentences.push(reindex(std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        sentences.push(reindex(current));
    }
    sentences
}

fn reindex(mut tokens: Vec<Token>) -> Vec<Token> {
    for (i, t) in tokens.iter_mut().enumerate() {
        t.index = i;
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_preserves_offsets() {
        let text = "Lula visitou Brasília.";
        let tokens = tokenize(text);
        assert_eq!(tokens[0].text, "Lula");
        assert_eq!(&text[tokens[2].start..tokens[2].end], "Brasília");
        assert_eq!(tokens.last().unwrap().text, ".");
    }

    #[test]
    fn test_tokenize_empty_text() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \n\t ").is_empty());
    }

    #[test]
    fn test_sentence_split_reindexes() {
        let sentences = tokenize_sentences("Ana foi. Bia veio!");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[1][0].text, "Bia");
        assert_eq!(sentences[1][0].index, 0);
    }
}
