//! # Leitura e Escrita de Documentos Anotados
//!
//! O formato de treino é o clássico arquivo em colunas: cada linha não vazia
//! é um token com campos separados por espaço/tab, uma coluna designada traz
//! a classe-ouro, e linhas em branco separam documentos. Antes de chegar ao
//! classificador, as tags-ouro podem ser re-rotuladas entre os esquemas
//! IOB1/IOB2/IOE/SBIEO.
//!
//! Na saída, o documento rotulado pode ser escrito em três formatos:
//!
//! | formato | exemplo |
//! |---------|---------|
//! | slash-tags | `João/PER Silva/PER foi/O` |
//! | XML inline | `<PER>João Silva</PER> foi` |
//! | XML stand-off | `<entity type="PER" start="0" end="1">João Silva</entity>` |

use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::error::{CrfError, CrfResult};
use crate::tokenizer;

/// Um token de documento com sua classe-ouro (treino) e a resposta do
/// classificador (inferência).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocToken {
    pub word: String,
    /// Classe anotada no corpus, quando presente.
    pub gold: Option<String>,
    /// Classe atribuída pelo classificador.
    pub answer: Option<String>,
}

impl DocToken {
    pub fn new(word: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            gold: None,
            answer: None,
        }
    }

    pub fn with_gold(word: impl Into<String>, gold: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            gold: Some(gold.into()),
            answer: None,
        }
    }
}

/// Uma sequência de tokens — a unidade sobre a qual o CRF roda.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub tokens: Vec<DocToken>,
}

impl Document {
    pub fn new(tokens: Vec<DocToken>) -> Self {
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Lê documentos de um arquivo em colunas.
///
/// `word_column` e `gold_column` são índices 0-baseados entre os campos
/// separados por espaço em branco; uma linha sem a coluna da palavra é
/// erro de dados. Linhas em branco separam documentos.
pub fn read_column_documents<R: BufRead>(
    reader: R,
    word_column: usize,
    gold_column: usize,
) -> CrfResult<Vec<Document>> {
    let mut documents = Vec::new();
    let mut current: Vec<DocToken> = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            if !current.is_empty() {
                documents.push(Document::new(std::mem::take(&mut current)));
            }
            continue;
        }
        let columns: Vec<&str> = line.split_whitespace().collect();
        let word = columns.get(word_column).ok_or_else(|| {
            CrfError::data(format!(
                "line {}: missing word column {}",
                line_no + 1,
                word_column
            ))
        })?;
        let gold = columns.get(gold_column).map(|g| g.to_string());
        current.push(DocToken {
            word: word.to_string(),
            gold,
            answer: None,
        });
    }
    if !current.is_empty() {
        documents.push(Document::new(current));
    }
    Ok(documents)
}

/// Leitor de texto plano para inferência: tokeniza e devolve um documento
/// por sentença, sem classes-ouro.
pub fn read_plain_text(text: &str) -> Vec<Document> {
    tokenizer::tokenize_sentences(text)
        .into_iter()
        .map(|sentence| {
            Document::new(sentence.into_iter().map(|t| DocToken::new(t.text)).collect())
        })
        .collect()
}

/// Esquema de rotulação das bordas de entidade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagScheme {
    /// `I-X` por padrão; `B-X` apenas entre entidades adjacentes do mesmo tipo.
    Iob1,
    /// Toda entidade começa com `B-X`.
    Iob2,
    /// O último token de cada entidade vira `E-X`.
    Ioe,
    /// `S-X` para entidades de um token; `B-X`/`I-X`/`E-X` nas demais.
    Sbieo,
}

/// Segmento contíguo de uma mesma entidade, em índices de token.
#[derive(Debug, Clone, PartialEq)]
struct Segment {
    start: usize,
    end: usize, // inclusivo
    kind: String,
}

/// Reconstrói os segmentos de entidade a partir das tags-ouro, aceitando
/// tanto tipos puros ("PER") quanto qualquer dos esquemas prefixados.
fn gold_segments(doc: &Document, background: &str) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    // E-/S- fecham a entidade corrente: o próximo token abre outra mesmo
    // que seja adjacente e do mesmo tipo.
    let mut closed = false;
    for (i, token) in doc.tokens.iter().enumerate() {
        let label = match token.gold.as_deref() {
            Some(l) if l != background => l,
            _ => {
                closed = false;
                continue;
            }
        };
        let (prefix, kind) = split_prefix(label);
        let starts_new = match (prefix, segments.last()) {
            (Some('B') | Some('S'), _) => true,
            (_, Some(last)) => closed || last.end + 1 != i || last.kind != kind,
            (_, None) => true,
        };
        if starts_new {
            segments.push(Segment {
                start: i,
                end: i,
                kind: kind.to_string(),
            });
        } else {
            segments.last_mut().unwrap().end = i;
        }
        closed = matches!(prefix, Some('E') | Some('S'));
    }
    segments
}

fn split_prefix(label: &str) -> (Option<char>, &str) {
    let mut chars = label.chars();
    match (chars.next(), chars.next()) {
        (Some(p @ ('B' | 'I' | 'E' | 'S')), Some('-')) => (Some(p), &label[2..]),
        _ => (None, label),
    }
}

/// Re-rotula as tags-ouro de todos os documentos no esquema pedido.
pub fn relabel_documents(documents: &mut [Document], scheme: TagScheme, background: &str) {
    for doc in documents.iter_mut() {
        let segments = gold_segments(doc, background);
        for token in doc.tokens.iter_mut() {
            if token.gold.is_some() {
                token.gold = Some(background.to_string());
            }
        }
        for (s, segment) in segments.iter().enumerate() {
            for i in segment.start..=segment.end {
                let single = segment.start == segment.end;
                let first = i == segment.start;
                let last = i == segment.end;
                let tag = match scheme {
                    TagScheme::Iob1 => {
                        // B- apenas quando colado na entidade anterior do mesmo tipo
                        let adjacent_same = s > 0
                            && segments[s - 1].end + 1 == segment.start
                            && segments[s - 1].kind == segment.kind;
                        if first && adjacent_same {
                            format!("B-{}", segment.kind)
                        } else {
                            format!("I-{}", segment.kind)
                        }
                    }
                    TagScheme::Iob2 => {
                        if first {
                            format!("B-{}", segment.kind)
                        } else {
                            format!("I-{}", segment.kind)
                        }
                    }
                    TagScheme::Ioe => {
                        if last {
                            format!("E-{}", segment.kind)
                        } else {
                            format!("I-{}", segment.kind)
                        }
                    }
                    TagScheme::Sbieo => {
                        if single {
                            format!("S-{}", segment.kind)
                        } else if first {
                            format!("B-{}", segment.kind)
                        } else if last {
                            format!("E-{}", segment.kind)
                        } else {
                            format!("I-{}", segment.kind)
                        }
                    }
                };
                doc.tokens[i].gold = Some(tag);
            }
        }
    }
}

/// Segmento de resposta (tokens consecutivos com a mesma classe ≠ fundo).
fn answer_segments(doc: &Document, background: &str) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    for (i, token) in doc.tokens.iter().enumerate() {
        let label = match token.answer.as_deref() {
            Some(l) if l != background => l,
            _ => continue,
        };
        match segments.last_mut() {
            Some(last) if last.end + 1 == i && last.kind == label => last.end = i,
            _ => segments.push(Segment {
                start: i,
                end: i,
                kind: label.to_string(),
            }),
        }
    }
    segments
}

/// Formato `palavra/CLASSE`, um token por coluna, documento em uma linha.
pub fn write_slash_tags(doc: &Document, background: &str) -> String {
    doc.tokens
        .iter()
        .map(|t| {
            format!(
                "{}/{}",
                t.word,
                t.answer.as_deref().unwrap_or(background)
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// XML inline: entidades embrulhadas em elementos com o nome da classe.
pub fn write_inline_xml(doc: &Document, background: &str) -> String {
    let segments = answer_segments(doc, background);
    let mut out = String::new();
    let mut seg_iter = segments.iter().peekable();
    let mut i = 0;
    while i < doc.tokens.len() {
        if !out.is_empty() {
            out.push(' ');
        }
        match seg_iter.peek() {
            Some(seg) if seg.start == i => {
                out.push_str(&format!("<{}>", seg.kind));
                let words: Vec<&str> = doc.tokens[seg.start..=seg.end]
                    .iter()
                    .map(|t| t.word.as_str())
                    .collect();
                out.push_str(&escape_xml(&words.join(" ")));
                out.push_str(&format!("</{}>", seg.kind));
                i = seg.end + 1;
                seg_iter.next();
            }
            _ => {
                out.push_str(&escape_xml(&doc.tokens[i].word));
                i += 1;
            }
        }
    }
    out
}

/// XML stand-off: um elemento por entidade com os índices de token.
pub fn write_standoff_xml(doc: &Document, background: &str) -> String {
    answer_segments(doc, background)
        .iter()
        .map(|seg| {
            let words: Vec<&str> = doc.tokens[seg.start..=seg.end]
                .iter()
                .map(|t| t.word.as_str())
                .collect();
            format!(
                "<entity type=\"{}\" start=\"{}\" end=\"{}\">{}</entity>",
                seg.kind,
                seg.start,
                seg.end,
                escape_xml(&words.join(" "))
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
