//! # crf-core — CRF de Cadeia Linear para Marcação de Sequências
//!
//! Motor completo de Campos Aleatórios Condicionais (CRF) de cadeia linear
//! com ordem de clique variável, voltado a reconhecimento de entidades
//! nomeadas: treinamento por máxima verossimilhança condicional
//! regularizada e inferência exata por passagem de mensagens.
//!
//! ## Fluxo
//!
//! ```text
//! tokens → features (strings) → ids → data[posição][ordem][feature]
//!        → treino:   otimizador ⇄ objetivo ⇄ árvores de cliques
//!        → predição: árvore de cliques → decodificador → classes
//! ```
//!
//! As peças principais, das folhas para a raiz:
//!
//! - [`index`] / [`tuple`] — internação de classes, features e tuplas de rótulo;
//! - [`factor`] / [`clique`] — tabelas de potenciais em log-espaço e a
//!   calibração forward–backward;
//! - [`viterbi`] / [`gibbs`] / [`prior`] — decodificadores exato, em feixe,
//!   k-best e amostragem com recozimento;
//! - [`objective`] / [`qn`] / [`sgd`] — o objetivo diferenciável e os
//!   minimizadores em lote e estocásticos;
//! - [`classifier`] — a fachada que orquestra tudo;
//! - [`serialize`] — o formato binário versionado e o despejo em texto.

pub mod classifier;
pub mod clique;
pub mod corpus;
pub mod dataset;
pub mod error;
pub mod factor;
pub mod features;
pub mod flags;
pub mod gibbs;
pub mod index;
pub mod objective;
pub mod prior;
pub mod qn;
pub mod sequence;
pub mod serialize;
pub mod sgd;
pub mod tokenizer;
pub mod tuple;
pub mod viterbi;

pub use classifier::CrfClassifier;
pub use corpus::{DocToken, Document, TagScheme};
pub use error::{CrfError, CrfResult};
pub use flags::{Flags, InferenceKind, OptimizerKind, RegularizerKind};
pub use sequence::SequenceModel;
