//! # Construtor de Dados — Documentos → Arranjos de Treino
//!
//! Converte documentos anotados na representação interna do motor:
//!
//! ```text
//! data[posição][ordem][id de feature...]     labels[posição]
//! ```
//!
//! A varredura de treino constrói os índices (classes, features com sua
//! ordem, tuplas de rótulo observadas) e só então codifica cada documento.
//! Na predição os índices são somente leitura: features desconhecidas são
//! descartadas em silêncio — elas comprovadamente não afetam a pontuação.

use std::collections::HashMap;

use crate::corpus::Document;
use crate::error::{CrfError, CrfResult};
use crate::features::FeatureFactory;
use crate::index::Index;
use crate::tuple::{LabelIndices, LabelTuple};

/// Documento na representação interna: ids de feature por posição e ordem,
/// mais o id da classe-ouro por posição.
#[derive(Debug, Clone, Default)]
pub struct EncodedDocument {
    pub data: Vec<Vec<Vec<usize>>>,
    pub labels: Vec<usize>,
}

impl EncodedDocument {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Índices e documentos codificados produzidos pela varredura de treino.
pub struct TrainingSet {
    pub classes: Index<String>,
    pub features: Index<String>,
    /// Ordem (tamanho de clique − 1) que cada feature parametriza.
    pub feature_orders: Vec<usize>,
    pub label_indices: LabelIndices,
    pub background: usize,
    pub documents: Vec<EncodedDocument>,
}

/// Varre os documentos de treino construindo todos os índices e devolvendo
/// os documentos codificados.
///
/// `observed_only` restringe os índices de tuplas às sequências vistas no
/// treino (mais os sufixos delas); caso contrário os índices são o produto
/// cartesiano completo. `remove_background_singletons` descarta features que
/// co-ocorrem com o rótulo de fundo uma única vez em todo o corpus.
pub fn build_training_set(
    documents: &[Document],
    factory: &dyn FeatureFactory,
    window: usize,
    background: &str,
    observed_only: bool,
    remove_background_singletons: bool,
) -> CrfResult<TrainingSet> {
    let mut classes: Index<String> = Index::new();
    let background_id = classes.index_of_or_add(background.to_string());

    // Passo 1: classes e tuplas observadas.
    for doc in documents {
        for token in &doc.tokens {
            let gold = token.gold.as_deref().ok_or_else(|| {
                CrfError::data(format!("token `{}` without gold class", token.word))
            })?;
            classes.index_of_or_add(gold.to_string());
        }
    }

    let mut label_indices = if observed_only {
        LabelIndices::observed_only(window, classes.len())
    } else {
        LabelIndices::dense(window, classes.len())
    };
    if observed_only {
        for doc in documents {
            let labels = gold_ids(doc, &classes)?;
            for j in 0..labels.len() {
                label_indices.add_observed(&tuple_ending_at(&labels, j, window, background_id));
            }
        }
    }

    // Passo 2: vocabulário de features, com a ordem de cada uma e as
    // contagens para a poda de singletons de fundo.
    let mut orders_by_name: HashMap<String, usize> = HashMap::new();
    let mut occurrences: HashMap<String, (usize, bool)> = HashMap::new(); // (total, só fundo)
    for doc in documents {
        for (j, token) in doc.tokens.iter().enumerate() {
            let is_background = token.gold.as_deref() == Some(background);
            for (o, names) in factory.features(doc, j, window).into_iter().enumerate() {
                for name in names {
                    match orders_by_name.get(&name) {
                        Some(&seen) if seen != o => {
                            return Err(CrfError::data(format!(
                                "feature `{name}` appears at orders {seen} and {o}"
                            )));
                        }
                        Some(_) => {}
                        None => {
                            orders_by_name.insert(name.clone(), o);
                        }
                    }
                    let entry = occurrences.entry(name).or_insert((0, true));
                    entry.0 += 1;
                    entry.1 &= is_background;
                }
            }
        }
    }

    let mut features: Index<String> = Index::new();
    let mut feature_orders: Vec<usize> = Vec::new();
    // Passo 3: indexação densa na ordem de aparição, pulando os singletons
    // de fundo quando pedido.
    for doc in documents {
        for (j, _) in doc.tokens.iter().enumerate() {
            for names in factory.features(doc, j, window) {
                for name in names {
                    if remove_background_singletons {
                        let (count, background_only) =
                            occurrences.get(&name).copied().unwrap_or((0, false));
                        if count == 1 && background_only {
                            continue;
                        }
                    }
                    if features.index_of(&name).is_none() {
                        let order = orders_by_name[&name];
                        features.index_of_or_add(name);
                        feature_orders.push(order);
                    }
                }
            }
        }
    }

    // Passo 4: codificação final.
    let encoded = documents
        .iter()
        .map(|doc| encode_document(doc, factory, &classes, &features, window, background_id))
        .collect::<CrfResult<Vec<_>>>()?;

    Ok(TrainingSet {
        classes,
        features,
        feature_orders,
        label_indices,
        background: background_id,
        documents: encoded,
    })
}

/// Codifica um documento com índices fixos (somente leitura).
///
/// Features ausentes do índice são descartadas. Tokens sem classe-ouro
/// recebem o rótulo de fundo — na predição o campo não é usado.
pub fn encode_document(
    doc: &Document,
    factory: &dyn FeatureFactory,
    classes: &Index<String>,
    features: &Index<String>,
    window: usize,
    background_id: usize,
) -> CrfResult<EncodedDocument> {
    let mut data = Vec::with_capacity(doc.len());
    let mut labels = Vec::with_capacity(doc.len());
    for (j, token) in doc.tokens.iter().enumerate() {
        let per_order: Vec<Vec<usize>> = factory
            .features(doc, j, window)
            .into_iter()
            .map(|names| {
                names
                    .into_iter()
                    .filter_map(|name| features.index_of(&name))
                    .collect()
            })
            .collect();
        data.push(per_order);
        labels.push(match token.gold.as_deref() {
            Some(gold) => classes.index_of(&gold.to_string()).ok_or_else(|| {
                CrfError::data(format!("unknown gold class `{gold}`"))
            })?,
            None => background_id,
        });
    }
    Ok(EncodedDocument { data, labels })
}

/// Ids das classes-ouro de um documento.
fn gold_ids(doc: &Document, classes: &Index<String>) -> CrfResult<Vec<usize>> {
    doc.tokens
        .iter()
        .map(|t| {
            let gold = t
                .gold
                .as_deref()
                .ok_or_else(|| CrfError::data("token without gold class"))?;
            classes
                .index_of(&gold.to_string())
                .ok_or_else(|| CrfError::data(format!("unknown gold class `{gold}`")))
        })
        .collect()
}

/// Tupla de comprimento `len` terminando na posição `j`, acolchoada à
/// esquerda com o rótulo de fundo.
pub fn tuple_ending_at(labels: &[usize], j: usize, len: usize, background: usize) -> LabelTuple {
    LabelTuple::new(
        (0..len)
            .map(|i| {
                let offset = len - 1 - i;
                if j >= offset {
                    labels[j - offset]
                } else {
                    background
                }
            })
            .collect(),
    )
}

/// Documento com a ordem dos tokens invertida (flag `use_reverse`): o CRF
/// processa a sequência da direita para a esquerda e o chamador desfaz a
/// inversão nas respostas.
pub fn reversed(doc: &Document) -> Document {
    Document::new(doc.tokens.iter().rev().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::DocToken;
    use crate::features::ShapeFeatureFactory;

    fn sample_docs() -> Vec<Document> {
        vec![
            Document::new(vec![
                DocToken::with_gold("João", "PER"),
                DocToken::with_gold("correu", "O"),
            ]),
            Document::new(vec![
                DocToken::with_gold("Ana", "PER"),
                DocToken::with_gold("parou", "O"),
            ]),
        ]
    }

    #[test]
    fn test_background_gets_id_zero() {
        let set =
            build_training_set(&sample_docs(), &ShapeFeatureFactory, 2, "O", false, false)
                .unwrap();
        assert_eq!(set.background, 0);
        assert_eq!(set.classes.index_of(&"O".to_string()), Some(0));
        assert_eq!(set.classes.len(), 2);
    }

    #[test]
    fn test_encoded_shape_matches_window() {
        let set =
            build_training_set(&sample_docs(), &ShapeFeatureFactory, 2, "O", false, false)
                .unwrap();
        for doc in &set.documents {
            for orders in &doc.data {
                assert_eq!(orders.len(), 2);
            }
        }
        assert_eq!(set.documents[0].labels, vec![1, 0]);
    }

    #[test]
    fn test_feature_orders_are_tracked() {
        let set =
            build_training_set(&sample_docs(), &ShapeFeatureFactory, 2, "O", false, false)
                .unwrap();
        let edge = set.features.index_of(&"edge1".to_string()).unwrap();
        assert_eq!(set.feature_orders[edge], 1);
        let bias = set.features.index_of(&"bias".to_string()).unwrap();
        assert_eq!(set.feature_orders[bias], 0);
    }

    #[test]
    fn test_observed_only_indices() {
        let set =
            build_training_set(&sample_docs(), &ShapeFeatureFactory, 2, "O", true, false)
                .unwrap();
        // Sequências vistas: (O, PER) na posição 0 (acolchoada) e (PER, O)
        // na posição 1 — nada de (PER, PER).
        assert_eq!(set.label_indices.order(1).len(), 2);
        assert!(set
            .label_indices
            .index_of(&LabelTuple::new(vec![1, 1]))
            .is_none());
    }

    #[test]
    fn test_unknown_features_dropped_at_prediction() {
        let set =
            build_training_set(&sample_docs(), &ShapeFeatureFactory, 2, "O", false, false)
                .unwrap();
        let unseen = Document::new(vec![DocToken::new("inédita")]);
        let encoded = encode_document(
            &unseen,
            &ShapeFeatureFactory,
            &set.classes,
            &set.features,
            2,
            set.background,
        )
        .unwrap();
        // "w=inédita" não existe no índice; sobram só as features genéricas
        assert!(encoded.data[0][0]
            .iter()
            .all(|&f| set.features.get(f).is_some()));
        assert_eq!(encoded.labels, vec![0]);
    }

    #[test]
    fn test_missing_gold_in_training_is_error() {
        let docs = vec![Document::new(vec![DocToken::new("sem_ouro")])];
        assert!(
            build_training_set(&docs, &ShapeFeatureFactory, 2, "O", false, false).is_err()
        );
    }

    #[test]
    fn test_tuple_ending_at_pads_with_background() {
        let labels = vec![1, 2];
        assert_eq!(
            tuple_ending_at(&labels, 0, 3, 0),
            LabelTuple::new(vec![0, 0, 1])
        );
        assert_eq!(
            tuple_ending_at(&labels, 1, 2, 0),
            LabelTuple::new(vec![1, 2])
        );
    }
}
