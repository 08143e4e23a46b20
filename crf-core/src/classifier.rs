//! # Fachada do Classificador CRF
//!
//! O [`CrfClassifier`] é o dono de tudo que sobrevive entre chamadas: índice
//! de classes, índice de features com as ordens, índices de tuplas de
//! rótulo, tabela raga de pesos e as flags. As operações:
//!
//! - [`CrfClassifier::train`] — varre o corpus com a fábrica de features,
//!   constrói os índices, otimiza o objetivo e, opcionalmente, poda features
//!   de baixa amplitude e re-treina;
//! - [`CrfClassifier::classify`] — codifica o documento, calibra a árvore de
//!   cliques, decodifica (Viterbi/beam, com refinamento opcional por Gibbs
//!   com prior) e escreve as respostas de volta nos tokens;
//! - [`CrfClassifier::marginals`] / [`CrfClassifier::first_order_marginals`]
//!   — probabilidades normalizadas por posição e por par adjacente;
//! - [`CrfClassifier::serialize`] / [`CrfClassifier::deserialize`] — os dois
//!   formatos de modelo do módulo [`crate::serialize`].
//!
//! Um modelo carregado é imutável e pode ser compartilhado entre threads
//! para leitura; [`CrfClassifier::classify_documents`] rotula um lote de
//! documentos em paralelo com estado por documento.

use std::collections::HashSet;
use std::io::{BufRead, Read, Write};

use rayon::prelude::*;
use tracing::info;

use crate::clique::{CliqueTree, Weights};
use crate::corpus::Document;
use crate::dataset::{self, build_training_set, encode_document};
use crate::error::{CrfError, CrfResult};
use crate::features::{factory_for, FeatureFactory, ShapeFeatureFactory};
use crate::flags::{Flags, InferenceKind, OptimizerKind};
use crate::gibbs::GibbsSampler;
use crate::index::Index;
use crate::objective::{CrfObjective, Minimizer};
use crate::prior::EntityPrior;
use crate::qn::QnMinimizer;
use crate::sequence::FactoredSequenceModel;
use crate::serialize::{self, ModelFile};
use crate::sgd::{ScaledSgdMinimizer, SgdToQnMinimizer};
use crate::tuple::{LabelIndices, LabelTuple};
use crate::viterbi::{beam_best_sequence, best_sequence};

/// Classificador CRF de cadeia linear: treino, inferência e persistência.
pub struct CrfClassifier {
    flags: Flags,
    factory: Box<dyn FeatureFactory>,
    classes: Index<String>,
    features: Index<String>,
    feature_orders: Vec<usize>,
    label_indices: LabelIndices,
    background: usize,
    weights: Vec<f64>,
    offsets: Vec<usize>,
}

impl CrfClassifier {
    /// Cria um classificador não treinado com a fábrica de features padrão.
    pub fn new(flags: Flags) -> CrfResult<Self> {
        Self::with_factory(flags, Box::new(ShapeFeatureFactory))
    }

    /// Cria um classificador não treinado com uma fábrica customizada.
    pub fn with_factory(flags: Flags, factory: Box<dyn FeatureFactory>) -> CrfResult<Self> {
        flags.validate()?;
        let window = flags.window;
        Ok(Self {
            flags,
            factory,
            classes: Index::new(),
            features: Index::new(),
            feature_orders: Vec::new(),
            label_indices: LabelIndices::observed_only(window, 0),
            background: 0,
            weights: Vec::new(),
            offsets: vec![0],
        })
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    /// Classes na ordem dos ids.
    pub fn classes(&self) -> Vec<&str> {
        self.classes.iter().map(String::as_str).collect()
    }

    /// Quantidade de features sobreviventes (após eventual poda).
    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// Dimensão do vetor de parâmetros.
    pub fn dimension(&self) -> usize {
        self.weights.len()
    }

    fn ensure_trained(&self) -> CrfResult<()> {
        if self.classes.is_empty() {
            return Err(CrfError::data(
                "classifier has no classes; train or deserialize a model first",
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Treinamento
    // -----------------------------------------------------------------

    /// Treina com documentos anotados, re-treinando após a poda de features
    /// quando `num_times_prune_features > 0`.
    pub fn train(&mut self, documents: &[Document]) -> CrfResult<()> {
        let documents: Vec<Document> = if self.flags.use_reverse {
            documents.iter().map(dataset::reversed).collect()
        } else {
            documents.to_vec()
        };

        let rounds = 1 + self.flags.num_times_prune_features;
        let mut allowed: Option<HashSet<String>> = None;
        for round in 0..rounds {
            let set = match &allowed {
                None => build_training_set(
                    &documents,
                    &*self.factory,
                    self.flags.window,
                    &self.flags.background_symbol,
                    self.flags.use_observed_sequences_only,
                    self.flags.remove_background_singleton_features,
                )?,
                Some(keep) => {
                    let filtered = FilteringFactory {
                        inner: &*self.factory,
                        allowed: keep,
                    };
                    build_training_set(
                        &documents,
                        &filtered,
                        self.flags.window,
                        &self.flags.background_symbol,
                        self.flags.use_observed_sequences_only,
                        self.flags.remove_background_singleton_features,
                    )?
                }
            };

            let offsets = compute_offsets(&set.feature_orders, &set.label_indices);
            let dimension = *offsets.last().unwrap();
            let x0 = match (&self.flags.initial_weights, round) {
                (Some(path), 0) => load_initial_weights(path, dimension)?,
                _ => vec![0.0; dimension],
            };
            info!(
                round,
                features = set.features.len(),
                dimension,
                documents = set.documents.len(),
                "starting training round"
            );

            let x = {
                let mut objective = CrfObjective::new(
                    &set.documents,
                    &set.label_indices,
                    &set.feature_orders,
                    set.background,
                    self.flags.build_regularizer(),
                )?;
                self.run_optimizer(&mut objective, x0)?
            };

            self.classes = set.classes;
            self.features = set.features;
            self.feature_orders = set.feature_orders;
            self.label_indices = set.label_indices;
            self.background = set.background;
            self.weights = x;
            self.offsets = offsets;

            if round + 1 < rounds {
                allowed = Some(self.surviving_features());
            }
        }

        if let Some(path) = &self.flags.save_feature_index_to_disk {
            let mut listing = String::new();
            for name in self.features.iter() {
                listing.push_str(name);
                listing.push('\n');
            }
            std::fs::write(path, listing)?;
            info!(path = %path.display(), "feature index written to disk");
        }
        Ok(())
    }

    /// Features cuja amplitude de pesos (máximo − mínimo da linha) supera o
    /// limiar de poda.
    fn surviving_features(&self) -> HashSet<String> {
        let weights = Weights::new(&self.weights, &self.offsets);
        let mut keep = HashSet::new();
        for (f, name) in self.features.iter().enumerate() {
            let row = weights.row(f);
            let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let min = row.iter().cloned().fold(f64::INFINITY, f64::min);
            if row.is_empty() || max - min > self.flags.feature_diff_thresh {
                keep.insert(name.clone());
            }
        }
        info!(
            kept = keep.len(),
            pruned = self.features.len() - keep.len(),
            threshold = self.flags.feature_diff_thresh,
            "feature pruning pass"
        );
        keep
    }

    fn run_optimizer(
        &self,
        objective: &mut CrfObjective<'_>,
        x0: Vec<f64>,
    ) -> CrfResult<Vec<f64>> {
        match self.flags.optimizer {
            OptimizerKind::QuasiNewton => {
                let mut qn = QnMinimizer::new(
                    self.flags.qn_size,
                    self.flags.max_iterations,
                    self.flags.tolerance,
                )
                .robust()
                .with_monitor(
                    10,
                    Box::new(|iteration, value, _| {
                        info!(iteration, value, "quasi-Newton progress");
                    }),
                );
                qn.minimize(objective, x0)
            }
            OptimizerKind::Sgd => ScaledSgdMinimizer::new(
                self.flags.initial_gain,
                self.flags.sgd_passes,
                self.flags.stochastic_batch_size,
                1,
            )
            .with_seed(self.flags.seed)
            .minimize(objective, x0),
            OptimizerKind::ScaledSgd => ScaledSgdMinimizer::new(
                self.flags.initial_gain,
                self.flags.sgd_passes,
                self.flags.stochastic_batch_size,
                self.flags.qn_size,
            )
            .with_seed(self.flags.seed)
            .minimize(objective, x0),
            OptimizerKind::SgdToQuasiNewton => SgdToQnMinimizer::new(
                self.flags.initial_gain,
                self.flags.stochastic_batch_size,
                self.flags.sgd_passes,
                self.flags.qn_passes,
                self.flags.qn_size,
                self.flags.tolerance,
            )
            .with_seed(self.flags.seed)
            .minimize(objective, x0),
            // Barrado em Flags::validate; nunca chega ao treino.
            OptimizerKind::Smd => Err(CrfError::config("the SMD optimizer is not supported")),
        }
    }

    // -----------------------------------------------------------------
    // Inferência
    // -----------------------------------------------------------------

    /// Documento de trabalho para a inferência: classes-ouro limpas (a
    /// predição as ignora) e ordem invertida quando `use_reverse`.
    fn working_copy(&self, document: &Document) -> Document {
        let mut work = if self.flags.use_reverse {
            dataset::reversed(document)
        } else {
            document.clone()
        };
        for token in work.tokens.iter_mut() {
            token.gold = None;
        }
        work
    }

    fn calibrated_tree(&self, work: &Document) -> CrfResult<CliqueTree> {
        let encoded = encode_document(
            work,
            &*self.factory,
            &self.classes,
            &self.features,
            self.flags.window,
            self.background,
        )?;
        CliqueTree::calibrated(
            &encoded.data,
            Weights::new(&self.weights, &self.offsets),
            &self.label_indices,
            self.background,
        )
    }

    /// Rotula um documento, escrevendo a resposta em cada token e
    /// devolvendo as classes na ordem dos tokens. Documento vazio devolve
    /// sequência vazia.
    pub fn classify(&self, document: &mut Document) -> CrfResult<Vec<String>> {
        if document.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_trained()?;
        let work = self.working_copy(document);
        let tree = self.calibrated_tree(&work)?;

        let mut labels = match self.flags.inference {
            InferenceKind::Viterbi => best_sequence(&tree.decoding_model()),
            InferenceKind::Beam => {
                beam_best_sequence(&tree.decoding_model(), self.flags.beam_size)
            }
        };

        if self.flags.do_gibbs {
            let mut sampler = GibbsSampler::new(self.flags.seed);
            let schedule = self.flags.annealing_schedule();
            let init = self.flags.init_viterbi.then(|| labels.clone());
            labels = match self.flags.prior {
                Some(kind) => {
                    let prior = EntityPrior::new(
                        kind,
                        self.classes.len(),
                        self.background,
                        tree.length(),
                        self.flags.window,
                    );
                    let factored = FactoredSequenceModel::new(&tree, &prior);
                    sampler.find_best_using_annealing(
                        &factored,
                        schedule,
                        self.flags.num_samples,
                        init.as_deref(),
                    )
                }
                None => sampler.find_best_using_annealing(
                    &tree,
                    schedule,
                    self.flags.num_samples,
                    init.as_deref(),
                ),
            };
        }

        if self.flags.use_reverse {
            labels.reverse();
        }
        let answers: Vec<String> = labels
            .iter()
            .map(|&y| {
                self.classes.get(y).cloned().ok_or_else(|| {
                    CrfError::numeric(format!("decoder produced class id {y} out of range"))
                })
            })
            .collect::<CrfResult<_>>()?;
        for (token, answer) in document.tokens.iter_mut().zip(&answers) {
            token.answer = Some(answer.clone());
        }
        Ok(answers)
    }

    /// Rotula um lote de documentos em paralelo (o modelo é somente leitura;
    /// todo estado por documento é local à chamada).
    pub fn classify_documents(&self, documents: &mut [Document]) -> CrfResult<()> {
        documents
            .par_iter_mut()
            .try_for_each(|doc| self.classify(doc).map(|_| ()))
    }

    /// Marginais normalizadas `p(classe | documento)` por posição.
    pub fn marginals(&self, document: &Document) -> CrfResult<Vec<Vec<f64>>> {
        if document.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_trained()?;
        let work = self.working_copy(document);
        let tree = self.calibrated_tree(&work)?;
        let mut rows: Vec<Vec<f64>> = (0..tree.length()).map(|j| tree.marginals(j)).collect();
        if self.flags.use_reverse {
            rows.reverse();
        }
        Ok(rows)
    }

    /// Marginais de pares adjacentes: `result[j][a][b] = p(y_j = a,
    /// y_{j+1} = b | documento)`, com `j ∈ [0, N-2]`.
    pub fn first_order_marginals(&self, document: &Document) -> CrfResult<Vec<Vec<Vec<f64>>>> {
        if document.len() < 2 {
            return Ok(Vec::new());
        }
        self.ensure_trained()?;
        let work = self.working_copy(document);
        let tree = self.calibrated_tree(&work)?;
        let c = self.classes.len();
        let mut pairs: Vec<Vec<Vec<f64>>> = (1..tree.length())
            .map(|j| {
                (0..c)
                    .map(|a| (0..c).map(|b| tree.pair_prob(j, a, b)).collect())
                    .collect()
            })
            .collect();
        if self.flags.use_reverse {
            // No documento invertido o par (j, j+1) é o par original
            // (n-2-j, n-1-j) transposto.
            pairs.reverse();
            for matrix in pairs.iter_mut() {
                let transposed: Vec<Vec<f64>> = (0..c)
                    .map(|a| (0..c).map(|b| matrix[b][a]).collect())
                    .collect();
                *matrix = transposed;
            }
        }
        Ok(pairs)
    }

    // -----------------------------------------------------------------
    // Persistência
    // -----------------------------------------------------------------

    fn to_model_file(&self) -> ModelFile {
        let weights_view = Weights::new(&self.weights, &self.offsets);
        ModelFile {
            flags: self.flags.clone(),
            classes: self.classes.iter().cloned().collect(),
            features: self
                .features
                .iter()
                .cloned()
                .zip(self.feature_orders.iter().copied())
                .collect(),
            label_tuples: (0..self.flags.window)
                .map(|o| {
                    self.label_indices
                        .order(o)
                        .iter()
                        .map(|(_, t)| t.labels().to_vec())
                        .collect()
                })
                .collect(),
            factory_id: self.factory.identifier().to_string(),
            window: self.flags.window,
            weights: (0..self.features.len())
                .map(|f| weights_view.row(f).to_vec())
                .collect(),
        }
    }

    fn from_model_file(model: ModelFile) -> CrfResult<Self> {
        model.validate()?;
        model.flags.validate()?;
        if model.window != model.flags.window {
            return Err(CrfError::format(format!(
                "window record ({}) disagrees with flags ({})",
                model.window, model.flags.window
            )));
        }
        let factory = factory_for(&model.factory_id)?;

        let classes: Index<String> = model.classes.iter().cloned().collect();
        if classes.len() != model.classes.len() {
            return Err(CrfError::format("duplicate class in class index"));
        }
        let background = classes
            .index_of(&model.flags.background_symbol)
            .ok_or_else(|| {
                CrfError::format("background symbol missing from the class index")
            })?;

        let mut label_indices = LabelIndices::observed_only(model.window, classes.len());
        for tuples in &model.label_tuples {
            for tuple in tuples {
                if tuple.iter().any(|&l| l >= classes.len()) {
                    return Err(CrfError::format("tuple label out of class range"));
                }
                label_indices.insert_tuple(LabelTuple::new(tuple.clone()));
            }
        }

        let mut features: Index<String> = Index::new();
        let mut feature_orders = Vec::with_capacity(model.features.len());
        for (name, order) in &model.features {
            if features.index_of_or_add(name.clone()) != feature_orders.len() {
                return Err(CrfError::format("duplicate feature in feature index"));
            }
            feature_orders.push(*order);
        }

        let mut weights = Vec::new();
        let mut offsets = vec![0];
        for row in &model.weights {
            weights.extend_from_slice(row);
            offsets.push(weights.len());
        }

        Ok(Self {
            flags: model.flags,
            factory,
            classes,
            features,
            feature_orders,
            label_indices,
            background,
            weights,
            offsets,
        })
    }

    /// Grava o modelo no formato binário versionado.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> CrfResult<()> {
        serialize::write_binary(writer, &self.to_model_file())
    }

    /// Carrega um modelo binário.
    pub fn deserialize<R: Read>(reader: &mut R) -> CrfResult<Self> {
        Self::from_model_file(serialize::read_binary(reader)?)
    }

    /// Grava o despejo de texto legível.
    pub fn serialize_text<W: Write>(&self, writer: &mut W) -> CrfResult<()> {
        serialize::write_text(writer, &self.to_model_file())
    }

    /// Carrega um modelo a partir do despejo de texto.
    pub fn deserialize_text<R: BufRead>(reader: &mut R) -> CrfResult<Self> {
        Self::from_model_file(serialize::read_text(reader)?)
    }
}

/// Offsets da tabela raga: a linha da feature `f` tem um peso por tupla da
/// ordem que ela parametriza.
fn compute_offsets(feature_orders: &[usize], indices: &LabelIndices) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(feature_orders.len() + 1);
    offsets.push(0);
    for &o in feature_orders {
        offsets.push(offsets.last().unwrap() + indices.order(o).len());
    }
    offsets
}

/// Vetor inicial de pesos lido de arquivo texto (floats separados por
/// espaço em branco).
fn load_initial_weights(path: &std::path::Path, dimension: usize) -> CrfResult<Vec<f64>> {
    let contents = std::fs::read_to_string(path)?;
    let weights: Vec<f64> = contents
        .split_whitespace()
        .map(|v| {
            v.parse()
                .map_err(|_| CrfError::format(format!("bad initial weight `{v}`")))
        })
        .collect::<CrfResult<_>>()?;
    if weights.len() != dimension {
        return Err(CrfError::format(format!(
            "initial weights have dimension {}, expected {dimension}",
            weights.len()
        )));
    }
    Ok(weights)
}

/// Fábrica que repassa a interna filtrando as features fora do conjunto
/// sobrevivente — o mecanismo do re-treino pós-poda.
struct FilteringFactory<'a> {
    inner: &'a dyn FeatureFactory,
    allowed: &'a HashSet<String>,
}

impl FeatureFactory for FilteringFactory<'_> {
    fn identifier(&self) -> &'static str {
        self.inner.identifier()
    }

    fn features(&self, doc: &Document, position: usize, window: usize) -> Vec<Vec<String>> {
        self.inner
            .features(doc, position, window)
            .into_iter()
            .map(|names| {
                names
                    .into_iter()
                    .filter(|n| self.allowed.contains(n))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::DocToken;
    use std::io::Cursor;

    fn training_docs() -> Vec<Document> {
        vec![
            Document::new(vec![
                DocToken::with_gold("John", "P"),
                DocToken::with_gold("runs", "O"),
            ]),
            Document::new(vec![
                DocToken::with_gold("Mary", "P"),
                DocToken::with_gold("sleeps", "O"),
            ]),
            Document::new(vec![
                DocToken::with_gold("slowly", "O"),
                DocToken::with_gold("Peter", "P"),
                DocToken::with_gold("walks", "O"),
            ]),
        ]
    }

    #[test]
    fn test_two_class_end_to_end() {
        let mut classifier = CrfClassifier::new(Flags::default()).unwrap();
        classifier.train(&training_docs()).unwrap();

        let mut doc = Document::new(vec![DocToken::new("John"), DocToken::new("runs")]);
        let answers = classifier.classify(&mut doc).unwrap();
        assert_eq!(answers, vec!["P", "O"]);
        assert_eq!(doc.tokens[0].answer.as_deref(), Some("P"));

        let marginals = classifier.marginals(&doc).unwrap();
        let p = classifier.classes().iter().position(|c| *c == "P").unwrap();
        let o = classifier.classes().iter().position(|c| *c == "O").unwrap();
        assert!(marginals[0][p] > 0.5);
        assert!(marginals[1][o] > 0.5);
    }

    #[test]
    fn test_empty_document_is_a_no_op() {
        let mut classifier = CrfClassifier::new(Flags::default()).unwrap();
        classifier.train(&training_docs()).unwrap();
        let mut doc = Document::default();
        assert!(classifier.classify(&mut doc).unwrap().is_empty());
        assert!(classifier.marginals(&doc).unwrap().is_empty());
        assert!(classifier.first_order_marginals(&doc).unwrap().is_empty());
    }

    #[test]
    fn test_marginal_rows_sum_to_one() {
        let mut classifier = CrfClassifier::new(Flags::default()).unwrap();
        classifier.train(&training_docs()).unwrap();
        let doc = Document::new(vec![
            DocToken::new("Mary"),
            DocToken::new("walks"),
            DocToken::new("slowly"),
        ]);
        for row in classifier.marginals(&doc).unwrap() {
            let total: f64 = row.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
        for matrix in classifier.first_order_marginals(&doc).unwrap() {
            let total: f64 = matrix.iter().flatten().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_pruning_to_the_empty_feature_set() {
        let flags = Flags {
            feature_diff_thresh: f64::MAX,
            num_times_prune_features: 1,
            max_iterations: 30,
            ..Flags::default()
        };
        let mut classifier = CrfClassifier::new(flags).unwrap();
        classifier.train(&training_docs()).unwrap();
        assert_eq!(classifier.num_features(), 0);
        assert_eq!(classifier.dimension(), 0);

        // Sem features o modelo ainda decodifica (tudo fundo).
        let mut doc = Document::new(vec![DocToken::new("John")]);
        let answers = classifier.classify(&mut doc).unwrap();
        assert_eq!(answers, vec!["O"]);
    }

    #[test]
    fn test_binary_serialization_round_trip() {
        let mut classifier = CrfClassifier::new(Flags::default()).unwrap();
        classifier.train(&training_docs()).unwrap();

        let mut buf = Vec::new();
        classifier.serialize(&mut buf).unwrap();
        let restored = CrfClassifier::deserialize(&mut Cursor::new(&buf)).unwrap();

        let mut a = Document::new(vec![DocToken::new("Mary"), DocToken::new("runs")]);
        let mut b = a.clone();
        assert_eq!(
            classifier.classify(&mut a).unwrap(),
            restored.classify(&mut b).unwrap()
        );
        assert_eq!(classifier.dimension(), restored.dimension());
    }

    #[test]
    fn test_text_dump_round_trip_is_byte_equal() {
        let mut classifier = CrfClassifier::new(Flags::default()).unwrap();
        classifier.train(&training_docs()).unwrap();

        let mut first = Vec::new();
        classifier.serialize_text(&mut first).unwrap();
        let restored =
            CrfClassifier::deserialize_text(&mut Cursor::new(&first)).unwrap();
        let mut second = Vec::new();
        restored.serialize_text(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_use_reverse_round_trips_labels() {
        let flags = Flags {
            use_reverse: true,
            max_iterations: 80,
            ..Flags::default()
        };
        let mut classifier = CrfClassifier::new(flags).unwrap();
        classifier.train(&training_docs()).unwrap();
        let mut doc = Document::new(vec![DocToken::new("John"), DocToken::new("runs")]);
        let answers = classifier.classify(&mut doc).unwrap();
        // As respostas saem na ordem original do documento
        assert_eq!(answers.len(), 2);
        assert_eq!(answers, vec!["P", "O"]);
    }

    #[test]
    fn test_classify_documents_in_parallel_matches_serial() {
        let mut classifier = CrfClassifier::new(Flags::default()).unwrap();
        classifier.train(&training_docs()).unwrap();

        let mut batch = vec![
            Document::new(vec![DocToken::new("John"), DocToken::new("runs")]),
            Document::new(vec![DocToken::new("slowly")]),
            Document::default(),
        ];
        let mut serial = batch.clone();
        classifier.classify_documents(&mut batch).unwrap();
        for doc in serial.iter_mut() {
            let _ = classifier.classify(doc).unwrap();
        }
        assert_eq!(batch, serial);
    }

    #[test]
    fn test_initial_weights_and_feature_index_files() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("features.txt");

        // Primeiro treino para descobrir a dimensão e gravar o índice.
        let flags = Flags {
            max_iterations: 20,
            save_feature_index_to_disk: Some(index_path.clone()),
            ..Flags::default()
        };
        let mut classifier = CrfClassifier::new(flags).unwrap();
        classifier.train(&training_docs()).unwrap();
        let listing = std::fs::read_to_string(&index_path).unwrap();
        assert_eq!(listing.lines().count(), classifier.num_features());

        // Segundo treino aquecido com os pesos do primeiro.
        let weights_path = dir.path().join("weights.txt");
        let dump: Vec<String> = (0..classifier.dimension())
            .map(|i| format!("{:?}", classifier.weights[i]))
            .collect();
        std::fs::write(&weights_path, dump.join("\n")).unwrap();

        let flags = Flags {
            max_iterations: 5,
            initial_weights: Some(weights_path),
            ..Flags::default()
        };
        let mut warm = CrfClassifier::new(flags).unwrap();
        warm.train(&training_docs()).unwrap();
        let mut doc = Document::new(vec![DocToken::new("John"), DocToken::new("runs")]);
        assert_eq!(warm.classify(&mut doc).unwrap(), vec!["P", "O"]);
    }

    #[test]
    fn test_untrained_classifier_refuses_to_classify() {
        let classifier = CrfClassifier::new(Flags::default()).unwrap();
        let mut doc = Document::new(vec![DocToken::new("x")]);
        assert!(classifier.classify(&mut doc).is_err());
    }

    #[test]
    fn test_gibbs_decoding_with_prior_agrees_on_easy_input() {
        use crate::flags::AnnealingKind;
        use crate::prior::PriorKind;
        let flags = Flags {
            do_gibbs: true,
            num_samples: 50,
            annealing: AnnealingKind::Linear,
            init_viterbi: true,
            prior: Some(PriorKind::Ner),
            max_iterations: 120,
            ..Flags::default()
        };
        let mut classifier = CrfClassifier::new(flags).unwrap();
        classifier.train(&training_docs()).unwrap();
        let mut doc = Document::new(vec![DocToken::new("John"), DocToken::new("runs")]);
        let answers = classifier.classify(&mut doc).unwrap();
        assert_eq!(answers, vec!["P", "O"]);
    }
}
