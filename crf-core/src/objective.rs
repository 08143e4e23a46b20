//! # Objetivo de Treinamento — Log-Verossimilhança Condicional Regularizada
//!
//! O treino minimiza o negativo da log-verossimilhança condicional dos
//! rótulos-ouro, mais um termo de regularização:
//!
//! ```text
//! f(θ) = − Σ_docs log p_θ(ouro | documento) + R(θ)
//! ∂f/∂θ_{f,k} = E[f,k] − Ê[f,k] + ∂R/∂θ_{f,k}
//! ```
//!
//! onde `Ê` são as contagens empíricas feature×tupla no corpus-ouro
//! (acolchoado à esquerda com o fundo) e `E` são as contagens esperadas sob
//! a distribuição do modelo, lidas das árvores de cliques calibradas.
//!
//! No modo estocástico o valor e o gradiente são calculados sobre um
//! mini-lote; as contagens empíricas e o regularizador são escalados por
//! `|B|/|D|`, de modo que a soma dos gradientes de lotes que particionam o
//! corpus reproduz o gradiente completo.
//!
//! O objetivo guarda um cache de (valor, gradiente) chaveado pelo último
//! vetor de pesos — os otimizadores consultam valor e gradiente
//! separadamente sem pagar duas passadas.

use crate::clique::{CliqueTree, Weights};
use crate::dataset::{tuple_ending_at, EncodedDocument};
use crate::error::{CrfError, CrfResult};
use crate::tuple::LabelIndices;

/// Par (valor, gradiente) devolvido por uma avaliação.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub value: f64,
    pub gradient: Vec<f64>,
}

/// Função diferenciável de `x ∈ R^D`, consumida pelos otimizadores.
pub trait DifferentiableFunction {
    fn dimension(&self) -> usize;
    fn evaluate(&mut self, x: &[f64]) -> CrfResult<Evaluation>;
}

/// Extensão estocástica: avaliação sobre um mini-lote de documentos.
pub trait StochasticDifferentiableFunction: DifferentiableFunction {
    /// Quantidade de documentos do conjunto completo.
    fn num_examples(&self) -> usize;

    /// Avalia valor e gradiente sobre o subconjunto `batch` (índices de
    /// documento), com o escalonamento de mini-lote.
    fn evaluate_batch(&mut self, x: &[f64], batch: &[usize]) -> CrfResult<Evaluation>;
}

/// Minimizador em lote: recebe a função e um ponto inicial, devolve o
/// melhor vetor de pesos encontrado.
pub trait Minimizer {
    fn minimize(
        &mut self,
        function: &mut dyn DifferentiableFunction,
        x0: Vec<f64>,
    ) -> CrfResult<Vec<f64>>;
}

/// Penalidade de regularização sobre os pesos.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Regularizer {
    None,
    /// `Σ x² / 2σ²` — gaussiana, o padrão.
    Quadratic { sigma: f64 },
    /// Quadrática perto de zero, linear longe: robusta a pesos grandes.
    Huber { sigma: f64, epsilon: f64 },
    /// `Σ x⁴ / 2σ⁴`.
    Quartic { sigma: f64 },
}

impl Regularizer {
    /// Acumula a penalidade (escalada por `scale`) em `value` e `gradient`.
    pub fn apply(&self, x: &[f64], scale: f64, value: &mut f64, gradient: &mut [f64]) {
        match *self {
            Regularizer::None => {}
            Regularizer::Quadratic { sigma } => {
                let sigma_sq = sigma * sigma;
                for (xi, g) in x.iter().zip(gradient.iter_mut()) {
                    *value += scale * xi * xi / (2.0 * sigma_sq);
                    *g += scale * xi / sigma_sq;
                }
            }
            Regularizer::Huber { sigma, epsilon } => {
                let sigma_sq = sigma * sigma;
                for (xi, g) in x.iter().zip(gradient.iter_mut()) {
                    if xi.abs() < epsilon {
                        *value += scale * xi * xi / (2.0 * epsilon * sigma_sq);
                        *g += scale * xi / (epsilon * sigma_sq);
                    } else {
                        *value += scale * (xi.abs() - epsilon / 2.0) / sigma_sq;
                        *g += scale * xi.signum() / sigma_sq;
                    }
                }
            }
            Regularizer::Quartic { sigma } => {
                let sigma_qu = sigma * sigma * sigma * sigma;
                for (xi, g) in x.iter().zip(gradient.iter_mut()) {
                    *value += scale * xi * xi * xi * xi / (2.0 * sigma_qu);
                    *g += scale * xi / sigma_qu;
                }
            }
        }
    }
}

/// O objetivo CRF sobre um conjunto de documentos codificados.
pub struct CrfObjective<'a> {
    documents: &'a [EncodedDocument],
    indices: &'a LabelIndices,
    offsets: Vec<usize>,
    background: usize,
    regularizer: Regularizer,
    empirical: Vec<f64>,
    cache: Option<(Vec<f64>, Evaluation)>,
}

impl<'a> CrfObjective<'a> {
    /// Pré-computa as contagens empíricas `Ê[f][k]` varrendo cada posição
    /// com o contexto-ouro acolchoado à esquerda pelo fundo.
    pub fn new(
        documents: &'a [EncodedDocument],
        indices: &'a LabelIndices,
        feature_orders: &[usize],
        background: usize,
        regularizer: Regularizer,
    ) -> CrfResult<Self> {
        let mut offsets = Vec::with_capacity(feature_orders.len() + 1);
        offsets.push(0);
        for &o in feature_orders {
            offsets.push(offsets.last().unwrap() + indices.order(o).len());
        }
        let dimension = *offsets.last().unwrap();

        let mut empirical = vec![0.0; dimension];
        for doc in documents {
            for j in 0..doc.len() {
                for (o, feats) in doc.data[j].iter().enumerate() {
                    if feats.is_empty() {
                        continue;
                    }
                    let tuple = tuple_ending_at(&doc.labels, j, o + 1, background);
                    let k = indices.order(o).index_of(&tuple).ok_or_else(|| {
                        CrfError::data(format!(
                            "gold label tuple of order {o} not present in the tuple index"
                        ))
                    })?;
                    for &f in feats {
                        empirical[offsets[f] + k] += 1.0;
                    }
                }
            }
        }

        Ok(Self {
            documents,
            indices,
            offsets,
            background,
            regularizer,
            empirical,
            cache: None,
        })
    }

    /// Contagens empíricas achatadas (uma entrada por peso).
    pub fn empirical_counts(&self) -> &[f64] {
        &self.empirical
    }

    /// Log-verossimilhança e contagens esperadas de um subconjunto de
    /// documentos, acumuladas em `expected`.
    fn accumulate(
        &self,
        x: &[f64],
        doc_ids: impl Iterator<Item = usize>,
        expected: &mut [f64],
    ) -> CrfResult<f64> {
        let window = self.indices.window();
        let mut log_likelihood = 0.0;
        for id in doc_ids {
            let doc = &self.documents[id];
            if doc.is_empty() {
                continue;
            }
            let tree = CliqueTree::calibrated(
                &doc.data,
                Weights::new(x, &self.offsets),
                self.indices,
                self.background,
            )?;
            log_likelihood += tree.sequence_log_prob(&doc.labels);

            for j in 0..doc.len() {
                // Tabelas marginais de largura decrescente: a de largura
                // o+1 serve às contagens da ordem o.
                let mut marginal = tree.table(j).clone();
                for o in (0..window).rev() {
                    while marginal.window() > o + 1 {
                        marginal = marginal.sum_out_front();
                    }
                    let feats = &doc.data[j][o];
                    if feats.is_empty() {
                        continue;
                    }
                    for (k, tuple) in self.indices.order(o).iter() {
                        let log_p = marginal.value_at(tuple.packed(self.indices.num_classes()))
                            - tree.log_z();
                        let p = log_p.exp();
                        if p == 0.0 {
                            continue;
                        }
                        for &f in feats.iter() {
                            expected[self.offsets[f] + k] += p;
                        }
                    }
                }
            }
        }
        if log_likelihood.is_nan() || log_likelihood == f64::INFINITY {
            return Err(CrfError::numeric("log-likelihood is NaN or +inf"));
        }
        Ok(log_likelihood)
    }
}

impl DifferentiableFunction for CrfObjective<'_> {
    fn dimension(&self) -> usize {
        *self.offsets.last().unwrap()
    }

    fn evaluate(&mut self, x: &[f64]) -> CrfResult<Evaluation> {
        if let Some((cached_x, cached)) = &self.cache {
            if cached_x.as_slice() == x {
                return Ok(cached.clone());
            }
        }

        let mut gradient = vec![0.0; self.dimension()];
        let log_likelihood =
            self.accumulate(x, 0..self.documents.len(), &mut gradient)?;
        let mut value = -log_likelihood;
        for (g, e) in gradient.iter_mut().zip(self.empirical.iter()) {
            *g -= e;
        }
        self.regularizer.apply(x, 1.0, &mut value, &mut gradient);

        let evaluation = Evaluation { value, gradient };
        self.cache = Some((x.to_vec(), evaluation.clone()));
        Ok(evaluation)
    }
}

impl StochasticDifferentiableFunction for CrfObjective<'_> {
    fn num_examples(&self) -> usize {
        self.documents.len()
    }

    fn evaluate_batch(&mut self, x: &[f64], batch: &[usize]) -> CrfResult<Evaluation> {
        let scale = batch.len() as f64 / self.documents.len() as f64;
        let mut gradient = vec![0.0; self.dimension()];
        let log_likelihood = self.accumulate(x, batch.iter().copied(), &mut gradient)?;
        let mut value = -log_likelihood;
        for (g, e) in gradient.iter_mut().zip(self.empirical.iter()) {
            *g -= scale * e;
        }
        self.regularizer.apply(x, scale, &mut value, &mut gradient);
        Ok(Evaluation { value, gradient })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    /// Dois documentos de duas classes, janela 2, features de ordens 0 e 1.
    fn sample_problem() -> (Vec<EncodedDocument>, LabelIndices, Vec<usize>) {
        let indices = LabelIndices::dense(2, 2);
        // f0, f1: ordem 0; f2: ordem 1
        let feature_orders = vec![0, 0, 1];
        let documents = vec![
            EncodedDocument {
                data: vec![
                    vec![vec![0], vec![2]],
                    vec![vec![1], vec![2]],
                ],
                labels: vec![1, 0],
            },
            EncodedDocument {
                data: vec![
                    vec![vec![1], vec![2]],
                    vec![vec![0], vec![2]],
                    vec![vec![1], vec![2]],
                ],
                labels: vec![0, 1, 0],
            },
        ];
        (documents, indices, feature_orders)
    }

    #[test]
    fn test_dimension_counts_ragged_rows() {
        let (docs, indices, orders) = sample_problem();
        let obj = CrfObjective::new(&docs, &indices, &orders, 0, Regularizer::None).unwrap();
        // 2 features de ordem 0 (2 pesos cada) + 1 de ordem 1 (4 pesos)
        assert_eq!(obj.dimension(), 2 * 2 + 4);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let (docs, indices, orders) = sample_problem();
        let mut obj = CrfObjective::new(
            &docs,
            &indices,
            &orders,
            0,
            Regularizer::Quadratic { sigma: 1.0 },
        )
        .unwrap();
        let dim = obj.dimension();

        let mut rng = SmallRng::seed_from_u64(11);
        let x: Vec<f64> = (0..dim).map(|_| rng.random::<f64>() - 0.5).collect();
        let mut d: Vec<f64> = (0..dim).map(|_| rng.random::<f64>() - 0.5).collect();
        let norm = d.iter().map(|v| v * v).sum::<f64>().sqrt();
        for v in d.iter_mut() {
            *v /= norm;
        }

        let grad = obj.evaluate(&x).unwrap().gradient;
        let directional: f64 = grad.iter().zip(&d).map(|(g, di)| g * di).sum();

        let eps = 1e-5;
        let plus: Vec<f64> = x.iter().zip(&d).map(|(xi, di)| xi + eps * di).collect();
        let minus: Vec<f64> = x.iter().zip(&d).map(|(xi, di)| xi - eps * di).collect();
        let numeric =
            (obj.evaluate(&plus).unwrap().value - obj.evaluate(&minus).unwrap().value)
                / (2.0 * eps);

        assert!(
            (directional - numeric).abs() < 1e-4,
            "analytic {directional} vs numeric {numeric}"
        );
    }

    #[test]
    fn test_huber_gradient_matches_finite_differences() {
        let (docs, indices, orders) = sample_problem();
        let mut obj = CrfObjective::new(
            &docs,
            &indices,
            &orders,
            0,
            Regularizer::Huber {
                sigma: 0.7,
                epsilon: 0.2,
            },
        )
        .unwrap();
        let dim = obj.dimension();
        let mut rng = SmallRng::seed_from_u64(5);
        let x: Vec<f64> = (0..dim).map(|_| rng.random::<f64>() * 2.0 - 1.0).collect();

        let grad = obj.evaluate(&x).unwrap().gradient;
        let eps = 1e-6;
        for i in 0..dim {
            let mut plus = x.clone();
            plus[i] += eps;
            let mut minus = x.clone();
            minus[i] -= eps;
            let numeric = (obj.evaluate(&plus).unwrap().value
                - obj.evaluate(&minus).unwrap().value)
                / (2.0 * eps);
            assert!((grad[i] - numeric).abs() < 1e-4);
        }
    }

    #[test]
    fn test_empirical_equals_expected_under_pinned_weights() {
        // Pesos com massa enorme nas tuplas-ouro: a distribuição do modelo
        // colapsa no ouro e as contagens esperadas igualam as empíricas.
        let indices = LabelIndices::dense(2, 2);
        let feature_orders = vec![1, 1];
        let documents = vec![EncodedDocument {
            data: vec![vec![vec![], vec![0]], vec![vec![], vec![1]]],
            labels: vec![1, 0],
        }];
        let mut obj =
            CrfObjective::new(&documents, &indices, &feature_orders, 0, Regularizer::None)
                .unwrap();

        // Tupla-ouro da posição 0: (fundo, 1) = packed 1; da posição 1:
        // (1, 0) = packed 2.
        let mut x = vec![0.0; obj.dimension()];
        x[1] = 100.0;
        x[4 + 2] = 100.0;

        let eval = obj.evaluate(&x).unwrap();
        // gradiente = esperado − empírico ≈ 0
        for g in &eval.gradient {
            assert!(g.abs() < 1e-9, "residual gradient {g}");
        }
        assert!(eval.value.abs() < 1e-9);
    }

    #[test]
    fn test_minibatch_gradients_sum_to_full_gradient() {
        let (docs, indices, orders) = sample_problem();
        let mut obj = CrfObjective::new(
            &docs,
            &indices,
            &orders,
            0,
            Regularizer::Quadratic { sigma: 2.0 },
        )
        .unwrap();
        let dim = obj.dimension();
        let x: Vec<f64> = (0..dim).map(|i| (i as f64) * 0.1 - 0.3).collect();

        let full = obj.evaluate(&x).unwrap();
        let b1 = obj.evaluate_batch(&x, &[0]).unwrap();
        let b2 = obj.evaluate_batch(&x, &[1]).unwrap();
        for i in 0..dim {
            let sum = b1.gradient[i] + b2.gradient[i];
            assert!((sum - full.gradient[i]).abs() < 1e-9);
        }
        assert!((b1.value + b2.value - full.value).abs() < 1e-9);
    }

    #[test]
    fn test_nan_weights_are_fatal() {
        let (docs, indices, orders) = sample_problem();
        let mut obj =
            CrfObjective::new(&docs, &indices, &orders, 0, Regularizer::None).unwrap();
        let x = vec![f64::NAN; obj.dimension()];
        assert!(obj.evaluate(&x).is_err());
    }

    #[test]
    fn test_cache_returns_identical_evaluation() {
        let (docs, indices, orders) = sample_problem();
        let mut obj = CrfObjective::new(
            &docs,
            &indices,
            &orders,
            0,
            Regularizer::Quadratic { sigma: 1.0 },
        )
        .unwrap();
        let x = vec![0.25; obj.dimension()];
        let first = obj.evaluate(&x).unwrap();
        let second = obj.evaluate(&x).unwrap();
        assert_eq!(first.value, second.value);
        assert_eq!(first.gradient, second.gradient);
    }
}
