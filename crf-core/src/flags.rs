//! # Flags de Configuração
//!
//! O saco de configuração do classificador: janela, símbolo de fundo,
//! esquema de inferência, otimizador, regularização e os botões do Gibbs.
//! As flags viajam serializadas dentro do arquivo de modelo, então um modelo
//! carregado decodifica exatamente como foi treinado.
//!
//! Seleções contraditórias (Huber sem epsilon positivo, beam de largura
//! zero, taxa de annealing fora de `(0, 1)`) são rejeitadas por
//! [`Flags::validate`] antes de qualquer treino.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CrfError, CrfResult};
use crate::gibbs::AnnealingSchedule;
use crate::objective::Regularizer;
use crate::prior::PriorKind;

/// Decodificador usado na predição.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceKind {
    Viterbi,
    Beam,
}

/// Cronograma de resfriamento do Gibbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnealingKind {
    Linear,
    Exponential,
}

/// Otimizador do treino. As flags booleanas da linha de comando
/// (`--use-qn`, `--use-sgd`, ...) mapeiam deterministicamente para uma
/// variante.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    QuasiNewton,
    Sgd,
    SgdToQuasiNewton,
    ScaledSgd,
    /// Meta-descida estocástica; reconhecida mas não suportada por este
    /// motor — selecioná-la é erro de configuração.
    Smd,
}

/// Família de regularização do objetivo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegularizerKind {
    None,
    Quadratic,
    Huber,
    Quartic,
}

/// Configuração completa do classificador.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Flags {
    /// Tamanho máximo de clique `W`.
    pub window: usize,
    /// Rótulo de "fora de entidade", usado como acolchoamento à esquerda.
    pub background_symbol: String,
    /// Processa as sequências da direita para a esquerda.
    pub use_reverse: bool,
    /// Restringe os índices de tuplas às sequências vistas no treino.
    pub use_observed_sequences_only: bool,
    /// Remove features que co-ocorrem com o fundo uma única vez.
    pub remove_background_singleton_features: bool,

    pub inference: InferenceKind,
    pub beam_size: usize,

    pub do_gibbs: bool,
    pub num_samples: usize,
    pub annealing: AnnealingKind,
    pub annealing_rate: f64,
    /// Inicializa o Gibbs com a sequência de Viterbi.
    pub init_viterbi: bool,
    /// Prior estrutural somado ao CRF durante o Gibbs.
    pub prior: Option<PriorKind>,

    pub optimizer: OptimizerKind,
    /// Memória `M` do L-BFGS (e da suavização de gradiente do SGD).
    pub qn_size: usize,
    pub sgd_passes: usize,
    pub qn_passes: usize,
    pub initial_gain: f64,
    pub stochastic_batch_size: usize,
    /// Teto de iterações do minimizador em lote.
    pub max_iterations: usize,

    pub regularizer: RegularizerKind,
    pub sigma: f64,
    /// Limiar do Huber; obrigatório (> 0) quando o Huber é selecionado.
    pub epsilon: f64,
    pub tolerance: f64,

    /// Limiar de amplitude de pesos abaixo do qual a feature é podada.
    pub feature_diff_thresh: f64,
    /// Quantas vezes re-treinar após a poda de features.
    pub num_times_prune_features: usize,

    /// Semente de todos os sorteios (mini-lotes e Gibbs).
    pub seed: u64,
    /// Arquivo opcional com o vetor inicial de pesos.
    pub initial_weights: Option<PathBuf>,
    /// Grava o índice de features (um nome por linha) neste arquivo ao fim
    /// do treino.
    pub save_feature_index_to_disk: Option<PathBuf>,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            window: 2,
            background_symbol: "O".to_string(),
            use_reverse: false,
            use_observed_sequences_only: false,
            remove_background_singleton_features: false,
            inference: InferenceKind::Viterbi,
            beam_size: 30,
            do_gibbs: false,
            num_samples: 100,
            annealing: AnnealingKind::Linear,
            annealing_rate: 0.9,
            init_viterbi: true,
            prior: None,
            optimizer: OptimizerKind::QuasiNewton,
            qn_size: 25,
            sgd_passes: 5,
            qn_passes: 50,
            initial_gain: 0.1,
            stochastic_batch_size: 15,
            max_iterations: 200,
            regularizer: RegularizerKind::Quadratic,
            sigma: 1.0,
            epsilon: 0.1,
            tolerance: 1e-4,
            feature_diff_thresh: 0.0,
            num_times_prune_features: 0,
            seed: 42,
            initial_weights: None,
            save_feature_index_to_disk: None,
        }
    }
}

impl Flags {
    /// Rejeita combinações contraditórias antes do treino.
    pub fn validate(&self) -> CrfResult<()> {
        if self.window < 1 {
            return Err(CrfError::config("window must be at least 1"));
        }
        if self.inference == InferenceKind::Beam && self.beam_size == 0 {
            return Err(CrfError::config("beam inference requires beam_size >= 1"));
        }
        if self.regularizer != RegularizerKind::None && self.sigma <= 0.0 {
            return Err(CrfError::config("regularization requires sigma > 0"));
        }
        if self.regularizer == RegularizerKind::Huber && self.epsilon <= 0.0 {
            return Err(CrfError::config("the Huber prior requires epsilon > 0"));
        }
        if self.do_gibbs && self.num_samples == 0 {
            return Err(CrfError::config("Gibbs decoding requires num_samples >= 1"));
        }
        if self.annealing == AnnealingKind::Exponential
            && !(self.annealing_rate > 0.0 && self.annealing_rate < 1.0)
        {
            return Err(CrfError::config(
                "exponential annealing requires a rate in (0, 1)",
            ));
        }
        if self.optimizer == OptimizerKind::Smd {
            return Err(CrfError::config(
                "the SMD optimizer is not supported; use sgd, scaled_sgd, \
                 sgd_to_quasi_newton or quasi_newton",
            ));
        }
        let stochastic = matches!(
            self.optimizer,
            OptimizerKind::Sgd | OptimizerKind::SgdToQuasiNewton | OptimizerKind::ScaledSgd
        );
        if stochastic && self.stochastic_batch_size == 0 {
            return Err(CrfError::config(
                "stochastic optimizers require stochastic_batch_size >= 1",
            ));
        }
        if self.prior.is_some() && !self.do_gibbs {
            return Err(CrfError::config(
                "entity priors only apply to Gibbs decoding (set do_gibbs)",
            ));
        }
        Ok(())
    }

    /// Regularizador concreto correspondente às flags.
    pub fn build_regularizer(&self) -> Regularizer {
        match self.regularizer {
            RegularizerKind::None => Regularizer::None,
            RegularizerKind::Quadratic => Regularizer::Quadratic { sigma: self.sigma },
            RegularizerKind::Huber => Regularizer::Huber {
                sigma: self.sigma,
                epsilon: self.epsilon,
            },
            RegularizerKind::Quartic => Regularizer::Quartic { sigma: self.sigma },
        }
    }

    /// Cronograma de annealing concreto para o Gibbs.
    pub fn annealing_schedule(&self) -> AnnealingSchedule {
        match self.annealing {
            AnnealingKind::Linear => AnnealingSchedule::Linear {
                iterations: self.num_samples,
            },
            AnnealingKind::Exponential => AnnealingSchedule::Exponential {
                rate: self.annealing_rate,
            },
        }
    }
}
