//! # SequenceModel — Abstração Consumida pelos Decodificadores
//!
//! Todos os decodificadores (Viterbi, beam, k-best, Gibbs) enxergam o modelo
//! através desta interface, e não do CRF diretamente. Isso permite combinar o
//! CRF com um prior estrutural de entidades via [`FactoredSequenceModel`]
//! sem que os decodificadores saibam da composição.
//!
//! ## Espaço de posições
//!
//! As sequências trafegam *acolchoadas*: um vetor de comprimento
//! `left_window() + length()` onde as primeiras `left_window()` posições são
//! enchimento fixado no rótulo de fundo. `possible_values(pos)` devolve
//! apenas o id de fundo nessas posições, fazendo o papel do padding à
//! esquerda do documento.

/// Contrato dos modelos de sequência.
pub trait SequenceModel {
    /// Comprimento real do documento (sem o enchimento).
    fn length(&self) -> usize;

    /// Tamanho da janela esquerda (`W - 1` para um CRF de janela `W`).
    fn left_window(&self) -> usize;

    /// Janela direita; sempre zero nos modelos deste motor.
    fn right_window(&self) -> usize {
        0
    }

    /// Ids de classe permitidos na posição acolchoada `pos`. Nas posições de
    /// enchimento (`pos < left_window()`) devolve apenas o id de fundo.
    fn possible_values(&self, pos: usize) -> Vec<usize>;

    /// Log-probabilidades não normalizadas de cada classe na posição `pos`,
    /// dadas as demais tags de `sequence`.
    fn scores_of(&self, sequence: &[usize], pos: usize) -> Vec<f64>;

    /// Pontuação do rótulo já presente em `sequence[pos]`.
    fn score_of(&self, sequence: &[usize], pos: usize) -> f64 {
        self.scores_of(sequence, pos)[sequence[pos]]
    }

    /// Pontuação da sequência completa, usada para ranquear amostras.
    ///
    /// A implementação padrão soma `score_of` posição a posição; o CRF
    /// sobrescreve com a log-probabilidade conjunta exata.
    fn sequence_score(&self, sequence: &[usize]) -> f64 {
        let left = self.left_window();
        (left..left + self.length())
            .map(|pos| self.score_of(sequence, pos))
            .sum()
    }
}

/// Combinação de dois modelos: a pontuação é a soma elemento a elemento.
///
/// Usada para sobrepor um prior de estrutura de entidades ao CRF durante a
/// decodificação por Gibbs; a forma da sequência (comprimento, janelas,
/// valores possíveis) é a do modelo principal.
pub struct FactoredSequenceModel<'a> {
    main: &'a dyn SequenceModel,
    prior: &'a dyn SequenceModel,
}

impl<'a> FactoredSequenceModel<'a> {
    pub fn new(main: &'a dyn SequenceModel, prior: &'a dyn SequenceModel) -> Self {
        debug_assert_eq!(main.length(), prior.length());
        debug_assert_eq!(main.left_window(), prior.left_window());
        Self { main, prior }
    }
}

impl SequenceModel for FactoredSequenceModel<'_> {
    fn length(&self) -> usize {
        self.main.length()
    }

    fn left_window(&self) -> usize {
        self.main.left_window()
    }

    fn possible_values(&self, pos: usize) -> Vec<usize> {
        self.main.possible_values(pos)
    }

    fn scores_of(&self, sequence: &[usize], pos: usize) -> Vec<f64> {
        let mut scores = self.main.scores_of(sequence, pos);
        for (s, p) in scores.iter_mut().zip(self.prior.scores_of(sequence, pos)) {
            *s += p;
        }
        scores
    }

    fn sequence_score(&self, sequence: &[usize]) -> f64 {
        self.main.sequence_score(sequence) + self.prior.sequence_score(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Modelo de brinquedo: pontuações fixas por classe, janela 1.
    struct Fixed {
        scores: Vec<Vec<f64>>,
    }

    impl SequenceModel for Fixed {
        fn length(&self) -> usize {
            self.scores.len()
        }
        fn left_window(&self) -> usize {
            1
        }
        fn possible_values(&self, pos: usize) -> Vec<usize> {
            if pos < 1 {
                vec![0]
            } else {
                (0..self.scores[0].len()).collect()
            }
        }
        fn scores_of(&self, _sequence: &[usize], pos: usize) -> Vec<f64> {
            self.scores[pos - 1].clone()
        }
    }

    #[test]
    fn test_factored_model_sums_scores() {
        let a = Fixed {
            scores: vec![vec![1.0, 2.0]],
        };
        let b = Fixed {
            scores: vec![vec![0.5, -1.0]],
        };
        let f = FactoredSequenceModel::new(&a, &b);
        let s = f.scores_of(&[0, 0], 1);
        assert!((s[0] - 1.5).abs() < 1e-12);
        assert!((s[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_default_sequence_score_sums_positions() {
        let a = Fixed {
            scores: vec![vec![1.0, 2.0]],
        };
        assert!((a.sequence_score(&[0, 1]) - 2.0).abs() < 1e-12);
    }
}
