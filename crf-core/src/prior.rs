//! # Priors Estruturais de Entidades
//!
//! Conhecimento desenhado à mão sobre a forma das entidades, expresso como
//! um [`SequenceModel`] e somado ao CRF via
//! [`crate::sequence::FactoredSequenceModel`] durante a decodificação por
//! Gibbs. O prior não participa do treinamento — ele apenas reponta as
//! sequências candidatas na inferência.
//!
//! As três variantes correspondem às famílias de tarefas clássicas:
//! reconhecimento de entidades em texto corrido (`Ner`), extração em
//! anúncios de aquisições (`Acquisitions`) e em anúncios de seminários
//! (`Seminars`). Todas compartilham a mesma regra central — entidades de
//! tipos diferentes não se tocam sem um token de fundo entre elas — e
//! diferem nas penalidades acessórias.

use serde::{Deserialize, Serialize};

use crate::sequence::SequenceModel;

/// Família de prior estrutural selecionada pelas flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorKind {
    /// Texto corrido: penaliza colisões de tipos adjacentes.
    Ner,
    /// Aquisições: além das colisões, penaliza entidades de um único token.
    Acquisitions,
    /// Seminários: penaliza apenas trocas diretas de tipo, com mais força.
    Seminars,
}

/// Prior de continuidade de entidades sobre um tag set fechado com rótulo
/// de fundo.
pub struct EntityPrior {
    kind: PriorKind,
    num_classes: usize,
    background: usize,
    length: usize,
    window: usize,
}

impl EntityPrior {
    /// O prior espelha a geometria (comprimento e janela) do CRF que ele
    /// acompanha, para que o [`crate::sequence::FactoredSequenceModel`]
    /// alinhe as posições acolchoadas.
    pub fn new(
        kind: PriorKind,
        num_classes: usize,
        background: usize,
        length: usize,
        window: usize,
    ) -> Self {
        Self {
            kind,
            num_classes,
            background,
            length,
            window,
        }
    }

    /// Penalidade por fronteira direta entre tipos diferentes de entidade.
    fn collision_penalty(&self) -> f64 {
        match self.kind {
            PriorKind::Ner => -2.3,
            PriorKind::Acquisitions => -2.3,
            PriorKind::Seminars => -3.0,
        }
    }

    fn score_label(&self, seq: &[usize], pos: usize, y: usize) -> f64 {
        let bg = self.background;
        let left = self.window - 1;
        let mut score = 0.0;

        let prev = if pos > 0 { Some(seq[pos - 1]) } else { None };
        let next = if pos + 1 < seq.len() { Some(seq[pos + 1]) } else { None };

        if y != bg {
            // Entidade encostada em entidade de outro tipo, dos dois lados
            if let Some(p) = prev {
                if p != bg && p != y {
                    score += self.collision_penalty();
                }
            }
            if let Some(n) = next {
                if n != bg && n != y {
                    score += self.collision_penalty();
                }
            }
            if self.kind == PriorKind::Acquisitions {
                // Entidade de um único token: cercada de fundo
                let prev_bg = prev.map(|p| p == bg).unwrap_or(pos == left);
                let next_bg = next.map(|n| n == bg).unwrap_or(true);
                if prev_bg && next_bg {
                    score += self.collision_penalty() / 2.0;
                }
            }
        }
        score
    }
}

impl SequenceModel for EntityPrior {
    fn length(&self) -> usize {
        self.length
    }

    fn left_window(&self) -> usize {
        self.window - 1
    }

    fn possible_values(&self, pos: usize) -> Vec<usize> {
        if pos < self.left_window() {
            vec![self.background]
        } else {
            (0..self.num_classes).collect()
        }
    }

    fn scores_of(&self, sequence: &[usize], pos: usize) -> Vec<f64> {
        (0..self.num_classes)
            .map(|y| self.score_label(sequence, pos, y))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_never_penalized() {
        let prior = EntityPrior::new(PriorKind::Ner, 3, 0, 4, 2);
        let seq = vec![0, 1, 2, 1, 0];
        for pos in 1..5 {
            assert_eq!(prior.scores_of(&seq, pos)[0], 0.0);
        }
    }

    #[test]
    fn test_type_collision_is_penalized() {
        let prior = EntityPrior::new(PriorKind::Ner, 3, 0, 3, 2);
        // Acolchoado: [O, PER, ?, O]; avaliando a posição do meio
        let seq = vec![0, 1, 2, 0];
        let scores = prior.scores_of(&seq, 2);
        // Continuar com o mesmo tipo (1) não colide com o vizinho esquerdo
        assert!(scores[1] > scores[2] || scores[2] < 0.0);
        assert!(scores[2] < 0.0);
    }

    #[test]
    fn test_acquisitions_penalizes_singletons() {
        let prior = EntityPrior::new(PriorKind::Acquisitions, 3, 0, 3, 2);
        // [O, O, ?, O]: uma entidade aqui seria um singleton
        let seq = vec![0, 0, 1, 0];
        let scores = prior.scores_of(&seq, 2);
        assert!(scores[1] < 0.0);
        assert_eq!(scores[0], 0.0);
    }
}
