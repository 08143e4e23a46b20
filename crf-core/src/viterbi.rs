//! # Decodificadores de Sequência — Viterbi, Beam e K-Best
//!
//! Os três decodificadores são programação dinâmica sobre as posições
//! estendidas `[0 .. N + W - 2]`: as primeiras `W - 1` posições são o
//! enchimento de fundo e as demais correspondem aos tokens do documento.
//!
//! O estado da DP é o *contexto* — a tupla dos últimos `W - 1` rótulos —
//! empacotado num inteiro em base `C`. Como a pontuação de uma posição
//! depende apenas da janela esquerda (contrato de
//! [`crate::clique::DecodingModel`]), a recorrência clássica é exata:
//!
//! ```text
//! best[pos][ctx·y] = max_ctx' [ best[pos-1][ctx'] + score(pos, ctx', y) ]
//! ```
//!
//! ## Desempate
//!
//! Todos os decodificadores são determinísticos: contextos são percorridos em
//! ordem crescente e rótulos em ordem crescente de id de classe, com
//! substituição apenas por melhora estrita — em empate vence o menor id.
//! Com isso valem as propriedades de concordância: o 1-melhor do k-best é o
//! Viterbi, e o beam com largura `B ≥ C^(W-1)` também.

use std::collections::HashMap;

use crate::sequence::SequenceModel;

/// Sequência de Viterbi (argmax exato) de um modelo. Documento vazio
/// devolve sequência vazia.
pub fn best_sequence(model: &dyn SequenceModel) -> Vec<usize> {
    let n = model.length();
    if n == 0 {
        return Vec::new();
    }
    let setup = DpSetup::new(model);
    let left = setup.left;

    let mut scores = vec![f64::NEG_INFINITY; setup.num_ctx];
    scores[setup.init_ctx] = 0.0;
    // Por posição real: (contexto anterior, rótulo escolhido) por contexto novo
    let mut ptrs: Vec<Vec<(usize, usize)>> = Vec::with_capacity(n);
    let mut work = setup.padded_work();

    for pos in left..setup.pad {
        let mut next = vec![f64::NEG_INFINITY; setup.num_ctx];
        let mut ptr = vec![(usize::MAX, 0usize); setup.num_ctx];
        for ctx in 0..setup.num_ctx {
            if scores[ctx] == f64::NEG_INFINITY {
                continue;
            }
            setup.decode_context(&mut work, ctx, pos);
            let local = model.scores_of(&work, pos);
            for &y in &setup.possible[pos] {
                let s = scores[ctx] + local[y];
                let ctx2 = setup.shift(ctx, y);
                if s > next[ctx2] {
                    next[ctx2] = s;
                    ptr[ctx2] = (ctx, y);
                }
            }
        }
        ptrs.push(ptr);
        scores = next;
    }

    let mut best_ctx = argmax_first(&scores);
    let mut labels = vec![0usize; n];
    for pos in (left..setup.pad).rev() {
        let (prev, y) = ptrs[pos - left][best_ctx];
        labels[pos - left] = y;
        best_ctx = prev;
    }
    labels
}

/// Busca em feixe com fronteira de no máximo `beam_size` hipóteses por
/// posição. Hipóteses são fundidas por contexto (fica a melhor) antes do
/// corte, então `beam_size ≥ C^(W-1)` reproduz o Viterbi.
pub fn beam_best_sequence(model: &dyn SequenceModel, beam_size: usize) -> Vec<usize> {
    let n = model.length();
    if n == 0 || beam_size == 0 {
        return Vec::new();
    }
    let setup = DpSetup::new(model);
    let left = setup.left;

    struct Hyp {
        score: f64,
        ctx: usize,
        labels: Vec<usize>,
    }

    let mut beam = vec![Hyp {
        score: 0.0,
        ctx: setup.init_ctx,
        labels: Vec::new(),
    }];
    let mut work = setup.padded_work();

    for pos in left..setup.pad {
        let mut by_ctx: HashMap<usize, Hyp> = HashMap::new();
        for hyp in &beam {
            setup.decode_context(&mut work, hyp.ctx, pos);
            let local = model.scores_of(&work, pos);
            for &y in &setup.possible[pos] {
                let score = hyp.score + local[y];
                let ctx2 = setup.shift(hyp.ctx, y);
                let better = match by_ctx.get(&ctx2) {
                    None => true,
                    Some(held) => {
                        score > held.score
                            || (score == held.score
                                && lex_less(&hyp.labels, y, &held.labels))
                    }
                };
                if better {
                    let mut labels = hyp.labels.clone();
                    labels.push(y);
                    by_ctx.insert(ctx2, Hyp { score, ctx: ctx2, labels });
                }
            }
        }
        beam = by_ctx.into_values().collect();
        beam.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.labels.cmp(&b.labels))
        });
        beam.truncate(beam_size);
    }

    beam.into_iter().next().map(|h| h.labels).unwrap_or_default()
}

/// As `k` melhores sequências com suas pontuações, em ordem decrescente.
///
/// A DP guarda até `k` retro-ponteiros por estado; o resultado é o contador
/// de sequências chaveado pela pontuação. Para `k = 1` o resultado coincide
/// com [`best_sequence`].
pub fn k_best_sequences(model: &dyn SequenceModel, k: usize) -> Vec<(Vec<usize>, f64)> {
    let n = model.length();
    if n == 0 || k == 0 {
        return Vec::new();
    }
    let setup = DpSetup::new(model);
    let left = setup.left;

    #[derive(Clone)]
    struct Entry {
        score: f64,
        prev_ctx: usize,
        prev_rank: usize,
        label: usize,
    }

    // lists[ctx] = até k entradas ordenadas por pontuação decrescente
    let mut lists: Vec<Vec<Entry>> = vec![Vec::new(); setup.num_ctx];
    lists[setup.init_ctx].push(Entry {
        score: 0.0,
        prev_ctx: usize::MAX,
        prev_rank: usize::MAX,
        label: usize::MAX,
    });
    let mut history: Vec<Vec<Vec<Entry>>> = Vec::with_capacity(n);
    let mut work = setup.padded_work();

    for pos in left..setup.pad {
        let mut next: Vec<Vec<Entry>> = vec![Vec::new(); setup.num_ctx];
        for ctx in 0..setup.num_ctx {
            if lists[ctx].is_empty() {
                continue;
            }
            setup.decode_context(&mut work, ctx, pos);
            let local = model.scores_of(&work, pos);
            for (rank, entry) in lists[ctx].iter().enumerate() {
                for &y in &setup.possible[pos] {
                    next[setup.shift(ctx, y)].push(Entry {
                        score: entry.score + local[y],
                        prev_ctx: ctx,
                        prev_rank: rank,
                        label: y,
                    });
                }
            }
        }
        for list in next.iter_mut() {
            // Ordenação estável: empates preservam a ordem de geração
            // (contexto e rótulo crescentes), alinhando com o Viterbi.
            list.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            list.truncate(k);
        }
        history.push(next.clone());
        lists = next;
    }

    // Recolhe os k melhores finais entre todos os contextos.
    let mut finals: Vec<(usize, usize, f64)> = Vec::new();
    for (ctx, list) in lists.iter().enumerate() {
        for (rank, entry) in list.iter().enumerate() {
            finals.push((ctx, rank, entry.score));
        }
    }
    finals.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    finals.truncate(k);

    finals
        .into_iter()
        .map(|(mut ctx, mut rank, score)| {
            let mut labels = vec![0usize; n];
            for pos in (0..n).rev() {
                let entry = &history[pos][ctx][rank];
                labels[pos] = entry.label;
                ctx = entry.prev_ctx;
                rank = entry.prev_rank;
            }
            (labels, score)
        })
        .collect()
}

/// Pré-cálculo compartilhado pelos três decodificadores.
struct DpSetup {
    left: usize,
    pad: usize,
    num_classes: usize,
    num_ctx: usize,
    init_ctx: usize,
    possible: Vec<Vec<usize>>,
}

impl DpSetup {
    fn new(model: &dyn SequenceModel) -> Self {
        let left = model.left_window();
        let pad = left + model.length();
        let possible: Vec<Vec<usize>> = (0..pad).map(|p| model.possible_values(p)).collect();
        let num_classes = 1 + possible
            .iter()
            .flat_map(|v| v.iter().copied())
            .max()
            .unwrap_or(0);
        let num_ctx = num_classes.pow(left as u32);
        let init_ctx = (0..left).fold(0, |acc, p| acc * num_classes + possible[p][0]);
        Self {
            left,
            pad,
            num_classes,
            num_ctx,
            init_ctx,
            possible,
        }
    }

    fn padded_work(&self) -> Vec<usize> {
        let mut work = vec![0usize; self.pad];
        for p in 0..self.left {
            work[p] = self.possible[p][0];
        }
        work
    }

    /// Escreve os rótulos do contexto nas posições `pos-left .. pos`.
    fn decode_context(&self, work: &mut [usize], ctx: usize, pos: usize) {
        let mut code = ctx;
        for i in (0..self.left).rev() {
            work[pos - self.left + i] = code % self.num_classes;
            code /= self.num_classes;
        }
    }

    /// Contexto seguinte após escolher `y`: descarta o rótulo mais antigo.
    fn shift(&self, ctx: usize, y: usize) -> usize {
        if self.left == 0 {
            return 0;
        }
        let keep = self.num_ctx / self.num_classes;
        (ctx % keep) * self.num_classes + y
    }
}

/// Índice do maior valor; em empate vence o primeiro (menor índice).
fn argmax_first(values: &[f64]) -> usize {
    let mut best = 0;
    let mut best_v = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_v {
            best_v = v;
            best = i;
        }
    }
    best
}

/// `prefix + [y]` é lexicograficamente menor que `other`?
fn lex_less(prefix: &[usize], y: usize, other: &[usize]) -> bool {
    for (a, b) in prefix.iter().chain(std::iter::once(&y)).zip(other.iter()) {
        if a != b {
            return a < b;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clique::{CliqueTree, Weights};
    use crate::tuple::LabelIndices;

    fn flatten(rows: &[Vec<f64>]) -> (Vec<f64>, Vec<usize>) {
        let mut flat = Vec::new();
        let mut offsets = vec![0];
        for row in rows {
            flat.extend_from_slice(row);
            offsets.push(flat.len());
        }
        (flat, offsets)
    }

    /// Cadeia de 3 classes, janela 2, 4 tokens, pesos assimétricos.
    fn sample_tree() -> CliqueTree {
        let indices = LabelIndices::dense(2, 3);
        let rows = vec![
            vec![0.4, -0.9, 1.3, 0.2, 0.0, -0.5, 0.8, 0.1, -1.1],
            vec![-0.3, 0.6, 0.2, 1.0, -0.7, 0.4, 0.0, 0.9, 0.5],
            vec![1.1, 0.0, -0.2, 0.3, 0.7, -0.4, 0.6, -0.8, 0.2],
        ];
        let (flat, offsets) = flatten(&rows);
        let data = vec![
            vec![vec![], vec![0]],
            vec![vec![], vec![1, 2]],
            vec![vec![], vec![0, 2]],
            vec![vec![], vec![1]],
        ];
        CliqueTree::calibrated(&data, Weights::new(&flat, &offsets), &indices, 0).unwrap()
    }

    /// Enumera todas as sequências e devolve a de maior log-probabilidade.
    fn brute_force_best(tree: &CliqueTree) -> Vec<usize> {
        let n = tree.length();
        let c = tree.num_classes();
        let mut best = vec![0; n];
        let mut best_score = f64::NEG_INFINITY;
        for code in 0..c.pow(n as u32) {
            let mut labels = vec![0usize; n];
            let mut rest = code;
            for slot in labels.iter_mut().rev() {
                *slot = rest % c;
                rest /= c;
            }
            let score = tree.sequence_log_prob(&labels);
            if score > best_score {
                best_score = score;
                best = labels;
            }
        }
        best
    }

    #[test]
    fn test_viterbi_matches_brute_force() {
        let tree = sample_tree();
        let decoded = best_sequence(&tree.decoding_model());
        assert_eq!(decoded, brute_force_best(&tree));
    }

    #[test]
    fn test_k_best_first_equals_viterbi() {
        let tree = sample_tree();
        let model = tree.decoding_model();
        let viterbi = best_sequence(&model);
        let k_best = k_best_sequences(&model, 4);
        assert_eq!(k_best[0].0, viterbi);
        // Pontuações em ordem decrescente
        for pair in k_best.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_wide_beam_equals_viterbi() {
        let tree = sample_tree();
        let model = tree.decoding_model();
        // C^(W-1) = 3 contextos; qualquer feixe >= 3 é exato
        assert_eq!(beam_best_sequence(&model, 3), best_sequence(&model));
        assert_eq!(beam_best_sequence(&model, 64), best_sequence(&model));
    }

    #[test]
    fn test_narrow_beam_still_returns_full_sequence() {
        let tree = sample_tree();
        let labels = beam_best_sequence(&tree.decoding_model(), 1);
        assert_eq!(labels.len(), tree.length());
    }

    #[test]
    fn test_empty_document_decodes_to_empty() {
        let indices = LabelIndices::dense(2, 2);
        let flat: Vec<f64> = vec![];
        let offsets = vec![0];
        let tree =
            CliqueTree::calibrated(&[], Weights::new(&flat, &offsets), &indices, 0).unwrap();
        assert!(best_sequence(&tree.decoding_model()).is_empty());
        assert!(k_best_sequences(&tree.decoding_model(), 3).is_empty());
    }

    #[test]
    fn test_k_best_sequences_are_distinct() {
        let tree = sample_tree();
        let k_best = k_best_sequences(&tree.decoding_model(), 6);
        for i in 0..k_best.len() {
            for j in (i + 1)..k_best.len() {
                assert_ne!(k_best[i].0, k_best[j].0);
            }
        }
    }
}
