//! # Árvore de Cliques — Calibração Forward–Backward
//!
//! O grafo de fatores de um CRF de cadeia linear é uma corrente: um fator de
//! largura `W` por posição do documento, cobrindo os rótulos
//! `(y_{j-W+1}, ..., y_j)`. A calibração faz duas varreduras de passagem de
//! mensagens:
//!
//! ```text
//! Forward:  para j = 1..N-1:  m_{j-1} = fator[j-1].sum_out_front()
//!                             fator[j].multiply_in_front(m_{j-1})
//! Backward: para j = N-2..0:  s = fator[j+1].sum_out_end()
//!                             s.divide_by(m_j)
//!                             fator[j].multiply_in_end(s)
//! ```
//!
//! Depois disso toda tabela da corrente tem a MESMA massa total — o log da
//! função de partição `Z` — e marginais e condicionais podem ser lidos de
//! qualquer posição. Essa é a invariante central do motor, verificada nos
//! testes com tolerância 1e-9.
//!
//! Posições de janela que caem antes do início do documento são fixadas no
//! rótulo de fundo durante a montagem (entradas incompatíveis recebem `-∞`),
//! de modo que a distribuição resultante condiciona exatamente no
//! acolchoamento que o construtor de dados usa para as contagens empíricas.

use crate::error::{CrfError, CrfResult};
use crate::factor::{log_sum_exp, FactorTable};
use crate::sequence::SequenceModel;
use crate::tuple::LabelIndices;

/// Visão raga da tabela de pesos `θ[f][k]` sobre um vetor achatado.
///
/// `offsets` tem comprimento `F + 1`; a linha da feature `f` é
/// `flat[offsets[f]..offsets[f+1]]`, com um peso por tupla de rótulo da
/// ordem que `f` parametriza.
#[derive(Debug, Clone, Copy)]
pub struct Weights<'a> {
    flat: &'a [f64],
    offsets: &'a [usize],
}

impl<'a> Weights<'a> {
    pub fn new(flat: &'a [f64], offsets: &'a [usize]) -> Self {
        debug_assert!(!offsets.is_empty());
        debug_assert_eq!(*offsets.last().unwrap(), flat.len());
        Self { flat, offsets }
    }

    pub fn num_features(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Linha de pesos da feature `f`.
    pub fn row(&self, f: usize) -> &'a [f64] {
        &self.flat[self.offsets[f]..self.offsets[f + 1]]
    }

    /// Dimensão total do vetor de parâmetros.
    pub fn dimension(&self) -> usize {
        self.flat.len()
    }
}

/// Janela dos `width - 1` rótulos anteriores à posição `pos`, acolchoada
/// com o rótulo de fundo onde a posição cair antes do início.
pub fn window_before(labels: &[usize], pos: usize, width: usize, background: usize) -> Vec<usize> {
    (0..width.saturating_sub(1))
        .map(|i| {
            let offset = width - 1 - i;
            if pos >= offset {
                labels[pos - offset]
            } else {
                background
            }
        })
        .collect()
}

/// Corrente de tabelas de fatores calibradas, uma por posição do documento.
///
/// A árvore é efêmera: construída por documento tanto para o gradiente do
/// treino quanto para a inferência, e descartada em seguida.
pub struct CliqueTree {
    tables: Vec<FactorTable>,
    window: usize,
    num_classes: usize,
    background: usize,
    log_z: f64,
}

impl CliqueTree {
    /// Monta e calibra a árvore para um documento codificado.
    ///
    /// `data[j][o]` são os ids de features ativos na posição `j` para a
    /// ordem `o`; o fator bruto de cada clique é a soma dos pesos
    /// `θ[f][k]` das features ativas, e ordens menores que `W` são
    /// embutidas no fator cheio via `multiply_in_end`.
    pub fn calibrated(
        data: &[Vec<Vec<usize>>],
        weights: Weights<'_>,
        indices: &LabelIndices,
        background: usize,
    ) -> CrfResult<CliqueTree> {
        let window = indices.window();
        let num_classes = indices.num_classes();
        let n = data.len();

        let mut tables: Vec<FactorTable> = Vec::with_capacity(n);
        for (j, orders) in data.iter().enumerate() {
            let mut table = FactorTable::new(num_classes, window);
            for o in 0..window {
                let feats = orders.get(o).map(Vec::as_slice).unwrap_or(&[]);
                if feats.is_empty() {
                    continue;
                }
                if o + 1 == window {
                    for (k, tuple) in indices.order(o).iter() {
                        let mut v = 0.0;
                        for &f in feats {
                            v += weights.row(f)[k];
                        }
                        let idx = tuple.packed(num_classes);
                        table.set_value_at(idx, table.value_at(idx) + v);
                    }
                } else {
                    let mut small = FactorTable::new(num_classes, o + 1);
                    for (k, tuple) in indices.order(o).iter() {
                        let mut v = 0.0;
                        for &f in feats {
                            v += weights.row(f)[k];
                        }
                        small.set_value_at(tuple.packed(num_classes), v);
                    }
                    table.multiply_in_end(&small);
                }
            }
            mask_virtual_positions(&mut table, j, window, num_classes, background);
            tables.push(table);
        }

        // Varredura forward; as mensagens ficam guardadas para a divisão
        // na varredura backward.
        let mut messages: Vec<FactorTable> = Vec::with_capacity(n.saturating_sub(1));
        for j in 1..n {
            let m = tables[j - 1].sum_out_front();
            tables[j].multiply_in_front(&m);
            messages.push(m);
        }
        for j in (0..n.saturating_sub(1)).rev() {
            let mut s = tables[j + 1].sum_out_end();
            s.divide_by(&messages[j]);
            tables[j].multiply_in_end(&s);
        }

        if tables.iter().any(FactorTable::has_nan) {
            return Err(CrfError::numeric(
                "NaN in calibrated factor table; weights or features are corrupt",
            ));
        }

        let log_z = tables.first().map(FactorTable::total_mass).unwrap_or(0.0);
        Ok(CliqueTree {
            tables,
            window,
            num_classes,
            background,
            log_z,
        })
    }

    pub fn length(&self) -> usize {
        self.tables.len()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn background(&self) -> usize {
        self.background
    }

    /// Log da função de partição (massa total de qualquer tabela calibrada).
    pub fn log_z(&self) -> f64 {
        self.log_z
    }

    /// Tabela calibrada da posição `j`.
    pub fn table(&self, j: usize) -> &FactorTable {
        &self.tables[j]
    }

    /// Log-probabilidade marginal da tupla que termina na posição `j`
    /// (comprimento ≤ W).
    pub fn log_prob_end(&self, j: usize, labels: &[usize]) -> f64 {
        self.tables[j].unnormalized_log_prob_end(labels) - self.log_z
    }

    /// Probabilidade marginal do rótulo `y` na posição `j`.
    pub fn prob(&self, j: usize, y: usize) -> f64 {
        self.log_prob_end(j, &[y]).exp()
    }

    /// Vetor de marginais normalizadas da posição `j`.
    pub fn marginals(&self, j: usize) -> Vec<f64> {
        (0..self.num_classes).map(|y| self.prob(j, y)).collect()
    }

    /// Marginal do par de rótulos `(a, b)` nas posições `(j-1, j)`.
    ///
    /// Com janela 1 o modelo não tem fator conjunto sobre pares; o par é
    /// devolvido como produto das marginais (rótulos independentes dado o
    /// documento).
    pub fn pair_prob(&self, j: usize, a: usize, b: usize) -> f64 {
        debug_assert!(j >= 1);
        if self.window >= 2 {
            self.log_prob_end(j, &[a, b]).exp()
        } else {
            self.prob(j - 1, a) * self.prob(j, b)
        }
    }

    /// `log p(y_j | janela anterior)`, normalizado, lido da tabela `j`.
    pub fn cond_log_prob_given_previous(&self, j: usize, prev: &[usize], y: usize) -> f64 {
        self.tables[j].conditional_log_prob_given_previous(prev, y)
    }

    /// Log-probabilidade conjunta (normalizada) de uma sequência completa de
    /// rótulos, pela regra da cadeia sobre os condicionais.
    pub fn sequence_log_prob(&self, labels: &[usize]) -> f64 {
        debug_assert_eq!(labels.len(), self.length());
        (0..self.length())
            .map(|j| {
                let prev = window_before(labels, j, self.window, self.background);
                self.cond_log_prob_given_previous(j, &prev, labels[j])
            })
            .sum()
    }

    /// Face de decodificação: pontuações condicionadas apenas na janela
    /// esquerda, adequadas aos decodificadores de programação dinâmica.
    pub fn decoding_model(&self) -> DecodingModel<'_> {
        DecodingModel { tree: self }
    }
}

/// Fixa no fundo as posições de janela anteriores ao início do documento.
fn mask_virtual_positions(
    table: &mut FactorTable,
    j: usize,
    window: usize,
    num_classes: usize,
    background: usize,
) {
    if j + 1 >= window {
        return;
    }
    let virtual_slots = window - 1 - j;
    for idx in 0..table.size() {
        for slot in 0..virtual_slots {
            let shift = num_classes.pow((window - 1 - slot) as u32);
            if (idx / shift) % num_classes != background {
                table.set_value_at(idx, f64::NEG_INFINITY);
                break;
            }
        }
    }
}

/// O CRF como [`SequenceModel`] para o amostrador de Gibbs: `scores_of`
/// devolve o condicional exato do rótulo em `pos` dado o resto da
/// sequência — a soma dos condicionais "este dado os anteriores" de todas
/// as tabelas cuja janela contém `pos`.
impl SequenceModel for CliqueTree {
    fn length(&self) -> usize {
        self.tables.len()
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
        let left = self.left_window();
        let r = pos - left;
        let last = (r + self.window - 1).min(self.length() - 1);
        let mut work = sequence.to_vec();
        (0..self.num_classes)
            .map(|y| {
                work[pos] = y;
                (r..=last)
                    .map(|j| {
                        let prev: Vec<usize> =
                            work[(j + left + 1 - self.window)..(j + left)].to_vec();
                        self.cond_log_prob_given_previous(j, &prev, work[j + left])
                    })
                    .sum()
            })
            .collect()
    }

    fn sequence_score(&self, sequence: &[usize]) -> f64 {
        self.sequence_log_prob(&sequence[self.left_window()..])
    }
}

/// Face do CRF para Viterbi/beam/k-best: a pontuação de uma posição depende
/// apenas da janela esquerda, então a soma das pontuações é a
/// log-probabilidade conjunta exata e a programação dinâmica é ótima.
pub struct DecodingModel<'a> {
    tree: &'a CliqueTree,
}

impl SequenceModel for DecodingModel<'_> {
    fn length(&self) -> usize {
        self.tree.length()
    }

    fn left_window(&self) -> usize {
        self.tree.left_window()
    }

    fn possible_values(&self, pos: usize) -> Vec<usize> {
        SequenceModel::possible_values(self.tree, pos)
    }

    fn scores_of(&self, sequence: &[usize], pos: usize) -> Vec<f64> {
        let left = self.left_window();
        let r = pos - left;
        let prev: Vec<usize> = sequence[pos - left..pos].to_vec();
        let joint = self.tree.tables[r].unnormalized_conditionals_given_previous(&prev);
        let mass = log_sum_exp(&joint);
        joint.into_iter().map(|v| v - mass).collect()
    }
}
