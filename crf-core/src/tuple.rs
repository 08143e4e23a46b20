//! # Tuplas de Rótulos e Índices por Ordem
//!
//! Um CRF de ordem superior parametriza cliques de tamanho `1..=W`. Cada
//! clique é uma tupla ordenada de ids de classe — por exemplo, com `W = 2`,
//! a tupla `(B-PER, I-PER)` cobre o rótulo anterior e o atual.
//!
//! Tuplas são empacotáveis em um inteiro denso:
//!
//! ```text
//! packed = Σ labels[i] · C^(len-1-i)     (posição mais à esquerda é a mais significativa)
//! ```
//!
//! No modo "apenas sequências observadas" os índices guardam somente as
//! tuplas vistas no treino; ao inserir uma tupla de comprimento `W`, todos os
//! seus sufixos de comprimento `1..W-1` são inseridos nos índices das ordens
//! menores. No modo denso, cada índice contém o produto cartesiano completo e
//! o id de uma tupla coincide com sua forma empacotada.

use crate::index::Index;

/// Tupla ordenada e imutável de até `W` ids de classe.
///
/// Igualdade e hash são estruturais, então a tupla serve de chave nos
/// índices por ordem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelTuple(Vec<usize>);

impl LabelTuple {
    pub fn new(labels: Vec<usize>) -> Self {
        LabelTuple(labels)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &[usize] {
        &self.0
    }

    /// Mantém apenas os últimos `k` elementos.
    pub fn suffix(&self, k: usize) -> LabelTuple {
        let start = self.0.len().saturating_sub(k);
        LabelTuple(self.0[start..].to_vec())
    }

    /// Forma empacotada da tupla sobre `num_classes` classes.
    pub fn packed(&self, num_classes: usize) -> usize {
        self.0.iter().fold(0, |acc, &y| acc * num_classes + y)
    }

    /// Reconstrói a tupla de comprimento `len` a partir da forma empacotada.
    pub fn from_packed(mut code: usize, len: usize, num_classes: usize) -> Self {
        let mut labels = vec![0usize; len];
        for slot in labels.iter_mut().rev() {
            *slot = code % num_classes;
            code /= num_classes;
        }
        LabelTuple(labels)
    }

    /// Duas tuplas se "estendem" quando uma é sufixo da outra.
    pub fn extends(&self, other: &LabelTuple) -> bool {
        let (short, long) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        long.suffix(short.len()) == *short
    }
}

/// Índice de todas as tuplas de um dado comprimento exercitadas pelo treino
/// (ou do produto cartesiano completo, no modo denso).
#[derive(Debug, Clone)]
pub struct LabelTupleIndex {
    tuple_len: usize,
    index: Index<LabelTuple>,
}

impl LabelTupleIndex {
    pub fn new(tuple_len: usize) -> Self {
        Self {
            tuple_len,
            index: Index::new(),
        }
    }

    /// Constrói o índice denso com todas as `C^len` tuplas, em ordem
    /// empacotada — o id de cada tupla coincide com `packed`.
    pub fn dense(tuple_len: usize, num_classes: usize) -> Self {
        let mut idx = Self::new(tuple_len);
        let total = num_classes.pow(tuple_len as u32);
        for code in 0..total {
            idx.index
                .index_of_or_add(LabelTuple::from_packed(code, tuple_len, num_classes));
        }
        idx
    }

    /// Comprimento das tuplas deste índice.
    pub fn tuple_len(&self) -> usize {
        self.tuple_len
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index_of(&self, tuple: &LabelTuple) -> Option<usize> {
        self.index.index_of(tuple)
    }

    pub fn add(&mut self, tuple: LabelTuple) -> usize {
        debug_assert_eq!(tuple.len(), self.tuple_len);
        self.index.index_of_or_add(tuple)
    }

    pub fn get(&self, id: usize) -> Option<&LabelTuple> {
        self.index.get(id)
    }

    /// Itera `(id, tupla)` na ordem dos ids.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &LabelTuple)> {
        self.index.iter().enumerate()
    }
}

/// Conjunto dos índices de tuplas, um por ordem `1..=W`.
///
/// `order` aqui segue a convenção do resto do motor: a ordem `o ∈ [0..W-1]`
/// parametriza cliques de tamanho `o + 1`.
#[derive(Debug, Clone)]
pub struct LabelIndices {
    window: usize,
    num_classes: usize,
    per_order: Vec<LabelTupleIndex>,
}

impl LabelIndices {
    /// Modo denso: produto cartesiano completo em cada ordem.
    pub fn dense(window: usize, num_classes: usize) -> Self {
        let per_order = (0..window)
            .map(|o| LabelTupleIndex::dense(o + 1, num_classes))
            .collect();
        Self {
            window,
            num_classes,
            per_order,
        }
    }

    /// Modo "apenas observadas": índices vazios, preenchidos por
    /// [`LabelIndices::add_observed`] durante a varredura do treino.
    pub fn observed_only(window: usize, num_classes: usize) -> Self {
        let per_order = (0..window).map(|o| LabelTupleIndex::new(o + 1)).collect();
        Self {
            window,
            num_classes,
            per_order,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Insere uma tupla observada de comprimento `W` junto com todos os seus
    /// sufixos de comprimento `1..W-1` nos índices das ordens menores.
    ///
    /// Prefixos observados isoladamente NÃO são indexados; apenas sufixos da
    /// tupla cheia entram.
    pub fn add_observed(&mut self, tuple: &LabelTuple) {
        debug_assert_eq!(tuple.len(), self.window);
        for o in 0..self.window {
            self.per_order[o].add(tuple.suffix(o + 1));
        }
    }

    /// Insere uma única tupla no índice da ordem correspondente ao seu
    /// comprimento, sem tocar nos sufixos (usado pela desserialização, que
    /// repõe cada índice exatamente como foi gravado).
    pub fn insert_tuple(&mut self, tuple: LabelTuple) -> usize {
        debug_assert!(!tuple.is_empty() && tuple.len() <= self.window);
        let o = tuple.len() - 1;
        self.per_order[o].add(tuple)
    }

    /// Índice da ordem `o` (cliques de tamanho `o + 1`).
    pub fn order(&self, o: usize) -> &LabelTupleIndex {
        &self.per_order[o]
    }

    /// Id da tupla na ordem correspondente ao seu comprimento.
    pub fn index_of(&self, tuple: &LabelTuple) -> Option<usize> {
        debug_assert!(!tuple.is_empty() && tuple.len() <= self.window);
        self.per_order[tuple.len() - 1].index_of(tuple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_round_trip() {
        let t = LabelTuple::new(vec![2, 0, 1]);
        let packed = t.packed(3);
        assert_eq!(packed, 2 * 9 + 0 * 3 + 1);
        assert_eq!(LabelTuple::from_packed(packed, 3, 3), t);
    }

    #[test]
    fn test_suffix_and_extends() {
        let full = LabelTuple::new(vec![1, 2, 0]);
        assert_eq!(full.suffix(2), LabelTuple::new(vec![2, 0]));
        assert!(full.suffix(2).extends(&full));
        assert!(!LabelTuple::new(vec![1, 0]).extends(&full));
    }

    #[test]
    fn test_dense_index_ids_match_packed() {
        let idx = LabelTupleIndex::dense(2, 3);
        assert_eq!(idx.len(), 9);
        for (id, tuple) in idx.iter() {
            assert_eq!(id, tuple.packed(3));
        }
    }

    #[test]
    fn test_observed_only_inserts_suffixes() {
        let mut indices = LabelIndices::observed_only(3, 4);
        indices.add_observed(&LabelTuple::new(vec![1, 2, 3]));
        // Tupla cheia na ordem 2, sufixos nas ordens menores
        assert_eq!(indices.order(2).len(), 1);
        assert!(indices
            .index_of(&LabelTuple::new(vec![2, 3]))
            .is_some());
        assert!(indices.index_of(&LabelTuple::new(vec![3])).is_some());
        // Prefixo (1, 2) não entra
        assert!(indices.index_of(&LabelTuple::new(vec![1, 2])).is_none());
    }
}
