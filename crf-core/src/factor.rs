//! # FactorTable — Tabela Densa de Potenciais em Log-Espaço
//!
//! Uma `FactorTable` é uma função de tuplas de `W` ids de classe para valores
//! reais em log-espaço estendido (incluindo `-∞`). O armazenamento é um
//! vetor denso de comprimento `C^W` em ordem lexicográfica da tupla, com o
//! índice mais à esquerda sendo o mais significativo:
//!
//! ```text
//! idx(y_1, ..., y_W) = Σ y_i · C^(W-i)
//! ```
//!
//! Todas as operações vivem no log-domínio: "multiplicar" é somar, "somar" é
//! log-sum-exp. O log-sum-exp desloca pelo máximo antes de exponenciar, para
//! estabilidade numérica; `-∞ + x = -∞` e, na divisão, `-∞ − -∞ := -∞`.
//!
//! NaN em qualquer entrada é erro de programação — a calibração da árvore de
//! cliques verifica isso ao final e aborta com erro fatal.

/// Soma em log-espaço de dois valores: `log(exp(a) + exp(b))`.
pub fn log_add(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// `log Σ exp(x_i)` com deslocamento pelo máximo.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Tabela densa de log-potenciais sobre `window` posições de rótulo.
///
/// `window = 0` é permitido e representa um escalar (tabela de uma entrada);
/// isso aparece como mensagem nas cadeias de janela 1.
#[derive(Debug, Clone)]
pub struct FactorTable {
    num_classes: usize,
    window: usize,
    values: Vec<f64>,
}

impl FactorTable {
    /// Tabela nova com potenciais log 0 (massa multiplicativa 1).
    pub fn new(num_classes: usize, window: usize) -> Self {
        let size = num_classes.pow(window as u32);
        Self {
            num_classes,
            window,
            values: vec![0.0; size],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Empacota uma tupla completa de `window` rótulos no índice denso.
    fn pack(&self, labels: &[usize]) -> usize {
        debug_assert_eq!(labels.len(), self.window);
        labels.iter().fold(0, |acc, &y| acc * self.num_classes + y)
    }

    pub fn value_at(&self, idx: usize) -> f64 {
        self.values[idx]
    }

    pub fn set_value_at(&mut self, idx: usize, v: f64) {
        self.values[idx] = v;
    }

    pub fn get(&self, labels: &[usize]) -> f64 {
        self.values[self.pack(labels)]
    }

    pub fn set(&mut self, labels: &[usize], v: f64) {
        let idx = self.pack(labels);
        self.values[idx] = v;
    }

    /// `log Σ exp t[i]` — após a calibração, é o log da função de partição.
    pub fn total_mass(&self) -> f64 {
        log_sum_exp(&self.values)
    }

    pub fn unnormalized_log_prob(&self, labels: &[usize]) -> f64 {
        self.get(labels)
    }

    pub fn log_prob(&self, labels: &[usize]) -> f64 {
        self.get(labels) - self.total_mass()
    }

    /// `logSumExp` sobre todas as tuplas cujas últimas `suffix.len()`
    /// posições coincidem com `suffix`.
    pub fn unnormalized_log_prob_end(&self, suffix: &[usize]) -> f64 {
        debug_assert!(suffix.len() <= self.window);
        let k = suffix.len();
        let stride = self.num_classes.pow(k as u32);
        let end_code = suffix.iter().fold(0, |acc, &y| acc * self.num_classes + y);
        let mut mass = f64::NEG_INFINITY;
        let mut idx = end_code;
        while idx < self.values.len() {
            mass = log_add(mass, self.values[idx]);
            idx += stride;
        }
        mass
    }

    /// Análogo de [`FactorTable::unnormalized_log_prob_end`] para prefixos.
    pub fn unnormalized_log_prob_front(&self, prefix: &[usize]) -> f64 {
        debug_assert!(prefix.len() <= self.window);
        let rest = self.window - prefix.len();
        let block = self.num_classes.pow(rest as u32);
        let front_code = prefix.iter().fold(0, |acc, &y| acc * self.num_classes + y);
        let start = front_code * block;
        log_sum_exp(&self.values[start..start + block])
    }

    /// `log p(y | prev)` normalizado: `prev` são os `W-1` rótulos
    /// anteriores, `y` é o rótulo da última posição.
    pub fn conditional_log_prob_given_previous(&self, prev: &[usize], y: usize) -> f64 {
        debug_assert_eq!(prev.len() + 1, self.window);
        let base = prev.iter().fold(0, |acc, &p| acc * self.num_classes + p) * self.num_classes;
        let slice = &self.values[base..base + self.num_classes];
        slice[y] - log_sum_exp(slice)
    }

    /// Vetor não normalizado de `log p(y, prev)` para todo `y`, dado `prev`.
    pub fn unnormalized_conditionals_given_previous(&self, prev: &[usize]) -> Vec<f64> {
        debug_assert_eq!(prev.len() + 1, self.window);
        let base = prev.iter().fold(0, |acc, &p| acc * self.num_classes + p) * self.num_classes;
        self.values[base..base + self.num_classes].to_vec()
    }

    /// `log p(y | next)` normalizado: `next` são os `W-1` rótulos seguintes,
    /// `y` ocupa a primeira posição da tabela.
    pub fn conditional_log_prob_given_next(&self, next: &[usize], y: usize) -> f64 {
        let joint = self.unnormalized_conditionals_given_next(next);
        joint[y] - log_sum_exp(&joint)
    }

    /// Vetor não normalizado de `log p(y, next)` para todo `y`, dado `next`.
    pub fn unnormalized_conditionals_given_next(&self, next: &[usize]) -> Vec<f64> {
        debug_assert_eq!(next.len() + 1, self.window);
        let next_code = next.iter().fold(0, |acc, &n| acc * self.num_classes + n);
        let block = self.num_classes.pow((self.window - 1) as u32);
        (0..self.num_classes)
            .map(|y| self.values[y * block + next_code])
            .collect()
    }

    /// Marginaliza a posição mais à esquerda, devolvendo uma tabela de
    /// largura `W-1` recém-alocada.
    pub fn sum_out_front(&self) -> FactorTable {
        debug_assert!(self.window >= 1);
        let mut out = FactorTable::new(self.num_classes, self.window - 1);
        let block = out.values.len();
        for (rest, slot) in out.values.iter_mut().enumerate() {
            let mut mass = f64::NEG_INFINITY;
            for y in 0..self.num_classes {
                mass = log_add(mass, self.values[y * block + rest]);
            }
            *slot = mass;
        }
        out
    }

    /// Marginaliza a posição mais à direita.
    pub fn sum_out_end(&self) -> FactorTable {
        debug_assert!(self.window >= 1);
        let mut out = FactorTable::new(self.num_classes, self.window - 1);
        for (prefix, slot) in out.values.iter_mut().enumerate() {
            let start = prefix * self.num_classes;
            *slot = log_sum_exp(&self.values[start..start + self.num_classes]);
        }
        out
    }

    /// Soma (multiplicação em log-espaço) `other` em todas as entradas cujos
    /// primeiros `other.window` rótulos coincidem.
    pub fn multiply_in_front(&mut self, other: &FactorTable) {
        debug_assert!(other.window <= self.window);
        debug_assert_eq!(other.num_classes, self.num_classes);
        let block = self
            .num_classes
            .pow((self.window - other.window) as u32);
        for (i, v) in self.values.iter_mut().enumerate() {
            *v += other.values[i / block];
        }
    }

    /// Soma `other` em todas as entradas cujos últimos `other.window`
    /// rótulos coincidem.
    pub fn multiply_in_end(&mut self, other: &FactorTable) {
        debug_assert!(other.window <= self.window);
        debug_assert_eq!(other.num_classes, self.num_classes);
        let modulus = other.values.len();
        for (i, v) in self.values.iter_mut().enumerate() {
            *v += other.values[i % modulus];
        }
    }

    /// Divisão em log-espaço por uma tabela do mesmo formato.
    ///
    /// `-∞ − -∞ := -∞`: uma entrada sem massa dividida por mensagem sem
    /// massa continua sem massa, em vez de virar NaN.
    pub fn divide_by(&mut self, other: &FactorTable) {
        debug_assert_eq!(self.window, other.window);
        debug_assert_eq!(self.num_classes, other.num_classes);
        for (v, d) in self.values.iter_mut().zip(other.values.iter()) {
            if *v == f64::NEG_INFINITY && *d == f64::NEG_INFINITY {
                *v = f64::NEG_INFINITY;
            } else {
                *v -= d;
            }
        }
    }

    /// Verificação fatal de NaN usada ao fim da calibração.
    pub fn has_nan(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }
}
