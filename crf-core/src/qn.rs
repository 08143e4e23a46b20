//! # Minimizador Quase-Newton (L-BFGS de Memória Limitada)
//!
//! Mantém os `M` pares mais recentes `s_k = x_{k+1} − x_k` e
//! `y_k = ∇f_{k+1} − ∇f_k` e aproxima a direção de Newton pela recursão de
//! dois laços, sem jamais materializar a Hessiana. A busca linear é
//! retrocesso com condição de Armijo (decréscimo suficiente), que garante
//! descida monótona.
//!
//! ## Critérios de parada
//!
//! A otimização termina no primeiro que ocorrer: teto de iterações,
//! tolerância relativa no valor da função, tolerância na norma do gradiente
//! ou orçamento de relógio de parede. Em qualquer caso devolve o melhor
//! vetor visto.
//!
//! No modo robusto, pares com curvatura não positiva (`s·y ≤ 0`) são
//! descartados em vez de envenenar a aproximação da Hessiana inversa. Um
//! `NumericError` persistente do objetivo aborta o treino devolvendo o
//! último vetor seguro.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{CrfError, CrfResult};
use crate::objective::{DifferentiableFunction, Minimizer};

/// Par de curvatura do histórico L-BFGS.
#[derive(Debug, Clone)]
pub struct CurvaturePair {
    pub s: Vec<f64>,
    pub y: Vec<f64>,
}

/// Callback de monitoramento chamada a cada `monitor_every` iterações.
pub type Monitor = Box<dyn FnMut(usize, f64, &[f64])>;

/// Minimizador L-BFGS.
pub struct QnMinimizer {
    memory: usize,
    max_iterations: usize,
    tolerance: f64,
    gradient_tolerance: f64,
    robust: bool,
    time_limit: Option<Duration>,
    monitor_every: usize,
    monitor: Option<Monitor>,
    initial_history: VecDeque<CurvaturePair>,
}

impl QnMinimizer {
    pub fn new(memory: usize, max_iterations: usize, tolerance: f64) -> Self {
        Self {
            memory: memory.max(1),
            max_iterations,
            tolerance,
            gradient_tolerance: 1e-10,
            robust: false,
            time_limit: None,
            monitor_every: 10,
            monitor: None,
            initial_history: VecDeque::new(),
        }
    }

    /// Modo robusto: descarta atualizações com `s·y ≤ 0`.
    pub fn robust(mut self) -> Self {
        self.robust = true;
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn with_gradient_tolerance(mut self, tol: f64) -> Self {
        self.gradient_tolerance = tol;
        self
    }

    /// Instala a callback de acompanhamento, chamada a cada `every` iterações.
    pub fn with_monitor(mut self, every: usize, monitor: Monitor) -> Self {
        self.monitor_every = every.max(1);
        self.monitor = Some(monitor);
        self
    }

    /// Semeia o histórico de curvatura (usado pelo aquecimento SGD→QN).
    pub fn with_initial_history(mut self, pairs: Vec<CurvaturePair>) -> Self {
        self.initial_history = pairs.into();
        self
    }

    /// Direção de busca pela recursão de dois laços sobre o histórico.
    fn search_direction(&self, gradient: &[f64], history: &VecDeque<CurvaturePair>) -> Vec<f64> {
        let mut q: Vec<f64> = gradient.to_vec();
        let mut alphas = Vec::with_capacity(history.len());
        for pair in history.iter().rev() {
            let rho = 1.0 / dot(&pair.s, &pair.y);
            let alpha = rho * dot(&pair.s, &q);
            for (qi, yi) in q.iter_mut().zip(&pair.y) {
                *qi -= alpha * yi;
            }
            alphas.push((alpha, rho));
        }
        // Escala inicial H_0 = (s·y / y·y) I do par mais recente
        if let Some(last) = history.back() {
            let gamma = dot(&last.s, &last.y) / dot(&last.y, &last.y);
            for qi in q.iter_mut() {
                *qi *= gamma;
            }
        }
        for (pair, (alpha, rho)) in history.iter().zip(alphas.into_iter().rev()) {
            let beta = rho * dot(&pair.y, &q);
            for (qi, si) in q.iter_mut().zip(&pair.s) {
                *qi += (alpha - beta) * si;
            }
        }
        for qi in q.iter_mut() {
            *qi = -*qi;
        }
        q
    }
}

impl Minimizer for QnMinimizer {
    fn minimize(
        &mut self,
        function: &mut dyn DifferentiableFunction,
        x0: Vec<f64>,
    ) -> CrfResult<Vec<f64>> {
        let start = Instant::now();
        let mut x = x0;
        let mut eval = function.evaluate(&x)?;
        let mut history: VecDeque<CurvaturePair> = std::mem::take(&mut self.initial_history);
        history.truncate(self.memory);

        let mut best_x = x.clone();
        let mut best_value = eval.value;

        for iteration in 0..self.max_iterations {
            if let Some(limit) = self.time_limit {
                if start.elapsed() >= limit {
                    info!(iteration, "quasi-Newton stopped on wall-clock budget");
                    break;
                }
            }

            let grad_norm = norm(&eval.gradient);
            if grad_norm / norm(&x).max(1.0) < self.gradient_tolerance {
                debug!(iteration, grad_norm, "gradient norm below tolerance");
                break;
            }

            let mut direction = self.search_direction(&eval.gradient, &history);
            let mut descent = dot(&direction, &eval.gradient);
            if descent >= 0.0 {
                // Direção ruim (histórico degenerado): recomeça do gradiente
                warn!(iteration, "non-descent direction, resetting history");
                history.clear();
                direction = eval.gradient.iter().map(|g| -g).collect();
                descent = -dot(&eval.gradient, &eval.gradient);
            }

            // Busca linear com retrocesso e condição de Armijo.
            let mut alpha = if iteration == 0 && history.is_empty() {
                1.0 / norm(&eval.gradient).max(1.0)
            } else {
                1.0
            };
            const C1: f64 = 1e-4;
            let mut accepted = None;
            for _ in 0..40 {
                let candidate: Vec<f64> = x
                    .iter()
                    .zip(&direction)
                    .map(|(xi, di)| xi + alpha * di)
                    .collect();
                match function.evaluate(&candidate) {
                    Ok(cand_eval) => {
                        if cand_eval.value <= eval.value + C1 * alpha * descent {
                            accepted = Some((candidate, cand_eval));
                            break;
                        }
                    }
                    Err(CrfError::Numeric(msg)) => {
                        // Passo estourou o domínio numérico: encolhe e tenta
                        // de novo.
                        debug!(alpha, %msg, "numeric failure during line search");
                    }
                    Err(e) => return Err(e),
                }
                alpha *= 0.5;
            }

            let (new_x, new_eval) = match accepted {
                Some(step) => step,
                None => {
                    warn!(
                        iteration,
                        "line search exhausted, returning best weights so far"
                    );
                    return Ok(best_x);
                }
            };

            let s: Vec<f64> = new_x.iter().zip(&x).map(|(a, b)| a - b).collect();
            let y: Vec<f64> = new_eval
                .gradient
                .iter()
                .zip(&eval.gradient)
                .map(|(a, b)| a - b)
                .collect();
            let sy = dot(&s, &y);
            if !self.robust || sy > 1e-10 {
                if sy > 0.0 {
                    history.push_back(CurvaturePair { s, y });
                    if history.len() > self.memory {
                        history.pop_front();
                    }
                }
            } else {
                debug!(iteration, sy, "skipping non-positive curvature pair");
            }

            let relative_drop = (eval.value - new_eval.value)
                / eval.value.abs().max(new_eval.value.abs()).max(1.0);

            x = new_x;
            eval = new_eval;
            if eval.value < best_value {
                best_value = eval.value;
                best_x = x.clone();
            }

            if let Some(monitor) = &mut self.monitor {
                if iteration % self.monitor_every == 0 {
                    monitor(iteration, eval.value, &x);
                }
            }
            debug!(iteration, value = eval.value, "quasi-Newton step");

            if relative_drop.abs() < self.tolerance {
                info!(
                    iteration,
                    value = eval.value,
                    "converged on function tolerance"
                );
                break;
            }
        }
        Ok(best_x)
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::Evaluation;

    /// Quadrática convexa `f(x) = ½ Σ c_i (x_i − t_i)²`.
    struct Quadratic {
        targets: Vec<f64>,
        curvatures: Vec<f64>,
        evaluations: usize,
    }

    impl DifferentiableFunction for Quadratic {
        fn dimension(&self) -> usize {
            self.targets.len()
        }
        fn evaluate(&mut self, x: &[f64]) -> CrfResult<Evaluation> {
            self.evaluations += 1;
            let mut value = 0.0;
            let mut gradient = vec![0.0; x.len()];
            for i in 0..x.len() {
                let d = x[i] - self.targets[i];
                value += 0.5 * self.curvatures[i] * d * d;
                gradient[i] = self.curvatures[i] * d;
            }
            Ok(Evaluation { value, gradient })
        }
    }

    /// Vale não quadrático de Rosenbrock em 2D.
    struct Rosenbrock;

    impl DifferentiableFunction for Rosenbrock {
        fn dimension(&self) -> usize {
            2
        }
        fn evaluate(&mut self, x: &[f64]) -> CrfResult<Evaluation> {
            let (a, b) = (x[0], x[1]);
            let value = (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2);
            let gradient = vec![
                -2.0 * (1.0 - a) - 400.0 * a * (b - a * a),
                200.0 * (b - a * a),
            ];
            Ok(Evaluation { value, gradient })
        }
    }

    #[test]
    fn test_converges_on_quadratic() {
        let mut f = Quadratic {
            targets: vec![1.0, -2.0, 0.5],
            curvatures: vec![1.0, 4.0, 0.25],
            evaluations: 0,
        };
        let mut qn = QnMinimizer::new(5, 200, 1e-12);
        let x = qn.minimize(&mut f, vec![0.0; 3]).unwrap();
        for (xi, ti) in x.iter().zip(&f.targets) {
            assert!((xi - ti).abs() < 1e-6);
        }
    }

    #[test]
    fn test_monotone_descent_under_line_search() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let values: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = values.clone();
        let mut f = Rosenbrock;
        let mut qn = QnMinimizer::new(7, 200, 0.0).with_monitor(
            1,
            Box::new(move |_, value, _| sink.borrow_mut().push(value)),
        );
        let x = qn.minimize(&mut f, vec![-1.2, 1.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-4);
        assert!((x[1] - 1.0).abs() < 1e-4);

        let log = values.borrow();
        assert!(log.len() > 2);
        for pair in log.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12, "objective increased");
        }
    }

    #[test]
    fn test_robust_mode_still_converges() {
        let mut f = Quadratic {
            targets: vec![3.0, -1.0],
            curvatures: vec![10.0, 0.1],
            evaluations: 0,
        };
        let mut qn = QnMinimizer::new(4, 300, 1e-14).robust();
        let x = qn.minimize(&mut f, vec![5.0, 5.0]).unwrap();
        assert!((x[0] - 3.0).abs() < 1e-5);
        assert!((x[1] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_iteration_cap_returns_best_so_far() {
        let mut f = Quadratic {
            targets: vec![1.0; 4],
            curvatures: vec![1.0; 4],
            evaluations: 0,
        };
        let mut qn = QnMinimizer::new(3, 2, 0.0);
        let start = vec![10.0; 4];
        let x = qn.minimize(&mut f, start.clone()).unwrap();
        let before = f.evaluate(&start).unwrap().value;
        let after = f.evaluate(&x).unwrap().value;
        assert!(after < before);
    }

    #[test]
    fn test_monitor_is_invoked() {
        use std::cell::Cell;
        use std::rc::Rc;
        let calls = Rc::new(Cell::new(0usize));
        let seen = calls.clone();
        let mut f = Quadratic {
            targets: vec![0.5, 0.5],
            curvatures: vec![2.0, 2.0],
            evaluations: 0,
        };
        let mut qn = QnMinimizer::new(3, 50, 1e-12).with_monitor(
            1,
            Box::new(move |_, _, _| seen.set(seen.get() + 1)),
        );
        qn.minimize(&mut f, vec![4.0, -4.0]).unwrap();
        assert!(calls.get() > 0);
    }
}
