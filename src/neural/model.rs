// projeto: lstmcotacao
// file: src/neural/model.rs
// Stacked LSTM regressor: forward inference and back-propagation through time

use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView2, ArrayView3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::neural::utils::{sigmoid, tanh, Result, TrainingError};

/// Hyperparameters needed to rebuild the network before loading weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub output_size: usize,
    pub dropout: f64,
}

impl ModelConfig {
    pub fn new(hidden_size: usize, num_layers: usize, dropout: f64) -> Self {
        ModelConfig {
            input_size: 1,
            hidden_size,
            num_layers,
            output_size: 1,
            dropout,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.output_size == 0 {
            return Err(TrainingError::ModelConfiguration(
                "input_size and output_size must be positive".to_string(),
            ));
        }
        if self.hidden_size == 0 {
            return Err(TrainingError::ModelConfiguration(
                "hidden_size must be positive".to_string(),
            ));
        }
        if self.num_layers == 0 {
            return Err(TrainingError::ModelConfiguration(
                "num_layers must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TrainingError::ModelConfiguration(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::new(50, 3, 0.1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmLayerWeights {
    pub w_ii: Array2<f64>, // input gate, input weights
    pub w_if: Array2<f64>, // forget gate, input weights
    pub w_ig: Array2<f64>, // cell candidate, input weights
    pub w_io: Array2<f64>, // output gate, input weights
    pub w_hi: Array2<f64>, // input gate, hidden weights
    pub w_hf: Array2<f64>,
    pub w_hg: Array2<f64>,
    pub w_ho: Array2<f64>,
    pub b_i: Array1<f64>,
    pub b_f: Array1<f64>,
    pub b_g: Array1<f64>,
    pub b_o: Array1<f64>,
}

impl LstmLayerWeights {
    fn from_fn(input_size: usize, hidden_size: usize, mut init: impl FnMut() -> f64) -> Self {
        let mut matrix = |cols: usize| Array2::from_shape_fn((hidden_size, cols), |_| init());
        let w_ii = matrix(input_size);
        let w_if = matrix(input_size);
        let w_ig = matrix(input_size);
        let w_io = matrix(input_size);
        let w_hi = matrix(hidden_size);
        let w_hf = matrix(hidden_size);
        let w_hg = matrix(hidden_size);
        let w_ho = matrix(hidden_size);
        let mut vector = || Array1::from_shape_fn(hidden_size, |_| init());
        LstmLayerWeights {
            w_ii,
            w_if,
            w_ig,
            w_io,
            w_hi,
            w_hf,
            w_hg,
            w_ho,
            b_i: vector(),
            b_f: vector(),
            b_g: vector(),
            b_o: vector(),
        }
    }

    fn matrices(&self) -> [&Array2<f64>; 8] {
        [
            &self.w_ii, &self.w_if, &self.w_ig, &self.w_io, &self.w_hi, &self.w_hf, &self.w_hg,
            &self.w_ho,
        ]
    }

    fn matrices_mut(&mut self) -> [&mut Array2<f64>; 8] {
        [
            &mut self.w_ii,
            &mut self.w_if,
            &mut self.w_ig,
            &mut self.w_io,
            &mut self.w_hi,
            &mut self.w_hf,
            &mut self.w_hg,
            &mut self.w_ho,
        ]
    }

    fn biases(&self) -> [&Array1<f64>; 4] {
        [&self.b_i, &self.b_f, &self.b_g, &self.b_o]
    }

    fn biases_mut(&mut self) -> [&mut Array1<f64>; 4] {
        [&mut self.b_i, &mut self.b_f, &mut self.b_g, &mut self.b_o]
    }
}

/// Linear projection `[output, hidden]` applied to the last hidden state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputLayerWeights {
    pub w: Array2<f64>,
    pub b: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    pub layers: Vec<LstmLayerWeights>,
    pub output: OutputLayerWeights,
}

impl ModelWeights {
    fn from_fn(config: &ModelConfig, mut init: impl FnMut() -> f64) -> Self {
        let layers = (0..config.num_layers)
            .map(|i| {
                let input_size = if i == 0 { config.input_size } else { config.hidden_size };
                LstmLayerWeights::from_fn(input_size, config.hidden_size, &mut init)
            })
            .collect();
        let output = OutputLayerWeights {
            w: Array2::from_shape_fn((config.output_size, config.hidden_size), |_| init()),
            b: Array1::from_shape_fn(config.output_size, |_| init()),
        };
        ModelWeights { layers, output }
    }

    pub fn zeros(config: &ModelConfig) -> Self {
        Self::from_fn(config, || 0.0)
    }

    pub fn zeros_like(&self) -> Self {
        ModelWeights {
            layers: self
                .layers
                .iter()
                .map(|l| LstmLayerWeights {
                    w_ii: Array2::zeros(l.w_ii.raw_dim()),
                    w_if: Array2::zeros(l.w_if.raw_dim()),
                    w_ig: Array2::zeros(l.w_ig.raw_dim()),
                    w_io: Array2::zeros(l.w_io.raw_dim()),
                    w_hi: Array2::zeros(l.w_hi.raw_dim()),
                    w_hf: Array2::zeros(l.w_hf.raw_dim()),
                    w_hg: Array2::zeros(l.w_hg.raw_dim()),
                    w_ho: Array2::zeros(l.w_ho.raw_dim()),
                    b_i: Array1::zeros(l.b_i.raw_dim()),
                    b_f: Array1::zeros(l.b_f.raw_dim()),
                    b_g: Array1::zeros(l.b_g.raw_dim()),
                    b_o: Array1::zeros(l.b_o.raw_dim()),
                })
                .collect(),
            output: OutputLayerWeights {
                w: Array2::zeros(self.output.w.raw_dim()),
                b: Array1::zeros(self.output.b.raw_dim()),
            },
        }
    }

    pub fn num_parameters(&self) -> usize {
        let recurrent: usize = self
            .layers
            .iter()
            .map(|l| {
                l.matrices().iter().map(|m| m.len()).sum::<usize>()
                    + l.biases().iter().map(|b| b.len()).sum::<usize>()
            })
            .sum();
        recurrent + self.output.w.len() + self.output.b.len()
    }

    /// Layer by layer, gate matrices then biases, output layer last.
    pub fn flatten(&self) -> Array1<f64> {
        let mut flat = Vec::with_capacity(self.num_parameters());
        for layer in &self.layers {
            for m in layer.matrices() {
                flat.extend(m.iter().copied());
            }
            for b in layer.biases() {
                flat.extend(b.iter().copied());
            }
        }
        flat.extend(self.output.w.iter().copied());
        flat.extend(self.output.b.iter().copied());
        Array1::from(flat)
    }

    /// Inverse of [`ModelWeights::flatten`].
    pub fn assign_flat(&mut self, flat: &Array1<f64>) -> Result<()> {
        let expected = self.num_parameters();
        if flat.len() != expected {
            return Err(TrainingError::shape_mismatch(
                format!("{} parameters", expected),
                flat.len(),
            ));
        }
        let mut values = flat.iter();
        for layer in &mut self.layers {
            for m in layer.matrices_mut() {
                for (dst, src) in m.iter_mut().zip(values.by_ref()) {
                    *dst = *src;
                }
            }
            for b in layer.biases_mut() {
                for (dst, src) in b.iter_mut().zip(values.by_ref()) {
                    *dst = *src;
                }
            }
        }
        for (dst, src) in self.output.w.iter_mut().zip(values.by_ref()) {
            *dst = *src;
        }
        for (dst, src) in self.output.b.iter_mut().zip(values.by_ref()) {
            *dst = *src;
        }
        Ok(())
    }

    /// Every tensor shape, in flatten order.
    fn shapes(&self) -> Vec<Vec<usize>> {
        let mut shapes = Vec::new();
        for layer in &self.layers {
            shapes.extend(layer.matrices().iter().map(|m| m.shape().to_vec()));
            shapes.extend(layer.biases().iter().map(|b| b.shape().to_vec()));
        }
        shapes.push(self.output.w.shape().to_vec());
        shapes.push(self.output.b.shape().to_vec());
        shapes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Train,
    Eval,
}

/// Operations the trainer, evaluator and store rely on.
pub trait SequenceModel: Sized {
    /// Tag written to the metadata artifact and checked on load.
    const ARCHITECTURE: &'static str;

    /// Uninitialised (zero) instance, ready for `load_weights`.
    fn from_config(config: ModelConfig) -> Result<Self>;
    fn config(&self) -> &ModelConfig;
    fn weights(&self) -> &ModelWeights;
    fn load_weights(&mut self, weights: ModelWeights) -> Result<()>;

    fn parameters(&self) -> Array1<f64> {
        self.weights().flatten()
    }
    fn set_parameters(&mut self, flat: &Array1<f64>) -> Result<()>;

    fn train(&mut self);
    fn eval(&mut self);
    fn is_training(&self) -> bool;

    /// Deterministic inference, `[B, w, input]` -> `[B, output]`.
    fn forward(&self, x: &ArrayView3<f64>) -> Result<Array2<f64>>;

    /// Mean squared error over the batch and its gradient in flatten order.
    fn loss_and_gradients<R: Rng>(
        &self,
        x: &ArrayView3<f64>,
        y: &ArrayView2<f64>,
        rng: &mut R,
    ) -> Result<(f64, Array1<f64>)>;
}

#[derive(Debug, Clone)]
struct StepCache {
    input: Array2<f64>,
    h_prev: Array2<f64>,
    c_prev: Array2<f64>,
    i: Array2<f64>,
    f: Array2<f64>,
    g: Array2<f64>,
    o: Array2<f64>,
    tanh_c: Array2<f64>,
}

struct ForwardPass {
    prediction: Array2<f64>,
    last_hidden: Array2<f64>,
    caches: Vec<Vec<StepCache>>,
    // masks[l][t] scales the outputs of layer l, only for l < num_layers - 1
    masks: Vec<Vec<Array2<f64>>>,
}

#[derive(Debug, Clone)]
pub struct LstmRegressor {
    config: ModelConfig,
    weights: ModelWeights,
    mode: Mode,
}

impl LstmRegressor {
    /// Uniform init in `±1/sqrt(hidden_size)` for every tensor.
    pub fn new<R: Rng>(config: ModelConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let k = 1.0 / (config.hidden_size as f64).sqrt();
        let weights = ModelWeights::from_fn(&config, || rng.random_range(-k..k));
        let model = LstmRegressor {
            config,
            weights,
            mode: Mode::Eval,
        };
        info!(
            "🛠️ LSTM inicializada: {} camada(s), {} unidades ocultas, dropout {:.2}, {} parâmetros",
            model.config.num_layers,
            model.config.hidden_size,
            model.config.dropout,
            model.weights.num_parameters()
        );
        Ok(model)
    }

    fn check_input(&self, x: &ArrayView3<f64>) -> Result<()> {
        let (_, steps, features) = x.dim();
        if features != self.config.input_size {
            return Err(TrainingError::shape_mismatch(
                format!("{} feature(s) per step", self.config.input_size),
                format!("{:?}", x.shape()),
            ));
        }
        if steps == 0 {
            return Err(TrainingError::shape_mismatch(
                "at least one time step",
                format!("{:?}", x.shape()),
            ));
        }
        Ok(())
    }

    fn run<R: Rng>(
        &self,
        x: &ArrayView3<f64>,
        mut dropout_rng: Option<&mut R>,
        keep_cache: bool,
    ) -> Result<ForwardPass> {
        self.check_input(x)?;
        let (batch, steps, _) = x.dim();
        let hidden = self.config.hidden_size;
        let p = self.config.dropout;
        let last_layer = self.weights.layers.len() - 1;

        let mut inputs: Vec<Array2<f64>> =
            (0..steps).map(|t| x.slice(s![.., t, ..]).to_owned()).collect();
        let mut caches = Vec::with_capacity(self.weights.layers.len());
        let mut masks = Vec::with_capacity(last_layer);

        for (l, layer) in self.weights.layers.iter().enumerate() {
            let mut h = Array2::<f64>::zeros((batch, hidden));
            let mut c = Array2::<f64>::zeros((batch, hidden));
            let mut outputs = Vec::with_capacity(steps);
            let mut layer_cache = Vec::with_capacity(if keep_cache { steps } else { 0 });

            for x_t in inputs {
                let i = sigmoid(&(x_t.dot(&layer.w_ii.t()) + h.dot(&layer.w_hi.t()) + &layer.b_i));
                let f = sigmoid(&(x_t.dot(&layer.w_if.t()) + h.dot(&layer.w_hf.t()) + &layer.b_f));
                let g = tanh(&(x_t.dot(&layer.w_ig.t()) + h.dot(&layer.w_hg.t()) + &layer.b_g));
                let o = sigmoid(&(x_t.dot(&layer.w_io.t()) + h.dot(&layer.w_ho.t()) + &layer.b_o));

                let c_new = &f * &c + &i * &g;
                let tanh_c = tanh(&c_new);
                let h_new = &o * &tanh_c;

                if keep_cache {
                    layer_cache.push(StepCache {
                        input: x_t,
                        h_prev: h,
                        c_prev: c,
                        i,
                        f,
                        g,
                        o,
                        tanh_c,
                    });
                }
                h = h_new;
                c = c_new;
                outputs.push(h.clone());
            }

            if l < last_layer {
                if let Some(rng) = dropout_rng.as_deref_mut() {
                    let scale = 1.0 / (1.0 - p);
                    let mut layer_masks = Vec::with_capacity(steps);
                    for out in outputs.iter_mut() {
                        let mask = Array2::from_shape_fn(out.raw_dim(), |_| {
                            if rng.random::<f64>() < p { 0.0 } else { scale }
                        });
                        *out *= &mask;
                        layer_masks.push(mask);
                    }
                    masks.push(layer_masks);
                }
            }

            caches.push(layer_cache);
            inputs = outputs;
        }

        let last_hidden = inputs
            .pop()
            .ok_or_else(|| TrainingError::shape_mismatch("at least one time step", 0))?;
        let prediction = last_hidden.dot(&self.weights.output.w.t()) + &self.weights.output.b;
        Ok(ForwardPass {
            prediction,
            last_hidden,
            caches,
            masks,
        })
    }

    fn backward(&self, pass: &ForwardPass, d_prediction: &Array2<f64>) -> ModelWeights {
        let mut grads = self.weights.zeros_like();
        let steps = pass.caches.first().map_or(0, |c| c.len());
        let batch = d_prediction.nrows();
        let hidden = self.config.hidden_size;

        grads.output.w = d_prediction.t().dot(&pass.last_hidden);
        grads.output.b = d_prediction.sum_axis(Axis(0));

        // gradient w.r.t. each (masked) output of the current layer
        let mut d_outputs: Vec<Array2<f64>> = vec![Array2::zeros((batch, hidden)); steps];
        if let Some(last) = d_outputs.last_mut() {
            *last = d_prediction.dot(&self.weights.output.w);
        }

        for (l, layer) in self.weights.layers.iter().enumerate().rev() {
            if let Some(layer_masks) = pass.masks.get(l) {
                for (d, mask) in d_outputs.iter_mut().zip(layer_masks) {
                    *d *= mask;
                }
            }

            let grad = &mut grads.layers[l];
            let input_size = layer.w_ii.ncols();
            let mut d_inputs: Vec<Array2<f64>> = vec![Array2::zeros((batch, input_size)); steps];
            let mut dh_next = Array2::<f64>::zeros((batch, hidden));
            let mut dc_next = Array2::<f64>::zeros((batch, hidden));

            for t in (0..steps).rev() {
                let cache = &pass.caches[l][t];
                let dh = &d_outputs[t] + &dh_next;

                let d_o = &dh * &cache.tanh_c;
                let dc = &dh * &cache.o * &cache.tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;
                let d_i = &dc * &cache.g;
                let d_g = &dc * &cache.i;
                let d_f = &dc * &cache.c_prev;
                dc_next = &dc * &cache.f;

                let da_i = d_i * &cache.i.mapv(|v| v * (1.0 - v));
                let da_f = d_f * &cache.f.mapv(|v| v * (1.0 - v));
                let da_g = d_g * &cache.g.mapv(|v| 1.0 - v * v);
                let da_o = d_o * &cache.o.mapv(|v| v * (1.0 - v));

                grad.w_ii += &da_i.t().dot(&cache.input);
                grad.w_if += &da_f.t().dot(&cache.input);
                grad.w_ig += &da_g.t().dot(&cache.input);
                grad.w_io += &da_o.t().dot(&cache.input);
                grad.w_hi += &da_i.t().dot(&cache.h_prev);
                grad.w_hf += &da_f.t().dot(&cache.h_prev);
                grad.w_hg += &da_g.t().dot(&cache.h_prev);
                grad.w_ho += &da_o.t().dot(&cache.h_prev);
                grad.b_i += &da_i.sum_axis(Axis(0));
                grad.b_f += &da_f.sum_axis(Axis(0));
                grad.b_g += &da_g.sum_axis(Axis(0));
                grad.b_o += &da_o.sum_axis(Axis(0));

                d_inputs[t] = da_i.dot(&layer.w_ii)
                    + da_f.dot(&layer.w_if)
                    + da_g.dot(&layer.w_ig)
                    + da_o.dot(&layer.w_io);
                dh_next = da_i.dot(&layer.w_hi)
                    + da_f.dot(&layer.w_hf)
                    + da_g.dot(&layer.w_hg)
                    + da_o.dot(&layer.w_ho);
            }
            d_outputs = d_inputs;
        }
        grads
    }
}

fn mean_squared_error(prediction: &Array2<f64>, target: &ArrayView2<f64>) -> f64 {
    let n = prediction.len().max(1) as f64;
    prediction
        .iter()
        .zip(target.iter())
        .map(|(p, t)| (p - t).powi(2))
        .sum::<f64>()
        / n
}

impl SequenceModel for LstmRegressor {
    const ARCHITECTURE: &'static str = "lstm";

    fn from_config(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let weights = ModelWeights::zeros(&config);
        Ok(LstmRegressor {
            config,
            weights,
            mode: Mode::Eval,
        })
    }

    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn weights(&self) -> &ModelWeights {
        &self.weights
    }

    fn load_weights(&mut self, weights: ModelWeights) -> Result<()> {
        let expected = self.weights.shapes();
        let actual = weights.shapes();
        if expected != actual {
            return Err(TrainingError::ArchitectureMismatch(format!(
                "weight shapes {:?} do not match the configured network {:?}",
                actual, expected
            )));
        }
        self.weights = weights;
        debug!("📥 Pesos carregados ({} parâmetros)", self.weights.num_parameters());
        Ok(())
    }

    fn set_parameters(&mut self, flat: &Array1<f64>) -> Result<()> {
        self.weights.assign_flat(flat)
    }

    fn train(&mut self) {
        self.mode = Mode::Train;
    }

    fn eval(&mut self) {
        self.mode = Mode::Eval;
    }

    fn is_training(&self) -> bool {
        self.mode == Mode::Train
    }

    fn forward(&self, x: &ArrayView3<f64>) -> Result<Array2<f64>> {
        let pass = self.run::<rand::rngs::StdRng>(x, None, false)?;
        Ok(pass.prediction)
    }

    fn loss_and_gradients<R: Rng>(
        &self,
        x: &ArrayView3<f64>,
        y: &ArrayView2<f64>,
        rng: &mut R,
    ) -> Result<(f64, Array1<f64>)> {
        let expected = (x.len_of(Axis(0)), self.config.output_size);
        if y.dim() != expected {
            return Err(TrainingError::shape_mismatch(
                format!("targets of shape {:?}", expected),
                format!("{:?}", y.shape()),
            ));
        }
        let use_dropout = self.is_training() && self.config.dropout > 0.0;
        let pass = self.run(x, if use_dropout { Some(rng) } else { None }, true)?;

        let loss = mean_squared_error(&pass.prediction, y);
        let n = pass.prediction.len().max(1) as f64;
        let d_prediction = (&pass.prediction - y) * (2.0 / n);
        let grads = self.backward(&pass, &d_prediction);
        Ok((loss, grads.flatten()))
    }
}
