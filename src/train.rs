//! Plain gradient descent over a sum-of-squared-error loss.

use log::{debug, info};

use crate::{
    backwards::{Graph, NodeId, Var},
    config::TrainConfig,
    error::{Error, Result},
    nn::{Mlp, Module},
};

/// Input rows with one scalar target each.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: Vec<Vec<f64>>,
    targets: Vec<f64>,
}

impl Dataset {
    pub fn new(inputs: Vec<Vec<f64>>, targets: Vec<f64>) -> Result<Self> {
        if inputs.is_empty() {
            return Err(Error::EmptyInput);
        }
        if inputs.len() != targets.len() {
            return Err(Error::TargetSizeMismatch {
                expected: inputs.len(),
                actual: targets.len(),
            });
        }
        let width = inputs[0].len();
        if width == 0 {
            return Err(Error::EmptyInput);
        }
        if let Some(row) = inputs.iter().find(|row| row.len() != width) {
            return Err(Error::InputSizeMismatch {
                expected: width,
                actual: row.len(),
            });
        }
        Ok(Self { inputs, targets })
    }

    /// Four samples in three dimensions with ±1 targets.
    pub fn xor_demo() -> Self {
        Self {
            inputs: vec![
                vec![2.0, 3.0, -1.0],
                vec![3.0, -1.0, 0.5],
                vec![0.5, 1.0, 1.0],
                vec![1.0, 1.0, -1.0],
            ],
            targets: vec![1.0, -1.0, -1.0, 1.0],
        }
    }

    pub fn input_width(&self) -> usize {
        self.inputs[0].len()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn inputs(&self) -> &[Vec<f64>] {
        &self.inputs
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }
}

/// Σ (prediction - target)²
pub fn sum_squared_error<'g>(
    graph: &'g Graph,
    predictions: &[Var<'g>],
    targets: &[f64],
) -> Result<Var<'g>> {
    if predictions.is_empty() {
        return Err(Error::EmptyInput);
    }
    if predictions.len() != targets.len() {
        return Err(Error::TargetSizeMismatch {
            expected: predictions.len(),
            actual: targets.len(),
        });
    }
    let terms = predictions
        .iter()
        .zip(targets)
        .map(|(&p, &t)| (p - graph.leaf(t)).powf(2.0));
    Ok(graph.sum(terms))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    pub learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }

    /// Moves each parameter against its gradient.
    pub fn step(&self, graph: &Graph, params: &[NodeId]) {
        for &p in params {
            let value = graph.value(p) - self.learning_rate * graph.grad(p);
            graph.set_value(p, value);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    /// Loss at every step, measured before that step's update.
    pub losses: Vec<f64>,
    /// Network output for each sample on the last step.
    pub predictions: Vec<f64>,
    /// Loss and predictions at every `log_every` step, starting with step 0.
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub step: usize,
    pub loss: f64,
    pub predictions: Vec<f64>,
}

impl TrainReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.losses.last().copied()
    }
}

pub struct Trainer {
    config: TrainConfig,
    optimizer: Sgd,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Result<Self> {
        config.validate()?;
        if config.layer_sizes.last() != Some(&1) {
            return Err(Error::InvalidArchitecture(format!(
                "last layer must have a single output, got {:?}",
                config.layer_sizes
            )));
        }
        let optimizer = Sgd::new(config.learning_rate);
        Ok(Self { config, optimizer })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Builds a network whose parameters sit at the bottom of `graph`.
    pub fn build_model(&self, graph: &Graph, dataset: &Dataset) -> Result<Mlp> {
        Mlp::with_seed(
            graph,
            dataset.input_width(),
            &self.config.layer_sizes,
            self.config.seed,
        )
    }

    /// Runs `config.steps` rounds of forward, zero, backward and update.
    /// Each round's graph is freed before the next one is built, also when
    /// the round fails.
    pub fn fit(&self, graph: &mut Graph, model: &Mlp, dataset: &Dataset) -> Result<TrainReport> {
        if model.output_width() != 1 {
            return Err(Error::InvalidArchitecture(format!(
                "model must have a single output, got {}",
                model.output_width()
            )));
        }
        if model.input_width() != dataset.input_width() {
            return Err(Error::InputSizeMismatch {
                expected: model.input_width(),
                actual: dataset.input_width(),
            });
        }

        let params = model.parameters();
        let mut report = TrainReport::default();

        for step in 0..self.config.steps {
            let checkpoint = graph.checkpoint();
            let result = self.step(graph, model, dataset, &params);
            graph.truncate(checkpoint);
            let (loss, predictions) = result?;
            debug!("step {}: loss {:.6}", step, loss);
            if step % self.config.log_every == 0 {
                info!("step {:>4} loss {:.6}", step + 1, loss);
                report.snapshots.push(Snapshot {
                    step,
                    loss,
                    predictions: predictions.clone(),
                });
            }
            report.losses.push(loss);
            report.predictions = predictions;
        }
        Ok(report)
    }

    fn step(
        &self,
        graph: &Graph,
        model: &Mlp,
        dataset: &Dataset,
        params: &[NodeId],
    ) -> Result<(f64, Vec<f64>)> {
        let mut outputs = Vec::with_capacity(dataset.len());
        for row in dataset.inputs() {
            let x: Vec<Var> = row.iter().map(|&v| graph.leaf(v)).collect();
            let y = model.forward(graph, &x)?;
            outputs.push(y[0]);
        }
        let loss = sum_squared_error(graph, &outputs, dataset.targets())?;

        model.zero_grad(graph);
        loss.backward();
        self.optimizer.step(graph, params);

        Ok((loss.value(), outputs.iter().map(Var::value).collect()))
    }
}
