//! A small feed-forward network built from scalar graph nodes.
//!
//! Parameters are leaves allocated once, before any training step; a model
//! only keeps their [`NodeId`]s and re-enters the graph through
//! [`Graph::var`] on each forward pass.

use std::fmt;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    backwards::{Graph, NodeId, Var},
    error::{Error, Result},
};

/// Anything holding trainable parameters.
pub trait Module {
    /// Every parameter this module owns, in a stable order.
    fn parameters(&self) -> Vec<NodeId>;

    /// Resets the gradient of every parameter to zero. Gradients accumulate
    /// across backward passes, so call this before each one.
    fn zero_grad(&self, graph: &Graph) {
        graph.zero_grad(self.parameters());
    }

    fn num_parameters(&self) -> usize {
        self.parameters().len()
    }
}

/// Weighted sum of its inputs plus a bias, optionally followed by relu.
#[derive(Debug, Clone)]
pub struct Neuron {
    weights: Vec<NodeId>,
    bias: NodeId,
    nonlin: bool,
}

impl Neuron {
    /// Weights are drawn uniformly from [-1, 1]; the bias starts at zero.
    pub fn new<R: Rng + ?Sized>(graph: &Graph, nin: usize, nonlin: bool, rng: &mut R) -> Self {
        let weights = (0..nin)
            .map(|_| graph.leaf(rng.gen_range(-1.0..=1.0)).id())
            .collect();
        let bias = graph.leaf(0.0).id();
        Self {
            weights,
            bias,
            nonlin,
        }
    }

    pub fn forward<'g>(&self, graph: &'g Graph, inputs: &[Var<'g>]) -> Result<Var<'g>> {
        if inputs.is_empty() {
            return Err(Error::EmptyInput);
        }
        if inputs.len() != self.weights.len() {
            return Err(Error::InputSizeMismatch {
                expected: self.weights.len(),
                actual: inputs.len(),
            });
        }
        let weighted = self
            .weights
            .iter()
            .zip(inputs)
            .map(|(&w, &x)| graph.var(w) * x);
        let act = graph.sum(weighted) + graph.var(self.bias);
        Ok(if self.nonlin { act.relu() } else { act })
    }

    pub fn weights(&self) -> &[NodeId] {
        &self.weights
    }

    pub fn bias(&self) -> NodeId {
        self.bias
    }

    pub fn is_nonlinear(&self) -> bool {
        self.nonlin
    }
}

impl Module for Neuron {
    fn parameters(&self) -> Vec<NodeId> {
        let mut params = self.weights.clone();
        params.push(self.bias);
        params
    }
}

impl fmt::Display for Neuron {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.nonlin { "relu" } else { "linear" };
        write!(f, "Neuron({kind}, n_weights={})", self.weights.len())
    }
}

/// Neurons sharing one input vector.
#[derive(Debug, Clone)]
pub struct Layer {
    neurons: Vec<Neuron>,
}

impl Layer {
    pub fn new<R: Rng + ?Sized>(
        graph: &Graph,
        nin: usize,
        nout: usize,
        nonlin: bool,
        rng: &mut R,
    ) -> Self {
        let neurons = (0..nout)
            .map(|_| Neuron::new(graph, nin, nonlin, rng))
            .collect();
        Self { neurons }
    }

    pub fn forward<'g>(&self, graph: &'g Graph, inputs: &[Var<'g>]) -> Result<Vec<Var<'g>>> {
        self.neurons
            .iter()
            .map(|neuron| neuron.forward(graph, inputs))
            .collect()
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }
}

impl Module for Layer {
    fn parameters(&self) -> Vec<NodeId> {
        self.neurons.iter().flat_map(Module::parameters).collect()
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Layer(n_neurons={})[", self.neurons.len())?;
        for (i, neuron) in self.neurons.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{neuron}")?;
        }
        write!(f, "]")
    }
}

/// Stacked layers: relu on every layer except the last, which is linear.
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<Layer>,
}

impl Mlp {
    pub fn new<R: Rng + ?Sized>(
        graph: &Graph,
        nin: usize,
        layer_sizes: &[usize],
        rng: &mut R,
    ) -> Result<Self> {
        if nin == 0 {
            return Err(Error::InvalidArchitecture(
                "network needs at least one input".to_string(),
            ));
        }
        if layer_sizes.is_empty() {
            return Err(Error::InvalidArchitecture(
                "network needs at least one layer".to_string(),
            ));
        }
        if let Some(i) = layer_sizes.iter().position(|&n| n == 0) {
            return Err(Error::InvalidArchitecture(format!("layer {i} has no neurons")));
        }

        let last = layer_sizes.len() - 1;
        let mut layers = Vec::with_capacity(layer_sizes.len());
        let mut width = nin;
        for (i, &nout) in layer_sizes.iter().enumerate() {
            layers.push(Layer::new(graph, width, nout, i != last, rng));
            width = nout;
        }
        Ok(Self { layers })
    }

    /// Same as [`Mlp::new`] with a generator seeded from `seed`.
    pub fn with_seed(graph: &Graph, nin: usize, layer_sizes: &[usize], seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new(graph, nin, layer_sizes, &mut rng)
    }

    pub fn forward<'g>(&self, graph: &'g Graph, inputs: &[Var<'g>]) -> Result<Vec<Var<'g>>> {
        let mut x = inputs.to_vec();
        for layer in &self.layers {
            x = layer.forward(graph, &x)?;
        }
        Ok(x)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Number of values [`Mlp::forward`] expects.
    pub fn input_width(&self) -> usize {
        self.layers[0].neurons[0].weights.len()
    }

    /// Number of values [`Mlp::forward`] returns.
    pub fn output_width(&self) -> usize {
        self.layers[self.layers.len() - 1].neurons.len()
    }
}

impl Module for Mlp {
    fn parameters(&self) -> Vec<NodeId> {
        self.layers.iter().flat_map(Module::parameters).collect()
    }
}

impl fmt::Display for Mlp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mlp([")?;
        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{layer}")?;
        }
        write!(f, "])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn inputs<'g>(graph: &'g Graph, xs: &[f64]) -> Vec<Var<'g>> {
        xs.iter().map(|&x| graph.leaf(x)).collect()
    }

    #[test]
    fn neuron_computes_weighted_sum_plus_bias() {
        let graph = Graph::new();
        let mut rng = StdRng::seed_from_u64(1);
        let neuron = Neuron::new(&graph, 3, false, &mut rng);
        let weights: Vec<f64> = neuron.weights().iter().map(|&w| graph.value(w)).collect();
        assert!(weights.iter().all(|w| (-1.0..=1.0).contains(w)));
        graph.set_value(neuron.bias(), 0.25);

        let xs = [2.0, -1.0, 0.5];
        let out = neuron.forward(&graph, &inputs(&graph, &xs)).unwrap();
        let expected: f64 = weights.iter().zip(&xs).map(|(w, x)| w * x).sum::<f64>() + 0.25;
        assert_relative_eq!(out.value(), expected, epsilon = 1e-12);

        out.backward();
        for (&w, x) in neuron.weights().iter().zip(&xs) {
            assert_relative_eq!(graph.grad(w), *x);
        }
        assert_eq!(graph.grad(neuron.bias()), 1.0);
    }

    #[test]
    fn relu_neuron_clamps_negative_activation() {
        let graph = Graph::new();
        let mut rng = StdRng::seed_from_u64(3);
        let neuron = Neuron::new(&graph, 1, true, &mut rng);
        graph.set_value(neuron.weights()[0], 1.0);
        graph.set_value(neuron.bias(), -5.0);

        let out = neuron.forward(&graph, &inputs(&graph, &[2.0])).unwrap();
        assert_eq!(out.value(), 0.0);
        out.backward();
        assert_eq!(graph.grad(neuron.weights()[0]), 0.0);
    }

    #[test]
    fn neuron_rejects_bad_input() {
        let graph = Graph::new();
        let mut rng = StdRng::seed_from_u64(0);
        let neuron = Neuron::new(&graph, 2, true, &mut rng);
        assert_eq!(neuron.forward(&graph, &[]).unwrap_err(), Error::EmptyInput);
        assert_eq!(
            neuron
                .forward(&graph, &inputs(&graph, &[1.0, 2.0, 3.0]))
                .unwrap_err(),
            Error::InputSizeMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn parameters_are_ordered_and_complete() {
        let graph = Graph::new();
        let mlp = Mlp::with_seed(&graph, 3, &[4, 4, 1], 42).unwrap();
        // (3 + 1) * 4 + (4 + 1) * 4 + (4 + 1) * 1
        assert_eq!(mlp.num_parameters(), 41);
        assert_eq!(graph.len(), 41);

        let params = mlp.parameters();
        assert_eq!(params, mlp.parameters());
        let first = &mlp.layers()[0].neurons()[0];
        assert_eq!(&params[..3], first.weights());
        assert_eq!(params[3], first.bias());
    }

    #[test]
    fn only_the_last_layer_is_linear() {
        let graph = Graph::new();
        let mlp = Mlp::with_seed(&graph, 2, &[3, 3, 2], 5).unwrap();
        let flags: Vec<bool> = mlp
            .layers()
            .iter()
            .map(|layer| layer.neurons().iter().all(Neuron::is_nonlinear))
            .collect();
        assert_eq!(flags, vec![true, true, false]);
        assert_eq!(mlp.input_width(), 2);
        assert_eq!(mlp.output_width(), 2);
    }

    #[test]
    fn same_seed_same_weights() {
        let g1 = Graph::new();
        let g2 = Graph::new();
        let a = Mlp::with_seed(&g1, 3, &[4, 1], 9).unwrap();
        let b = Mlp::with_seed(&g2, 3, &[4, 1], 9).unwrap();
        let va: Vec<f64> = a.parameters().into_iter().map(|p| g1.value(p)).collect();
        let vb: Vec<f64> = b.parameters().into_iter().map(|p| g2.value(p)).collect();
        assert_eq!(va, vb);
    }

    #[test]
    fn zero_grad_clears_every_parameter() {
        let graph = Graph::new();
        let mlp = Mlp::with_seed(&graph, 3, &[4, 4, 1], 42).unwrap();
        let x = inputs(&graph, &[2.0, 3.0, -1.0]);
        let out = mlp.forward(&graph, &x).unwrap();
        assert_eq!(out.len(), 1);
        out[0].backward();
        let bias = mlp.layers()[2].neurons()[0].bias();
        assert_eq!(graph.grad(bias), 1.0);

        mlp.zero_grad(&graph);
        assert!(mlp.parameters().iter().all(|&p| graph.grad(p) == 0.0));
    }

    #[test]
    fn invalid_architectures_are_rejected() {
        let graph = Graph::new();
        assert!(matches!(
            Mlp::with_seed(&graph, 3, &[], 0),
            Err(Error::InvalidArchitecture(_))
        ));
        assert!(matches!(
            Mlp::with_seed(&graph, 3, &[4, 0], 0),
            Err(Error::InvalidArchitecture(_))
        ));
        assert!(matches!(
            Mlp::with_seed(&graph, 0, &[4], 0),
            Err(Error::InvalidArchitecture(_))
        ));
    }

    #[test]
    fn display_summarizes_structure() {
        let graph = Graph::new();
        let mlp = Mlp::with_seed(&graph, 2, &[2, 1], 0).unwrap();
        assert_eq!(
            mlp.to_string(),
            "Mlp([Layer(n_neurons=2)[Neuron(relu, n_weights=2), Neuron(relu, n_weights=2)], \
             Layer(n_neurons=1)[Neuron(linear, n_weights=2)]])"
        );
    }
}
