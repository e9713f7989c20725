//! Reverse-mode differentiation over a step-scoped arena of scalar nodes.

use std::{
    cell::RefCell,
    collections::HashSet,
    fmt,
    ops::{Add, Div, Mul, Neg, Sub},
};

use log::{debug, trace};

use crate::rules;

/// Integer handle of a node inside a [`Graph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// How a node was produced. Operands always refer to nodes created earlier,
/// so the operand relation cannot form a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Leaf,
    Add(NodeId, NodeId),
    Mul(NodeId, NodeId),
    /// The exponent is an operand for ordering purposes but never receives
    /// gradient.
    Pow { base: NodeId, exp: NodeId },
    Relu(NodeId),
}

impl Op {
    /// Operands in order: left before right, base before exponent.
    pub fn operands(&self) -> impl DoubleEndedIterator<Item = NodeId> {
        let pair = match *self {
            Op::Leaf => [None, None],
            Op::Add(a, b) | Op::Mul(a, b) => [Some(a), Some(b)],
            Op::Pow { base, exp } => [Some(base), Some(exp)],
            Op::Relu(a) => [Some(a), None],
        };
        pair.into_iter().flatten()
    }
}

#[derive(Clone, Copy, Debug)]
struct NodeData {
    value: f64,
    grad: f64,
    op: Op,
}

/// Arena length at some point in time. Nodes created after it can be freed
/// in bulk with [`Graph::truncate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint(usize);

#[derive(Default, Debug)]
pub struct Graph {
    nodes: RefCell<Vec<NodeData>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a constant or parameter node.
    pub fn leaf(&self, value: f64) -> Var<'_> {
        self.push(value, Op::Leaf)
    }

    /// Re-acquires a handle for a node created earlier, e.g. a parameter
    /// whose id a model keeps across steps.
    ///
    /// Panics if `id` was freed by [`Graph::truncate`].
    pub fn var(&self, id: NodeId) -> Var<'_> {
        let len = self.len();
        assert!(id.0 < len, "node {} is not in a graph of {} nodes", id.0, len);
        Var { graph: self, id }
    }

    fn push(&self, value: f64, op: Op) -> Var<'_> {
        let mut nodes = self.nodes.borrow_mut();
        let id = NodeId(nodes.len());
        nodes.push(NodeData {
            value,
            grad: 0.0,
            op,
        });
        Var { graph: self, id }
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value(&self, id: NodeId) -> f64 {
        self.nodes.borrow()[id.0].value
    }

    pub fn grad(&self, id: NodeId) -> f64 {
        self.nodes.borrow()[id.0].grad
    }

    pub fn op(&self, id: NodeId) -> Op {
        self.nodes.borrow()[id.0].op
    }

    /// Overwrites a value. Only meaningful for leaves: an optimizer moving a
    /// parameter between steps.
    pub fn set_value(&self, id: NodeId, value: f64) {
        self.nodes.borrow_mut()[id.0].value = value;
    }

    pub(crate) fn set_grad(&self, id: NodeId, grad: f64) {
        self.nodes.borrow_mut()[id.0].grad = grad;
    }

    pub fn zero_grad<I>(&self, ids: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut nodes = self.nodes.borrow_mut();
        for id in ids {
            nodes[id.0].grad = 0.0;
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.len())
    }

    /// Frees every node created after `checkpoint`. Requires exclusive access,
    /// so no [`Var`] handle can outlive the nodes it points at.
    pub fn truncate(&mut self, checkpoint: Checkpoint) {
        let nodes = self.nodes.get_mut();
        if checkpoint.0 < nodes.len() {
            debug!("freeing {} nodes", nodes.len() - checkpoint.0);
            nodes.truncate(checkpoint.0);
        }
    }

    /// Sums the terms left to right; an empty sum is a zero leaf.
    pub fn sum<'g, I>(&'g self, terms: I) -> Var<'g>
    where
        I: IntoIterator<Item = Var<'g>>,
    {
        terms
            .into_iter()
            .reduce(|acc, term| acc + term)
            .unwrap_or_else(|| self.leaf(0.0))
    }

    /// Post-order depth-first walk from `root`: every operand precedes the
    /// nodes that consume it and each reachable node appears exactly once.
    /// Nodes not reachable from `root` are left out.
    pub fn topological_order(&self, root: NodeId) -> Vec<NodeId> {
        let nodes = self.nodes.borrow();
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        // (node, operands already scheduled)
        let mut stack = vec![(root, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            // reversed so the first operand is walked first
            for operand in nodes[id.0].op.operands().rev() {
                if !visited.contains(&operand) {
                    stack.push((operand, false));
                }
            }
        }

        trace!("sorted {} of {} nodes", order.len(), nodes.len());
        order
    }

    /// Seeds `root` with gradient 1 and pushes gradient to every node it
    /// depends on. Gradients accumulate: call [`Graph::zero_grad`] on the
    /// parameters between passes.
    pub fn backward(&self, root: NodeId) {
        let order = self.topological_order(root);
        let mut nodes = self.nodes.borrow_mut();
        nodes[root.0].grad = 1.0;

        // All consumers of a node sit after it in `order`, so walking it in
        // reverse finishes a node's gradient before the node propagates it.
        for id in order.iter().rev() {
            let NodeData { value, grad, op } = nodes[id.0];
            match op {
                Op::Leaf => {}
                Op::Add(a, b) => {
                    nodes[a.0].grad += grad;
                    nodes[b.0].grad += grad;
                }
                Op::Mul(a, b) => {
                    let (va, vb) = (nodes[a.0].value, nodes[b.0].value);
                    nodes[a.0].grad += vb * grad;
                    nodes[b.0].grad += va * grad;
                }
                Op::Pow { base, exp } => {
                    let local = rules::pow_local_grad(nodes[base.0].value, nodes[exp.0].value);
                    nodes[base.0].grad += local * grad;
                }
                Op::Relu(a) => {
                    nodes[a.0].grad += rules::relu_local_grad(value) * grad;
                }
            }
        }
    }
}

/// A node handle tied to the lifetime of its graph.
#[derive(Clone, Copy)]
pub struct Var<'g> {
    graph: &'g Graph,
    id: NodeId,
}

impl<'g> Var<'g> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    pub fn value(&self) -> f64 {
        self.graph.value(self.id)
    }

    pub fn grad(&self) -> f64 {
        self.graph.grad(self.id)
    }

    pub fn op(&self) -> Op {
        self.graph.op(self.id)
    }

    pub fn operands(&self) -> Vec<Var<'g>> {
        self.op()
            .operands()
            .map(|id| Var {
                graph: self.graph,
                id,
            })
            .collect()
    }

    fn binary(self, rhs: Var<'g>, value: f64, op: Op) -> Var<'g> {
        debug_assert!(
            std::ptr::eq(self.graph, rhs.graph),
            "operands belong to different graphs"
        );
        self.graph.push(value, op)
    }

    /// `self^exp`. No gradient flows into `exp`.
    pub fn pow(self, exp: Var<'g>) -> Var<'g> {
        let value = rules::pow_forward(self.value(), exp.value());
        self.binary(
            exp,
            value,
            Op::Pow {
                base: self.id,
                exp: exp.id,
            },
        )
    }

    pub fn powf(self, exp: f64) -> Var<'g> {
        self.pow(self.graph.leaf(exp))
    }

    pub fn relu(self) -> Var<'g> {
        self.graph
            .push(rules::relu_forward(self.value()), Op::Relu(self.id))
    }

    pub fn backward(&self) {
        self.graph.backward(self.id);
    }

    pub fn topological_order(&self) -> Vec<NodeId> {
        self.graph.topological_order(self.id)
    }
}

impl fmt::Display for Var<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Var(data={}, grad={})", self.value(), self.grad())
    }
}

impl fmt::Debug for Var<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var")
            .field("id", &self.id.0)
            .field("value", &self.value())
            .field("grad", &self.grad())
            .field("op", &self.op())
            .finish()
    }
}

impl<'g> Add for Var<'g> {
    type Output = Var<'g>;

    fn add(self, rhs: Var<'g>) -> Var<'g> {
        let value = self.value() + rhs.value();
        self.binary(rhs, value, Op::Add(self.id, rhs.id))
    }
}

impl<'g> Mul for Var<'g> {
    type Output = Var<'g>;

    fn mul(self, rhs: Var<'g>) -> Var<'g> {
        let value = self.value() * rhs.value();
        self.binary(rhs, value, Op::Mul(self.id, rhs.id))
    }
}

impl<'g> Neg for Var<'g> {
    type Output = Var<'g>;

    fn neg(self) -> Var<'g> {
        self * self.graph.leaf(-1.0)
    }
}

impl<'g> Sub for Var<'g> {
    type Output = Var<'g>;

    fn sub(self, rhs: Var<'g>) -> Var<'g> {
        self + (-rhs)
    }
}

impl<'g> Div for Var<'g> {
    type Output = Var<'g>;

    fn div(self, rhs: Var<'g>) -> Var<'g> {
        self * rhs.powf(-1.0)
    }
}

// Mixed forms wrap the scalar as a fresh leaf and delegate.

impl<'g> Add<f64> for Var<'g> {
    type Output = Var<'g>;

    fn add(self, rhs: f64) -> Var<'g> {
        self + self.graph.leaf(rhs)
    }
}

impl<'g> Add<Var<'g>> for f64 {
    type Output = Var<'g>;

    fn add(self, rhs: Var<'g>) -> Var<'g> {
        rhs.graph.leaf(self) + rhs
    }
}

impl<'g> Mul<f64> for Var<'g> {
    type Output = Var<'g>;

    fn mul(self, rhs: f64) -> Var<'g> {
        self * self.graph.leaf(rhs)
    }
}

impl<'g> Mul<Var<'g>> for f64 {
    type Output = Var<'g>;

    fn mul(self, rhs: Var<'g>) -> Var<'g> {
        rhs.graph.leaf(self) * rhs
    }
}

impl<'g> Sub<f64> for Var<'g> {
    type Output = Var<'g>;

    fn sub(self, rhs: f64) -> Var<'g> {
        self - self.graph.leaf(rhs)
    }
}

impl<'g> Sub<Var<'g>> for f64 {
    type Output = Var<'g>;

    fn sub(self, rhs: Var<'g>) -> Var<'g> {
        rhs.graph.leaf(self) - rhs
    }
}

impl<'g> Div<f64> for Var<'g> {
    type Output = Var<'g>;

    fn div(self, rhs: f64) -> Var<'g> {
        self / self.graph.leaf(rhs)
    }
}

impl<'g> Div<Var<'g>> for f64 {
    type Output = Var<'g>;

    fn div(self, rhs: Var<'g>) -> Var<'g> {
        rhs.graph.leaf(self) / rhs
    }
}
