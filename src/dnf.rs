//! Reduction to Denotational Normal Form
//!
//! The shaped tree is wrapped in an index vector of fresh loop indices, then
//! rewritten top-down until every whole-array operator has been pushed under
//! an explicit index. Rules are tried in order and the first match wins.
//!
//! Nodes produced by a rewrite carry the shape of the node they replace, so
//! after reduction every node in the expression reports the shape of the
//! iteration space rather than its own extent.

use crate::ast::{
    node_traversal_bounded, ArithOp, Attrib, Context, Element, Node, NodeRef, NodeSymbol, Shape,
    Traversal, DEFAULT_MAX_ITERATIONS,
};
use crate::error::{CompileError, CompileResult};
use crate::symbol::SymbolKind;

/// Which node symbols a pattern position accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolMatch {
    Exact(NodeSymbol),
    Elementwise,
    Outer,
    Inner,
    Reduce,
}

impl SymbolMatch {
    pub fn matches(&self, symbol: NodeSymbol) -> bool {
        match self {
            SymbolMatch::Exact(expected) => *expected == symbol,
            SymbolMatch::Elementwise => symbol.is_elementwise(),
            SymbolMatch::Outer => matches!(symbol, NodeSymbol::Outer(_)),
            SymbolMatch::Inner => matches!(symbol, NodeSymbol::Inner(_, _)),
            SymbolMatch::Reduce => matches!(symbol, NodeSymbol::Reduce(_)),
        }
    }
}

/// Tree pattern; an empty child list leaves the children unconstrained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Any,
    Node(SymbolMatch, Vec<Pattern>),
}

impl Pattern {
    pub fn symbol(symbol: NodeSymbol) -> Self {
        Pattern::Node(SymbolMatch::Exact(symbol), Vec::new())
    }

    /// `<anything> psi (X ...)` where X satisfies `inner`
    pub fn psi_over(inner: SymbolMatch) -> Self {
        Pattern::Node(
            SymbolMatch::Exact(NodeSymbol::Psi),
            vec![Pattern::Any, Pattern::Node(inner, Vec::new())],
        )
    }
}

type Rewrite = fn(&Context) -> CompileResult<Context>;

/// Ordered rewrite rules; more specific patterns must come first
fn reduction_rules() -> Vec<(Pattern, Rewrite)> {
    vec![
        (Pattern::psi_over(SymbolMatch::Exact(NodeSymbol::Assign)), reduce_psi_assign as Rewrite),
        (Pattern::psi_over(SymbolMatch::Exact(NodeSymbol::Psi)), reduce_psi_psi),
        (Pattern::psi_over(SymbolMatch::Exact(NodeSymbol::Transpose)), reduce_psi_transpose),
        (Pattern::psi_over(SymbolMatch::Exact(NodeSymbol::TransposeV)), reduce_psi_transpose_vector),
        (Pattern::psi_over(SymbolMatch::Elementwise), reduce_psi_elementwise),
        (Pattern::psi_over(SymbolMatch::Outer), reduce_psi_outer),
        (Pattern::psi_over(SymbolMatch::Inner), reduce_psi_inner),
        (Pattern::psi_over(SymbolMatch::Reduce), reduce_psi_reduce),
    ]
}

pub fn matches_rule(pattern: &Pattern, context: &Context) -> bool {
    match pattern {
        Pattern::Any => true,
        Pattern::Node(symbol, children) => {
            if !symbol.matches(context.ast.symbol) {
                return false;
            }
            if children.is_empty() {
                return true;
            }
            children.len() == context.num_children()
                && children
                    .iter()
                    .zip(&context.ast.children)
                    .all(|(child, node)| matches_rule(child, &context.with_ast(node.clone())))
        }
    }
}

/// Wrap the root in `<i0 i1 ..> psi root` with one fresh index per axis.
///
/// A root CONDITION keeps its guard as is; only the consequent is indexed.
pub fn add_indexing_node(context: Context) -> CompileResult<Context> {
    if context.ast.symbol == NodeSymbol::Condition {
        let guard = context.select_node(&[0])?.ast;
        let indexed = add_indexing_node(context.select_node(&[1])?)?;
        let node = Node::new(
            NodeSymbol::Condition,
            indexed.ast.shape.clone(),
            Attrib::None,
            vec![guard, indexed.ast.clone()],
        );
        return Ok(indexed.with_ast(node.into_ref()));
    }

    let shape = context.ast.shape.clone().ok_or_else(|| {
        CompileError::shape("reduction requires every node to have a shape")
    })?;

    let mut rewriter = Rewriter::new(context.clone());
    let indices = shape
        .iter()
        .map(|bound| rewriter.index(bound.clone()))
        .collect::<CompileResult<Vec<_>>>()?;
    let vector = rewriter.vector(indices)?;

    let node = Node::binary(NodeSymbol::Psi, Some(shape), vector, context.ast.clone());
    Ok(rewriter.finish(node))
}

/// Seed indexing and rewrite to a fixed point
pub fn reduce_to_dnf(context: Context) -> CompileResult<Context> {
    reduce_to_dnf_bounded(context, DEFAULT_MAX_ITERATIONS)
}

pub fn reduce_to_dnf_bounded(context: Context, max_iterations: usize) -> CompileResult<Context> {
    let rules = reduction_rules();
    let context = add_indexing_node(context)?;
    node_traversal_bounded(
        context,
        |context| {
            for (pattern, rewrite) in &rules {
                if matches_rule(pattern, context) {
                    return rewrite(context).map(Some);
                }
            }
            Ok(None)
        },
        Traversal::Preorder,
        max_iterations,
    )
}

/// Collects table growth while a rule builds its replacement
struct Rewriter {
    context: Context,
}

impl Rewriter {
    fn new(context: Context) -> Self {
        Self { context }
    }

    /// Known elements of an index vector operand
    fn values(&self, node: &NodeRef) -> CompileResult<Vec<Element>> {
        let name = match (node.symbol, node.name()) {
            (NodeSymbol::Array, Some(name)) => name,
            _ => {
                return Err(CompileError::unsupported(format!(
                    "index vector must be an array, found {}",
                    node.symbol
                )))
            }
        };
        self.context.symbol(name)?.value.clone().ok_or_else(|| {
            CompileError::unsupported(format!("index vector {} has no known values", name))
        })
    }

    /// Fresh vector constant holding `values`
    fn vector(&mut self, values: Vec<Element>) -> CompileResult<NodeRef> {
        let name = self.context.generate_unique_array_name();
        let shape = vec![Element::Int(values.len() as i64)];
        self.context = self.context.clone().add_symbol(
            &name,
            SymbolKind::Array,
            Some(shape.clone()),
            None,
            Some(values),
        )?;
        Ok(Node::array(name, Some(shape)).into_ref())
    }

    /// Fresh index ranging over `0..bound`
    fn index(&mut self, bound: Element) -> CompileResult<Element> {
        let name = self.context.generate_unique_index_name();
        self.context = self.context.clone().add_symbol(
            &name,
            SymbolKind::Index,
            Some(Vec::new()),
            None,
            Some(vec![Element::Int(0), bound, Element::Int(1)]),
        )?;
        Ok(Element::symbolic(name))
    }

    fn psi(&mut self, shape: &Option<Shape>, values: Vec<Element>, operand: &NodeRef) -> CompileResult<NodeRef> {
        let vector = self.vector(values)?;
        Ok(Node::binary(NodeSymbol::Psi, shape.clone(), vector, operand.clone()).into_ref())
    }

    fn finish(self, node: Node) -> Context {
        self.context.with_ast(node.into_ref())
    }
}

fn binary_children(node: &Node) -> CompileResult<(&NodeRef, &NodeRef)> {
    match node.children.as_slice() {
        [left, right] => Ok((left, right)),
        _ => Err(CompileError::unsupported(format!("{} must have two operands", node.symbol))),
    }
}

fn unary_child(node: &Node) -> CompileResult<&NodeRef> {
    match node.children.as_slice() {
        [child] => Ok(child),
        _ => Err(CompileError::unsupported(format!("{} must have one operand", node.symbol))),
    }
}

fn true_shape(node: &Node) -> CompileResult<&Shape> {
    node.shape.as_ref().ok_or_else(|| {
        CompileError::shape(format!("{} operand has no shape", node.symbol))
    })
}

fn is_scalar_array(node: &Node) -> bool {
    node.symbol == NodeSymbol::Array && node.shape.as_ref().map_or(false, Vec::is_empty)
}

/// `<i> psi (L := R)` => `(<i> psi L) := (<i> psi R)`
fn reduce_psi_assign(context: &Context) -> CompileResult<Context> {
    let node = &context.ast;
    let (vector, assign) = binary_children(node)?;
    let (left, right) = binary_children(assign)?;

    let left = Node::binary(NodeSymbol::Psi, node.shape.clone(), vector.clone(), left.clone());
    let right = Node::binary(NodeSymbol::Psi, node.shape.clone(), vector.clone(), right.clone());
    Ok(context.with_ast(
        Node::binary(NodeSymbol::Assign, node.shape.clone(), left.into_ref(), right.into_ref()).into_ref(),
    ))
}

/// `<i> psi (<j> psi X)` => `<j ++ i> psi X`
fn reduce_psi_psi(context: &Context) -> CompileResult<Context> {
    let node = &context.ast;
    let (outer, inner) = binary_children(node)?;
    let (inner_vector, operand) = binary_children(inner)?;

    let mut rewriter = Rewriter::new(context.clone());
    let mut values = rewriter.values(inner_vector)?;
    values.extend(rewriter.values(outer)?);
    let vector = rewriter.vector(values)?;

    Ok(rewriter.finish(Node::binary(NodeSymbol::Psi, node.shape.clone(), vector, operand.clone())))
}

/// `<i j k> psi tran X` => `<k j i> psi X`
fn reduce_psi_transpose(context: &Context) -> CompileResult<Context> {
    let node = &context.ast;
    let (vector, transpose) = binary_children(node)?;
    let operand = unary_child(transpose)?;

    let mut rewriter = Rewriter::new(context.clone());
    let mut values = rewriter.values(vector)?;
    if values.len() != true_shape(operand)?.len() {
        return Err(CompileError::unsupported(
            "psi over transpose requires a full index",
        ));
    }
    values.reverse();
    let vector = rewriter.vector(values)?;

    Ok(rewriter.finish(Node::binary(NodeSymbol::Psi, node.shape.clone(), vector, operand.clone())))
}

/// `<i> psi (<p> tranv X)` => `<x> psi X` with `x[j] = i[p[j]]`
fn reduce_psi_transpose_vector(context: &Context) -> CompileResult<Context> {
    let node = &context.ast;
    let (vector, transpose) = binary_children(node)?;
    let (permutation, operand) = binary_children(transpose)?;

    let mut rewriter = Rewriter::new(context.clone());
    let index = rewriter.values(vector)?;
    let permutation = rewriter.values(permutation)?;
    let values = permutation
        .iter()
        .map(|p| {
            p.as_int()
                .and_then(|p| usize::try_from(p).ok())
                .and_then(|p| index.get(p).cloned())
                .ok_or_else(|| {
                    CompileError::unsupported("psi over transpose vector requires a full index and concrete permutation")
                })
        })
        .collect::<CompileResult<Vec<_>>>()?;
    let vector = rewriter.vector(values)?;

    Ok(rewriter.finish(Node::binary(NodeSymbol::Psi, node.shape.clone(), vector, operand.clone())))
}

/// `<i> psi (A op B)` => `(<i> psi A) op (<i> psi B)`
///
/// Scalar arrays are left unindexed. Other rank-0 operands are indexed with
/// the empty vector so their own whole-array operators still reduce.
fn reduce_psi_elementwise(context: &Context) -> CompileResult<Context> {
    let node = &context.ast;
    let (vector, operation) = binary_children(node)?;
    let (left, right) = binary_children(operation)?;

    let mut rewriter = Rewriter::new(context.clone());
    let index = |rewriter: &mut Rewriter, operand: &NodeRef| -> CompileResult<NodeRef> {
        if is_scalar_array(operand) {
            Ok(operand.clone())
        } else if true_shape(operand)?.is_empty() {
            rewriter.psi(&node.shape, Vec::new(), operand)
        } else {
            Ok(Node::binary(NodeSymbol::Psi, node.shape.clone(), vector.clone(), operand.clone()).into_ref())
        }
    };
    let left = index(&mut rewriter, left)?;
    let right = index(&mut rewriter, right)?;

    Ok(rewriter.finish(Node::binary(operation.symbol, node.shape.clone(), left, right)))
}

/// `<i> psi (A .op B)` => `(<i_A> psi A) op (<i_B> psi B)` split at rank of A
fn reduce_psi_outer(context: &Context) -> CompileResult<Context> {
    let node = &context.ast;
    let (vector, outer) = binary_children(node)?;
    let (left, right) = binary_children(outer)?;
    let op = match outer.symbol {
        NodeSymbol::Outer(op) => op,
        other => return Err(CompileError::unsupported(format!("expected outer product, found {}", other))),
    };

    let mut rewriter = Rewriter::new(context.clone());
    let mut values = rewriter.values(vector)?;
    let split = true_shape(left)?.len();
    if split > values.len() {
        return Err(CompileError::unsupported("psi over outer product requires a full index"));
    }
    let right_values = values.split_off(split);

    let left = rewriter.psi(&node.shape, values, left)?;
    let right = rewriter.psi(&node.shape, right_values, right)?;
    Ok(rewriter.finish(Node::binary(NodeSymbol::Arith(op), node.shape.clone(), left, right)))
}

/// `<i> psi (A op1.op2 B)` => `op1-red[k] ((<i_A k> psi A) op2 (<k i_B> psi B))`
fn reduce_psi_inner(context: &Context) -> CompileResult<Context> {
    let node = &context.ast;
    let (vector, inner) = binary_children(node)?;
    let (left, right) = binary_children(inner)?;
    let (reduce_op, op): (ArithOp, ArithOp) = match inner.symbol {
        NodeSymbol::Inner(reduce_op, op) => (reduce_op, op),
        other => return Err(CompileError::unsupported(format!("expected inner product, found {}", other))),
    };

    let mut rewriter = Rewriter::new(context.clone());
    let mut values = rewriter.values(vector)?;
    let left_shape = true_shape(left)?;
    let (bound, left_rest) = match left_shape.split_last() {
        Some((bound, rest)) => (bound.clone(), rest.len()),
        None => return Err(CompileError::unsupported("inner product of a scalar")),
    };
    if left_rest > values.len() {
        return Err(CompileError::unsupported("psi over inner product requires a full index"));
    }
    let right_values = values.split_off(left_rest);

    let k = rewriter.index(bound)?;
    let k_name = k.symbol_name().map(str::to_string).unwrap_or_default();

    let mut left_values = values;
    left_values.push(k.clone());
    let mut right_index = vec![k];
    right_index.extend(right_values);

    let left = rewriter.psi(&node.shape, left_values, left)?;
    let right = rewriter.psi(&node.shape, right_index, right)?;
    let body = Node::binary(NodeSymbol::Arith(op), node.shape.clone(), left, right);
    Ok(rewriter.finish(Node::new(
        NodeSymbol::Reduce(reduce_op),
        node.shape.clone(),
        Attrib::Name(k_name),
        vec![body.into_ref()],
    )))
}

/// `<i> psi (op-red X)` => `op-red[k] (<k i> psi X)` for a fresh `k`
fn reduce_psi_reduce(context: &Context) -> CompileResult<Context> {
    let node = &context.ast;
    let (vector, reduce) = binary_children(node)?;
    let operand = unary_child(reduce)?;

    let mut rewriter = Rewriter::new(context.clone());
    let values = rewriter.values(vector)?;
    let bound = true_shape(operand)?
        .first()
        .cloned()
        .ok_or_else(|| CompileError::unsupported("reduction of a scalar"))?;

    let k = rewriter.index(bound)?;
    let k_name = k.symbol_name().map(str::to_string).unwrap_or_default();
    let mut index = vec![k];
    index.extend(values);

    let body = rewriter.psi(&node.shape, index, operand)?;
    Ok(rewriter.finish(Node::new(
        reduce.symbol,
        node.shape.clone(),
        Attrib::Name(k_name),
        vec![body],
    )))
}
