//! Shape inference
//!
//! A postorder pass that annotates every node with its shape. Checks that
//! cannot be decided at compile time because a dimension is symbolic become
//! comparison nodes, gathered under a single CONDITION node at the root.

use std::rc::Rc;

use crate::ast::{
    node_traversal, Attrib, CompareOp, Context, Element, LogicOp, Node, NodeRef, NodeSymbol, Shape,
    Traversal,
};
use crate::error::{CompileError, CompileResult};
use crate::symbol::SymbolKind;

/// Rank of the node at the root of `context`
pub fn dimension(context: &Context) -> CompileResult<usize> {
    if context.ast.symbol == NodeSymbol::Array {
        if let Some(shape) = &context.array_symbol()?.shape {
            return Ok(shape.len());
        }
    } else if let Some(shape) = &context.ast.shape {
        return Ok(shape.len());
    }
    Err(CompileError::shape(format!(
        "cannot determine dimension of {} node with unknown shape",
        context.ast.symbol
    )))
}

pub fn is_scalar(context: &Context) -> CompileResult<bool> {
    Ok(context.ast.symbol == NodeSymbol::Array && dimension(context)? == 0)
}

pub fn is_vector(context: &Context) -> CompileResult<bool> {
    Ok(context.ast.symbol == NodeSymbol::Array && dimension(context)? == 1)
}

/// Annotate every node of the tree with its shape
pub fn calculate_shapes(context: Context) -> CompileResult<Context> {
    node_traversal(context, shape_node, Traversal::Postorder)
}

/// Table growth and deferred runtime checks produced while shaping one node
struct Constraints {
    context: Context,
    conditions: Vec<NodeRef>,
}

impl Constraints {
    fn child(&self, index: usize) -> CompileResult<&NodeRef> {
        self.context.ast.child(index).ok_or_else(|| {
            CompileError::shape(format!("{} is missing operand {}", self.context.ast.symbol, index))
        })
    }

    fn child_shape(&self, index: usize) -> CompileResult<&Shape> {
        let child = self.child(index)?;
        child.shape.as_ref().ok_or_else(|| {
            CompileError::shape(format!(
                "operand {} of {} has no shape",
                index, self.context.ast.symbol
            ))
        })
    }

    /// Known values of an ARRAY operand, if the table has them
    fn child_values(&self, index: usize) -> CompileResult<Option<Vec<Element>>> {
        let child = self.child(index)?;
        match (child.symbol, child.name()) {
            (NodeSymbol::Array, Some(name)) => Ok(self.context.symbol(name)?.value.clone()),
            _ => Ok(None),
        }
    }

    /// Rank-0 node standing for `element` inside a runtime comparison
    fn element_node(&mut self, element: &Element) -> CompileResult<NodeRef> {
        match element {
            Element::Symbolic(node) => Ok(Rc::clone(node)),
            Element::Int(value) => {
                let name = self.context.generate_unique_array_name();
                self.context = self.context.clone().add_symbol(
                    &name,
                    SymbolKind::Array,
                    Some(Vec::new()),
                    None,
                    Some(vec![Element::Int(*value)]),
                )?;
                Ok(Node::array(name, Some(Vec::new())).into_ref())
            }
        }
    }

    fn compare(&mut self, op: CompareOp, left: &Element, right: &Element) -> CompileResult<()> {
        let left = self.element_node(left)?;
        let right = self.element_node(right)?;
        self.conditions
            .push(Node::binary(NodeSymbol::Compare(op), Some(Vec::new()), left, right).into_ref());
        Ok(())
    }

    /// Unify one axis of two shapes, deferring to runtime when symbolic
    fn match_axis(&mut self, axis: usize, left: &Element, right: &Element) -> CompileResult<Element> {
        match (left, right) {
            (Element::Int(l), Element::Int(r)) if l == r => Ok(left.clone()),
            (Element::Int(l), Element::Int(r)) => Err(CompileError::shape(format!(
                "{} requires shapes to match at axis {}: left {} != right {}",
                self.context.ast.symbol, axis, l, r
            ))),
            (Element::Symbolic(_), Element::Symbolic(_)) if left == right => Ok(left.clone()),
            (Element::Symbolic(_), Element::Int(_)) => {
                self.compare(CompareOp::Equal, left, right)?;
                Ok(right.clone())
            }
            _ => {
                self.compare(CompareOp::Equal, left, right)?;
                Ok(left.clone())
            }
        }
    }

    fn match_shapes(&mut self, left: &Shape, right: &Shape) -> CompileResult<Shape> {
        if left.len() != right.len() {
            return Err(CompileError::shape(format!(
                "{} requires dimension to match or one operand to be scalar, got ranks {} and {}",
                self.context.ast.symbol,
                left.len(),
                right.len()
            )));
        }
        left.iter()
            .zip(right)
            .enumerate()
            .map(|(axis, (l, r))| self.match_axis(axis, l, r))
            .collect()
    }
}

fn shape_node(context: &Context) -> CompileResult<Option<Context>> {
    let (node, mut conditions) = hoist_conditions(&context.ast);

    if let NodeSymbol::Reduce(_) = node.symbol {
        if let Some(operand) = node.child(0) {
            if operand.shape.as_ref().map_or(false, Vec::is_empty) {
                // reducing a scalar is the scalar itself
                let operand = Rc::clone(operand);
                return Ok(Some(wrap_conditions(context.with_ast(operand), conditions)));
            }
        }
    }

    if node.symbol == NodeSymbol::Condition {
        return shape_condition(context.with_ast(node), conditions).map(Some);
    }

    let mut constraints = Constraints {
        context: context.with_ast(Rc::clone(&node)),
        conditions: Vec::new(),
    };
    let shape = match node.symbol {
        NodeSymbol::Array => shape_array(&constraints)?,
        NodeSymbol::Transpose => shape_transpose(&constraints)?,
        NodeSymbol::TransposeV => shape_transpose_vector(&constraints)?,
        NodeSymbol::Assign => shape_assign(&mut constraints)?,
        NodeSymbol::Shape => vec![Element::Int(constraints.child_shape(0)?.len() as i64)],
        NodeSymbol::Dim => Vec::new(),
        NodeSymbol::Psi => shape_psi(&mut constraints)?,
        NodeSymbol::Arith(_) | NodeSymbol::Compare(_) | NodeSymbol::Logic(_) => {
            shape_elementwise(&mut constraints)?
        }
        NodeSymbol::Not => constraints.child_shape(0)?.clone(),
        NodeSymbol::Outer(_) => shape_outer(&constraints)?,
        NodeSymbol::Inner(_, _) => shape_inner(&mut constraints)?,
        NodeSymbol::Reduce(_) => shape_reduce(&constraints)?,
        other => {
            return Err(CompileError::unsupported(format!(
                "no shape rule for {}",
                other
            )))
        }
    };

    if let Some(existing) = &node.shape {
        if *existing != shape {
            return Err(CompileError::shape(format!(
                "computed shape {} contradicts existing shape {}",
                crate::ast::format_elements(&shape),
                crate::ast::format_elements(existing)
            )));
        }
    }

    conditions.extend(constraints.conditions);
    let shaped = node.with_shape(Some(shape)).into_ref();
    Ok(Some(wrap_conditions(constraints.context.with_ast(shaped), conditions)))
}

/// Unwrap CONDITION children, returning the node and the lifted conditions
fn hoist_conditions(node: &NodeRef) -> (NodeRef, Vec<NodeRef>) {
    if node.symbol == NodeSymbol::Condition {
        // the guard subtree of a condition stays where it is
        let consequent = node.children.get(1);
        if let (Some(inner), [guard, _]) = (
            consequent.filter(|c| c.symbol == NodeSymbol::Condition),
            node.children.as_slice(),
        ) {
            if let [inner_guard, inner_consequent] = inner.children.as_slice() {
                let children = vec![Rc::clone(guard), Rc::clone(inner_consequent)];
                return (node.with_children(children).into_ref(), vec![Rc::clone(inner_guard)]);
            }
        }
        return (Rc::clone(node), Vec::new());
    }

    let mut lifted = Vec::new();
    let mut changed = false;
    let children = node
        .children
        .iter()
        .map(|child| {
            if child.symbol == NodeSymbol::Condition && child.children.len() == 2 {
                lifted.push(Rc::clone(&child.children[0]));
                changed = true;
                Rc::clone(&child.children[1])
            } else {
                Rc::clone(child)
            }
        })
        .collect();

    if changed {
        (node.with_children(children).into_ref(), lifted)
    } else {
        (Rc::clone(node), lifted)
    }
}

/// Fold conditions into a left-nested AND chain
pub fn conjunction(conditions: Vec<NodeRef>) -> Option<NodeRef> {
    conditions.into_iter().reduce(|acc, condition| {
        Node::binary(NodeSymbol::Logic(LogicOp::And), Some(Vec::new()), acc, condition).into_ref()
    })
}

fn wrap_conditions(context: Context, conditions: Vec<NodeRef>) -> Context {
    match conjunction(conditions) {
        None => context,
        Some(condition) => {
            let shape = context.ast.shape.clone();
            let node = Node::new(
                NodeSymbol::Condition,
                shape,
                Attrib::None,
                vec![condition, Rc::clone(&context.ast)],
            );
            context.with_ast(node.into_ref())
        }
    }
}

fn shape_condition(context: Context, lifted: Vec<NodeRef>) -> CompileResult<Context> {
    let node = Rc::clone(&context.ast);
    let (guard, consequent) = match node.children.as_slice() {
        [guard, consequent] => (Rc::clone(guard), Rc::clone(consequent)),
        _ => return Err(CompileError::shape("condition requires a guard and a consequent")),
    };

    let mut conditions = vec![guard];
    conditions.extend(lifted);
    let guard = conjunction(conditions).unwrap_or_else(|| Rc::clone(&node.children[0]));
    let shaped = Node::new(
        NodeSymbol::Condition,
        consequent.shape.clone(),
        Attrib::None,
        vec![guard, consequent],
    );
    Ok(context.with_ast(shaped.into_ref()))
}

fn shape_array(constraints: &Constraints) -> CompileResult<Shape> {
    let symbol = constraints.context.array_symbol()?;
    symbol.shape.clone().ok_or_else(|| {
        CompileError::shape(format!(
            "array {} has no declared shape",
            constraints.context.ast.name().unwrap_or("?")
        ))
    })
}

fn shape_transpose(constraints: &Constraints) -> CompileResult<Shape> {
    let mut shape = constraints.child_shape(0)?.clone();
    shape.reverse();
    Ok(shape)
}

/// `<p> tranv X`: axis `j` of X becomes axis `p[j]` of the result
fn shape_transpose_vector(constraints: &Constraints) -> CompileResult<Shape> {
    let right = constraints.child_shape(1)?;
    let permutation = constraints
        .child_values(0)?
        .as_deref()
        .and_then(crate::ast::concrete_elements)
        .ok_or_else(|| {
            CompileError::shape("TRANSPOSEV requires left operand to be a vector with known integer values")
        })?;

    if permutation.len() != right.len() {
        return Err(CompileError::shape(format!(
            "TRANSPOSEV requires a permutation of length {} to match dimension of right operand {}",
            permutation.len(),
            right.len()
        )));
    }

    let mut shape: Vec<Option<Element>> = vec![None; right.len()];
    for (axis, &target) in permutation.iter().enumerate() {
        let slot = usize::try_from(target)
            .ok()
            .and_then(|t| shape.get_mut(t))
            .filter(|slot| slot.is_none())
            .ok_or_else(|| {
                CompileError::shape(format!(
                    "TRANSPOSEV requires a permutation of 0..{}, got {:?}",
                    right.len(),
                    permutation
                ))
            })?;
        *slot = Some(right[axis].clone());
    }
    Ok(shape.into_iter().flatten().collect())
}

fn shape_assign(constraints: &mut Constraints) -> CompileResult<Shape> {
    let left = constraints.child_shape(0)?.clone();
    let right = constraints.child_shape(1)?.clone();
    constraints.match_shapes(&left, &right)
}

fn shape_psi(constraints: &mut Constraints) -> CompileResult<Shape> {
    let left = constraints.child_shape(0)?.clone();
    let right = constraints.child_shape(1)?.clone();

    let length = match left.as_slice() {
        [Element::Int(n)] => *n as usize,
        [Element::Symbolic(_)] => {
            return Err(CompileError::shape(
                "PSI not implemented for left operand vector with symbolic length",
            ))
        }
        _ => return Err(CompileError::shape("PSI requires left operand to be vector")),
    };

    if length > right.len() {
        return Err(CompileError::shape(format!(
            "PSI requires vector length {} be no greater than dimension of right operand {}",
            length,
            right.len()
        )));
    }

    if let Some(values) = constraints.child_values(0)? {
        for (axis, (index, bound)) in values.iter().zip(&right).enumerate() {
            match (index, bound) {
                (Element::Int(i), Element::Int(b)) if i < b => {}
                (Element::Int(i), Element::Int(b)) => {
                    return Err(CompileError::shape(format!(
                        "PSI requires index {} < bound {} at axis {}",
                        i, b, axis
                    )))
                }
                _ => constraints.compare(CompareOp::LessThan, index, bound)?,
            }
        }
    }

    Ok(right[length..].to_vec())
}

fn shape_elementwise(constraints: &mut Constraints) -> CompileResult<Shape> {
    let left = constraints.child_shape(0)?.clone();
    let right = constraints.child_shape(1)?.clone();

    // scalar extension
    if left.is_empty() {
        return Ok(right);
    }
    if right.is_empty() {
        return Ok(left);
    }
    constraints.match_shapes(&left, &right)
}

fn shape_outer(constraints: &Constraints) -> CompileResult<Shape> {
    let mut shape = constraints.child_shape(0)?.clone();
    shape.extend(constraints.child_shape(1)?.iter().cloned());
    Ok(shape)
}

fn shape_inner(constraints: &mut Constraints) -> CompileResult<Shape> {
    let left = constraints.child_shape(0)?.clone();
    let right = constraints.child_shape(1)?.clone();

    let (Some((left_last, left_rest)), Some((right_first, right_rest))) =
        (left.split_last(), right.split_first())
    else {
        return Err(CompileError::shape(
            "inner product requires both operands to have dimension of at least one",
        ));
    };

    match (left_last, right_first) {
        (Element::Int(l), Element::Int(r)) if l != r => {
            return Err(CompileError::shape(format!(
                "inner product requires left last axis {} to equal right first axis {}",
                l, r
            )))
        }
        (Element::Int(_), Element::Int(_)) => {}
        _ => constraints.compare(CompareOp::Equal, left_last, right_first)?,
    }

    let mut shape = left_rest.to_vec();
    shape.extend(right_rest.iter().cloned());
    Ok(shape)
}

fn shape_reduce(constraints: &Constraints) -> CompileResult<Shape> {
    let operand = constraints.child_shape(0)?;
    Ok(operand.iter().skip(1).cloned().collect())
}
