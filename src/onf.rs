//! Lowering to Operational Normal Form
//!
//! Turns a reduced expression into a function description: argument names,
//! runtime guards on argument shapes, allocation of the result and a loop
//! nest performing one indexed assignment per iteration.

use std::collections::{BTreeSet, HashSet};

use crate::ast::{
    has_symbolic_elements, Attrib, CompareOp, Context, Element, GuardFailure, Node, NodeRef,
    NodeSymbol, Shape,
};
use crate::error::{CompileError, CompileResult};
use crate::shape::conjunction;
use crate::symbol::{is_generated, SymbolKind, SymbolTable};

pub const INVALID_DIMENSION: &str = "arguments have invalid dimension";
pub const INVALID_SHAPE: &str = "arguments have invalid shape";
pub const INCOMPATIBLE_SHAPE: &str = "arguments have incompatible shape";

/// Names the generated function takes as parameters, sorted.
///
/// User arrays whose shape or value is not fully known are arguments. Names
/// that only size or fill another argument are excluded, as are indices.
/// Implicit arrays referencing non-index names make those names arguments.
pub fn determine_function_arguments(table: &SymbolTable) -> CompileResult<Vec<String>> {
    let mut arguments = BTreeSet::new();
    let mut dependencies = HashSet::new();

    for (name, symbol) in table.iter() {
        if symbol.kind == SymbolKind::Index {
            continue;
        }

        if is_generated(name) {
            match &symbol.shape {
                Some(shape) if !has_symbolic_elements(shape) => {}
                _ => {
                    return Err(CompileError::lowering(format!(
                        "cannot have implicit array {} with unknown shape",
                        name
                    )))
                }
            }
            for dependency in symbol.value.iter().flatten().filter_map(Element::symbol_name) {
                let is_index = table
                    .get(dependency)
                    .map_or(false, |s| s.kind == SymbolKind::Index);
                if !is_index {
                    arguments.insert(dependency.to_string());
                }
            }
            continue;
        }

        for elements in [&symbol.shape, &symbol.value] {
            match elements {
                None => {
                    arguments.insert(name.to_string());
                }
                Some(elements) if has_symbolic_elements(elements) => {
                    arguments.insert(name.to_string());
                    dependencies.extend(elements.iter().filter_map(Element::symbol_name));
                }
                Some(_) => {}
            }
        }
    }

    Ok(arguments
        .into_iter()
        .filter(|name| !dependencies.contains(name.as_str()))
        .collect())
}

/// Loop indices of a reduced expression, outermost first.
///
/// These are the index symbols mentioned by index vectors in the tree that no
/// REDUCE node binds, in symbol table order.
pub fn determine_free_indices(context: &Context) -> CompileResult<Vec<String>> {
    fn visit(context: &Context, node: &Node, used: &mut HashSet<String>, bound: &mut HashSet<String>) -> CompileResult<()> {
        match (&node.symbol, &node.attrib) {
            (NodeSymbol::Reduce(_), Attrib::Name(index)) => {
                bound.insert(index.clone());
            }
            (NodeSymbol::Array, Attrib::Name(name)) => {
                let symbol = context.symbol(name)?;
                used.extend(symbol.value.iter().flatten().filter_map(Element::symbol_name).map(str::to_string));
            }
            _ => {}
        }
        for child in &node.children {
            visit(context, child, used, bound)?;
        }
        Ok(())
    }

    let mut used = HashSet::new();
    let mut bound = HashSet::new();
    visit(context, &context.ast, &mut used, &mut bound)?;

    Ok(context
        .table()
        .iter()
        .filter(|(name, symbol)| {
            symbol.kind == SymbolKind::Index && used.contains(*name) && !bound.contains(*name)
        })
        .map(|(name, _)| name.to_string())
        .collect())
}

/// Builds the function body while growing the symbol table
struct Lowering {
    context: Context,
}

impl Lowering {
    /// Fresh rank-0 array holding `value`
    fn constant(&mut self, value: Element) -> CompileResult<NodeRef> {
        self.array(Some(Vec::new()), Some(vec![value]))
    }

    fn array(&mut self, shape: Option<Shape>, value: Option<Vec<Element>>) -> CompileResult<NodeRef> {
        let name = self.context.generate_unique_array_name();
        self.context = self
            .context
            .clone()
            .add_symbol(&name, SymbolKind::Array, shape.clone(), None, value)?;
        Ok(Node::array(name, shape).into_ref())
    }

    fn argument(&self, name: &str) -> CompileResult<NodeRef> {
        let shape = self.context.symbol(name)?.shape.clone();
        Ok(Node::array(name, shape).into_ref())
    }

    /// `<axis> psi shp argument`
    fn axis_length(&mut self, argument: &NodeRef, rank: usize, axis: usize) -> CompileResult<NodeRef> {
        let vector = self.array(Some(vec![Element::Int(1)]), Some(vec![Element::Int(axis as i64)]))?;
        let shape = Node::unary(
            NodeSymbol::Shape,
            Some(vec![Element::Int(rank as i64)]),
            argument.clone(),
        );
        Ok(Node::binary(NodeSymbol::Psi, Some(Vec::new()), vector, shape.into_ref()).into_ref())
    }
}

fn equal(left: NodeRef, right: NodeRef) -> NodeRef {
    Node::binary(NodeSymbol::Compare(CompareOp::Equal), Some(Vec::new()), left, right).into_ref()
}

/// `if not condition: raise`
fn guard(condition: NodeRef, kind: GuardFailure, message: &str) -> NodeRef {
    let test = Node::unary(NodeSymbol::Not, Some(Vec::new()), condition);
    let error = Node::new(
        NodeSymbol::Error,
        None,
        Attrib::Raise {
            kind,
            message: message.to_string(),
        },
        Vec::new(),
    );
    Node::binary(NodeSymbol::If, None, test.into_ref(), error.into_ref()).into_ref()
}

/// Array written by a reduced `(<i> psi C) := expr`
fn assignment_target(assign: &Node) -> CompileResult<String> {
    let target = assign
        .child(0)
        .ok_or_else(|| CompileError::lowering("assignment without a target"))?;
    let array = match (target.symbol, target.child(1)) {
        (NodeSymbol::Psi, Some(operand)) => operand,
        _ => target,
    };
    match (array.symbol, array.name()) {
        (NodeSymbol::Array, Some(name)) => Ok(name.to_string()),
        _ => Err(CompileError::lowering(format!(
            "cannot assign into {}, expected an array",
            array.symbol
        ))),
    }
}

/// Lower a reduced context into a FUNCTION node
pub fn reduce_to_onf(context: Context, include_conditions: bool) -> CompileResult<Context> {
    let arguments = determine_function_arguments(context.table())?;

    let (domain, expression) = if context.ast.symbol == NodeSymbol::Condition {
        (Some(context.select_node(&[0])?.ast), context.select_node(&[1])?)
    } else {
        (None, context.clone())
    };

    let mut lowering = Lowering { context };
    let mut dimension_conditions = Vec::new();
    let mut shape_conditions = Vec::new();
    let mut assignments = Vec::new();
    let mut assigned: HashSet<String> = HashSet::new();

    for name in &arguments {
        let argument = lowering.argument(name)?;
        let shape = match &argument.shape {
            Some(shape) => shape.clone(),
            None => continue,
        };

        let rank = lowering.constant(Element::Int(shape.len() as i64))?;
        let dim = Node::unary(NodeSymbol::Dim, Some(Vec::new()), argument.clone()).into_ref();
        dimension_conditions.push(equal(dim, rank));

        for (axis, element) in shape.iter().enumerate() {
            let length = lowering.axis_length(&argument, shape.len(), axis)?;
            match element {
                Element::Symbolic(variable) => {
                    let variable_name = variable.name().unwrap_or_default().to_string();
                    if assigned.insert(variable_name) {
                        assignments.push(
                            Node::binary(NodeSymbol::Assign, Some(Vec::new()), variable.clone(), length).into_ref(),
                        );
                    } else {
                        shape_conditions.push(equal(variable.clone(), length));
                    }
                }
                Element::Int(_) => {
                    let expected = lowering.constant(element.clone())?;
                    shape_conditions.push(equal(expected, length));
                }
            }
        }
    }

    let mut statements = Vec::new();
    if include_conditions {
        if let Some(condition) = conjunction(dimension_conditions) {
            statements.push(guard(condition, GuardFailure::Dimension, INVALID_DIMENSION));
        }
    }
    statements.extend(assignments);
    if include_conditions {
        if let Some(condition) = conjunction(shape_conditions) {
            statements.push(guard(condition, GuardFailure::Shape, INVALID_SHAPE));
        }
        if let Some(condition) = domain {
            statements.push(guard(condition, GuardFailure::IncompatibleShape, INCOMPATIBLE_SHAPE));
        }
    }

    let shape = expression.ast.shape.clone().ok_or_else(|| {
        CompileError::lowering("reduced expression has no shape")
    })?;
    let indices = determine_free_indices(&lowering.context.with_ast(expression.ast.clone()))?;

    let (result_name, mut body) = if expression.ast.symbol == NodeSymbol::Assign {
        // an assignment stores into its own target, which becomes the result
        (assignment_target(&expression.ast)?, expression.ast.clone())
    } else {
        let result = lowering.array(Some(shape.clone()), None)?;
        let result_name = result.name().unwrap_or_default().to_string();
        let result_index = lowering.array(
            Some(vec![Element::Int(indices.len() as i64)]),
            Some(indices.iter().map(Element::symbolic).collect()),
        )?;

        statements.push(
            Node::new(
                NodeSymbol::Initialize,
                Some(shape.clone()),
                Attrib::Name(result_name.clone()),
                Vec::new(),
            )
            .into_ref(),
        );

        let target = Node::binary(NodeSymbol::Psi, Some(shape.clone()), result_index, result);
        let body = Node::binary(
            NodeSymbol::Assign,
            Some(shape.clone()),
            target.into_ref(),
            expression.ast.clone(),
        )
        .into_ref();
        (result_name, body)
    };

    for index in indices.iter().rev() {
        let range = lowering.context.symbol(index)?.value.clone();
        let (start, stop, step) = match range.as_deref() {
            Some([start, stop, step]) => (start.clone(), stop.clone(), step.clone()),
            _ => {
                return Err(CompileError::lowering(format!(
                    "index {} must range over (start, stop, step)",
                    index
                )))
            }
        };
        body = Node::new(
            NodeSymbol::Loop,
            Some(shape.clone()),
            Attrib::Loop {
                index: index.clone(),
                start,
                stop,
                step,
            },
            vec![body],
        )
        .into_ref();
    }
    statements.push(body);

    let block = Node::new(NodeSymbol::Block, None, Attrib::None, statements);
    let function = Node::new(
        NodeSymbol::Function,
        Some(shape),
        Attrib::Function {
            arguments,
            result: result_name,
        },
        vec![block.into_ref()],
    );
    Ok(lowering.context.with_ast(function.into_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testing::*;
    use crate::ast::dims;
    use crate::dnf::reduce_to_dnf;
    use crate::parser::parse;
    use crate::shape::calculate_shapes;
    use pretty_assertions::assert_eq;

    fn lowered(source: &str, include_conditions: bool) -> Context {
        let context = calculate_shapes(parse(source).unwrap()).unwrap();
        reduce_to_onf(reduce_to_dnf(context).unwrap(), include_conditions).unwrap()
    }

    fn statements(context: &Context) -> Vec<NodeSymbol> {
        context.ast.children[0].children.iter().map(|s| s.symbol).collect()
    }

    fn guard_kinds(context: &Context) -> Vec<GuardFailure> {
        context.ast.children[0]
            .children
            .iter()
            .filter(|s| s.symbol == NodeSymbol::If)
            .map(|s| match &s.children[1].attrib {
                Attrib::Raise { kind, .. } => *kind,
                other => panic!("Expected raise attrib, got {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_arguments_unknown_shape_or_value() {
        let table = table(vec![
            ("B", array_symbol(Some(dims(&[2])), None)),
            ("A", array_symbol(None, None)),
            ("C", array_symbol(Some(dims(&[2])), Some(dims(&[1, 2])))),
            ("_i0", index_symbol(3)),
        ]);
        assert_eq!(determine_function_arguments(&table).unwrap(), vec!["A", "B"]);
    }

    #[test]
    fn test_arguments_exclude_dependencies() {
        let table = table(vec![
            ("n", array_symbol(Some(Vec::new()), None)),
            ("A", array_symbol(Some(vec![sym("n"), Element::Int(3)]), None)),
            ("s", array_symbol(Some(Vec::new()), None)),
        ]);
        assert_eq!(determine_function_arguments(&table).unwrap(), vec!["A", "s"]);
    }

    #[test]
    fn test_arguments_from_implicit_values() {
        let table = table(vec![
            ("k", array_symbol(Some(Vec::new()), None)),
            ("_i1", index_symbol(3)),
            ("_a2", array_symbol(Some(dims(&[2])), Some(vec![sym("k"), sym("_i1")]))),
        ]);
        assert_eq!(determine_function_arguments(&table).unwrap(), vec!["k"]);
    }

    #[test]
    fn test_implicit_array_with_unknown_shape() {
        let table = table(vec![("_a0", array_symbol(None, Some(dims(&[1]))))]);
        assert!(matches!(
            determine_function_arguments(&table),
            Err(CompileError::LoweringError { .. })
        ));
    }

    #[test]
    fn test_lenore_example() {
        let context = lowered("<0> psi (tran (A ^ <3 4> + B ^ <3 4>))", true);

        assert_eq!(context.ast.symbol, NodeSymbol::Function);
        assert_eq!(
            context.ast.attrib,
            Attrib::Function {
                arguments: vec!["A".to_string(), "B".to_string()],
                result: "_a17".to_string(),
            }
        );
        assert_eq!(
            statements(&context),
            vec![NodeSymbol::If, NodeSymbol::If, NodeSymbol::Initialize, NodeSymbol::Loop]
        );
        assert_eq!(guard_kinds(&context), vec![GuardFailure::Dimension, GuardFailure::Shape]);
        assert_eq!(context.table().get("_a17").unwrap().shape, Some(dims(&[3])));

        let outer = &context.ast.children[0].children[3];
        assert_eq!(
            outer.attrib,
            Attrib::Loop {
                index: "_i3".to_string(),
                start: Element::Int(0),
                stop: Element::Int(3),
                step: Element::Int(1),
            }
        );
        let assign = &outer.children[0];
        assert_eq!(assign.symbol, NodeSymbol::Assign);
        assert_eq!(assign.children[1].symbol, NodeSymbol::Arith(crate::ast::ArithOp::Plus));
    }

    #[test]
    fn test_without_conditions() {
        let context = lowered("<0> psi (tran (A ^ <3 4> + B ^ <3 4>))", false);
        assert_eq!(statements(&context), vec![NodeSymbol::Initialize, NodeSymbol::Loop]);
    }

    #[test]
    fn test_symbolic_dimension_assigned_once() {
        let context = lowered("A ^ <n 3> + B ^ <n 3>", true);
        match &context.ast.attrib {
            Attrib::Function { arguments, .. } => assert_eq!(arguments, &vec!["A".to_string(), "B".to_string()]),
            other => panic!("Expected function attrib, got {:?}", other),
        }
        assert_eq!(
            statements(&context),
            vec![
                NodeSymbol::If,
                NodeSymbol::Assign,
                NodeSymbol::If,
                NodeSymbol::Initialize,
                NodeSymbol::Loop
            ]
        );
        let assignment = &context.ast.children[0].children[1];
        assert_eq!(assignment.children[0].name(), Some("n"));
        assert_eq!(assignment.children[1].symbol, NodeSymbol::Psi);
        assert_eq!(assignment.children[1].children[1].symbol, NodeSymbol::Shape);
    }

    #[test]
    fn test_loops_outermost_first() {
        let context = lowered("A ^ <n 3> + B ^ <n 3>", true);
        let outer = &context.ast.children[0].children[4];
        let inner = &outer.children[0];
        match (&outer.attrib, &inner.attrib) {
            (Attrib::Loop { stop: outer_stop, .. }, Attrib::Loop { stop: inner_stop, .. }) => {
                assert_eq!(outer_stop, &sym("n"));
                assert_eq!(inner_stop, &Element::Int(3));
            }
            other => panic!("Expected nested loops, got {:?}", other),
        }
        assert_eq!(inner.children[0].symbol, NodeSymbol::Assign);
    }

    #[test]
    fn test_domain_condition_guard() {
        let context = lowered("A ^ <n 3> + B ^ <m 3>", true);
        assert_eq!(
            guard_kinds(&context),
            vec![GuardFailure::Dimension, GuardFailure::Shape, GuardFailure::IncompatibleShape]
        );
        assert_eq!(
            statements(&context),
            vec![
                NodeSymbol::If,
                NodeSymbol::Assign,
                NodeSymbol::Assign,
                NodeSymbol::If,
                NodeSymbol::If,
                NodeSymbol::Initialize,
                NodeSymbol::Loop
            ]
        );
    }

    #[test]
    fn test_reduction_index_is_not_a_loop() {
        let context = lowered("+red A ^ <3 4>", true);
        let reduced = reduce_to_dnf(calculate_shapes(parse("+red A ^ <3 4>").unwrap()).unwrap()).unwrap();
        assert_eq!(determine_free_indices(&reduced).unwrap(), vec!["_i1"]);

        let outer = context.ast.children[0].children.last().unwrap();
        assert_eq!(outer.symbol, NodeSymbol::Loop);
        assert_eq!(outer.children[0].symbol, NodeSymbol::Assign);
    }

    #[test]
    fn test_assignment_writes_into_its_target() {
        let context = lowered("C ^ <3> := A ^ <3> + B ^ <3>", true);
        assert_eq!(
            context.ast.attrib,
            Attrib::Function {
                arguments: vec!["A".to_string(), "B".to_string(), "C".to_string()],
                result: "C".to_string(),
            }
        );
        assert_eq!(
            statements(&context),
            vec![NodeSymbol::If, NodeSymbol::If, NodeSymbol::Loop]
        );

        let outer = &context.ast.children[0].children[2];
        let assign = &outer.children[0];
        assert_eq!(assign.symbol, NodeSymbol::Assign);
        assert_eq!(assign.children[0].children[1].name(), Some("C"));
        assert_eq!(assign.children[1].symbol, NodeSymbol::Arith(crate::ast::ArithOp::Plus));
    }

    #[test]
    fn test_scalar_result_has_no_loops() {
        let context = lowered("+red A ^ <3>", false);
        assert_eq!(statements(&context), vec![NodeSymbol::Initialize, NodeSymbol::Assign]);
    }
}
