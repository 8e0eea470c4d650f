//! Cost metrics over expression trees

use crate::ast::{concrete_elements, format_shape, node_traversal, Context, Traversal};
use crate::error::{CompileError, CompileResult};

/// Count of arithmetic operations performed when evaluating the tree.
///
/// Every arithmetic node contributes the number of elements in its shape.
/// After reduction that shape is the iteration space, so pushing indices
/// down shrinks the count.
pub fn metric_flops(context: &Context) -> CompileResult<i64> {
    let mut flops = 0;

    node_traversal(
        context.clone(),
        |node_context: &Context| {
            let node = &node_context.ast;
            if node.symbol.arithmetic().is_none() {
                return Ok(None);
            }

            let extent = node
                .shape
                .as_deref()
                .and_then(concrete_elements)
                .ok_or_else(|| {
                    CompileError::shape(format!(
                        "flop count requires a concrete shape for {}, got {}",
                        node.symbol,
                        format_shape(&node.shape)
                    ))
                })?;
            flops += extent.iter().product::<i64>();
            Ok(None)
        },
        Traversal::Postorder,
    )?;

    Ok(flops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testing::*;
    use crate::ast::{dims, ArithOp, NodeSymbol};
    use crate::dnf::reduce_to_dnf;
    use crate::parser::parse;
    use crate::shape::calculate_shapes;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reduction_lowers_flops() {
        let shaped = calculate_shapes(
            parse("<0> psi (tran (A ^ <10 100> + B ^ <10 100>))").unwrap(),
        )
        .unwrap();
        assert_eq!(metric_flops(&shaped).unwrap(), 1000);

        let reduced = reduce_to_dnf(shaped).unwrap();
        assert_eq!(metric_flops(&reduced).unwrap(), 10);
    }

    #[test]
    fn test_products_and_reductions_count() {
        let shaped = calculate_shapes(parse("+red (A ^ <3 4> .* B ^ <4>)").unwrap()).unwrap();
        // outer product over (3, 4, 4) then a reduction producing (4, 4)
        assert_eq!(metric_flops(&shaped).unwrap(), 48 + 16);
    }

    #[test]
    fn test_no_arithmetic() {
        let context = Context::new(
            arr("A", Some(&[2, 3])),
            table(vec![("A", array_symbol(Some(dims(&[2, 3])), None))]),
        );
        assert_eq!(metric_flops(&context).unwrap(), 0);
    }

    #[test]
    fn test_requires_concrete_shapes() {
        let context = Context::new(
            bin(NodeSymbol::Arith(ArithOp::Plus), None, arr("A", None), arr("B", None)),
            table(vec![
                ("A", array_symbol(None, None)),
                ("B", array_symbol(None, None)),
            ]),
        );
        match metric_flops(&context) {
            Err(CompileError::ShapeError { path, .. }) => assert!(path.is_root()),
            other => panic!("Expected ShapeError, got {:?}", other),
        }
    }
}
