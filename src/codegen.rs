//! Python code generator
//!
//! Renders lowered functions and reduced expressions as Python source that
//! indexes NumPy arrays element by element.

use crate::ast::{ArithOp, Attrib, Context, Element, Node, NodeSymbol};
use crate::error::{CompileError, CompileResult};

const INDENT: &str = "    ";

/// Code generator for Python targets
pub struct PythonGenerator<'a> {
    context: &'a Context,
    /// Render rank-0 constants with known values as literals
    materialize_scalars: bool,
    lines: Vec<String>,
}

impl<'a> PythonGenerator<'a> {
    pub fn new(context: &'a Context, materialize_scalars: bool) -> Self {
        Self {
            context,
            materialize_scalars,
            lines: Vec::new(),
        }
    }

    /// Generate a complete Python module for a lowered FUNCTION node
    pub fn generate_function(mut self, name: &str) -> CompileResult<String> {
        let context = self.context;
        let function = &context.ast;
        let (arguments, result) = match (&function.symbol, &function.attrib) {
            (NodeSymbol::Function, Attrib::Function { arguments, result }) => (arguments, result),
            _ => {
                return Err(CompileError::codegen(format!(
                    "expected a lowered function, got {}",
                    function.symbol
                )))
            }
        };

        self.lines.push("import functools".to_string());
        self.lines.push("import operator".to_string());
        self.lines.push(String::new());
        self.lines.push("import numpy".to_string());
        self.lines.push(String::new());
        self.lines.push(String::new());
        self.lines.push(format!("def {}({}):", name, arguments.join(", ")));

        for child in &function.children {
            self.statement(child, 1)?;
        }
        self.emit(1, format!("return {}", result));

        let mut source = self.lines.join("\n");
        source.push('\n');
        Ok(source)
    }

    fn emit(&mut self, depth: usize, line: String) {
        self.lines.push(format!("{}{}", INDENT.repeat(depth), line));
    }

    fn statement(&mut self, node: &Node, depth: usize) -> CompileResult<()> {
        match (&node.symbol, &node.attrib) {
            (NodeSymbol::Block, _) => {
                for child in &node.children {
                    self.statement(child, depth)?;
                }
            }
            (NodeSymbol::If, _) => {
                let condition = child(node, 0)?;
                let test = match condition.symbol {
                    NodeSymbol::Not => format!("not {}", self.expression(child(condition, 0)?)?),
                    _ => self.expression(condition)?,
                };
                self.emit(depth, format!("if {}:", test));
                self.statement(child(node, 1)?, depth + 1)?;
            }
            (NodeSymbol::Error, Attrib::Raise { message, .. }) => {
                self.emit(depth, format!("raise Exception({:?})", message));
            }
            (NodeSymbol::Assign, _) => {
                let target = self.expression(child(node, 0)?)?;
                let value = self.expression(child(node, 1)?)?;
                self.emit(depth, format!("{} = {}", target, value));
            }
            (NodeSymbol::Initialize, Attrib::Name(name)) => {
                let shape = node.shape.as_ref().ok_or_else(|| {
                    CompileError::codegen(format!("cannot allocate {} without a shape", name))
                })?;
                let dims = shape.iter().map(|e| self.element(e)).collect();
                self.emit(depth, format!("{} = numpy.zeros({})", name, tuple(dims)));
            }
            (NodeSymbol::Loop, Attrib::Loop { index, start, stop, step }) => {
                self.emit(
                    depth,
                    format!(
                        "for {} in range({}, {}, {}):",
                        index,
                        self.element(start),
                        self.element(stop),
                        self.element(step)
                    ),
                );
                for body in &node.children {
                    self.statement(body, depth + 1)?;
                }
            }
            _ => {
                return Err(CompileError::codegen(format!(
                    "cannot generate a statement for {}",
                    node.symbol
                )))
            }
        }
        Ok(())
    }

    fn element(&self, element: &Element) -> String {
        match element {
            Element::Int(n) => n.to_string(),
            Element::Symbolic(node) => match node.name() {
                Some(name) => self.scalar(name).unwrap_or_else(|| name.to_string()),
                None => element.to_string(),
            },
        }
    }

    /// Literal for a rank-0 array with a known value
    fn scalar(&self, name: &str) -> Option<String> {
        if !self.materialize_scalars {
            return None;
        }
        let symbol = self.context.table().get(name)?;
        match (symbol.shape.as_deref(), symbol.value.as_deref()) {
            (Some([]), Some([value])) => Some(self.element(value)),
            _ => None,
        }
    }

    fn index_values(&self, node: &Node) -> CompileResult<Vec<Element>> {
        let name = node
            .name()
            .filter(|_| node.symbol == NodeSymbol::Array)
            .ok_or_else(|| CompileError::codegen(format!("psi index must be an array, got {}", node.symbol)))?;
        self.context
            .symbol(name)?
            .value
            .clone()
            .ok_or_else(|| CompileError::codegen(format!("psi index {} has no known values", name)))
    }

    pub fn expression(&self, node: &Node) -> CompileResult<String> {
        match &node.symbol {
            NodeSymbol::Array => {
                let name = node
                    .name()
                    .ok_or_else(|| CompileError::codegen("array node without a name"))?;
                Ok(self.scalar(name).unwrap_or_else(|| name.to_string()))
            }
            NodeSymbol::Psi => {
                let indices = self.index_values(child(node, 0)?)?;
                let operand = child(node, 1)?;
                let rendered: Vec<String> = indices.iter().map(|e| self.element(e)).collect();
                match (&operand.symbol, rendered.as_slice()) {
                    (NodeSymbol::Shape, [axis]) => {
                        Ok(format!("{}.shape[{}]", self.expression(child(operand, 0)?)?, axis))
                    }
                    (_, []) => self.expression(operand),
                    (NodeSymbol::Array, _) => Ok(format!("{}[{}]", self.expression(operand)?, tuple(rendered))),
                    _ => Ok(format!("({})[{}]", self.expression(operand)?, tuple(rendered))),
                }
            }
            NodeSymbol::Arith(op) => self.binary(node, op.token()),
            NodeSymbol::Compare(op) => self.binary(node, op.token()),
            NodeSymbol::Logic(op) => self.binary(node, op.token()),
            NodeSymbol::Not => Ok(format!("(not {})", self.expression(child(node, 0)?)?)),
            NodeSymbol::Dim => Ok(format!("len({}.shape)", self.expression(child(node, 0)?)?)),
            NodeSymbol::Shape => Ok(format!("{}.shape", self.expression(child(node, 0)?)?)),
            NodeSymbol::Reduce(op) => {
                let index = match &node.attrib {
                    Attrib::Name(index) => index,
                    _ => return Err(CompileError::codegen("reduction without a bound index")),
                };
                let range = match self.context.symbol(index)?.value.as_deref() {
                    Some([start, stop, step]) => format!(
                        "range({}, {}, {})",
                        self.element(start),
                        self.element(stop),
                        self.element(step)
                    ),
                    _ => {
                        return Err(CompileError::codegen(format!(
                            "index {} must range over (start, stop, step)",
                            index
                        )))
                    }
                };
                Ok(format!(
                    "functools.reduce(operator.{}, ({} for {} in {}))",
                    operator_name(*op),
                    self.expression(child(node, 0)?)?,
                    index,
                    range
                ))
            }
            other => Err(CompileError::codegen(format!(
                "no python rendering for {}, reduce the expression first",
                other
            ))),
        }
    }

    fn binary(&self, node: &Node, token: &str) -> CompileResult<String> {
        Ok(format!(
            "({} {} {})",
            self.expression(child(node, 0)?)?,
            token,
            self.expression(child(node, 1)?)?
        ))
    }
}

fn child(node: &Node, index: usize) -> CompileResult<&Node> {
    node.child(index)
        .map(|c| c.as_ref())
        .ok_or_else(|| CompileError::codegen(format!("{} is missing operand {}", node.symbol, index)))
}

fn tuple(items: Vec<String>) -> String {
    match items.as_slice() {
        [single] => format!("({},)", single),
        _ => format!("({})", items.join(", ")),
    }
}

fn operator_name(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Plus => "add",
        ArithOp::Minus => "sub",
        ArithOp::Times => "mul",
        ArithOp::Divide => "truediv",
    }
}

/// Render a reduced expression tree as a Python expression
pub fn generate_python_source(context: &Context) -> CompileResult<String> {
    PythonGenerator::new(context, true).expression(&context.ast)
}

/// Render a lowered function as a Python module
pub fn generate_python_function(context: &Context, name: &str, materialize_scalars: bool) -> CompileResult<String> {
    PythonGenerator::new(context, materialize_scalars).generate_function(name)
}
