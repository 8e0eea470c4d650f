//! Tree representation for MOA expressions
//!
//! Nodes are immutable and reference counted. Every transformation yields a
//! new tree that shares untouched subtrees with the old one. A [`Context`]
//! pairs a tree with the [`SymbolTable`] that gives meaning to the names it
//! mentions; all reads and rewrites go through a context so the two evolve
//! together.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::error::{CompileError, CompileResult};
use crate::symbol::{SymbolKind, SymbolNode, SymbolTable};

/// Shared handle to an immutable node
pub type NodeRef = Rc<Node>;

/// Rewrite attempts allowed at a single node during a preorder traversal
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Element of a shape or value tuple
///
/// A symbolic element is a rank-0 ARRAY node naming another table entry, so
/// dimensions and values may depend on arrays known only at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Element {
    Int(i64),
    Symbolic(NodeRef),
}

impl Element {
    pub fn symbolic(name: impl Into<String>) -> Self {
        Element::Symbolic(Rc::new(Node::array(name, Some(Vec::new()))))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Element::Int(n) => Some(*n),
            Element::Symbolic(_) => None,
        }
    }

    pub fn symbol_name(&self) -> Option<&str> {
        match self {
            Element::Int(_) => None,
            Element::Symbolic(node) => node.name(),
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Element::Symbolic(_))
    }
}

impl From<i64> for Element {
    fn from(n: i64) -> Self {
        Element::Int(n)
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Int(n) => write!(f, "{}", n),
            Element::Symbolic(node) => write!(f, "{}", node.name().unwrap_or("?")),
        }
    }
}

/// Shape tuple; an unset shape is `None` wherever shapes are optional
pub type Shape = Vec<Element>;

/// Build a concrete shape from integers
pub fn dims(values: &[i64]) -> Shape {
    values.iter().copied().map(Element::Int).collect()
}

pub fn has_symbolic_elements(elements: &[Element]) -> bool {
    elements.iter().any(Element::is_symbolic)
}

/// All elements as integers, if none are symbolic
pub fn concrete_elements(elements: &[Element]) -> Option<Vec<i64>> {
    elements.iter().map(Element::as_int).collect()
}

/// Render elements as `<3 n 4>`
pub fn format_elements(elements: &[Element]) -> String {
    let parts: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
    format!("<{}>", parts.join(" "))
}

pub fn format_shape(shape: &Option<Shape>) -> String {
    match shape {
        Some(shape) => format_elements(shape),
        None => "unknown".to_string(),
    }
}

/// Arithmetic operators usable elementwise, in products and in reductions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArithOp {
    Plus,
    Minus,
    Times,
    Divide,
}

impl ArithOp {
    pub fn token(&self) -> &'static str {
        match self {
            ArithOp::Plus => "+",
            ArithOp::Minus => "-",
            ArithOp::Times => "*",
            ArithOp::Divide => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
}

impl CompareOp {
    pub fn token(&self) -> &'static str {
        match self {
            CompareOp::Equal => "==",
            CompareOp::NotEqual => "!=",
            CompareOp::LessThan => "<",
            CompareOp::LessThanEqual => "<=",
            CompareOp::GreaterThan => ">",
            CompareOp::GreaterThanEqual => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LogicOp {
    And,
    Or,
}

impl LogicOp {
    pub fn token(&self) -> &'static str {
        match self {
            LogicOp::And => "and",
            LogicOp::Or => "or",
        }
    }
}

/// Operator tag of a node
///
/// Compound operators carry their component operators, e.g. the outer sum
/// is `Outer(Plus)` and the matrix product is `Inner(Plus, Times)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeSymbol {
    Array,

    // unary structural
    Transpose,
    Shape,
    Dim,
    Iota,
    Tau,
    Rav,

    // binary structural
    Psi,
    TransposeV,
    Take,
    Drop,
    Cat,
    Assign,

    // elementwise
    Arith(ArithOp),
    Compare(CompareOp),
    Logic(LogicOp),
    Not,

    // compound
    Outer(ArithOp),
    Inner(ArithOp, ArithOp),
    Reduce(ArithOp),

    // domain restriction and lowered forms
    Condition,
    If,
    Error,
    Function,
    Block,
    Loop,
    Initialize,
}

/// Number of children a symbol admits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Fixed(n) => *n == count,
            Arity::Variadic => true,
        }
    }
}

impl NodeSymbol {
    pub fn arity(&self) -> Arity {
        match self {
            NodeSymbol::Array | NodeSymbol::Error | NodeSymbol::Initialize => Arity::Fixed(0),
            NodeSymbol::Transpose
            | NodeSymbol::Shape
            | NodeSymbol::Dim
            | NodeSymbol::Iota
            | NodeSymbol::Tau
            | NodeSymbol::Rav
            | NodeSymbol::Not
            | NodeSymbol::Reduce(_)
            | NodeSymbol::Function => Arity::Fixed(1),
            NodeSymbol::Psi
            | NodeSymbol::TransposeV
            | NodeSymbol::Take
            | NodeSymbol::Drop
            | NodeSymbol::Cat
            | NodeSymbol::Assign
            | NodeSymbol::Arith(_)
            | NodeSymbol::Compare(_)
            | NodeSymbol::Logic(_)
            | NodeSymbol::Outer(_)
            | NodeSymbol::Inner(_, _)
            | NodeSymbol::Condition
            | NodeSymbol::If => Arity::Fixed(2),
            NodeSymbol::Block | NodeSymbol::Loop => Arity::Variadic,
        }
    }

    /// Operators that act pointwise on two operands with scalar extension
    pub fn is_elementwise(&self) -> bool {
        matches!(
            self,
            NodeSymbol::Arith(_) | NodeSymbol::Compare(_) | NodeSymbol::Logic(_)
        )
    }

    /// Final arithmetic operator applied per element, used for flop counts
    pub fn arithmetic(&self) -> Option<ArithOp> {
        match self {
            NodeSymbol::Arith(op) | NodeSymbol::Outer(op) | NodeSymbol::Reduce(op) => Some(*op),
            NodeSymbol::Inner(_, op) => Some(*op),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            NodeSymbol::Array => "array".to_string(),
            NodeSymbol::Transpose => "tran".to_string(),
            NodeSymbol::Shape => "shp".to_string(),
            NodeSymbol::Dim => "dim".to_string(),
            NodeSymbol::Iota => "iota".to_string(),
            NodeSymbol::Tau => "tau".to_string(),
            NodeSymbol::Rav => "rav".to_string(),
            NodeSymbol::Psi => "psi".to_string(),
            NodeSymbol::TransposeV => "tranv".to_string(),
            NodeSymbol::Take => "take".to_string(),
            NodeSymbol::Drop => "drop".to_string(),
            NodeSymbol::Cat => "cat".to_string(),
            NodeSymbol::Assign => ":=".to_string(),
            NodeSymbol::Arith(op) => op.token().to_string(),
            NodeSymbol::Compare(op) => op.token().to_string(),
            NodeSymbol::Logic(op) => op.token().to_string(),
            NodeSymbol::Not => "not".to_string(),
            NodeSymbol::Outer(op) => format!(".{}", op.token()),
            NodeSymbol::Inner(left, right) => format!("{}.{}", left.token(), right.token()),
            NodeSymbol::Reduce(op) => format!("{}red", op.token()),
            NodeSymbol::Condition => "condition".to_string(),
            NodeSymbol::If => "if".to_string(),
            NodeSymbol::Error => "error".to_string(),
            NodeSymbol::Function => "function".to_string(),
            NodeSymbol::Block => "block".to_string(),
            NodeSymbol::Loop => "loop".to_string(),
            NodeSymbol::Initialize => "initialize".to_string(),
        }
    }
}

impl fmt::Display for NodeSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Kind of runtime check a guard enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GuardFailure {
    Dimension,
    Shape,
    IncompatibleShape,
}

/// Operator specific payload of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Attrib {
    None,
    /// Array name for ARRAY, result name for INITIALIZE, bound index for REDUCE
    Name(String),
    Raise { kind: GuardFailure, message: String },
    Function { arguments: Vec<String>, result: String },
    Loop {
        index: String,
        start: Element,
        stop: Element,
        step: Element,
    },
}

/// Immutable tree node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub symbol: NodeSymbol,
    pub shape: Option<Shape>,
    pub attrib: Attrib,
    pub children: Vec<NodeRef>,
}

impl Node {
    pub fn new(symbol: NodeSymbol, shape: Option<Shape>, attrib: Attrib, children: Vec<NodeRef>) -> Self {
        debug_assert!(
            symbol.arity().accepts(children.len()),
            "{} does not take {} children",
            symbol,
            children.len()
        );
        Self {
            symbol,
            shape,
            attrib,
            children,
        }
    }

    pub fn array(name: impl Into<String>, shape: Option<Shape>) -> Self {
        Self::new(NodeSymbol::Array, shape, Attrib::Name(name.into()), Vec::new())
    }

    pub fn unary(symbol: NodeSymbol, shape: Option<Shape>, child: NodeRef) -> Self {
        Self::new(symbol, shape, Attrib::None, vec![child])
    }

    pub fn binary(symbol: NodeSymbol, shape: Option<Shape>, left: NodeRef, right: NodeRef) -> Self {
        Self::new(symbol, shape, Attrib::None, vec![left, right])
    }

    /// Name carried in the attrib, if any
    pub fn name(&self) -> Option<&str> {
        match &self.attrib {
            Attrib::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn child(&self, index: usize) -> Option<&NodeRef> {
        self.children.get(index)
    }

    pub fn with_shape(&self, shape: Option<Shape>) -> Self {
        Self {
            shape,
            ..self.clone()
        }
    }

    pub fn with_attrib(&self, attrib: Attrib) -> Self {
        Self {
            attrib,
            ..self.clone()
        }
    }

    pub fn with_children(&self, children: Vec<NodeRef>) -> Self {
        Self::new(self.symbol, self.shape.clone(), self.attrib.clone(), children)
    }

    pub fn into_ref(self) -> NodeRef {
        Rc::new(self)
    }
}

/// Traversal order for [`node_traversal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Rewrite a node to a fixed point, then descend into its children
    Preorder,
    /// Visit all children first, then the node once
    Postorder,
}

/// A tree paired with its owning symbol table
///
/// Contexts are values: every operation returns a new context and leaves the
/// receiver usable. The table is shared until a context adds a symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Context {
    pub ast: NodeRef,
    pub symbol_table: Rc<SymbolTable>,
}

impl Context {
    pub fn new(ast: NodeRef, symbol_table: SymbolTable) -> Self {
        Self {
            ast,
            symbol_table: Rc::new(symbol_table),
        }
    }

    /// Same table, different tree
    pub fn with_ast(&self, ast: NodeRef) -> Self {
        Self {
            ast,
            symbol_table: Rc::clone(&self.symbol_table),
        }
    }

    pub fn table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    pub fn num_children(&self) -> usize {
        self.ast.children.len()
    }

    /// Look up a symbol by name
    pub fn symbol(&self, name: &str) -> CompileResult<&SymbolNode> {
        self.symbol_table
            .get(name)
            .ok_or_else(|| CompileError::unknown_symbol(name))
    }

    /// Symbol table entry for the ARRAY node at the root of this context
    pub fn array_symbol(&self) -> CompileResult<&SymbolNode> {
        match (self.ast.symbol, self.ast.name()) {
            (NodeSymbol::Array, Some(name)) => self.symbol(name),
            _ => Err(CompileError::unsupported(format!(
                "expected array node, found {}",
                self.ast.symbol
            ))),
        }
    }

    /// Navigate to a descendant by child indices
    pub fn select_node(&self, path: &[usize]) -> CompileResult<Context> {
        let mut node = &self.ast;
        for (depth, &index) in path.iter().enumerate() {
            node = node.child(index).ok_or_else(|| {
                CompileError::unsupported(format!(
                    "path {:?} leaves the tree at depth {}",
                    path, depth
                ))
            })?;
        }
        Ok(self.with_ast(Rc::clone(node)))
    }

    /// Replace the node at `path`, rebuilding only its ancestors
    pub fn replace_node(&self, path: &[usize], replacement: NodeRef) -> CompileResult<Context> {
        fn rebuild(node: &NodeRef, path: &[usize], replacement: NodeRef) -> CompileResult<NodeRef> {
            match path.split_first() {
                None => Ok(replacement),
                Some((&index, rest)) => {
                    let child = node.child(index).ok_or_else(|| {
                        CompileError::unsupported(format!(
                            "node {} has no child {}",
                            node.symbol, index
                        ))
                    })?;
                    let mut children = node.children.clone();
                    children[index] = rebuild(child, rest, replacement)?;
                    Ok(node.with_children(children).into_ref())
                }
            }
        }

        Ok(self.with_ast(rebuild(&self.ast, path, replacement)?))
    }

    pub fn replace_node_shape(&self, path: &[usize], shape: Option<Shape>) -> CompileResult<Context> {
        let node = self.select_node(path)?.ast;
        self.replace_node(path, node.with_shape(shape).into_ref())
    }

    pub fn replace_node_attributes(&self, path: &[usize], attrib: Attrib) -> CompileResult<Context> {
        let node = self.select_node(path)?.ast;
        self.replace_node(path, node.with_attrib(attrib).into_ref())
    }

    /// Idempotently insert a symbol, failing if the name is bound differently
    pub fn add_symbol(
        mut self,
        name: &str,
        kind: SymbolKind,
        shape: Option<Shape>,
        ty: Option<String>,
        value: Option<Vec<Element>>,
    ) -> CompileResult<Context> {
        let symbol = SymbolNode::new(kind, shape, ty, value);
        if self.symbol_table.get(name) == Some(&symbol) {
            return Ok(self);
        }
        Rc::make_mut(&mut self.symbol_table).insert(name, symbol)?;
        Ok(self)
    }

    /// Fresh compiler temporary for an array; re-derive after adding symbols
    pub fn generate_unique_array_name(&self) -> String {
        self.symbol_table.generate_unique_array_name()
    }

    /// Fresh compiler temporary for an index; re-derive after adding symbols
    pub fn generate_unique_index_name(&self) -> String {
        self.symbol_table.generate_unique_index_name()
    }
}

/// Visit every node of the tree, replacing nodes with what `visit` returns.
///
/// `visit` receives a context scoped to the current node and returns
/// `Some(context)` to replace it (the new context's table becomes the table
/// for the rest of the traversal) or `None` to keep it.
pub fn node_traversal<F>(context: Context, visit: F, traversal: Traversal) -> CompileResult<Context>
where
    F: FnMut(&Context) -> CompileResult<Option<Context>>,
{
    node_traversal_bounded(context, visit, traversal, DEFAULT_MAX_ITERATIONS)
}

/// [`node_traversal`] with an explicit per-node rewrite cap for preorder
pub fn node_traversal_bounded<F>(
    context: Context,
    mut visit: F,
    traversal: Traversal,
    max_iterations: usize,
) -> CompileResult<Context>
where
    F: FnMut(&Context) -> CompileResult<Option<Context>>,
{
    let mut path = Vec::new();
    match traversal {
        Traversal::Preorder => preorder(context, &mut visit, &mut path, max_iterations),
        Traversal::Postorder => postorder(context, &mut visit, &mut path),
    }
}

fn preorder<F>(
    context: Context,
    visit: &mut F,
    path: &mut Vec<usize>,
    max_iterations: usize,
) -> CompileResult<Context>
where
    F: FnMut(&Context) -> CompileResult<Option<Context>>,
{
    let mut context = context;
    let mut iterations = 0;
    while let Some(rewritten) = visit(&context).map_err(|e| e.located(path))? {
        iterations += 1;
        if iterations > max_iterations {
            return Err(CompileError::ReductionNonconvergence {
                path: path.as_slice().into(),
                limit: max_iterations,
            });
        }
        context = rewritten;
    }

    descend(context, path, |child, path| preorder(child, visit, path, max_iterations))
}

fn postorder<F>(context: Context, visit: &mut F, path: &mut Vec<usize>) -> CompileResult<Context>
where
    F: FnMut(&Context) -> CompileResult<Option<Context>>,
{
    let context = descend(context, path, |child, path| postorder(child, visit, path))?;
    Ok(visit(&context).map_err(|e| e.located(path))?.unwrap_or(context))
}

/// Run `recurse` on each child in order, threading the table through
fn descend<R>(context: Context, path: &mut Vec<usize>, mut recurse: R) -> CompileResult<Context>
where
    R: FnMut(Context, &mut Vec<usize>) -> CompileResult<Context>,
{
    let Context { ast, mut symbol_table } = context;
    let mut children = Vec::with_capacity(ast.children.len());
    let mut changed = false;

    for (index, child) in ast.children.iter().enumerate() {
        path.push(index);
        let result = recurse(
            Context {
                ast: Rc::clone(child),
                symbol_table,
            },
            path,
        );
        path.pop();
        let result = result?;
        changed |= !Rc::ptr_eq(&result.ast, child);
        symbol_table = result.symbol_table;
        children.push(result.ast);
    }

    let ast = if changed {
        ast.with_children(children).into_ref()
    } else {
        ast
    };
    Ok(Context { ast, symbol_table })
}

/// Indented text rendering of a tree with shapes and known symbol values
pub fn render_tree(context: &Context) -> String {
    fn render(node: &Node, table: &SymbolTable, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        match (&node.symbol, &node.attrib) {
            (NodeSymbol::Array, Attrib::Name(name)) => {
                out.push_str(name);
                if let Some(value) = table.get(name).and_then(|s| s.value.as_ref()) {
                    out.push_str(&format!(" = {}", format_elements(value)));
                }
            }
            (symbol, Attrib::Name(name)) => out.push_str(&format!("{} [{}]", symbol, name)),
            (symbol, Attrib::Raise { message, .. }) => {
                out.push_str(&format!("{} \"{}\"", symbol, message))
            }
            (symbol, Attrib::Function { arguments, result }) => out.push_str(&format!(
                "{}({}) -> {}",
                symbol,
                arguments.join(", "),
                result
            )),
            (symbol, Attrib::Loop { index, start, stop, step }) => out.push_str(&format!(
                "{} {} in ({}, {}, {})",
                symbol, index, start, stop, step
            )),
            (symbol, Attrib::None) => out.push_str(&symbol.label()),
        }
        out.push_str(&format!("  ρ={}\n", format_shape(&node.shape)));
        for child in &node.children {
            render(child, table, depth + 1, out);
        }
    }

    let mut out = String::new();
    render(&context.ast, &context.symbol_table, 0, &mut out);
    out
}

#[cfg(test)]
pub(crate) mod testing {
    //! Terse constructors for building trees in tests

    use super::*;

    pub fn arr(name: &str, shape: Option<&[i64]>) -> NodeRef {
        Node::array(name, shape.map(dims)).into_ref()
    }

    pub fn sym(name: &str) -> Element {
        Element::symbolic(name)
    }

    pub fn un(symbol: NodeSymbol, shape: Option<&[i64]>, child: NodeRef) -> NodeRef {
        Node::unary(symbol, shape.map(dims), child).into_ref()
    }

    pub fn bin(symbol: NodeSymbol, shape: Option<&[i64]>, left: NodeRef, right: NodeRef) -> NodeRef {
        Node::binary(symbol, shape.map(dims), left, right).into_ref()
    }

    pub fn array_symbol(shape: Option<Shape>, value: Option<Vec<Element>>) -> SymbolNode {
        SymbolNode::new(SymbolKind::Array, shape, None, value)
    }

    pub fn index_symbol(bound: i64) -> SymbolNode {
        SymbolNode::new(SymbolKind::Index, Some(Vec::new()), None, Some(dims(&[0, bound, 1])))
    }

    pub fn table(entries: Vec<(&str, SymbolNode)>) -> SymbolTable {
        let mut table = SymbolTable::new();
        for (name, symbol) in entries {
            table.insert(name, symbol).expect("test table entries must not conflict");
        }
        table
    }
}
