//! Symbol table: compile-time knowledge attached to array and index names
//!
//! User names carry no reserved prefix. Compiler temporaries are spelled
//! `_a<N>` for arrays and `_i<N>` for indices, with `N` drawn from a per-table
//! counter that never reuses an id.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::ast::{format_elements, format_shape, Attrib, Context, Element, Node, NodeRef, Shape};
use crate::error::{CompileError, CompileResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymbolKind {
    Array,
    Index,
}

/// What the compiler knows about a name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolNode {
    pub kind: SymbolKind,
    pub shape: Option<Shape>,
    /// Element type tag, reserved
    pub ty: Option<String>,
    pub value: Option<Vec<Element>>,
}

impl SymbolNode {
    pub fn new(kind: SymbolKind, shape: Option<Shape>, ty: Option<String>, value: Option<Vec<Element>>) -> Self {
        Self {
            kind,
            shape,
            ty,
            value,
        }
    }

    /// Names this symbol depends on through symbolic shape or value elements
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.shape
            .iter()
            .flatten()
            .chain(self.value.iter().flatten())
            .filter_map(Element::symbol_name)
    }
}

impl fmt::Display for SymbolNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SymbolKind::Array => "array",
            SymbolKind::Index => "index",
        };
        write!(f, "{} shape={}", kind, format_shape(&self.shape))?;
        if let Some(value) = &self.value {
            write!(f, " value={}", format_elements(value))?;
        }
        Ok(())
    }
}

/// True for compiler-generated names
pub fn is_generated(name: &str) -> bool {
    name.starts_with('_')
}

/// Numeric id of a generated `_a<N>` or `_i<N>` name
fn generated_id(name: &str) -> Option<usize> {
    name.strip_prefix("_a")
        .or_else(|| name.strip_prefix("_i"))
        .and_then(|id| id.parse().ok())
}

/// Name to symbol mapping that remembers insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SymbolTable {
    symbols: HashMap<String, SymbolNode>,
    order: Vec<String>,
    counter: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SymbolNode> {
        self.symbols.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SymbolNode)> {
        self.order
            .iter()
            .filter_map(|name| self.symbols.get(name).map(|symbol| (name.as_str(), symbol)))
    }

    /// Insert `symbol` under `name`. Re-inserting an identical symbol is a no-op.
    pub fn insert(&mut self, name: &str, symbol: SymbolNode) -> CompileResult<()> {
        if let Some(existing) = self.symbols.get(name) {
            if *existing == symbol {
                return Ok(());
            }
            return Err(CompileError::SymbolConflict {
                name: name.to_string(),
                existing: existing.to_string(),
                attempted: symbol.to_string(),
            });
        }

        if let Some(id) = generated_id(name) {
            self.counter = self.counter.max(id + 1);
        }
        self.symbols.insert(name.to_string(), symbol);
        self.order.push(name.to_string());
        Ok(())
    }

    fn next_id(&self) -> usize {
        let mut id = self.counter.max(self.len());
        while self.contains(&format!("_a{}", id)) || self.contains(&format!("_i{}", id)) {
            id += 1;
        }
        id
    }

    pub fn generate_unique_array_name(&self) -> String {
        format!("_a{}", self.next_id())
    }

    pub fn generate_unique_index_name(&self) -> String {
        format!("_i{}", self.next_id())
    }
}

/// Collect the names a tree mentions, then close over symbol dependencies
fn reachable_symbols(context: &Context) -> CompileResult<HashSet<String>> {
    fn visit(node: &Node, found: &mut Vec<String>) {
        found.extend(node_names(node).map(str::to_string));
        for child in &node.children {
            visit(child, found);
        }
    }

    let mut pending = Vec::new();
    visit(&context.ast, &mut pending);

    let mut reachable = HashSet::new();
    while let Some(name) = pending.pop() {
        if !reachable.insert(name.clone()) {
            continue;
        }
        let symbol = context.symbol(&name)?;
        pending.extend(symbol.dependencies().map(str::to_string));
    }
    Ok(reachable)
}

/// Every symbol name a single node refers to
fn node_names(node: &Node) -> impl Iterator<Item = &str> {
    let attrib_names: Vec<&str> = match &node.attrib {
        Attrib::Name(name) => vec![name.as_str()],
        Attrib::Function { arguments, result } => arguments
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(result.as_str()))
            .collect(),
        Attrib::Loop {
            index,
            start,
            stop,
            step,
        } => std::iter::once(index.as_str())
            .chain([start, stop, step].into_iter().filter_map(Element::symbol_name))
            .collect(),
        Attrib::None | Attrib::Raise { .. } => Vec::new(),
    };
    attrib_names
        .into_iter()
        .chain(node.shape.iter().flatten().filter_map(Element::symbol_name))
}

fn rename(name: &str, mapping: &HashMap<String, String>) -> String {
    mapping.get(name).cloned().unwrap_or_else(|| name.to_string())
}

fn rename_element(element: &Element, mapping: &HashMap<String, String>) -> Element {
    match element {
        Element::Int(n) => Element::Int(*n),
        Element::Symbolic(node) => Element::Symbolic(rename_tree(node, mapping)),
    }
}

fn rename_elements(elements: &[Element], mapping: &HashMap<String, String>) -> Vec<Element> {
    elements.iter().map(|e| rename_element(e, mapping)).collect()
}

fn rename_tree(node: &NodeRef, mapping: &HashMap<String, String>) -> NodeRef {
    let attrib = match &node.attrib {
        Attrib::Name(name) => Attrib::Name(rename(name, mapping)),
        Attrib::Function { arguments, result } => Attrib::Function {
            arguments: arguments.iter().map(|a| rename(a, mapping)).collect(),
            result: rename(result, mapping),
        },
        Attrib::Loop {
            index,
            start,
            stop,
            step,
        } => Attrib::Loop {
            index: rename(index, mapping),
            start: rename_element(start, mapping),
            stop: rename_element(stop, mapping),
            step: rename_element(step, mapping),
        },
        other => other.clone(),
    };

    Rc::new(Node {
        symbol: node.symbol,
        shape: node.shape.as_ref().map(|shape| rename_elements(shape, mapping)),
        attrib,
        children: node.children.iter().map(|c| rename_tree(c, mapping)).collect(),
    })
}

fn rename_symbol(symbol: &SymbolNode, mapping: &HashMap<String, String>) -> SymbolNode {
    SymbolNode {
        kind: symbol.kind,
        shape: symbol.shape.as_ref().map(|s| rename_elements(s, mapping)),
        ty: symbol.ty.clone(),
        value: symbol.value.as_ref().map(|v| rename_elements(v, mapping)),
    }
}

/// Pairs up generated names on the right with equivalent ones on the left.
///
/// Two symbols are equivalent when they match element by element, looking
/// through generated names to the symbols they stand for. User names must be
/// spelled the same on both sides.
struct Equivalence<'a> {
    left: &'a Context,
    right: &'a Context,
    /// right generated name -> left generated name
    aliases: HashMap<String, String>,
}

impl<'a> Equivalence<'a> {
    fn symbols(&mut self, l: &SymbolNode, r: &SymbolNode) -> CompileResult<bool> {
        Ok(l.kind == r.kind
            && l.ty == r.ty
            && self.optional_elements(&l.shape, &r.shape)?
            && self.optional_elements(&l.value, &r.value)?)
    }

    fn optional_elements(&mut self, l: &Option<Vec<Element>>, r: &Option<Vec<Element>>) -> CompileResult<bool> {
        match (l, r) {
            (None, None) => Ok(true),
            (Some(l), Some(r)) if l.len() == r.len() => {
                for (l, r) in l.iter().zip(r) {
                    if !self.element(l, r)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn element(&mut self, l: &Element, r: &Element) -> CompileResult<bool> {
        let (l_name, r_name) = match (l.symbol_name(), r.symbol_name()) {
            (Some(l_name), Some(r_name)) => (l_name, r_name),
            _ => return Ok(l == r),
        };
        match (is_generated(l_name), is_generated(r_name)) {
            (false, false) => Ok(l_name == r_name),
            (true, true) => {
                if let Some(existing) = self.aliases.get(r_name) {
                    return Ok(existing == l_name);
                }
                self.aliases.insert(r_name.to_string(), l_name.to_string());
                let (left, right) = (self.left, self.right);
                self.symbols(left.symbol(l_name)?, right.symbol(r_name)?)
            }
            _ => Ok(false),
        }
    }
}

/// Merge two independently built contexts into one table.
///
/// Generated names on both sides are renamed to fresh ids drawn from a single
/// counter; user names are kept and must describe equivalent symbols on both
/// sides. Generated names a shared user symbol depends on are merged into one.
/// Returns the merged table and the two renamed trees.
pub fn join_symbol_tables(left: &Context, right: &Context) -> CompileResult<(SymbolTable, NodeRef, NodeRef)> {
    let left_names = reachable_symbols(left)?;
    let right_names = reachable_symbols(right)?;

    let mut shared: Vec<&String> = left_names
        .intersection(&right_names)
        .filter(|name| !is_generated(name))
        .collect();
    shared.sort();

    let mut equivalence = Equivalence {
        left,
        right,
        aliases: HashMap::new(),
    };
    for name in shared {
        let (l, r) = (left.symbol(name)?, right.symbol(name)?);
        if !equivalence.symbols(l, r)? {
            return Err(CompileError::MergeConflict {
                name: name.clone(),
                left: l.to_string(),
                right: r.to_string(),
            });
        }
    }

    let mut table = SymbolTable::new();
    let mut next_id = 0;
    let (left_tree, left_mapping) = merge_side(left, &left_names, &HashMap::new(), &mut table, &mut next_id)?;

    let aliases: HashMap<String, String> = equivalence
        .aliases
        .into_iter()
        .filter_map(|(r, l)| left_mapping.get(&l).map(|renamed| (r, renamed.clone())))
        .collect();
    let (right_tree, _) = merge_side(right, &right_names, &aliases, &mut table, &mut next_id)?;
    Ok((table, left_tree, right_tree))
}

/// Rename one side's generated names and copy its reachable symbols over.
///
/// Names in `aliases` reuse an already merged name instead of a fresh id.
fn merge_side(
    context: &Context,
    names: &HashSet<String>,
    aliases: &HashMap<String, String>,
    table: &mut SymbolTable,
    next_id: &mut usize,
) -> CompileResult<(NodeRef, HashMap<String, String>)> {
    // table order keeps the merge deterministic
    let ordered: Vec<(&str, &SymbolNode)> = context
        .table()
        .iter()
        .filter(|(name, _)| names.contains(*name))
        .collect();

    let mut mapping = HashMap::new();
    for (name, symbol) in &ordered {
        if !is_generated(name) {
            continue;
        }
        if let Some(alias) = aliases.get(*name) {
            mapping.insert(name.to_string(), alias.clone());
            continue;
        }
        let prefix = match symbol.kind {
            SymbolKind::Array => "_a",
            SymbolKind::Index => "_i",
        };
        mapping.insert(name.to_string(), format!("{}{}", prefix, next_id));
        *next_id += 1;
    }

    for (name, symbol) in &ordered {
        table.insert(&rename(name, &mapping), rename_symbol(symbol, &mapping))?;
    }
    Ok((rename_tree(&context.ast, &mapping), mapping))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testing::*;
    use crate::ast::{dims, ArithOp, NodeSymbol};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_idempotent() {
        let mut table = SymbolTable::new();
        table.insert("A", array_symbol(Some(dims(&[2, 3])), None)).unwrap();
        let before = table.clone();
        table.insert("A", array_symbol(Some(dims(&[2, 3])), None)).unwrap();
        assert_eq!(table, before);
    }

    #[test]
    fn test_insert_conflict() {
        let mut table = SymbolTable::new();
        table.insert("A", array_symbol(Some(dims(&[2, 3])), None)).unwrap();
        let err = table
            .insert("A", array_symbol(Some(dims(&[2, 3, 4])), None))
            .unwrap_err();
        match err {
            CompileError::SymbolConflict { name, existing, attempted } => {
                assert_eq!(name, "A");
                assert_eq!(existing, "array shape=<2 3>");
                assert_eq!(attempted, "array shape=<2 3 4>");
            }
            other => panic!("Expected SymbolConflict, got {:?}", other),
        }
    }

    #[test]
    fn test_unique_names_follow_table_growth() {
        let mut table = table(vec![("A", array_symbol(Some(dims(&[3, 4])), None))]);
        let first = table.generate_unique_index_name();
        assert_eq!(first, "_i1");
        table.insert(&first, index_symbol(3)).unwrap();

        let second = table.generate_unique_index_name();
        assert_eq!(second, "_i2");
        table.insert(&second, index_symbol(4)).unwrap();

        assert_eq!(table.generate_unique_array_name(), "_a3");
    }

    #[test]
    fn test_unique_names_skip_existing_ids() {
        let table = table(vec![
            ("_a7", array_symbol(Some(dims(&[])), Some(dims(&[1])))),
            ("A", array_symbol(None, None)),
        ]);
        assert_eq!(table.generate_unique_array_name(), "_a8");
    }

    #[test]
    fn test_iter_preserves_insertion_order() {
        let table = table(vec![
            ("n", array_symbol(Some(Vec::new()), None)),
            ("B", array_symbol(None, None)),
            ("A", array_symbol(None, None)),
        ]);
        let names: Vec<&str> = table.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["n", "B", "A"]);
    }

    fn plus(left: NodeRef, right: NodeRef) -> NodeRef {
        bin(NodeSymbol::Arith(ArithOp::Plus), None, left, right)
    }

    #[test]
    fn test_join_renames_generated_names() {
        let left = Context::new(
            plus(arr("A", None), arr("_a1", None)),
            table(vec![
                ("A", array_symbol(Some(vec![sym("n")]), None)),
                ("_a1", array_symbol(Some(Vec::new()), Some(dims(&[5])))),
                ("n", array_symbol(Some(Vec::new()), None)),
            ]),
        );
        let right = Context::new(
            plus(arr("_a1", None), arr("A", None)),
            table(vec![
                ("A", array_symbol(Some(vec![sym("n")]), None)),
                ("_a1", array_symbol(Some(Vec::new()), Some(dims(&[7])))),
                ("n", array_symbol(Some(Vec::new()), None)),
                ("unused", array_symbol(None, None)),
            ]),
        );
        let left_before = left.clone();
        let right_before = right.clone();

        let (table, left_tree, right_tree) = join_symbol_tables(&left, &right).unwrap();

        assert_eq!(left, left_before);
        assert_eq!(right, right_before);
        assert_eq!(left_tree.children[1].name(), Some("_a0"));
        assert_eq!(right_tree.children[0].name(), Some("_a1"));
        assert_eq!(table.get("_a0").unwrap().value, Some(dims(&[5])));
        assert_eq!(table.get("_a1").unwrap().value, Some(dims(&[7])));
        assert!(table.get("n").is_some());
        assert!(table.get("unused").is_none());
        assert_eq!(table.len(), 4);
        assert_eq!(table.generate_unique_array_name(), "_a4");
    }

    #[test]
    fn test_join_renames_symbolic_dependencies() {
        let left = Context::new(
            arr("A", None),
            table(vec![
                ("_a3", array_symbol(Some(Vec::new()), None)),
                ("A", array_symbol(Some(vec![sym("_a3"), Element::Int(2)]), None)),
            ]),
        );
        let right = Context::new(arr("B", None), table(vec![("B", array_symbol(None, None))]));

        let (table, _, _) = join_symbol_tables(&left, &right).unwrap();
        let shape = table.get("A").unwrap().shape.clone().unwrap();
        assert_eq!(shape[0].symbol_name(), Some("_a0"));
        assert_eq!(shape[1], Element::Int(2));
    }

    #[test]
    fn test_join_rejects_mismatched_user_symbols() {
        let left = Context::new(arr("A", None), table(vec![("A", array_symbol(Some(dims(&[2, 3])), None))]));
        let right = Context::new(arr("A", None), table(vec![("A", array_symbol(Some(dims(&[2, 4])), None))]));
        let result = join_symbol_tables(&left, &right);
        assert!(matches!(result, Err(CompileError::MergeConflict { ref name, .. }) if name == "A"));
    }

    /// `A` sized by a generated rank-0 constant holding `length`
    fn sized_by_constant(length: i64) -> Context {
        Context::new(
            arr("A", None),
            table(vec![
                ("_a0", array_symbol(Some(Vec::new()), Some(dims(&[length])))),
                ("A", array_symbol(Some(vec![sym("_a0")]), None)),
            ]),
        )
    }

    #[test]
    fn test_join_shares_equivalent_dependencies() {
        let left = sized_by_constant(5);
        let right = sized_by_constant(5);

        let (table, left_tree, right_tree) = join_symbol_tables(&left, &right).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("_a0").unwrap().value, Some(dims(&[5])));
        assert_eq!(table.get("A").unwrap().shape, Some(vec![sym("_a0")]));
        assert_eq!(left_tree.name(), Some("A"));
        assert_eq!(right_tree.name(), Some("A"));
    }

    #[test]
    fn test_join_rejects_different_dependencies() {
        let result = join_symbol_tables(&sized_by_constant(5), &sized_by_constant(7));
        match result {
            Err(CompileError::MergeConflict { name, .. }) => assert_eq!(name, "A"),
            other => panic!("Expected MergeConflict, got {:?}", other),
        }
    }

    #[test]
    fn test_join_unknown_symbol() {
        let left = Context::new(arr("A", None), SymbolTable::new());
        let right = Context::new(arr("B", None), table(vec![("B", array_symbol(None, None))]));
        assert!(matches!(
            join_symbol_tables(&left, &right),
            Err(CompileError::UnknownSymbol { .. })
        ));
    }
}
