use std::{cell::RefCell, rc::Rc};

/// Shared handle to a tree node. Trees form a DAG: the same node may be a
/// child of several parents, and annotations are keyed by node address.
pub type TreeRef = Rc<Tree>;

/// Source position as an offset into the `Positions` table.
pub type TreePosition = usize;

pub const NOWHERE: TreePosition = usize::MAX;

/// Delimiters of indentation blocks, distinguished from real bracket pairs.
pub const INDENT: &str = "I+";
pub const UNINDENT: &str = "I-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Integer,
    Real,
    Text,
    Name,
    Block,
    Prefix,
    Postfix,
    Infix,
}

impl Kind {
    pub fn is_leaf(self) -> bool {
        self <= Kind::Name
    }
}

#[derive(Debug)]
pub enum Node {
    Integer(i64),
    Real(f64),
    Text {
        value: String,
        opening: String,
        closing: String,
    },
    Name(String),
    Block {
        child: RefCell<TreeRef>,
        opening: String,
        closing: String,
    },
    Prefix {
        left: RefCell<TreeRef>,
        right: RefCell<TreeRef>,
    },
    Postfix {
        left: RefCell<TreeRef>,
        right: RefCell<TreeRef>,
    },
    Infix {
        name: String,
        left: RefCell<TreeRef>,
        right: RefCell<TreeRef>,
    },
}

/// Annotations attached to a node, queried by tag.
#[derive(Debug, Clone)]
pub enum Info {
    Comments {
        before: Vec<String>,
        after: Vec<String>,
    },
    Closure,
    Type(TreeRef),
    Compiled(usize),
    Kinds(u32),
}

#[derive(Debug)]
pub struct Tree {
    pub node: Node,
    pub pos: TreePosition,
    infos: RefCell<Vec<Info>>,
}

impl Tree {
    fn make(node: Node, pos: TreePosition) -> TreeRef {
        Rc::new(Tree {
            node,
            pos,
            infos: RefCell::new(Vec::new()),
        })
    }

    pub fn integer(value: i64, pos: TreePosition) -> TreeRef {
        Tree::make(Node::Integer(value), pos)
    }

    pub fn real(value: f64, pos: TreePosition) -> TreeRef {
        Tree::make(Node::Real(value), pos)
    }

    pub fn text(value: &str, opening: &str, closing: &str, pos: TreePosition) -> TreeRef {
        Tree::make(
            Node::Text {
                value: value.to_owned(),
                opening: opening.to_owned(),
                closing: closing.to_owned(),
            },
            pos,
        )
    }

    pub fn quoted(value: &str, pos: TreePosition) -> TreeRef {
        Tree::text(value, "\"", "\"", pos)
    }

    pub fn name(value: &str, pos: TreePosition) -> TreeRef {
        Tree::make(Node::Name(value.to_owned()), pos)
    }

    pub fn block(child: TreeRef, opening: &str, closing: &str, pos: TreePosition) -> TreeRef {
        Tree::make(
            Node::Block {
                child: RefCell::new(child),
                opening: opening.to_owned(),
                closing: closing.to_owned(),
            },
            pos,
        )
    }

    pub fn prefix(left: TreeRef, right: TreeRef, pos: TreePosition) -> TreeRef {
        Tree::make(
            Node::Prefix {
                left: RefCell::new(left),
                right: RefCell::new(right),
            },
            pos,
        )
    }

    pub fn postfix(left: TreeRef, right: TreeRef, pos: TreePosition) -> TreeRef {
        Tree::make(
            Node::Postfix {
                left: RefCell::new(left),
                right: RefCell::new(right),
            },
            pos,
        )
    }

    pub fn infix(name: &str, left: TreeRef, right: TreeRef, pos: TreePosition) -> TreeRef {
        Tree::make(
            Node::Infix {
                name: name.to_owned(),
                left: RefCell::new(left),
                right: RefCell::new(right),
            },
            pos,
        )
    }

    pub fn kind(&self) -> Kind {
        match &self.node {
            Node::Integer(_) => Kind::Integer,
            Node::Real(_) => Kind::Real,
            Node::Text { .. } => Kind::Text,
            Node::Name(_) => Kind::Name,
            Node::Block { .. } => Kind::Block,
            Node::Prefix { .. } => Kind::Prefix,
            Node::Postfix { .. } => Kind::Postfix,
            Node::Infix { .. } => Kind::Infix,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind().is_leaf()
    }

    pub fn is_constant(&self) -> bool {
        self.kind() <= Kind::Text
    }

    /// The empty name doubles as the nil slot of symbol tables and the
    /// child of `()`.
    pub fn is_nil(&self) -> bool {
        matches!(&self.node, Node::Name(n) if n.is_empty())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match &self.node {
            Node::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match &self.node {
            Node::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.node {
            Node::Text { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match &self.node {
            Node::Name(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_name(&self, what: &str) -> bool {
        self.as_name() == Some(what)
    }

    pub fn as_block(&self) -> Option<(TreeRef, &str, &str)> {
        match &self.node {
            Node::Block {
                child,
                opening,
                closing,
            } => Some((child.borrow().clone(), opening, closing)),
            _ => None,
        }
    }

    pub fn block_child(&self) -> Option<TreeRef> {
        match &self.node {
            Node::Block { child, .. } => Some(child.borrow().clone()),
            _ => None,
        }
    }

    pub fn as_prefix(&self) -> Option<(TreeRef, TreeRef)> {
        match &self.node {
            Node::Prefix { left, right } => Some((left.borrow().clone(), right.borrow().clone())),
            _ => None,
        }
    }

    pub fn as_postfix(&self) -> Option<(TreeRef, TreeRef)> {
        match &self.node {
            Node::Postfix { left, right } => Some((left.borrow().clone(), right.borrow().clone())),
            _ => None,
        }
    }

    pub fn as_infix(&self) -> Option<(&str, TreeRef, TreeRef)> {
        match &self.node {
            Node::Infix { name, left, right } => {
                Some((name, left.borrow().clone(), right.borrow().clone()))
            }
            _ => None,
        }
    }

    /// An infix with the given name, e.g. `infix_named("is")`.
    pub fn infix_named(&self, wanted: &str) -> Option<(TreeRef, TreeRef)> {
        match self.as_infix() {
            Some((name, left, right)) if name == wanted => Some((left, right)),
            _ => None,
        }
    }

    pub fn left(&self) -> Option<TreeRef> {
        match &self.node {
            Node::Prefix { left, .. } | Node::Postfix { left, .. } | Node::Infix { left, .. } => {
                Some(left.borrow().clone())
            }
            _ => None,
        }
    }

    pub fn right(&self) -> Option<TreeRef> {
        match &self.node {
            Node::Prefix { right, .. }
            | Node::Postfix { right, .. }
            | Node::Infix { right, .. } => Some(right.borrow().clone()),
            _ => None,
        }
    }

    pub fn set_left(&self, tree: TreeRef) {
        match &self.node {
            Node::Prefix { left, .. } | Node::Postfix { left, .. } | Node::Infix { left, .. } => {
                *left.borrow_mut() = tree
            }
            _ => (),
        }
    }

    pub fn set_right(&self, tree: TreeRef) {
        match &self.node {
            Node::Prefix { right, .. }
            | Node::Postfix { right, .. }
            | Node::Infix { right, .. } => *right.borrow_mut() = tree,
            _ => (),
        }
    }

    pub fn set_block_child(&self, tree: TreeRef) {
        if let Node::Block { child, .. } = &self.node {
            *child.borrow_mut() = tree;
        }
    }

    pub fn is_indent_block(&self) -> bool {
        matches!(&self.node, Node::Block { opening, .. } if opening == INDENT)
    }

    pub fn is_braces_block(&self) -> bool {
        matches!(&self.node, Node::Block { opening, .. } if opening == "{")
    }

    pub fn set_info(&self, info: Info) {
        self.infos.borrow_mut().push(info);
    }

    pub fn mark_closure(&self) {
        if !self.has_closure_info() {
            self.set_info(Info::Closure);
        }
    }

    pub fn has_closure_info(&self) -> bool {
        self.infos
            .borrow()
            .iter()
            .any(|i| matches!(i, Info::Closure))
    }

    pub fn type_info(&self) -> Option<TreeRef> {
        self.infos.borrow().iter().rev().find_map(|i| match i {
            Info::Type(t) => Some(t.clone()),
            _ => None,
        })
    }

    pub fn set_type_info(&self, ty: TreeRef) {
        self.set_info(Info::Type(ty));
    }

    /// Bitmask of tree kinds for which rewrites exist, kept on the root
    /// scope so lookups and closures can skip kinds nobody redefines.
    pub fn rewrite_kinds(&self) -> u32 {
        self.infos
            .borrow()
            .iter()
            .rev()
            .find_map(|i| match i {
                Info::Kinds(mask) => Some(*mask),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn add_rewrite_kind(&self, kind: Kind) {
        let mask = self.rewrite_kinds();
        let wanted = mask | (1 << kind as u32);
        if wanted != mask {
            self.set_info(Info::Kinds(wanted));
        }
    }

    pub fn compiled_info(&self) -> Option<usize> {
        self.infos.borrow().iter().rev().find_map(|i| match i {
            Info::Compiled(h) => Some(*h),
            _ => None,
        })
    }

    pub fn comments_info(&self) -> Option<(Vec<String>, Vec<String>)> {
        self.infos.borrow().iter().find_map(|i| match i {
            Info::Comments { before, after } => Some((before.clone(), after.clone())),
            _ => None,
        })
    }

    pub fn add_comments(&self, comments: Vec<String>, before: bool) {
        let mut infos = self.infos.borrow_mut();
        for info in infos.iter_mut() {
            if let Info::Comments {
                before: b,
                after: a,
            } = info
            {
                if before {
                    *b = comments;
                } else {
                    *a = comments;
                }
                return;
            }
        }
        let (b, a) = if before {
            (comments, Vec::new())
        } else {
            (Vec::new(), comments)
        };
        infos.push(Info::Comments {
            before: b,
            after: a,
        });
    }

    /// Structural equality over the tree shape; annotations and positions
    /// are not compared.
    pub fn equal(a: &TreeRef, b: &TreeRef) -> bool {
        if Rc::ptr_eq(a, b) {
            return true;
        }
        match (&a.node, &b.node) {
            (Node::Integer(x), Node::Integer(y)) => x == y,
            (Node::Real(x), Node::Real(y)) => x == y,
            (Node::Text { value: x, .. }, Node::Text { value: y, .. }) => x == y,
            (Node::Name(x), Node::Name(y)) => x == y,
            (
                Node::Block {
                    child: xc,
                    opening: xo,
                    closing: xk,
                },
                Node::Block {
                    child: yc,
                    opening: yo,
                    closing: yk,
                },
            ) => xo == yo && xk == yk && Tree::equal(&xc.borrow(), &yc.borrow()),
            (
                Node::Prefix {
                    left: xl,
                    right: xr,
                },
                Node::Prefix {
                    left: yl,
                    right: yr,
                },
            )
            | (
                Node::Postfix {
                    left: xl,
                    right: xr,
                },
                Node::Postfix {
                    left: yl,
                    right: yr,
                },
            ) => {
                Tree::equal(&xl.borrow(), &yl.borrow()) && Tree::equal(&xr.borrow(), &yr.borrow())
            }
            (
                Node::Infix {
                    name: xn,
                    left: xl,
                    right: xr,
                },
                Node::Infix {
                    name: yn,
                    left: yl,
                    right: yr,
                },
            ) => {
                xn == yn
                    && Tree::equal(&xl.borrow(), &yl.borrow())
                    && Tree::equal(&xr.borrow(), &yr.borrow())
            }
            _ => false,
        }
    }
}

/// Identity of a shared node, usable as a map key. Two structurally equal
/// trees are distinct keys unless they are the same allocation.
#[derive(Debug, Clone)]
pub struct TreeId(pub TreeRef);

impl TreeId {
    pub fn of(tree: &TreeRef) -> TreeId {
        TreeId(tree.clone())
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for TreeId {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for TreeId {}

impl std::hash::Hash for TreeId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality_ignores_identity() {
        let a = Tree::infix(
            "+",
            Tree::integer(1, NOWHERE),
            Tree::name("x", NOWHERE),
            NOWHERE,
        );
        let b = Tree::infix(
            "+",
            Tree::integer(1, NOWHERE),
            Tree::name("x", NOWHERE),
            NOWHERE,
        );
        assert!(Tree::equal(&a, &b));
        assert_ne!(TreeId::of(&a), TreeId::of(&b));
        assert_eq!(TreeId::of(&a), TreeId::of(&a.clone()));
    }

    #[test]
    fn info_chain_is_per_node() {
        let shared = Tree::name("x", NOWHERE);
        let one = Tree::prefix(Tree::name("f", NOWHERE), shared.clone(), NOWHERE);
        let two = Tree::prefix(Tree::name("g", NOWHERE), shared.clone(), NOWHERE);
        one.mark_closure();
        assert!(one.has_closure_info());
        assert!(!two.has_closure_info());
        assert!(!shared.has_closure_info());
    }

    #[test]
    fn child_links_can_be_rewritten() {
        let decl = Tree::infix(
            "is",
            Tree::name("x", NOWHERE),
            Tree::integer(1, NOWHERE),
            NOWHERE,
        );
        decl.set_right(Tree::integer(2, NOWHERE));
        let (_, _, right) = decl.as_infix().unwrap();
        assert_eq!(right.as_integer(), Some(2));
    }
}
