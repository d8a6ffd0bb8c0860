use crate::syntax::tree::{Node, Tree, TreeRef, INDENT};
use std::fmt;

/// Render a tree back to source form that the parser accepts.
pub fn render(tree: &TreeRef) -> String {
    let mut out = String::new();
    render_into(tree, &mut out);
    out
}

fn render_into(tree: &Tree, out: &mut String) {
    match &tree.node {
        Node::Integer(v) => out.push_str(&v.to_string()),
        Node::Real(v) => {
            // Keep the decimal point so the literal scans back as a real
            let text = format!("{}", v);
            if text.contains('.') || text.contains('e') || text.contains("inf") || text.contains("NaN") {
                out.push_str(&text);
            } else {
                out.push_str(&text);
                out.push_str(".0");
            }
        }
        Node::Text {
            value,
            opening,
            closing,
        } => {
            out.push_str(opening);
            if opening.len() == 1 {
                // Embedded quotes double
                for c in value.chars() {
                    out.push(c);
                    if opening.chars().next() == Some(c) {
                        out.push(c);
                    }
                }
            } else {
                out.push_str(value);
            }
            out.push_str(closing);
        }
        Node::Name(v) => out.push_str(v),
        Node::Block {
            child,
            opening,
            closing,
        } => {
            if opening == INDENT {
                let inner = render(&child.borrow());
                for line in inner.lines() {
                    out.push('\n');
                    out.push_str("    ");
                    out.push_str(line);
                }
            } else {
                out.push_str(opening);
                render_into(&child.borrow(), out);
                out.push_str(closing);
            }
        }
        Node::Prefix { left, right } => {
            render_into(&left.borrow(), out);
            if right.borrow().as_block().is_none() {
                out.push(' ');
            }
            render_into(&right.borrow(), out);
        }
        Node::Postfix { left, right } => {
            render_into(&left.borrow(), out);
            render_into(&right.borrow(), out);
        }
        Node::Infix { name, left, right } => {
            render_into(&left.borrow(), out);
            match name.as_str() {
                "\n" => out.push('\n'),
                ";" | "," => {
                    out.push_str(name);
                    out.push(' ');
                }
                _ => {
                    out.push(' ');
                    out.push_str(name);
                    out.push(' ');
                }
            }
            render_into(&right.borrow(), out);
        }
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        render_into(self, &mut out);
        write!(f, "{}", out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::tree::NOWHERE;

    #[test]
    fn literals_render_in_source_form() {
        assert_eq!(render(&Tree::integer(42, NOWHERE)), "42");
        assert_eq!(render(&Tree::real(2.0, NOWHERE)), "2.0");
        assert_eq!(render(&Tree::quoted("hi", NOWHERE)), "\"hi\"");
        assert_eq!(
            render(&Tree::quoted("say \"hi\"", NOWHERE)),
            "\"say \"\"hi\"\"\""
        );
    }

    #[test]
    fn operators_render_with_spacing() {
        let tree = Tree::infix(
            "+",
            Tree::integer(1, NOWHERE),
            Tree::infix(
                "*",
                Tree::name("x", NOWHERE),
                Tree::integer(2, NOWHERE),
                NOWHERE,
            ),
            NOWHERE,
        );
        assert_eq!(render(&tree), "1 + x * 2");
    }

    #[test]
    fn indent_blocks_render_indented() {
        let block = Tree::block(
            Tree::infix(
                "\n",
                Tree::name("a", NOWHERE),
                Tree::name("b", NOWHERE),
                NOWHERE,
            ),
            crate::syntax::tree::INDENT,
            crate::syntax::tree::UNINDENT,
            NOWHERE,
        );
        let tree = Tree::prefix(Tree::name("scope", NOWHERE), block, NOWHERE);
        assert_eq!(render(&tree), "scope\n    a\n    b");
    }
}
