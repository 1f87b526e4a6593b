//! Schema validation without compilation.

use super::path::resolve;
use crate::ast::{Comparison, Node, Visitor};
use crate::error::Result;
use crate::schema::EntitySchema;

/// Checks every selector of a tree against a schema. Values and operators
/// are not looked at.
pub struct ValidationVisitor<'a> {
    schema: &'a EntitySchema,
}

impl<'a> ValidationVisitor<'a> {
    pub fn new(schema: &'a EntitySchema) -> Self {
        Self { schema }
    }

    fn visit_all(&mut self, children: &[Node]) -> Result<()> {
        children.iter().try_for_each(|child| child.accept(self))
    }
}

impl Visitor for ValidationVisitor<'_> {
    type Output = Result<()>;

    fn visit_and(&mut self, children: &[Node]) -> Result<()> {
        self.visit_all(children)
    }

    fn visit_or(&mut self, children: &[Node]) -> Result<()> {
        self.visit_all(children)
    }

    fn visit_comparison(&mut self, comparison: &Comparison) -> Result<()> {
        resolve(&comparison.selector, self.schema).map(|_| ())
    }
}

/// Validate every selector in `tree`.
pub fn validate(tree: &Node, schema: &EntitySchema) -> Result<()> {
    tree.accept(&mut ValidationVisitor::new(schema))
}
