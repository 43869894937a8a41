use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind},
    span::SourceSpan,
    value::Value,
};

pub type EnvironmentRef = Rc<RefCell<Environment>>;

/// Lexical scope frame. Frames are chained through `parent`; closures hold a
/// reference to the frame they were created in, so bindings live as long as
/// any closure that captured them. There is no assignment in the language —
/// a frame only ever grows.
#[derive(Debug, Default)]
pub struct Environment {
    parent: Option<EnvironmentRef>,
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: None,
            bindings: IndexMap::new(),
        }))
    }

    pub fn with_parent(parent: EnvironmentRef) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: Some(parent),
            bindings: IndexMap::new(),
        }))
    }

    pub fn define(&mut self, name: String, value: Value) {
        self.bindings.insert(name, value);
    }

    pub fn get(env: &EnvironmentRef, name: &str, span: SourceSpan) -> Result<Value, Diagnostic> {
        if let Some(value) = env.borrow().bindings.get(name) {
            return Ok(value.clone());
        }
        if let Some(parent) = env.borrow().parent.clone() {
            return Environment::get(&parent, name, span);
        }
        Err(
            Diagnostic::new(DiagnosticKind::NameUnbound, format!("unbound name `{name}`"))
                .with_span(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_parent_chain() {
        let root = Environment::new();
        root.borrow_mut().define("x".into(), Value::int(1));
        let child = Environment::with_parent(Rc::clone(&root));
        let value = Environment::get(&child, "x", SourceSpan::point(0)).unwrap();
        assert!(value.equals(&Value::int(1)));
    }

    #[test]
    fn inner_binding_shadows_outer() {
        let root = Environment::new();
        root.borrow_mut().define("x".into(), Value::int(1));
        let child = Environment::with_parent(Rc::clone(&root));
        child.borrow_mut().define("x".into(), Value::int(2));
        let value = Environment::get(&child, "x", SourceSpan::point(0)).unwrap();
        assert!(value.equals(&Value::int(2)));
    }

    #[test]
    fn missing_name_reports_unbound() {
        let root = Environment::new();
        let err = Environment::get(&root, "nope", SourceSpan::point(0)).unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::NameUnbound);
    }
}
