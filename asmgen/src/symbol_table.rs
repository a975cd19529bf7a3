//! Scoped storage labels.
//!
//! Scopes form a tree: the root is the program, every loop gets a child scope
//! keyed by the loop id the code generator handed out. A scope path is the
//! list of those ids from the outermost loop inwards.

use pjc_utils::unique_id::variable_label_name;
use thiserror::Error;
use tracing::debug;

/// Holds the program's final value; always declared in the root.
pub const RESULT_NAME: &str = "rez";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SymbolTableError {
    #[error("Identifier \"{name}\" is not declared in scope {scope_path:?}")]
    UnresolvedIdentifier { name: String, scope_path: Vec<u64> },
    #[error("No scope at {0:?}")]
    UnknownScope(Vec<u64>),
    #[error("Loop {0} already has a scope")]
    DuplicateScope(u64),
}

#[derive(Debug)]
struct Scope {
    loop_id: Option<u64>,
    /// Name and label, in registration order.
    bindings: Vec<(String, String)>,
    /// Indices into the arena, in creation order.
    children: Vec<usize>,
}

impl Scope {
    fn new(loop_id: Option<u64>) -> Self {
        Self {
            loop_id,
            bindings: vec![],
            children: vec![],
        }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, label)| label.as_str())
    }
}

#[derive(Debug)]
pub struct SymbolTable {
    /// Index 0 is the root.
    scopes: Vec<Scope>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut root = Scope::new(None);
        root.bindings.push((
            RESULT_NAME.to_owned(),
            variable_label_name(&[], RESULT_NAME),
        ));

        Self { scopes: vec![root] }
    }

    /// Arena indices of every scope on `scope_path`, root first.
    fn chain(&self, scope_path: &[u64]) -> Result<Vec<usize>, SymbolTableError> {
        let mut chain = vec![0];
        let mut cur = 0;

        for id in scope_path {
            cur = self.scopes[cur]
                .children
                .iter()
                .copied()
                .find(|&child| self.scopes[child].loop_id == Some(*id))
                .ok_or_else(|| SymbolTableError::UnknownScope(scope_path.to_vec()))?;
            chain.push(cur);
        }

        Ok(chain)
    }

    fn find(&self, name: &str, scope_path: &[u64]) -> Result<Option<String>, SymbolTableError> {
        Ok(self
            .chain(scope_path)?
            .into_iter()
            .rev()
            .find_map(|scope| self.scopes[scope].get(name))
            .map(ToOwned::to_owned))
    }

    /// Returns the label `name` already resolves to from `scope_path`, or
    /// binds a fresh one in the innermost scope of the path.
    pub fn declare(&mut self, name: &str, scope_path: &[u64]) -> Result<String, SymbolTableError> {
        if let Some(label) = self.find(name, scope_path)? {
            return Ok(label);
        }

        let innermost = *self
            .chain(scope_path)?
            .last()
            .ok_or_else(|| SymbolTableError::UnknownScope(scope_path.to_vec()))?;
        let label = variable_label_name(scope_path, name);

        debug!(name, %label, ?scope_path, "declared variable");
        self.scopes[innermost]
            .bindings
            .push((name.to_owned(), label.clone()));
        Ok(label)
    }

    /// Opens the scope for loop `loop_id` under `scope_path` and binds the loop
    /// variable there, shadowing anything outside.
    pub fn declare_loop_var(
        &mut self,
        loop_id: u64,
        name: &str,
        scope_path: &[u64],
    ) -> Result<String, SymbolTableError> {
        let parent = *self
            .chain(scope_path)?
            .last()
            .ok_or_else(|| SymbolTableError::UnknownScope(scope_path.to_vec()))?;

        if self.scopes[parent]
            .children
            .iter()
            .any(|&child| self.scopes[child].loop_id == Some(loop_id))
        {
            return Err(SymbolTableError::DuplicateScope(loop_id));
        }

        let mut path = scope_path.to_vec();
        path.push(loop_id);
        let label = variable_label_name(&path, name);

        let mut scope = Scope::new(Some(loop_id));
        scope.bindings.push((name.to_owned(), label.clone()));
        self.scopes.push(scope);
        let index = self.scopes.len() - 1;
        self.scopes[parent].children.push(index);

        debug!(name, %label, loop_id, "declared loop variable");
        Ok(label)
    }

    /// Searches from the innermost scope of `scope_path` out to the root.
    pub fn lookup(&self, name: &str, scope_path: &[u64]) -> Result<String, SymbolTableError> {
        self.find(name, scope_path)?
            .ok_or_else(|| SymbolTableError::UnresolvedIdentifier {
                name: name.to_owned(),
                scope_path: scope_path.to_vec(),
            })
    }

    /// Every label, depth first: a scope's bindings, then its children.
    pub fn list_labels(&self) -> Vec<String> {
        let mut labels = vec![];
        let mut stack = vec![0];

        while let Some(scope) = stack.pop() {
            let scope = &self.scopes[scope];
            labels.extend(scope.bindings.iter().map(|(_, label)| label.clone()));
            stack.extend(scope.children.iter().rev());
        }

        labels
    }
}
