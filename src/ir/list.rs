//! Indexable statement sequence with a parallel label table.
//!
//! Passes that insert statements (the leave injector) go through
//! [`InstructionList::insert`], which shifts every recorded label position at
//! or after the insertion point in the same call. Nothing else mutates the
//! table, so the two views cannot drift apart.

use std::collections::BTreeMap;
use std::ops::Index;

use crate::error::{CodegenError, Result};

use super::Statement;

/// Label name → statement index of its meta-label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelIndex {
    positions: BTreeMap<String, usize>,
}

impl LabelIndex {
    pub fn build(statements: &[Statement]) -> Result<Self> {
        let mut positions = BTreeMap::new();
        for (i, stmt) in statements.iter().enumerate() {
            if let Some(name) = stmt.label_name() {
                if positions.insert(name.to_string(), i).is_some() {
                    return Err(CodegenError::DuplicateLabel {
                        label: name.to_string(),
                    });
                }
            }
        }
        Ok(Self { positions })
    }

    pub fn get(&self, label: &str) -> Option<usize> {
        self.positions.get(label).copied()
    }

    pub fn resolve(&self, label: &str) -> Result<usize> {
        self.get(label).ok_or_else(|| CodegenError::unresolved(label))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.positions.iter().map(|(k, v)| (k.as_str(), *v))
    }

    fn shift_from(&mut self, at: usize) {
        for pos in self.positions.values_mut() {
            if *pos >= at {
                *pos += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstructionList {
    statements: Vec<Statement>,
    labels: LabelIndex,
}

impl InstructionList {
    pub fn new(statements: Vec<Statement>) -> Result<Self> {
        let labels = LabelIndex::build(&statements)?;
        Ok(Self { statements, labels })
    }

    /// Insert `stmt` at `at`, re-indexing every label at or after it.
    pub fn insert(&mut self, at: usize, stmt: Statement) -> Result<()> {
        if let Some(name) = stmt.label_name() {
            if self.labels.get(name).is_some() {
                return Err(CodegenError::DuplicateLabel {
                    label: name.to_string(),
                });
            }
        }
        self.labels.shift_from(at);
        if let Some(name) = stmt.label_name() {
            self.labels.positions.insert(name.to_string(), at);
        }
        self.statements.insert(at, stmt);
        Ok(())
    }

    pub fn labels(&self) -> &LabelIndex {
        &self.labels
    }

    pub fn resolve(&self, label: &str) -> Result<usize> {
        self.labels.resolve(label)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Statement> {
        self.statements.get(index)
    }

    pub fn as_slice(&self) -> &[Statement] {
        &self.statements
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Statement> {
        self.statements.iter()
    }

    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }
}

impl Index<usize> for InstructionList {
    type Output = Statement;

    fn index(&self, index: usize) -> &Statement {
        &self.statements[index]
    }
}
