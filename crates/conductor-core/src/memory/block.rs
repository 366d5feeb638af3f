use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, PoisonError, RwLock};

/// Value stored under a memory key.
#[derive(Debug, Clone)]
pub enum MemoryValue {
    Text(String),
    Block(Arc<MemoryBlock>),
}

#[derive(Debug, Default)]
struct Entries {
    order: Vec<String>,
    values: HashMap<String, MemoryValue>,
}

impl Entries {
    fn insert(&mut self, key: String, value: MemoryValue) {
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.values.insert(key, value);
    }
}

/// Hierarchical, insertion-ordered key/value context injected into prompts.
///
/// All operations go through a reader/writer lock, so a block can be shared
/// between concurrent skill branches behind an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryBlock {
    entries: RwLock<Entries>,
}

impl MemoryBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a string leaf. Re-adding a key replaces the value in place.
    pub fn add_string(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write()
            .insert(key.into(), MemoryValue::Text(value.into()));
    }

    /// Store a nested block. Re-adding a key replaces the value in place.
    pub fn add_block(&self, key: impl Into<String>, block: MemoryBlock) {
        self.write()
            .insert(key.into(), MemoryValue::Block(Arc::new(block)));
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self.write();
        if entries.values.remove(key).is_some() {
            entries.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.read().values.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.read().values.get(key) {
            Some(MemoryValue::Text(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<MemoryValue> {
        self.read().values.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().order.is_empty()
    }

    /// Render as nested tagged text, in insertion order.
    ///
    /// ```text
    /// user_id: 42
    /// <UserDetails>
    ///   country: United Kingdom
    /// </UserDetails>
    /// ```
    pub fn parse(&self) -> String {
        let mut out = String::new();
        self.render(0, &mut out);
        out
    }

    fn render(&self, depth: usize, out: &mut String) {
        let entries = self.read();
        let indent = "  ".repeat(depth);
        for key in &entries.order {
            match entries.values.get(key) {
                Some(MemoryValue::Text(value)) => {
                    let _ = writeln!(out, "{indent}{key}: {value}");
                }
                Some(MemoryValue::Block(block)) => {
                    let _ = writeln!(out, "{indent}<{key}>");
                    block.render(depth + 1, out);
                    let _ = writeln!(out, "{indent}</{key}>");
                }
                None => {}
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for MemoryBlock {
    /// Deep copy; nested blocks are copied as well.
    fn clone(&self) -> Self {
        let copy = MemoryBlock::new();
        let entries = self.read();
        for key in &entries.order {
            match entries.values.get(key) {
                Some(MemoryValue::Text(value)) => copy.add_string(key.clone(), value.clone()),
                Some(MemoryValue::Block(block)) => {
                    copy.add_block(key.clone(), block.as_ref().clone())
                }
                None => {}
            }
        }
        copy
    }
}
