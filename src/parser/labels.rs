use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use super::parse_address;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("line {line}: expected name<TAB>hexAddress")]
    Malformed { line: usize },
    #[error("line {line}: bad address {text:?}")]
    BadAddress { line: usize, text: String },
}

/// Symbol names for guest addresses.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    by_addr: BTreeMap<u32, String>,
    by_name: HashMap<String, u32>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later entries for the same address replace earlier ones.
    pub fn insert(&mut self, name: String, addr: u32) {
        if let Some(old) = self.by_addr.insert(addr, name.clone()) {
            if self.by_name.get(&old) == Some(&addr) {
                self.by_name.remove(&old);
            }
        }
        self.by_name.insert(name, addr);
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn name_at(&self, addr: u32) -> Option<&str> {
        self.by_addr.get(&addr).map(String::as_str)
    }

    /// `name` or `name+0xOFF` for the closest label at or below `addr`.
    pub fn describe(&self, addr: u32) -> String {
        match self.by_addr.range(..=addr).next_back() {
            Some((&base, name)) if base == addr => name.clone(),
            Some((&base, name)) => format!("{}+0x{:x}", name, addr - base),
            None => format!("0x{:08x}", addr),
        }
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }
}

/// Parses `name<TAB>hexAddress` lines. Blank lines are skipped.
pub fn parse_label_map(text: &str) -> Result<LabelMap, LabelError> {
    let mut map = LabelMap::new();
    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let (name, addr) = raw
            .split_once('\t')
            .ok_or(LabelError::Malformed { line })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(LabelError::Malformed { line });
        }
        let addr_text = addr.trim();
        let addr = parse_address(addr_text).ok_or_else(|| LabelError::BadAddress {
            line,
            text: addr_text.to_string(),
        })?;
        map.insert(name.to_string(), addr);
    }
    Ok(map)
}
