use crate::loader::DictionarySource;
use crate::{CommandDefinition, DirectoryError, PayloadTypeDefinition, Result};
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{debug, info};

/// Immutable view of both dictionaries at one point in time.
///
/// Lookups are linear scans; dictionaries hold tens to low hundreds of entries.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Dictionary {
    commands: Vec<CommandDefinition>,
    payload_types: Vec<PayloadTypeDefinition>,
}

impl Dictionary {
    /// Builds a snapshot, dropping inactive definitions.
    pub fn new(
        commands: Vec<CommandDefinition>,
        payload_types: Vec<PayloadTypeDefinition>,
    ) -> Self {
        Self {
            commands: active_commands(commands),
            payload_types: active_payload_types(payload_types),
        }
    }

    pub fn commands(&self) -> &[CommandDefinition] {
        &self.commands
    }

    pub fn payload_types(&self) -> &[PayloadTypeDefinition] {
        &self.payload_types
    }

    pub fn command_by_code(&self, code: u8) -> Option<&CommandDefinition> {
        self.commands.iter().find(|c| c.code == code)
    }

    pub fn command_by_name(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn payload_type_by_code(&self, code: u8) -> Option<&PayloadTypeDefinition> {
        self.payload_types.iter().find(|p| p.code == code)
    }

    /// Finds the payload type registered for a semantic type name (case-insensitive).
    pub fn payload_type_by_name(&self, semantic_type: &str) -> Option<&PayloadTypeDefinition> {
        let wanted = semantic_type.trim();
        self.payload_types
            .iter()
            .find(|p| p.semantic_type.trim().eq_ignore_ascii_case(wanted))
    }

    pub fn summary(&self) -> RefreshSummary {
        RefreshSummary {
            commands: self.commands.len(),
            payload_types: self.payload_types.len(),
        }
    }

    fn upsert_command(&mut self, def: CommandDefinition) {
        let pos = self.commands.iter().position(|c| c.code == def.code);
        match (pos, def.is_active) {
            (Some(i), true) => self.commands[i] = def,
            (Some(i), false) => {
                self.commands.remove(i);
            }
            (None, true) => self.commands.push(def),
            (None, false) => {}
        }
    }

    fn upsert_payload_type(&mut self, def: PayloadTypeDefinition) {
        let pos = self.payload_types.iter().position(|p| p.code == def.code);
        match (pos, def.is_active) {
            (Some(i), true) => self.payload_types[i] = def,
            (Some(i), false) => {
                self.payload_types.remove(i);
            }
            (None, true) => self.payload_types.push(def),
            (None, false) => {}
        }
    }
}

fn active_commands(commands: Vec<CommandDefinition>) -> Vec<CommandDefinition> {
    commands.into_iter().filter(|c| c.is_active).collect()
}

fn active_payload_types(types: Vec<PayloadTypeDefinition>) -> Vec<PayloadTypeDefinition> {
    types.into_iter().filter(|p| p.is_active).collect()
}

/// Counts reported after a bulk refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub commands: usize,
    pub payload_types: usize,
}

/// Owner of the current dictionary snapshot.
///
/// Every write builds a new [`Dictionary`] and swaps it in atomically, so a reader holding
/// a snapshot never observes a half-applied refresh.
#[derive(Debug, Default)]
pub struct Directory {
    current: ArcSwap<Dictionary>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dictionary(dictionary: Dictionary) -> Self {
        Self {
            current: ArcSwap::from_pointee(dictionary),
        }
    }

    /// Current snapshot. Hold it for the duration of one decode/encode call.
    pub fn snapshot(&self) -> Arc<Dictionary> {
        self.current.load_full()
    }

    pub fn replace_commands(&self, commands: Vec<CommandDefinition>) {
        let commands = active_commands(commands);
        self.current.rcu(|cur| Dictionary {
            commands: commands.clone(),
            payload_types: cur.payload_types.clone(),
        });
        debug!(count = commands.len(), "command dictionary replaced");
    }

    pub fn replace_payload_types(&self, payload_types: Vec<PayloadTypeDefinition>) {
        let payload_types = active_payload_types(payload_types);
        self.current.rcu(|cur| Dictionary {
            commands: cur.commands.clone(),
            payload_types: payload_types.clone(),
        });
        debug!(count = payload_types.len(), "payload type dictionary replaced");
    }

    /// Point update after a single edit. An inactive definition removes the entry.
    pub fn upsert_command(&self, def: CommandDefinition) {
        debug!(code = def.code, name = %def.name, active = def.is_active, "upserting command");
        self.current.rcu(|cur| {
            let mut next = Dictionary::clone(cur);
            next.upsert_command(def.clone());
            next
        });
    }

    pub fn upsert_payload_type(&self, def: PayloadTypeDefinition) {
        debug!(
            code = def.code,
            semantic_type = %def.semantic_type,
            active = def.is_active,
            "upserting payload type"
        );
        self.current.rcu(|cur| {
            let mut next = Dictionary::clone(cur);
            next.upsert_payload_type(def.clone());
            next
        });
    }

    pub fn find_command_by_code(&self, code: u8) -> Option<CommandDefinition> {
        self.current.load().command_by_code(code).cloned()
    }

    pub fn find_command_by_name(&self, name: &str) -> Option<CommandDefinition> {
        self.current.load().command_by_name(name).cloned()
    }

    pub fn find_payload_type_by_code(&self, code: u8) -> Option<PayloadTypeDefinition> {
        self.current.load().payload_type_by_code(code).cloned()
    }

    /// Reloads both dictionaries from the persistence collaborator and swaps them in as
    /// one snapshot. On failure the current snapshot is left untouched.
    pub fn refresh_from(&self, source: &dyn DictionarySource) -> Result<RefreshSummary> {
        let loaded = source
            .load_all()
            .map_err(|e| DirectoryError::Source(format!("{e:#}")))?;
        let next = Dictionary::new(loaded.commands, loaded.payload_types);
        let summary = next.summary();
        self.current.store(Arc::new(next));
        info!(
            commands = summary.commands,
            payload_types = summary.payload_types,
            "dictionary refreshed"
        );
        Ok(summary)
    }
}
