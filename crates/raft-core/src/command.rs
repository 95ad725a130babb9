//! # command
//!
//! why: let applications carry their own payload types through the log without the log knowing them
//! relations: used by log.rs to encode and rebuild entries, registry handed to raft-storage's Log
//! what: Command capability, NamedCommand typed helper, CommandRegistryBuilder, CommandRegistry

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// An application-defined payload carried by a log entry.
///
/// Object safe so entries can hold any registered type behind a `Box`.
/// Most applications implement [`NamedCommand`] instead and get this for free.
pub trait Command: fmt::Debug + Send + Sync + 'static {
    /// Stable type name written to disk and used for registry lookup.
    fn name(&self) -> &str;

    /// Serialize the payload.
    fn encode(&self) -> serde_json::Result<Vec<u8>>;

    /// Replace this instance's contents with the payload in `bytes`.
    fn decode(&mut self, bytes: &[u8]) -> serde_json::Result<()>;

    fn clone_box(&self) -> Box<dyn Command>;

    fn as_any(&self) -> &dyn Any;
}

/// Typed definition of a command whose payload is JSON via serde.
///
/// `Default` is the empty instance the registry hands out as a decode target.
pub trait NamedCommand:
    Serialize + DeserializeOwned + Default + Clone + fmt::Debug + Send + Sync + 'static
{
    const NAME: &'static str;
}

impl<T: NamedCommand> Command for T {
    fn name(&self) -> &str {
        T::NAME
    }

    fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    fn decode(&mut self, bytes: &[u8]) -> serde_json::Result<()> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Clone for Box<dyn Command> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Command with an empty payload, written as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoopCommand {}

impl NamedCommand for NoopCommand {
    const NAME: &'static str = "noop";
}

type Constructor = fn() -> Box<dyn Command>;

fn construct<T: NamedCommand>() -> Box<dyn Command> {
    Box::new(T::default())
}

/// Collects command types during startup.
///
/// Registration only happens here; [`build`](Self::build) freezes the set
/// into a [`CommandRegistry`] that can be shared freely across threads.
#[derive(Default)]
pub struct CommandRegistryBuilder {
    types: HashMap<String, Constructor>,
}

impl CommandRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `T::NAME`.
    ///
    /// Fails if the name is empty or contains whitespace (it could not be
    /// read back from a log line) or if the name is already taken.
    pub fn add_command_type<T: NamedCommand>(&mut self) -> Result<&mut Self, RegistryError> {
        let name = T::NAME;
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if self.types.contains_key(name) {
            return Err(RegistryError::DuplicateCommandType(name.to_string()));
        }
        self.types.insert(name.to_string(), construct::<T>);
        Ok(self)
    }

    /// Chaining form of [`add_command_type`](Self::add_command_type) for setup code.
    ///
    /// # Panics
    ///
    /// Panics on an invalid or duplicate name: both are programming errors
    /// that must stop the process before any log is opened.
    pub fn register<T: NamedCommand>(mut self) -> Self {
        if let Err(e) = self.add_command_type::<T>() {
            panic!("raft-core: {e}");
        }
        self
    }

    pub fn build(self) -> CommandRegistry {
        CommandRegistry { types: self.types }
    }
}

/// Immutable snapshot of registered command types.
pub struct CommandRegistry {
    types: HashMap<String, Constructor>,
}

impl CommandRegistry {
    pub fn builder() -> CommandRegistryBuilder {
        CommandRegistryBuilder::new()
    }

    /// Fresh empty instance of the type registered under `name`.
    pub fn new_command(&self, name: &str) -> Result<Box<dyn Command>, RegistryError> {
        self.types
            .get(name)
            .map(|construct| construct())
            .ok_or_else(|| RegistryError::UnregisteredCommandType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("types", &self.names())
            .finish()
    }
}
