//! Struct layout builder
//!
//! Scripts describe a struct as a flat sequence where a name binds to the
//! type right before it: `int32, "x", int32, "y", double`. Unnamed members
//! stay reachable by position.

use super::{TypeDescriptor, TypeRegistry};
use crate::error::{FfiError, FfiResult};

/// One entry of a struct description
#[derive(Debug, Clone)]
pub enum LayoutItem<'a> {
    Type(TypeDescriptor),
    Name(&'a str),
}

impl From<TypeDescriptor> for LayoutItem<'_> {
    fn from(descriptor: TypeDescriptor) -> Self {
        LayoutItem::Type(descriptor)
    }
}

impl<'a> From<&'a str> for LayoutItem<'a> {
    fn from(name: &'a str) -> Self {
        LayoutItem::Name(name)
    }
}

/// Incremental struct description
pub struct StructBuilder<'r> {
    registry: &'r TypeRegistry,
    members: Vec<(TypeDescriptor, Option<String>)>,
    error: Option<FfiError>,
}

impl<'r> StructBuilder<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self {
            registry,
            members: Vec::new(),
            error: None,
        }
    }

    /// Append an unnamed member
    pub fn member(mut self, descriptor: TypeDescriptor) -> Self {
        self.members.push((descriptor, None));
        self
    }

    /// Append a named member
    pub fn named(self, descriptor: TypeDescriptor, name: &str) -> Self {
        self.member(descriptor).name(name)
    }

    /// Name the most recently added member
    pub fn name(mut self, name: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.members.last_mut() {
            None => {
                self.error = Some(FfiError::Layout(format!("name '{}' has no preceding type", name)));
            }
            Some((_, Some(existing))) => {
                self.error = Some(FfiError::Layout(format!(
                    "name '{}' follows '{}' without a type in between",
                    name, existing
                )));
            }
            Some((_, slot)) => *slot = Some(name.to_string()),
        }
        self
    }

    pub fn build(self) -> FfiResult<TypeDescriptor> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let members: Vec<(TypeDescriptor, Option<&str>)> = self
            .members
            .iter()
            .map(|(descriptor, name)| (descriptor.clone(), name.as_deref()))
            .collect();
        self.registry.struct_of(&members)
    }
}

impl TypeRegistry {
    /// Struct descriptor from an alternating type/name sequence
    pub fn struct_from_items(&self, items: &[LayoutItem<'_>]) -> FfiResult<TypeDescriptor> {
        items
            .iter()
            .fold(StructBuilder::new(self), |builder, item| match item {
                LayoutItem::Type(descriptor) => builder.member(descriptor.clone()),
                LayoutItem::Name(name) => builder.name(name),
            })
            .build()
    }
}
