//! Per-type persistence capabilities.
//!
//! [`Persist`] is the hook a type implements (usually through
//! `#[derive(Persist)]`) to describe its fields. [`Field`] is implemented by
//! every type that can appear as a field value: primitives, strings,
//! collections, nested `Persist` types and [`Entity`] references.
//! [`OwnedField`] covers the owning entity relationship, where the entity's
//! own state is encoded in full next to its id.

use std::collections::{BTreeMap, HashMap};

use super::context::{DeserializeContext, SerializeContext};
use super::error::{DeserializeError, SerializeError};
use super::value::Value;
use crate::entity::Entity;

/// Field description of a persistable type.
///
/// Implementations write fields in declaration order and read them back by
/// key. A missing key leaves the field untouched.
///
/// ```ignore
/// #[derive(Persist, Clone, Default)]
/// struct Door {
///     open: bool,
///     #[persist(renamed_from = "lock")]
///     latch: Option<Entity>,
/// }
/// ```
pub trait Persist {
    fn serialize_fields(&self, ctx: &mut SerializeContext<'_>) -> Result<(), SerializeError>;

    fn deserialize_fields(&mut self, ctx: &mut DeserializeContext<'_>)
        -> Result<(), DeserializeError>;
}

/// A value that can be stored under a key or as a list element.
pub trait Field: Sized {
    /// Whether the value is (or contains) an entity reference. Reference
    /// values are only assigned once identity resolution has finished.
    const REFERENCE: bool = false;

    /// Encodes the value. `None` means nothing is written.
    fn write_value(&self, ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError>;

    /// Decodes `node` into `self`.
    fn read_value(
        &mut self,
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<(), DeserializeError> {
        if let Some(value) = Self::read_element(node, ctx)? {
            *self = value;
        }
        Ok(())
    }

    /// Decodes a fresh value. `None` means there is nothing to assign yet.
    fn read_element(
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<Option<Self>, DeserializeError>;
}

/// Owning entity relationship: writes `{"@id": <composite id>, ..state}`.
pub trait OwnedField {
    fn write_owned(&self, ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError>;

    fn read_owned(
        &mut self,
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<(), DeserializeError>;
}

fn mismatch(expected: &'static str, node: &Value) -> DeserializeError {
    DeserializeError::TypeMismatch {
        expected,
        found: node.kind(),
    }
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

macro_rules! integer_field {
    ($variant:ident as $wide:ty: $($ty:ty),*) => {$(
        impl Field for $ty {
            fn write_value(
                &self,
                _ctx: &mut SerializeContext<'_>,
            ) -> Result<Option<Value>, SerializeError> {
                Ok(Some(Value::$variant(*self as $wide)))
            }

            fn read_element(
                node: &Value,
                _ctx: &mut DeserializeContext<'_>,
            ) -> Result<Option<Self>, DeserializeError> {
                let value = match node {
                    Value::I64(n) => <$ty>::try_from(*n).ok(),
                    Value::U64(n) => <$ty>::try_from(*n).ok(),
                    _ => None,
                };
                value.map(Some).ok_or_else(|| mismatch(stringify!($ty), node))
            }
        }
    )*};
}

integer_field!(I64 as i64: i8, i16, i32, i64, isize);
integer_field!(U64 as u64: u8, u16, u32, u64, usize);

macro_rules! float_field {
    ($($ty:ty),*) => {$(
        impl Field for $ty {
            fn write_value(
                &self,
                _ctx: &mut SerializeContext<'_>,
            ) -> Result<Option<Value>, SerializeError> {
                Ok(Some(Value::F64(*self as f64)))
            }

            fn read_element(
                node: &Value,
                _ctx: &mut DeserializeContext<'_>,
            ) -> Result<Option<Self>, DeserializeError> {
                match node {
                    Value::F64(n) => Ok(Some(*n as $ty)),
                    Value::I64(n) => Ok(Some(*n as $ty)),
                    Value::U64(n) => Ok(Some(*n as $ty)),
                    _ => Err(mismatch(stringify!($ty), node)),
                }
            }
        }
    )*};
}

float_field!(f32, f64);

impl Field for bool {
    fn write_value(&self, _ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError> {
        Ok(Some(Value::Bool(*self)))
    }

    fn read_element(
        node: &Value,
        _ctx: &mut DeserializeContext<'_>,
    ) -> Result<Option<Self>, DeserializeError> {
        match node {
            Value::Bool(b) => Ok(Some(*b)),
            _ => Err(mismatch("bool", node)),
        }
    }
}

impl Field for String {
    fn write_value(&self, _ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError> {
        Ok(Some(Value::String(self.clone())))
    }

    fn read_element(
        node: &Value,
        _ctx: &mut DeserializeContext<'_>,
    ) -> Result<Option<Self>, DeserializeError> {
        match node {
            Value::String(s) => Ok(Some(s.clone())),
            _ => Err(mismatch("string", node)),
        }
    }
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

impl Field for Entity {
    const REFERENCE: bool = true;

    fn write_value(&self, ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError> {
        Ok(ctx.entity_id(*self)?.map(Value::String))
    }

    fn read_element(
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<Option<Self>, DeserializeError> {
        match node {
            Value::Null => Ok(None),
            Value::String(text) => {
                let id = DeserializeContext::parse_id(text)?;
                ctx.resolve(&id)
            }
            _ => Err(mismatch("reference", node)),
        }
    }
}

impl OwnedField for Entity {
    fn write_owned(&self, ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError> {
        ctx.owned_value(*self)
    }

    fn read_owned(
        &mut self,
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<(), DeserializeError> {
        if let Some(entity) = ctx.read_owned_entity(node)? {
            *self = entity;
        }
        Ok(())
    }
}

impl OwnedField for Option<Entity> {
    fn write_owned(&self, ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError> {
        match self {
            Some(entity) => ctx.owned_value(*entity),
            None => Ok(None),
        }
    }

    fn read_owned(
        &mut self,
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<(), DeserializeError> {
        if let Some(entity) = ctx.read_owned_entity(node)? {
            *self = Some(entity);
        }
        Ok(())
    }
}

impl OwnedField for Vec<Entity> {
    fn write_owned(&self, ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError> {
        let mut items = Vec::with_capacity(self.len());
        for &entity in self {
            items.push(ctx.owned_value(entity)?.unwrap_or(Value::Null));
        }
        Ok(Some(Value::List(items)))
    }

    fn read_owned(
        &mut self,
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<(), DeserializeError> {
        let Value::List(items) = node else {
            return Err(mismatch("list", node));
        };
        let mut entities = Vec::with_capacity(items.len());
        for item in items {
            if matches!(item, Value::Null) {
                continue;
            }
            if let Some(entity) = ctx.read_owned_entity(item)? {
                entities.push(entity);
            }
        }
        if ctx.phase() > 0 {
            *self = entities;
        }
        Ok(())
    }
}

/// Keeps one slot per encoded element: a `Null` item, or an owned entity
/// that could not be matched, reads back as `None`.
impl OwnedField for Vec<Option<Entity>> {
    fn write_owned(&self, ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError> {
        let mut items = Vec::with_capacity(self.len());
        for slot in self {
            let item = match slot {
                Some(entity) => ctx.owned_value(*entity)?,
                None => None,
            };
            items.push(item.unwrap_or(Value::Null));
        }
        Ok(Some(Value::List(items)))
    }

    fn read_owned(
        &mut self,
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<(), DeserializeError> {
        let Value::List(items) = node else {
            return Err(mismatch("list", node));
        };
        let mut slots = Vec::with_capacity(items.len());
        for item in items {
            slots.push(match item {
                Value::Null => None,
                _ => ctx.read_owned_entity(item)?,
            });
        }
        if ctx.phase() > 0 {
            *self = slots;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

impl<T: Field> Field for Option<T> {
    const REFERENCE: bool = T::REFERENCE;

    fn write_value(&self, ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError> {
        match self {
            Some(value) => value.write_value(ctx),
            None => Ok(None),
        }
    }

    /// `Null` decodes to `None`, as does a reference that did not resolve,
    /// so list slots survive a round trip.
    fn read_element(
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<Option<Self>, DeserializeError> {
        if T::REFERENCE && ctx.phase() == 0 {
            if !matches!(node, Value::Null) {
                T::read_element(node, ctx)?;
            }
            return Ok(None);
        }
        match node {
            Value::Null => Ok(Some(None)),
            _ => Ok(Some(T::read_element(node, ctx)?)),
        }
    }
}

impl<T: Field> Field for Vec<T> {
    const REFERENCE: bool = T::REFERENCE;

    fn write_value(&self, ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError> {
        let mut items = Vec::with_capacity(self.len());
        for item in self {
            items.push(item.write_value(ctx)?.unwrap_or(Value::Null));
        }
        Ok(Some(Value::List(items)))
    }

    /// Rebuilds the list from scratch. Reference lists are only visited,
    /// not rebuilt, while identities are still being resolved.
    ///
    /// Elements that decode to nothing (a null or unresolved plain `Entity`)
    /// are skipped; `Vec<Option<Entity>>` keeps one slot per element.
    fn read_value(
        &mut self,
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<(), DeserializeError> {
        let Value::List(items) = node else {
            return Err(mismatch("list", node));
        };
        if T::REFERENCE && ctx.phase() == 0 {
            for item in items {
                T::read_element(item, ctx)?;
            }
            return Ok(());
        }
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            if let Some(value) = T::read_element(item, ctx)? {
                values.push(value);
            }
        }
        *self = values;
        Ok(())
    }

    fn read_element(
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<Option<Self>, DeserializeError> {
        let mut values = Vec::new();
        values.read_value(node, ctx)?;
        Ok(assignable::<T>(ctx).then_some(values))
    }
}

/// Whether a freshly decoded container of `T` may be assigned in the
/// current phase.
fn assignable<T: Field>(ctx: &DeserializeContext<'_>) -> bool {
    !(T::REFERENCE && ctx.phase() == 0)
}

fn write_entries<'a, T: Field + 'a>(
    entries: impl Iterator<Item = (&'a String, &'a T)>,
    ctx: &mut SerializeContext<'_>,
) -> Result<Option<Value>, SerializeError> {
    let mut out = Vec::new();
    for (key, value) in entries {
        if let Some(v) = value.write_value(ctx)? {
            out.push((key.clone(), v));
        }
    }
    Ok(Some(Value::Map(out)))
}

fn read_entries<T: Field>(
    node: &Value,
    ctx: &mut DeserializeContext<'_>,
    mut insert: impl FnMut(String, T),
) -> Result<bool, DeserializeError> {
    let Value::Map(entries) = node else {
        return Err(mismatch("map", node));
    };
    if T::REFERENCE && ctx.phase() == 0 {
        for (_, value) in entries {
            T::read_element(value, ctx)?;
        }
        return Ok(false);
    }
    for (key, value) in entries {
        if let Some(v) = T::read_element(value, ctx)? {
            insert(key.clone(), v);
        }
    }
    Ok(true)
}

/// Written with sorted keys so repeated saves produce identical text.
impl<T: Field> Field for HashMap<String, T> {
    const REFERENCE: bool = T::REFERENCE;

    fn write_value(&self, ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        write_entries(entries.into_iter(), ctx)
    }

    fn read_value(
        &mut self,
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<(), DeserializeError> {
        let mut map = HashMap::new();
        if read_entries::<T>(node, ctx, |k, v| {
            map.insert(k, v);
        })? {
            *self = map;
        }
        Ok(())
    }

    fn read_element(
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<Option<Self>, DeserializeError> {
        let mut map = HashMap::new();
        map.read_value(node, ctx)?;
        Ok(assignable::<T>(ctx).then_some(map))
    }
}

impl<T: Field> Field for BTreeMap<String, T> {
    const REFERENCE: bool = T::REFERENCE;

    fn write_value(&self, ctx: &mut SerializeContext<'_>) -> Result<Option<Value>, SerializeError> {
        write_entries(self.iter(), ctx)
    }

    fn read_value(
        &mut self,
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<(), DeserializeError> {
        let mut map = BTreeMap::new();
        if read_entries::<T>(node, ctx, |k, v| {
            map.insert(k, v);
        })? {
            *self = map;
        }
        Ok(())
    }

    fn read_element(
        node: &Value,
        ctx: &mut DeserializeContext<'_>,
    ) -> Result<Option<Self>, DeserializeError> {
        let mut map = BTreeMap::new();
        map.read_value(node, ctx)?;
        Ok(assignable::<T>(ctx).then_some(map))
    }
}
