use std::{any::Any, collections::HashMap};

use ember_nbt::{NbtTag, data_view::DataView};
use ember_util::math::vector3::Vector3;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum EntityError {
    #[error("Record has no id")]
    MissingId,
    #[error("No type is registered for {0}")]
    UnknownType(String),
    #[error("{0} has no valid Pos")]
    MissingPosition(String),
    #[error("Record has no valid {0}")]
    InvalidField(&'static str),
    #[error("Record of {found} was given to {expected}")]
    TypeMismatch { expected: String, found: String },
    #[error("{0}")]
    Custom(String),
}

/// An entity that can live in a chunk and be written with it.
pub trait Entity: Send + Sync {
    fn identifier(&self) -> &str;

    fn position(&self) -> Vector3<f64>;

    /// Entities such as players are saved elsewhere and skipped when their chunk is written.
    fn should_save(&self) -> bool {
        true
    }

    /// Writes every field except `id` and `Pos`.
    fn write_nbt(&self, nbt: &mut DataView) -> Result<(), EntityError>;

    fn read_nbt(&mut self, nbt: &DataView) -> Result<(), EntityError>;

    fn write_record(&self) -> Result<DataView, EntityError> {
        let mut nbt = DataView::new();
        nbt.set("id", self.identifier());
        let position = self.position();
        nbt.set(
            "Pos",
            vec![
                NbtTag::Double(position.x),
                NbtTag::Double(position.y),
                NbtTag::Double(position.z),
            ],
        );
        self.write_nbt(&mut nbt)?;
        Ok(nbt)
    }

    fn as_any(&self) -> &dyn Any;
}

/// Reads the `Pos` of a record, which must be exactly three doubles.
pub fn record_position(record: &DataView) -> Option<Vector3<f64>> {
    match record.get_doubles("Pos")?.as_slice() {
        [x, y, z] => Some(Vector3::new(*x, *y, *z)),
        _ => None,
    }
}

pub type EntityFactory = Box<dyn Fn(Vector3<f64>) -> Box<dyn Entity> + Send + Sync>;

/// Entity ids and how to construct them. Built once at startup and only read afterwards.
#[derive(Default)]
pub struct EntityRegistry {
    factories: HashMap<String, EntityFactory>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: &str,
        factory: impl Fn(Vector3<f64>) -> Box<dyn Entity> + Send + Sync + 'static,
    ) {
        if self
            .factories
            .insert(id.to_string(), Box::new(factory))
            .is_some()
        {
            log::warn!("Entity type {id} was registered twice, keeping the last one");
        }
    }

    /// Registers `id` as a [`StoredEntity`], which keeps its record as is.
    pub fn register_stored(&mut self, id: &str) {
        let owned = id.to_string();
        self.register(id, move |position| {
            Box::new(StoredEntity::new(owned.clone(), position))
        });
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Builds an entity from a saved record. The record must carry a registered `id` and a
    /// `Pos`; there is no fallback position.
    pub fn create(&self, record: &DataView) -> Result<Box<dyn Entity>, EntityError> {
        let id = record.get_string("id").ok_or(EntityError::MissingId)?;
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| EntityError::UnknownType(id.to_string()))?;
        let position =
            record_position(record).ok_or_else(|| EntityError::MissingPosition(id.to_string()))?;

        let mut entity = factory(position);
        entity.read_nbt(record)?;
        Ok(entity)
    }
}

/// An entity without behavior that carries every field of its record through a load and save.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEntity {
    id: String,
    position: Vector3<f64>,
    fields: DataView,
}

impl StoredEntity {
    pub fn new(id: String, position: Vector3<f64>) -> Self {
        Self {
            id,
            position,
            fields: DataView::new(),
        }
    }

    pub fn fields(&self) -> &DataView {
        &self.fields
    }
}

impl Entity for StoredEntity {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn position(&self) -> Vector3<f64> {
        self.position
    }

    fn write_nbt(&self, nbt: &mut DataView) -> Result<(), EntityError> {
        nbt.extend(self.fields.clone());
        Ok(())
    }

    fn read_nbt(&mut self, nbt: &DataView) -> Result<(), EntityError> {
        self.fields = nbt
            .iter()
            .filter(|(key, _)| !matches!(*key, "id" | "Pos"))
            .map(|(key, tag)| (key.to_string(), tag.clone()))
            .collect();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
